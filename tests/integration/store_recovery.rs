#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use umbra::{BTreeDatabase, BlockDevice, MemDevice, Result, StoreOptions};

const BLOCK_SIZE: u64 = 256;
const HEADER_SIZE: u64 = 512;

fn key(i: u32) -> [u8; 4] {
    i.to_be_bytes()
}

fn options() -> StoreOptions {
    StoreOptions {
        block_size: BLOCK_SIZE as u32,
        key_size: 4,
        content_id: b"recovery".to_vec(),
        ..StoreOptions::default()
    }
}

fn block_offset(index: u32) -> u64 {
    HEADER_SIZE + index as u64 * BLOCK_SIZE
}

#[test]
fn recover_all_visits_every_committed_entry() -> Result<()> {
    let db = BTreeDatabase::new(options(), Arc::new(MemDevice::new()))?;
    db.open()?;
    for i in 0..200u32 {
        db.insert(&key(i), &key(i * 7))?;
    }

    let mut recovered = BTreeMap::new();
    let mut errors = 0;
    db.recover_all(
        |k, v| {
            recovered.insert(k.to_vec(), v.to_vec());
            Ok(())
        },
        |_, _| errors += 1,
    )?;

    assert_eq!(errors, 0);
    assert_eq!(recovered.len(), 200);
    for i in 0..200u32 {
        assert_eq!(recovered.get(key(i).as_slice()), Some(&key(i * 7).to_vec()));
    }
    Ok(())
}

#[test]
fn damaged_blocks_are_reported_and_skipped() -> Result<()> {
    let device = Arc::new(MemDevice::new());
    let db = BTreeDatabase::new(options(), Arc::clone(&device) as Arc<dyn umbra::BlockDevice>)?;
    db.open()?;
    for i in 0..200u32 {
        db.insert(&key(i), &key(i))?;
    }
    let total = db.total_block_count()? as u32;

    // stamp garbage markers over a few blocks, whatever they held
    for index in [1u32, total / 2, total - 1] {
        device.corrupt(block_offset(index), b"ZZ");
    }

    let mut recovered = 0usize;
    let mut reported = Vec::new();
    db.recover_all(
        |_, _| {
            recovered += 1;
            Ok(())
        },
        |block, _| reported.push(block),
    )?;

    assert!(!reported.is_empty(), "damaged blocks must be reported");
    assert!(recovered > 0, "undamaged leaves must still yield entries");
    assert!(recovered < 200 + reported.len() * 200, "sanity");
    Ok(())
}

#[test]
fn entries_survive_a_destroyed_root() -> Result<()> {
    let device = Arc::new(MemDevice::new());
    let db = BTreeDatabase::new(options(), Arc::clone(&device) as Arc<dyn umbra::BlockDevice>)?;
    db.open()?;
    for i in 0..300u32 {
        db.insert(&key(i), b"survives")?;
    }
    // several index levels exist now; smash every index block so ordinary
    // traversal is unusable, then pull the data out by linear scan
    let total = db.total_block_count()? as u32;
    db.close()?;

    let mut smashed = 0;
    for index in 0..total {
        let mut marker = [0u8; 2];
        device.read_at(block_offset(index), &mut marker)?;
        if &marker == b"IN" {
            device.corrupt(block_offset(index), b"??");
            smashed += 1;
        }
    }
    assert!(smashed > 0, "expected index blocks to smash");

    let db = BTreeDatabase::new(options(), device)?;
    db.open()?;
    let mut recovered = BTreeMap::new();
    let mut errors = 0;
    db.recover_all(
        |k, v| {
            recovered.insert(k.to_vec(), v.to_vec());
            Ok(())
        },
        |_, _| errors += 1,
    )?;

    assert_eq!(errors, smashed, "every smashed index block is reported");
    assert_eq!(recovered.len(), 300, "all leaf data is still reachable");
    for i in 0..300u32 {
        assert_eq!(recovered.get(key(i).as_slice()).map(Vec::as_slice), Some(b"survives".as_slice()));
    }
    Ok(())
}

#[test]
fn self_referential_child_pointer_is_corruption_not_a_hang() -> Result<()> {
    let device = Arc::new(MemDevice::new());
    let db = BTreeDatabase::new(options(), Arc::clone(&device) as Arc<dyn umbra::BlockDevice>)?;
    db.open()?;
    for i in 0..100u32 {
        db.insert(&key(i), &key(i))?;
    }
    let total = db.total_block_count()? as u32;
    db.close()?;

    // point every index block's leftmost child at the block itself; both
    // descent and ordered scans must fail fast instead of looping
    let mut bent = 0;
    for index in 0..total {
        let mut marker = [0u8; 2];
        device.read_at(block_offset(index), &mut marker)?;
        if &marker == b"IN" {
            device.corrupt(block_offset(index) + 5, &index.to_be_bytes());
            bent += 1;
        }
    }
    assert!(bent > 0, "expected index blocks to bend");

    let db = BTreeDatabase::new(options(), device)?;
    db.open()?;
    assert!(matches!(
        db.find(&key(0)),
        Err(umbra::StoreError::Corruption(_))
    ));
    assert!(matches!(
        db.for_all(|_, _| Ok(())),
        Err(umbra::StoreError::Corruption(_))
    ));
    Ok(())
}

#[test]
fn visitor_error_ends_the_scan() -> Result<()> {
    let db = BTreeDatabase::new(options(), Arc::new(MemDevice::new()))?;
    db.open()?;
    for i in 0..50u32 {
        db.insert(&key(i), b"v")?;
    }
    let mut seen = 0;
    let outcome = db.recover_all(
        |_, _| {
            seen += 1;
            if seen == 10 {
                Err(umbra::StoreError::Usage("enough"))
            } else {
                Ok(())
            }
        },
        |_, _| {},
    );
    assert!(outcome.is_err());
    assert_eq!(seen, 10);
    Ok(())
}
