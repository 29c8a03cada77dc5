#![allow(missing_docs)]

use std::sync::Arc;

use tempfile::tempdir;
use umbra::{BTreeDatabase, FileDevice, MemDevice, Result, StoreError, StoreOptions};

fn key(i: u32) -> [u8; 4] {
    i.to_be_bytes()
}

fn value(i: u32) -> Vec<u8> {
    key(i).repeat(3)
}

fn options() -> StoreOptions {
    StoreOptions {
        key_size: 4,
        content_id: b"universe-v1".to_vec(),
        ..StoreOptions::default()
    }
}

#[test]
fn thousand_keys_scenario() -> Result<()> {
    let db = BTreeDatabase::new(options(), Arc::new(MemDevice::new()))?;
    db.open()?;
    for i in 0..1000u32 {
        assert!(!db.insert(&key(i), &value(i))?);
    }
    db.commit()?;
    assert_eq!(db.record_count()?, 1000);
    assert_eq!(db.find(&key(3))?, Some(value(3)));

    let removed = db.remove_range(&key(500), &key(1000))?;
    db.commit()?;
    assert_eq!(removed.len(), 500);
    assert_eq!(db.record_count()?, 500);
    assert_eq!(db.find(&key(750))?, None);
    assert_eq!(db.find(&key(499))?, Some(value(499)));
    db.close()?;
    Ok(())
}

#[test]
fn values_survive_close_and_reopen() -> Result<()> {
    let dir = tempdir().map_err(StoreError::from)?;
    let path = dir.path().join("store.db");

    {
        let device = Arc::new(FileDevice::open(&path)?);
        let db = BTreeDatabase::new(options(), device)?;
        db.open()?;
        for i in 0..500u32 {
            db.insert(&key(i), &value(i))?;
        }
        db.commit()?;
        db.close()?;
    }

    let device = Arc::new(FileDevice::open(&path)?);
    let db = BTreeDatabase::new(options(), device)?;
    db.open()?;
    assert_eq!(db.record_count()?, 500);
    for i in 0..500u32 {
        assert_eq!(db.find(&key(i))?, Some(value(i)), "key {i} after reopen");
    }
    assert_eq!(db.find(&key(500))?, None);
    db.close()?;
    Ok(())
}

#[test]
fn overwrite_returns_replaced_and_keeps_latest() -> Result<()> {
    let db = BTreeDatabase::new(options(), Arc::new(MemDevice::new()))?;
    db.open()?;
    assert!(!db.insert(&key(9), b"first")?);
    assert!(db.insert(&key(9), b"second")?);
    assert_eq!(db.find(&key(9))?.as_deref(), Some(b"second".as_slice()));
    assert_eq!(db.record_count()?, 1);
    Ok(())
}

#[test]
fn geometry_is_read_back_from_existing_file() -> Result<()> {
    let device = Arc::new(MemDevice::new());
    {
        let db = BTreeDatabase::new(
            StoreOptions {
                block_size: 1024,
                key_size: 8,
                content_id: b"geom".to_vec(),
                ..StoreOptions::default()
            },
            Arc::clone(&device) as Arc<dyn umbra::BlockDevice>,
        )?;
        db.open()?;
        db.insert(b"all-8byt", b"payload")?;
        db.close()?;
    }

    // block/key size in the options are ignored for an existing file
    let db = BTreeDatabase::new(
        StoreOptions {
            block_size: 4096,
            key_size: 32,
            content_id: b"geom".to_vec(),
            ..StoreOptions::default()
        },
        device,
    )?;
    db.open()?;
    assert_eq!(db.find(b"all-8byt")?.as_deref(), Some(b"payload".as_slice()));
    Ok(())
}

#[test]
fn content_identifier_mismatch_is_corruption() -> Result<()> {
    let device = Arc::new(MemDevice::new());
    {
        let db = BTreeDatabase::new(options(), Arc::clone(&device) as Arc<dyn umbra::BlockDevice>)?;
        db.open()?;
        db.insert(&key(1), b"x")?;
        db.close()?;
    }
    let db = BTreeDatabase::new(
        StoreOptions {
            content_id: b"other-schema".to_vec(),
            ..options()
        },
        device,
    )?;
    assert!(matches!(
        db.open(),
        Err(StoreError::Corruption("content identifier mismatch"))
    ));
    Ok(())
}

#[test]
fn usage_errors_for_closed_store_and_bad_options() -> Result<()> {
    let db = BTreeDatabase::new(options(), Arc::new(MemDevice::new()))?;
    assert!(matches!(db.find(&key(1)), Err(StoreError::Usage(_))));
    assert!(matches!(db.insert(&key(1), b"x"), Err(StoreError::Usage(_))));
    assert!(!db.is_open());

    // zero key size is rejected at open
    let unset = BTreeDatabase::new(
        StoreOptions {
            key_size: 0,
            ..StoreOptions::default()
        },
        Arc::new(MemDevice::new()),
    )?;
    assert!(matches!(unset.open(), Err(StoreError::Usage(_))));

    db.open()?;
    assert!(matches!(db.open(), Err(StoreError::Usage(_))));
    db.close()?;
    Ok(())
}

#[test]
fn oversized_key_is_a_capacity_error() -> Result<()> {
    let db = BTreeDatabase::new(options(), Arc::new(MemDevice::new()))?;
    db.open()?;
    assert!(matches!(
        db.insert(b"five!", b"x"),
        Err(StoreError::Capacity(_))
    ));
    // short keys are right-padded with zero bytes
    assert!(!db.insert(b"ab", b"x")?);
    assert!(db.contains(b"ab\0\0")?);
    Ok(())
}
