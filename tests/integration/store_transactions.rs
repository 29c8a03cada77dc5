#![allow(missing_docs)]

use std::sync::Arc;

use umbra::{BTreeDatabase, BlockDevice, MemDevice, Result, StoreOptions};

fn key(i: u32) -> [u8; 4] {
    i.to_be_bytes()
}

fn open_manual(device: Arc<MemDevice>) -> Result<BTreeDatabase> {
    let db = BTreeDatabase::new(
        StoreOptions {
            block_size: 256,
            key_size: 4,
            content_id: b"txn".to_vec(),
            auto_commit: false,
            ..StoreOptions::default()
        },
        device,
    )?;
    db.open()?;
    Ok(db)
}

#[test]
fn rollback_restores_pre_transaction_state() -> Result<()> {
    let db = open_manual(Arc::new(MemDevice::new()))?;
    for i in 0..100u32 {
        db.insert(&key(i), &key(i))?;
    }
    db.commit()?;
    let committed_free = db.free_block_count()?;
    let committed_total = db.total_block_count()?;

    // arbitrary churn, then roll everything back; repeatable with no leak
    for round in 0..3 {
        for i in 50..150u32 {
            db.insert(&key(i), b"overwritten-or-new")?;
        }
        for i in 0..30u32 {
            db.remove(&key(i))?;
        }
        db.rollback()?;

        assert_eq!(db.record_count()?, 100, "round {round}");
        for i in 0..100u32 {
            assert_eq!(db.find(&key(i))?, Some(key(i).to_vec()), "round {round} key {i}");
        }
        for i in 100..150u32 {
            assert_eq!(db.find(&key(i))?, None, "round {round} key {i}");
        }
        assert_eq!(db.free_block_count()?, committed_free, "round {round}");
        assert_eq!(db.total_block_count()?, committed_total, "round {round}");
    }
    Ok(())
}

#[test]
fn uncommitted_changes_are_invisible_after_reopen() -> Result<()> {
    let device = Arc::new(MemDevice::new());
    {
        let db = open_manual(Arc::clone(&device))?;
        db.insert(&key(1), b"committed")?;
        db.commit()?;
        db.insert(&key(2), b"uncommitted")?;
        // auto-commit is off: close rolls the second insert back
        db.close()?;
    }
    let db = open_manual(device)?;
    assert_eq!(db.find(&key(1))?.as_deref(), Some(b"committed".as_slice()));
    assert_eq!(db.find(&key(2))?, None);
    assert_eq!(db.record_count()?, 1);
    Ok(())
}

#[test]
fn auto_commit_persists_every_mutation() -> Result<()> {
    let device = Arc::new(MemDevice::new());
    {
        let db = BTreeDatabase::new(
            StoreOptions {
                key_size: 4,
                content_id: b"txn".to_vec(),
                ..StoreOptions::default()
            },
            Arc::clone(&device) as Arc<dyn BlockDevice>,
        )?;
        db.open()?;
        db.insert(&key(7), b"auto")?;
        // no explicit commit
        db.close()?;
    }
    let db = BTreeDatabase::new(
        StoreOptions {
            key_size: 4,
            content_id: b"txn".to_vec(),
            ..StoreOptions::default()
        },
        device,
    )?;
    db.open()?;
    assert_eq!(db.find(&key(7))?.as_deref(), Some(b"auto".as_slice()));
    Ok(())
}

#[test]
fn set_auto_commit_toggles_at_runtime() -> Result<()> {
    let device = Arc::new(MemDevice::new());
    let db = open_manual(Arc::clone(&device))?;
    db.set_auto_commit(true);
    db.insert(&key(1), b"kept")?;
    db.set_auto_commit(false);
    db.insert(&key(2), b"dropped")?;
    db.rollback()?;

    assert_eq!(db.find(&key(1))?.as_deref(), Some(b"kept".as_slice()));
    assert_eq!(db.find(&key(2))?, None);
    Ok(())
}

#[test]
fn commit_is_a_noop_when_clean() -> Result<()> {
    let db = open_manual(Arc::new(MemDevice::new()))?;
    let total = db.total_block_count()?;
    db.commit()?;
    db.commit()?;
    assert_eq!(db.total_block_count()?, total);
    Ok(())
}

#[test]
fn rollback_after_mass_delete_restores_blocks() -> Result<()> {
    let db = open_manual(Arc::new(MemDevice::new()))?;
    for i in 0..200u32 {
        db.insert(&key(i), &[0xAB; 32])?;
    }
    db.commit()?;
    let free = db.free_block_count()?;

    db.remove_range(&key(0), &key(200))?;
    assert_eq!(db.record_count()?, 0);
    db.rollback()?;

    assert_eq!(db.record_count()?, 200);
    assert_eq!(db.free_block_count()?, free);
    for i in (0..200u32).step_by(17) {
        assert_eq!(db.find(&key(i))?, Some(vec![0xAB; 32]));
    }
    Ok(())
}

// Copies every byte of `device` into a fresh one, as a crash would leave
// them: header, committed blocks and whatever the open transaction wrote.
fn crash_image(device: &MemDevice) -> Result<Arc<MemDevice>> {
    let len = device.len()?;
    let mut bytes = vec![0u8; len as usize];
    device.read_at(0, &mut bytes)?;
    let image = Arc::new(MemDevice::new());
    image.write_at(0, &bytes)?;
    Ok(image)
}

#[test]
fn crash_during_open_transaction_preserves_committed_state() -> Result<()> {
    let device = Arc::new(MemDevice::new());
    let db = open_manual(Arc::clone(&device))?;
    for i in 0..100u32 {
        db.insert(&key(i), &key(i))?;
    }
    db.commit()?;

    // heavy uncommitted churn: the selector never flips, so a crash image
    // taken now must still read as the committed tree
    for i in 0..96u32 {
        db.remove(&key(i))?;
    }
    for i in 200..260u32 {
        db.insert(&key(i), b"uncommitted")?;
    }

    let db2 = open_manual(crash_image(&device)?)?;
    assert_eq!(db2.record_count()?, 100);
    for i in 0..100u32 {
        assert_eq!(db2.find(&key(i))?, Some(key(i).to_vec()), "key {i}");
    }
    assert_eq!(db2.find(&key(200))?, None);

    // the image must also survive a full scan and further writes
    let mut seen = 0;
    db2.for_all(|_, _| {
        seen += 1;
        Ok(())
    })?;
    assert_eq!(seen, 100);
    db2.insert(&key(500), b"after")?;
    db2.commit()?;
    assert_eq!(db2.record_count()?, 101);
    Ok(())
}

#[test]
fn crash_image_mid_flatten_preserves_committed_state() -> Result<()> {
    let device = Arc::new(MemDevice::new());
    let db = open_manual(Arc::clone(&device))?;
    for i in 0..300u32 {
        db.insert(&key(i), &key(i))?;
    }
    for i in 0..300u32 {
        if i % 5 != 0 {
            db.remove(&key(i))?;
        }
    }
    db.commit()?;

    db.flatten()?;
    let db2 = open_manual(crash_image(&device)?)?;
    assert_eq!(db2.record_count()?, 60);
    for i in (0..300u32).step_by(5) {
        assert_eq!(db2.find(&key(i))?, Some(key(i).to_vec()), "key {i}");
    }
    Ok(())
}

#[test]
fn selector_alternates_between_header_slots() -> Result<()> {
    // two commits in a row must land in different slots and the file must
    // stay readable after each
    let device = Arc::new(MemDevice::new());
    let db = open_manual(Arc::clone(&device))?;
    db.insert(&key(1), b"one")?;
    db.commit()?;
    db.insert(&key(2), b"two")?;
    db.commit()?;
    db.close()?;

    let db = open_manual(device)?;
    assert_eq!(db.record_count()?, 2);
    assert_eq!(db.find(&key(1))?.as_deref(), Some(b"one".as_slice()));
    assert_eq!(db.find(&key(2))?.as_deref(), Some(b"two".as_slice()));
    Ok(())
}
