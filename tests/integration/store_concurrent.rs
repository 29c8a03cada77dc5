#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use umbra::{BTreeDatabase, MemDevice, StoreOptions};

fn key(i: u32) -> [u8; 4] {
    i.to_be_bytes()
}

fn open_shared() -> Arc<BTreeDatabase> {
    let db = BTreeDatabase::new(
        StoreOptions {
            key_size: 4,
            content_id: b"concurrent".to_vec(),
            cache_size: 16,
            ..StoreOptions::default()
        },
        Arc::new(MemDevice::new()),
    )
    .unwrap();
    db.open().unwrap();
    Arc::new(db)
}

#[test]
fn concurrent_readers_see_consistent_results() {
    let db = open_shared();
    for i in 0..2000u32 {
        db.insert(&key(i), &key(i * 3)).unwrap();
    }

    let mut handles = Vec::new();
    for t in 0..8u32 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            // every thread hammers a different stride so the shared index
            // cache sees plenty of concurrent reordering
            for round in 0..5 {
                for i in (t..2000).step_by(8) {
                    let got = db.find(&key(i)).unwrap();
                    assert_eq!(got.as_deref(), Some(key(i * 3).as_slice()), "round {round}");
                }
                assert!(!db.contains(&key(5000 + t)).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(db.record_count().unwrap(), 2000);
}

#[test]
fn readers_and_writer_interleave_safely() {
    let db = open_shared();
    for i in 0..500u32 {
        db.insert(&key(i), b"seed").unwrap();
    }
    let stop = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let db = Arc::clone(&db);
        let stop = Arc::clone(&stop);
        readers.push(thread::spawn(move || {
            let mut hits = 0u64;
            while !stop.load(Ordering::Relaxed) {
                for i in 0..500u32 {
                    // the seeded keys are never removed, so a shared-lock
                    // read must always observe them
                    if db.contains(&key(i)).unwrap() {
                        hits += 1;
                    } else {
                        panic!("seeded key {i} disappeared during writes");
                    }
                }
            }
            hits
        }));
    }

    for i in 500..1500u32 {
        db.insert(&key(i), &key(i)).unwrap();
        if i % 5 == 0 {
            db.remove(&key(i)).unwrap();
        }
    }
    thread::sleep(Duration::from_millis(20));
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }

    for i in 0..500u32 {
        assert_eq!(db.find(&key(i)).unwrap().as_deref(), Some(b"seed".as_slice()));
    }
}

#[test]
fn writer_excludes_readers_until_done() {
    let db = open_shared();
    db.set_auto_commit(false);
    for i in 0..100u32 {
        db.insert(&key(i), b"v").unwrap();
    }
    db.commit().unwrap();

    // a bulk remove plus rollback runs under one exclusive section per call;
    // readers in between must always see either all keys or all keys (the
    // rollback restores everything), never a torn subset going missing
    // permanently
    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let db = Arc::clone(&db);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                db.remove_range(&key(0), &key(100)).unwrap();
                db.rollback().unwrap();
            }
        })
    };

    for _ in 0..200 {
        let count = db.record_count().unwrap();
        assert!(count <= 100);
    }
    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();

    db.rollback().unwrap();
    assert_eq!(db.record_count().unwrap(), 100);
}
