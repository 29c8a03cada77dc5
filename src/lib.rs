//! umbra: an embedded, single-file, transactional B+Tree key/value store.
//!
//! A store maps byte-string keys of a fixed configured size to arbitrary
//! byte-string values, ordered lexicographically. Crash consistency comes
//! from dual-root shadow paging: mutated nodes are written copy-on-write to
//! freshly allocated blocks, and every commit writes a complete new root
//! descriptor into the inactive header slot before activating it with a
//! single one-byte selector write, so the previously committed tree stays
//! intact on disk until the flip. Freed blocks are recycled through an
//! on-disk free-list chain, and decoded index nodes are held in a bounded
//! LRU cache with its own lock so concurrent readers stay off the
//! structural lock's hot path.
//!
//! ```no_run
//! use std::sync::Arc;
//! use umbra::{BTreeDatabase, FileDevice, StoreOptions};
//!
//! # fn main() -> umbra::Result<()> {
//! let device = Arc::new(FileDevice::open("universe.db")?);
//! let db = BTreeDatabase::new(
//!     StoreOptions {
//!         key_size: 8,
//!         content_id: b"region-v1".to_vec(),
//!         ..StoreOptions::default()
//!     },
//!     device,
//! )?;
//! db.open()?;
//! db.insert(b"region:a", b"payload")?;
//! assert_eq!(db.find(b"region:a")?.as_deref(), Some(b"payload".as_slice()));
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod blocks;
pub mod cache;
pub mod db;
pub mod device;
pub mod error;
pub mod format;
pub mod hash;
pub mod node;
pub mod tree;

pub use db::{BTreeDatabase, StoreOptions};
pub use device::{BlockDevice, FileDevice, MemDevice};
pub use error::{Result, StoreError};
pub use format::BlockId;
pub use hash::HashDatabase;
