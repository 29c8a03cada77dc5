//! Key-hashing façade: arbitrary-length keys over a fixed-digest core.
//!
//! Every key is hashed to a SHA-256 digest before delegating to the core
//! engine, so callers get unbounded keys at the cost of key order: digest
//! order is unrelated to key order, and no range operations are exposed.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::db::{BTreeDatabase, StoreOptions};
use crate::device::BlockDevice;
use crate::error::Result;

/// Key size of the underlying store, the SHA-256 digest width.
pub const HASH_KEY_SIZE: u32 = 32;

/// Wrapper over [`BTreeDatabase`] accepting arbitrary-length keys.
pub struct HashDatabase {
    inner: BTreeDatabase,
}

impl HashDatabase {
    /// Binds a hash store to `device`. The key size is fixed to the digest
    /// width; block size, cache size, content identifier and auto-commit
    /// pass through unchanged.
    pub fn new(mut options: StoreOptions, device: Arc<dyn BlockDevice>) -> Result<Self> {
        options.key_size = HASH_KEY_SIZE;
        Ok(Self {
            inner: BTreeDatabase::new(options, device)?,
        })
    }

    fn digest(key: &[u8]) -> [u8; 32] {
        Sha256::digest(key).into()
    }

    /// Opens the store.
    pub fn open(&self) -> Result<()> {
        self.inner.open()
    }

    /// Closes the store.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    /// True while the store is open.
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Toggles auto-commit at runtime.
    pub fn set_auto_commit(&self, enabled: bool) {
        self.inner.set_auto_commit(enabled);
    }

    /// True if `key` is present.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.inner.contains(&Self::digest(key))
    }

    /// Point lookup by arbitrary key bytes.
    pub fn find(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.find(&Self::digest(key))
    }

    /// Point lookup by string key (hashes the UTF-8 bytes).
    pub fn find_str(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.find(key.as_bytes())
    }

    /// Inserts or overwrites `key`; returns true on overwrite.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.inner.insert(&Self::digest(key), value)
    }

    /// Inserts by string key (hashes the UTF-8 bytes).
    pub fn insert_str(&self, key: &str, value: &[u8]) -> Result<bool> {
        self.insert(key.as_bytes(), value)
    }

    /// Removes `key`; returns true when it was present.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.inner.remove(&Self::digest(key))
    }

    /// Removes by string key (hashes the UTF-8 bytes).
    pub fn remove_str(&self, key: &str) -> Result<bool> {
        self.remove(key.as_bytes())
    }

    /// Number of live records.
    pub fn record_count(&self) -> Result<u64> {
        self.inner.record_count()
    }

    /// Flushes dirty state and flips the active root.
    pub fn commit(&self) -> Result<()> {
        self.inner.commit()
    }

    /// Discards uncommitted changes.
    pub fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }
}
