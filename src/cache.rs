//! Bounded LRU cache of decoded index nodes.
//!
//! Leaves are not cached; they are typically visited once per operation and
//! carry the bulky values. The cache owns its own mutex, independent of the
//! structural lock, so concurrent readers under the shared structural lock
//! serialize only on the map itself. The mutex is a leaf lock: it is never
//! held across device I/O (on a miss the caller loads and decodes outside
//! the lock, then inserts), which keeps the two-lock contract free of
//! ordering hazards. A writer holding the exclusive structural lock is the
//! only thread touching the cache and takes the mutex uncontended.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::format::BlockId;
use crate::node::IndexNode;

/// Least-recently-used cache of decoded [`IndexNode`]s keyed by block.
pub struct IndexCache {
    inner: Mutex<LruCache<BlockId, Arc<IndexNode>>>,
}

impl IndexCache {
    /// Creates a cache holding at most `capacity` nodes (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached node and marks it most recently used.
    pub fn get(&self, id: BlockId) -> Option<Arc<IndexNode>> {
        self.inner.lock().get(&id).cloned()
    }

    /// Inserts or replaces the node for `id`, evicting the least recently
    /// used entry when over capacity.
    pub fn put(&self, id: BlockId, node: Arc<IndexNode>) {
        self.inner.lock().put(id, node);
    }

    /// Drops the entry for `id`, if cached.
    pub fn remove(&self, id: BlockId) {
        self.inner.lock().pop(&id);
    }

    /// Drops every cached node. Called on rollback and close.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
