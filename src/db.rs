//! The public database surface: open/close lifecycle, reads, writes,
//! commit/rollback and the recovery scan.
//!
//! A single `parking_lot::RwLock` guards all structural state. Readers
//! (`contains`, `find`, range scans, count accessors, `recover_all`) take
//! the shared guard and run concurrently; every mutating call takes the
//! exclusive guard. The index cache carries its own leaf-level mutex (see
//! [`crate::cache`]). Calls are synchronous and blocking; there are no
//! background threads, no cancellation and no internal retries.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::blocks::BlockStore;
use crate::cache::IndexCache;
use crate::device::BlockDevice;
use crate::error::{Result, StoreError};
use crate::format::{
    BlockId, BlockKind, Geometry, Header, RootDescriptor, CONTENT_ID_SIZE, HEADER_SIZE,
    SELECTOR_OFFSET,
};
use crate::node::LeafNode;
use crate::tree::{TreeRead, TreeStats, TreeStatsSnapshot, TreeWrite};

/// Configuration fixed at construction time.
///
/// On a new file these values define the on-disk geometry; on an existing
/// file the block and key sizes are read back from the header and the
/// content identifier is validated against it.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Block size in bytes for a newly created file.
    pub block_size: u32,
    /// Key size in bytes. Has no default and must be set before `open`.
    pub key_size: u32,
    /// Content identifier (at most 16 bytes) naming the logical schema of
    /// the stored data, validated on every open.
    pub content_id: Vec<u8>,
    /// Maximum number of index nodes held by the cache.
    pub cache_size: usize,
    /// Whether every mutating call commits automatically.
    pub auto_commit: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            block_size: 2048,
            key_size: 0,
            content_id: Vec::new(),
            cache_size: 64,
            auto_commit: true,
        }
    }
}

struct OpenStore {
    store: BlockStore,
    header: Header,
    geo: Geometry,
    root: BlockId,
    root_is_leaf: bool,
    record_count: u64,
    cache: IndexCache,
    stats: TreeStats,
}

impl OpenStore {
    fn tree_read(&self) -> TreeRead<'_> {
        TreeRead {
            store: &self.store,
            cache: &self.cache,
            geo: self.geo,
            root: self.root,
            root_is_leaf: self.root_is_leaf,
            stats: &self.stats,
        }
    }

    fn tree_write(&mut self) -> TreeWrite<'_> {
        TreeWrite {
            store: &mut self.store,
            cache: &self.cache,
            geo: self.geo,
            root: &mut self.root,
            root_is_leaf: &mut self.root_is_leaf,
            record_count: &mut self.record_count,
            stats: &self.stats,
        }
    }
}

/// Embedded, single-file, transactional B+Tree key/value store.
///
/// One instance exclusively owns its device; the caller must not open the
/// same device from two instances at once. One open instance may be shared
/// freely between threads.
pub struct BTreeDatabase {
    device: Arc<dyn BlockDevice>,
    options: StoreOptions,
    auto_commit: AtomicBool,
    state: RwLock<Option<OpenStore>>,
}

impl BTreeDatabase {
    /// Binds a store to `device` with the given configuration. No I/O
    /// happens until [`BTreeDatabase::open`].
    pub fn new(options: StoreOptions, device: Arc<dyn BlockDevice>) -> Result<Self> {
        if options.content_id.len() > CONTENT_ID_SIZE {
            return Err(StoreError::Usage("content identifier longer than 16 bytes"));
        }
        let auto_commit = AtomicBool::new(options.auto_commit);
        Ok(Self {
            device,
            options,
            auto_commit,
            state: RwLock::new(None),
        })
    }

    /// Opens the store: validates the header of an existing file or writes
    /// a fresh one onto a zero-length device.
    pub fn open(&self) -> Result<()> {
        let mut guard = self.state.write();
        if guard.is_some() {
            return Err(StoreError::Usage("store is already open"));
        }
        let len = self.device.len()?;
        let opened = if len == 0 {
            self.create_store()?
        } else {
            self.open_existing(len)?
        };
        info!(
            records = opened.record_count,
            blocks = opened.store.total_blocks(),
            "store opened"
        );
        *guard = Some(opened);
        Ok(())
    }

    fn create_store(&self) -> Result<OpenStore> {
        let geo = Geometry {
            block_size: self.options.block_size as usize,
            key_size: self.options.key_size as usize,
        };
        geo.validate()?;
        self.device.resize(HEADER_SIZE)?;
        let mut store = BlockStore::open(Arc::clone(&self.device), geo, BlockId::NIL)?;
        let root = store.reserve()?;
        LeafNode::empty(root).write(&mut store, geo)?;

        let descriptor = RootDescriptor::initial(root);
        let header = Header::new(
            self.options.block_size,
            self.options.key_size,
            &self.options.content_id,
            descriptor,
        )?;
        self.device.write_at(0, &header.encode())?;
        self.device.sync()?;
        let staged = store.stage_free_chain()?;
        store.finish_commit(staged);
        info!(
            block_size = self.options.block_size,
            key_size = self.options.key_size,
            "store created"
        );
        Ok(OpenStore {
            store,
            header,
            geo,
            root,
            root_is_leaf: true,
            record_count: 0,
            cache: IndexCache::new(self.options.cache_size),
            stats: TreeStats::default(),
        })
    }

    fn open_existing(&self, len: u64) -> Result<OpenStore> {
        if len < HEADER_SIZE {
            return Err(StoreError::Corruption("file shorter than the header"));
        }
        let mut buf = [0u8; HEADER_SIZE as usize];
        self.device.read_at(0, &mut buf)?;
        let header = Header::decode(&buf)?;

        let mut expected = [0u8; CONTENT_ID_SIZE];
        expected[..self.options.content_id.len()].copy_from_slice(&self.options.content_id);
        if header.content_id != expected {
            return Err(StoreError::Corruption("content identifier mismatch"));
        }

        let geo = Geometry {
            block_size: header.block_size as usize,
            key_size: header.key_size as usize,
        };
        geo.validate()?;

        let tail = (len - HEADER_SIZE) % geo.block_size as u64;
        if tail != 0 {
            // a crash mid-extension can leave a partial trailing block
            warn!(bytes = tail, "truncating misaligned trailing bytes");
            self.device.resize(len - tail)?;
        }

        let active = *header.active();
        let store = BlockStore::open(Arc::clone(&self.device), geo, active.free_head)?;
        if active.root.is_valid() && active.root.0 >= store.total_blocks() {
            return Err(StoreError::Corruption("root block index out of range"));
        }
        Ok(OpenStore {
            store,
            header,
            geo,
            root: active.root,
            root_is_leaf: active.root_is_leaf,
            record_count: active.record_count,
            cache: IndexCache::new(self.options.cache_size),
            stats: TreeStats::default(),
        })
    }

    /// Closes the store, committing pending changes when auto-commit is on
    /// and rolling them back otherwise.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.state.write();
        let Some(mut open) = guard.take() else {
            return Ok(());
        };
        if open.store.is_dirty() {
            if self.auto_commit.load(AtomicOrdering::Relaxed) {
                Self::commit_open(&self.device, &mut open)?;
            } else {
                Self::rollback_open(&mut open)?;
            }
        }
        open.cache.clear();
        info!(records = open.record_count, "store closed");
        Ok(())
    }

    /// True while the store is open.
    pub fn is_open(&self) -> bool {
        self.state.read().is_some()
    }

    /// Toggles auto-commit at runtime.
    pub fn set_auto_commit(&self, enabled: bool) {
        self.auto_commit.store(enabled, AtomicOrdering::Relaxed);
    }

    fn read_open<R>(&self, f: impl FnOnce(&OpenStore) -> Result<R>) -> Result<R> {
        let guard = self.state.read();
        let open = guard.as_ref().ok_or(StoreError::Usage("store is not open"))?;
        f(open)
    }

    fn write_open<R>(&self, f: impl FnOnce(&mut OpenStore) -> Result<R>) -> Result<R> {
        let mut guard = self.state.write();
        let open = guard.as_mut().ok_or(StoreError::Usage("store is not open"))?;
        f(open)
    }

    /// True if `key` is present.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.read_open(|open| {
            let key = open.geo.pad_key(key)?;
            open.tree_read().contains(&key)
        })
    }

    /// Point lookup; returns the stored value bytes.
    pub fn find(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read_open(|open| {
            let key = open.geo.pad_key(key)?;
            open.tree_read().find(&key)
        })
    }

    /// Collects every entry with `lower <= key < upper` in ascending order.
    pub fn find_range(&self, lower: &[u8], upper: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        self.for_each(lower, upper, |key, value| {
            out.push((key.to_vec(), value.to_vec()));
            Ok(())
        })?;
        Ok(out)
    }

    /// Visits every entry with `lower <= key < upper` in ascending order.
    pub fn for_each<F>(&self, lower: &[u8], upper: &[u8], visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        self.read_open(|open| {
            let lower = open.geo.pad_key(lower)?;
            let upper = open.geo.pad_key(upper)?;
            open.tree_read().scan(Some(&lower), Some(&upper), visit)
        })
    }

    /// Visits every entry in ascending key order.
    pub fn for_all<F>(&self, visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        self.read_open(|open| open.tree_read().scan(None, None, visit))
    }

    /// Number of live records.
    pub fn record_count(&self) -> Result<u64> {
        self.read_open(|open| Ok(open.record_count))
    }

    /// Number of index levels above the leaves.
    pub fn index_levels(&self) -> Result<usize> {
        self.read_open(|open| open.tree_read().index_levels())
    }

    /// Total number of blocks in the device.
    pub fn total_block_count(&self) -> Result<u64> {
        self.read_open(|open| Ok(open.store.total_blocks() as u64))
    }

    /// Number of free blocks across every allocator tier.
    pub fn free_block_count(&self) -> Result<u64> {
        self.read_open(|open| Ok(open.store.free_blocks()))
    }

    /// Number of index blocks, counted by walking the tree.
    pub fn index_block_count(&self) -> Result<u64> {
        self.read_open(|open| Ok(open.tree_read().block_usage()?.0))
    }

    /// Number of leaf blocks including their overflow tails, counted by
    /// walking the tree.
    pub fn leaf_block_count(&self) -> Result<u64> {
        self.read_open(|open| Ok(open.tree_read().block_usage()?.1))
    }

    /// Snapshot of the tree operation counters.
    pub fn stats(&self) -> Result<TreeStatsSnapshot> {
        self.read_open(|open| Ok(open.stats.snapshot()))
    }

    /// Emits the tree operation counters to tracing.
    pub fn emit_stats(&self) -> Result<()> {
        self.read_open(|open| {
            open.stats.emit_tracing();
            Ok(())
        })
    }

    /// Inserts `key -> value`, overwriting any existing value. Returns true
    /// when an overwrite occurred.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let auto = self.auto_commit.load(AtomicOrdering::Relaxed);
        self.write_open(|open| {
            let key = open.geo.pad_key(key)?;
            let replaced = open.tree_write().insert(&key, value)?;
            if auto {
                Self::commit_open(&self.device, open)?;
            }
            Ok(replaced)
        })
    }

    /// Removes `key`; returns true when it was present.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        let auto = self.auto_commit.load(AtomicOrdering::Relaxed);
        self.write_open(|open| {
            let key = open.geo.pad_key(key)?;
            let removed = open.tree_write().remove(&key)?;
            if auto && removed {
                Self::commit_open(&self.device, open)?;
            }
            Ok(removed)
        })
    }

    /// Removes every key with `lower <= key < upper`; returns the removed
    /// keys in ascending order.
    pub fn remove_range(&self, lower: &[u8], upper: &[u8]) -> Result<Vec<Vec<u8>>> {
        let auto = self.auto_commit.load(AtomicOrdering::Relaxed);
        self.write_open(|open| {
            let lower = open.geo.pad_key(lower)?;
            let upper = open.geo.pad_key(upper)?;
            let mut keys = Vec::new();
            open.tree_read().scan(Some(&lower), Some(&upper), |key, _| {
                keys.push(key.to_vec());
                Ok(())
            })?;
            let mut tree = open.tree_write();
            for key in &keys {
                tree.remove(key)?;
            }
            if auto && !keys.is_empty() {
                Self::commit_open(&self.device, open)?;
            }
            Ok(keys)
        })
    }

    /// Runs the optional flatten maintenance pass and commits it when
    /// auto-commit is on.
    pub fn flatten(&self) -> Result<()> {
        let auto = self.auto_commit.load(AtomicOrdering::Relaxed);
        self.write_open(|open| {
            open.tree_write().flatten()?;
            if auto {
                Self::commit_open(&self.device, open)?;
            }
            Ok(())
        })
    }

    /// Flushes dirty state and atomically flips the active root.
    pub fn commit(&self) -> Result<()> {
        self.write_open(|open| Self::commit_open(&self.device, open))
    }

    /// Discards all uncommitted changes and restores the committed root.
    pub fn rollback(&self) -> Result<()> {
        self.write_open(Self::rollback_open)
    }

    fn commit_open(device: &Arc<dyn BlockDevice>, open: &mut OpenStore) -> Result<()> {
        if !open.store.is_dirty() {
            return Ok(());
        }
        let staged_chain = open.store.stage_free_chain()?;
        device.sync()?;
        let descriptor = RootDescriptor {
            root: open.root,
            root_is_leaf: open.root_is_leaf,
            free_head: staged_chain.head,
            record_count: open.record_count,
        };
        let staged = open.header.stage_commit(descriptor);
        device.write_at(staged.slot_offset, &staged.slot_bytes)?;
        device.sync()?;
        // the atomicity hinge: one single-byte write activates the new root.
        // A failure before this write leaves the old root authoritative; a
        // failure of the write itself is the accepted corruption window
        // (single-sector-write assumption).
        device.write_at(SELECTOR_OFFSET, &[staged.selector_byte])?;
        device.sync()?;
        open.header = staged.header;
        open.store.finish_commit(staged_chain);
        debug!(
            root = %open.root,
            records = open.record_count,
            "commit flipped the active root"
        );
        Ok(())
    }

    fn rollback_open(open: &mut OpenStore) -> Result<()> {
        open.store.rollback()?;
        let active = *open.header.active();
        open.root = active.root;
        open.root_is_leaf = active.root_is_leaf;
        open.record_count = active.record_count;
        open.cache.clear();
        debug!(root = %open.root, "rolled back to the committed root");
        Ok(())
    }

    /// Best-effort linear scan of every block, independent of tree
    /// structure. Decodable leaf blocks yield their entries through `visit`;
    /// malformed or unrecognized blocks are reported to `on_error` and
    /// skipped. Visitor errors propagate and end the scan; decode errors
    /// never do. This is the escape hatch for extracting data from a
    /// structurally damaged file.
    pub fn recover_all<V, E>(&self, mut visit: V, mut on_error: E) -> Result<()>
    where
        V: FnMut(&[u8], &[u8]) -> Result<()>,
        E: FnMut(BlockId, &StoreError),
    {
        self.read_open(|open| {
            for raw in 0..open.store.total_blocks() {
                let id = BlockId(raw);
                let buf = match open.store.read_block(id) {
                    Ok(buf) => buf,
                    Err(err) => {
                        warn!(block = %id, error = %err, "recovery skipped unreadable block");
                        on_error(id, &err);
                        continue;
                    }
                };
                match BlockKind::from_marker([buf[0], buf[1]]) {
                    Some(BlockKind::Leaf) => match LeafNode::read(&open.store, id, open.geo) {
                        Ok(leaf) => {
                            for (key, value) in &leaf.entries {
                                visit(key, value)?;
                            }
                        }
                        Err(err) => {
                            warn!(block = %id, error = %err, "recovery skipped malformed leaf");
                            on_error(id, &err);
                        }
                    },
                    Some(_) => {}
                    None => {
                        let err = StoreError::Corruption("unknown block marker");
                        warn!(block = %id, "recovery skipped unrecognized block");
                        on_error(id, &err);
                    }
                }
            }
            Ok(())
        })
    }
}

impl Drop for BTreeDatabase {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(err) = self.close() {
                warn!(error = %err, "close on drop failed");
            }
        }
    }
}
