//! Operation counters for the tree core.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy)]
pub struct TreeStatsSnapshot {
    /// Number of leaf searches performed
    pub leaf_searches: u64,
    /// Number of index node searches performed
    pub index_searches: u64,
    /// Number of leaf splits performed
    pub leaf_splits: u64,
    /// Number of index node splits performed
    pub index_splits: u64,
    /// Number of leaf merges performed
    pub leaf_merges: u64,
    /// Number of index node merges performed
    pub index_merges: u64,
    /// Number of leaf sibling shifts performed
    pub leaf_shifts: u64,
    /// Number of index sibling shifts performed
    pub index_shifts: u64,
}

/// Thread-safe statistics tracking for tree operations.
#[derive(Default)]
pub struct TreeStats {
    leaf_searches: AtomicU64,
    index_searches: AtomicU64,
    leaf_splits: AtomicU64,
    index_splits: AtomicU64,
    leaf_merges: AtomicU64,
    index_merges: AtomicU64,
    leaf_shifts: AtomicU64,
    index_shifts: AtomicU64,
}

impl TreeStats {
    pub(crate) fn inc_leaf_searches(&self) {
        self.leaf_searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_index_searches(&self) {
        self.index_searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn add_leaf_splits(&self, n: u64) {
        self.leaf_splits.fetch_add(n, AtomicOrdering::Relaxed);
    }

    pub(crate) fn add_index_splits(&self, n: u64) {
        self.index_splits.fetch_add(n, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_merges(&self) {
        self.leaf_merges.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_index_merges(&self) {
        self.index_merges.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_shifts(&self) {
        self.leaf_shifts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_index_shifts(&self) {
        self.index_shifts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current counters.
    pub fn snapshot(&self) -> TreeStatsSnapshot {
        TreeStatsSnapshot {
            leaf_searches: self.leaf_searches.load(AtomicOrdering::Relaxed),
            index_searches: self.index_searches.load(AtomicOrdering::Relaxed),
            leaf_splits: self.leaf_splits.load(AtomicOrdering::Relaxed),
            index_splits: self.index_splits.load(AtomicOrdering::Relaxed),
            leaf_merges: self.leaf_merges.load(AtomicOrdering::Relaxed),
            index_merges: self.index_merges.load(AtomicOrdering::Relaxed),
            leaf_shifts: self.leaf_shifts.load(AtomicOrdering::Relaxed),
            index_shifts: self.index_shifts.load(AtomicOrdering::Relaxed),
        }
    }

    /// Emits current counters to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "umbra::tree::stats",
            leaf_searches = snapshot.leaf_searches,
            index_searches = snapshot.index_searches,
            leaf_splits = snapshot.leaf_splits,
            index_splits = snapshot.index_splits,
            leaf_merges = snapshot.leaf_merges,
            index_merges = snapshot.index_merges,
            leaf_shifts = snapshot.leaf_shifts,
            index_shifts = snapshot.index_shifts,
            "tree stats snapshot"
        );
    }
}
