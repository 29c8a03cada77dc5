//! B+Tree algorithm core: search, insert, remove, rebalance, flatten.
//!
//! All operations are expressed against borrow-scoped views over the block
//! store, the index cache and the current root. [`TreeRead`] backs every
//! shared-lock operation, [`TreeWrite`] every exclusive-lock mutation.
//! Occupancy is maintained by split on overflow and sibling shift or merge
//! on underflow; a shift is preferred because it only rewrites one parent
//! separator.
//!
//! Mutations are copy-on-write at block granularity: the first write to a
//! node within a transaction moves it to a freshly reserved block and parks
//! the old block until the commit flip, then every ancestor on the descent
//! path is rewritten with the updated child pointer. The committed tree
//! therefore stays byte-identical on disk until the selector flips.

mod stats;


pub use stats::{TreeStats, TreeStatsSnapshot};

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::blocks::BlockStore;
use crate::cache::IndexCache;
use crate::error::{Result, StoreError};
use crate::format::{BlockId, Geometry};
use crate::node::{IndexNode, LeafNode};

/// One step of a root-to-leaf descent: the index node passed through and
/// the child slot taken (0 is the begin pointer).
struct PathStep {
    node: IndexNode,
    slot: usize,
}

type Path = SmallVec<[PathStep; 8]>;

/// Read-only view of the tree, valid while the shared structural lock is
/// held.
pub struct TreeRead<'a> {
    /// Block store the tree lives in.
    pub store: &'a BlockStore,
    /// Cache of decoded index nodes.
    pub cache: &'a IndexCache,
    /// Block/key geometry.
    pub geo: Geometry,
    /// Current root block.
    pub root: BlockId,
    /// Whether the root block is a leaf.
    pub root_is_leaf: bool,
    /// Operation counters.
    pub stats: &'a TreeStats,
}

impl TreeRead<'_> {
    fn load_index(&self, id: BlockId, expected_level: Option<u8>) -> Result<Arc<IndexNode>> {
        let node = match self.cache.get(id) {
            Some(node) => node,
            None => {
                let buf = self.store.read_block(id)?;
                let node = Arc::new(IndexNode::decode(id, &buf, self.geo)?);
                self.cache.put(id, Arc::clone(&node));
                node
            }
        };
        if let Some(level) = expected_level {
            if node.level != level {
                return Err(StoreError::Corruption("index node level inconsistent with descent"));
            }
        }
        Ok(node)
    }

    fn leaf_for(&self, key: &[u8]) -> Result<LeafNode> {
        if self.root_is_leaf {
            return LeafNode::read(self.store, self.root, self.geo);
        }
        let mut id = self.root;
        let mut expected = None;
        loop {
            let node = self.load_index(id, expected)?;
            self.stats.inc_index_searches();
            let (_, child) = node.child_for(key);
            if node.level == 0 {
                return LeafNode::read(self.store, child, self.geo);
            }
            expected = Some(node.level - 1);
            id = child;
        }
    }

    /// Exact-match point lookup.
    pub fn find(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let leaf = self.leaf_for(key)?;
        self.stats.inc_leaf_searches();
        Ok(match leaf.position_of(key) {
            Ok(i) => Some(leaf.entries[i].1.clone()),
            Err(_) => None,
        })
    }

    /// True if `key` is present.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        let leaf = self.leaf_for(key)?;
        self.stats.inc_leaf_searches();
        Ok(leaf.position_of(key).is_ok())
    }

    /// Walks entries in ascending key order, within the half-open bound
    /// `[lower, upper)`; `None` bounds are unbounded. An in-order walk over
    /// the index structure; levels strictly decrease on the way down, so the
    /// traversal is bounded even on a damaged file.
    pub fn scan<F>(&self, lower: Option<&[u8]>, upper: Option<&[u8]>, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        if self.root_is_leaf {
            let leaf = LeafNode::read(self.store, self.root, self.geo)?;
            self.scan_leaf(&leaf, lower, upper, &mut visit)?;
            return Ok(());
        }
        self.scan_subtree(self.root, None, lower, upper, &mut visit)?;
        Ok(())
    }

    /// Visits one leaf's in-bound entries; false means the upper bound was
    /// reached and the walk should stop.
    fn scan_leaf<F>(
        &self,
        leaf: &LeafNode,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        visit: &mut F,
    ) -> Result<bool>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        for (key, value) in &leaf.entries {
            if let Some(lower) = lower {
                if key.as_slice() < lower {
                    continue;
                }
            }
            if let Some(upper) = upper {
                if key.as_slice() >= upper {
                    return Ok(false);
                }
            }
            visit(key, value)?;
        }
        Ok(true)
    }

    fn scan_subtree<F>(
        &self,
        id: BlockId,
        expected_level: Option<u8>,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        visit: &mut F,
    ) -> Result<bool>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let node = self.load_index(id, expected_level)?;
        self.stats.inc_index_searches();
        let start = match lower {
            Some(lower) => node.child_for(lower).0,
            None => 0,
        };
        for slot in start..=node.entries.len() {
            if let Some(upper) = upper {
                // the child at `slot` only holds keys at or above the
                // separator to its left
                if slot > start && node.entries[slot - 1].0.as_slice() >= upper {
                    return Ok(false);
                }
            }
            let child = node.child_at(slot);
            let keep_going = if node.level == 0 {
                let leaf = LeafNode::read(self.store, child, self.geo)?;
                self.scan_leaf(&leaf, lower, upper, visit)?
            } else {
                self.scan_subtree(child, Some(node.level - 1), lower, upper, visit)?
            };
            if !keep_going {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Number of index levels above the leaves (0 for a leaf root).
    pub fn index_levels(&self) -> Result<usize> {
        if self.root_is_leaf {
            return Ok(0);
        }
        let root = self.load_index(self.root, None)?;
        Ok(root.level as usize + 1)
    }

    /// Counts (index blocks, leaf blocks including their tails) by walking
    /// the whole tree.
    pub fn block_usage(&self) -> Result<(u64, u64)> {
        if self.root_is_leaf {
            let leaf = LeafNode::read(self.store, self.root, self.geo)?;
            return Ok((0, 1 + leaf.tails.len() as u64));
        }
        let mut index = 0;
        let mut leaf = 0;
        self.count_subtree(self.root, None, &mut index, &mut leaf)?;
        Ok((index, leaf))
    }

    fn count_subtree(
        &self,
        id: BlockId,
        expected_level: Option<u8>,
        index: &mut u64,
        leaf: &mut u64,
    ) -> Result<()> {
        let node = self.load_index(id, expected_level)?;
        *index += 1;
        for slot in 0..=node.entries.len() {
            let child = node.child_at(slot);
            if node.level == 0 {
                let child = LeafNode::read(self.store, child, self.geo)?;
                *leaf += 1 + child.tails.len() as u64;
            } else {
                self.count_subtree(child, Some(node.level - 1), index, leaf)?;
            }
        }
        Ok(())
    }
}

/// Mutable view of the tree, valid while the exclusive structural lock is
/// held.
pub struct TreeWrite<'a> {
    /// Block store the tree lives in.
    pub store: &'a mut BlockStore,
    /// Cache of decoded index nodes.
    pub cache: &'a IndexCache,
    /// Block/key geometry.
    pub geo: Geometry,
    /// Current root block, updated on root split or collapse.
    pub root: &'a mut BlockId,
    /// Whether the root block is a leaf.
    pub root_is_leaf: &'a mut bool,
    /// Live record count, updated on insert and remove.
    pub record_count: &'a mut u64,
    /// Operation counters.
    pub stats: &'a TreeStats,
}

impl TreeWrite<'_> {
    fn load_index(&self, id: BlockId, expected_level: Option<u8>) -> Result<IndexNode> {
        let node = match self.cache.get(id) {
            Some(node) => (*node).clone(),
            None => {
                let buf = self.store.read_block(id)?;
                IndexNode::decode(id, &buf, self.geo)?
            }
        };
        if let Some(level) = expected_level {
            if node.level != level {
                return Err(StoreError::Corruption("index node level inconsistent with descent"));
            }
        }
        Ok(node)
    }

    fn write_index(&mut self, node: &IndexNode) -> Result<()> {
        let buf = node.encode(self.geo);
        self.store.write_block(node.id, &buf)?;
        self.cache.put(node.id, Arc::new(node.clone()));
        Ok(())
    }

    /// Writes an index node copy-on-write: a node still sitting in a
    /// committed block moves to a fresh one, the old block parking until
    /// the commit flip. Callers must push `node.id` into the parent.
    fn write_node(&mut self, node: &mut IndexNode) -> Result<()> {
        if !self.store.is_fresh(node.id) {
            self.cache.remove(node.id);
            self.store.release(node.id);
            node.id = self.store.reserve()?;
        }
        self.write_index(node)
    }

    /// Writes a leaf copy-on-write; a committed leaf moves to a fresh block
    /// together with its whole tail chain.
    fn write_leaf(&mut self, leaf: &mut LeafNode) -> Result<()> {
        if !self.store.is_fresh(leaf.id) {
            self.store.release(leaf.id);
            for tail in leaf.tails.drain(..) {
                self.store.release(tail);
            }
            leaf.id = self.store.reserve()?;
        }
        leaf.write(self.store, self.geo)
    }

    fn free_index(&mut self, id: BlockId) {
        self.store.release(id);
        self.cache.remove(id);
    }

    fn descend(&self, key: &[u8], path: &mut Path) -> Result<LeafNode> {
        if *self.root_is_leaf {
            return LeafNode::read(self.store, *self.root, self.geo);
        }
        let mut id = *self.root;
        let mut expected = None;
        loop {
            let node = self.load_index(id, expected)?;
            self.stats.inc_index_searches();
            let (slot, child) = node.child_for(key);
            let level = node.level;
            path.push(PathStep { node, slot });
            if level == 0 {
                return LeafNode::read(self.store, child, self.geo);
            }
            expected = Some(level - 1);
            id = child;
        }
    }

    /// Inserts or overwrites `key`; returns true when an existing value was
    /// replaced.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        debug_assert_eq!(key.len(), self.geo.key_size);
        let mut path = Path::new();
        let mut leaf = self.descend(key, &mut path)?;
        self.stats.inc_leaf_searches();
        let replaced = match leaf.position_of(key) {
            Ok(i) => {
                leaf.entries[i].1 = value.to_vec();
                true
            }
            Err(i) => {
                leaf.entries.insert(i, (key.to_vec(), value.to_vec()));
                *self.record_count += 1;
                false
            }
        };

        if leaf.stream_len(self.geo) > self.geo.leaf_payload() && leaf.entries.len() >= 2 {
            let mut pieces = self.split_leaf(leaf)?;
            for piece in &mut pieces {
                self.write_leaf(piece)?;
            }
            let promote: Vec<_> = pieces[1..]
                .iter()
                .map(|piece| (piece.entries[0].0.clone(), piece.id))
                .collect();
            self.stats.add_leaf_splits(promote.len() as u64);
            self.propagate_up(path, pieces[0].id, promote)?;
        } else {
            self.write_leaf(&mut leaf)?;
            self.propagate_up(path, leaf.id, Vec::new())?;
        }
        Ok(replaced)
    }

    /// Splits `leaf` until every piece either fits one block or holds a
    /// single (tail-backed) entry. The split point balances accumulated
    /// byte occupancy, not the entry count, since values vary in size.
    fn split_leaf(&mut self, leaf: LeafNode) -> Result<Vec<LeafNode>> {
        let payload = self.geo.leaf_payload();
        let mut pieces = vec![leaf];
        let mut i = 0;
        while i < pieces.len() {
            if pieces[i].stream_len(self.geo) <= payload || pieces[i].entries.len() < 2 {
                i += 1;
                continue;
            }
            let split = balanced_split(&pieces[i].entries, self.geo);
            debug_assert!(split >= 1 && split < pieces[i].entries.len());
            let right_entries = pieces[i].entries.split_off(split);
            let mut right = LeafNode::empty(self.store.reserve()?);
            right.entries = right_entries;
            pieces.insert(i + 1, right);
        }
        Ok(pieces)
    }

    /// Rewrites every ancestor on `path` with the new id of the child below
    /// it, splicing in `promote` (separator, new right child) pairs and
    /// splitting upward as needed. Updates the root id at the top, growing a
    /// new root level when the old root itself split.
    fn propagate_up(
        &mut self,
        mut path: Path,
        mut child_id: BlockId,
        mut promote: Vec<(Vec<u8>, BlockId)>,
    ) -> Result<()> {
        let root_level = path.first().map(|step| step.node.level);
        while let Some(PathStep { mut node, slot }) = path.pop() {
            node.set_child(slot, child_id);
            if !promote.is_empty() {
                node.entries.splice(slot..slot, promote.drain(..));
            }
            if node.entries.len() > self.geo.index_capacity() {
                let (mut pieces, seps) = self.split_index(node)?;
                self.stats.add_index_splits(seps.len() as u64);
                for piece in &mut pieces {
                    self.write_node(piece)?;
                }
                promote = seps
                    .into_iter()
                    .zip(pieces[1..].iter().map(|piece| piece.id))
                    .collect();
                child_id = pieces[0].id;
            } else {
                self.write_node(&mut node)?;
                child_id = node.id;
            }
        }
        if promote.is_empty() {
            *self.root = child_id;
            return Ok(());
        }
        let level = match root_level {
            Some(level) => level + 1,
            None => 0,
        };
        let node = IndexNode {
            id: self.store.reserve()?,
            level,
            begin: child_id,
            entries: promote,
        };
        self.write_index(&node)?;
        *self.root = node.id;
        *self.root_is_leaf = false;
        debug!(root = %node.id, level, "tree grew a new root");
        Ok(())
    }

    /// Splits an over-full index node at the midpoint, pulling the boundary
    /// separator up. Returns the pieces (first keeps the original block) and
    /// the promoted separators, `seps[j]` pairing with `pieces[j + 1]`.
    fn split_index(&mut self, node: IndexNode) -> Result<(Vec<IndexNode>, Vec<Vec<u8>>)> {
        let capacity = self.geo.index_capacity();
        let mut pieces = vec![node];
        let mut seps: Vec<Vec<u8>> = Vec::new();
        let mut i = 0;
        while i < pieces.len() {
            if pieces[i].entries.len() <= capacity {
                i += 1;
                continue;
            }
            let mid = pieces[i].entries.len() / 2;
            let right_entries = pieces[i].entries.split_off(mid + 1);
            let (sep, right_begin) = pieces[i].entries.pop().unwrap_or((Vec::new(), BlockId::NIL));
            let right = IndexNode {
                id: self.store.reserve()?,
                level: pieces[i].level,
                begin: right_begin,
                entries: right_entries,
            };
            seps.insert(i, sep);
            pieces.insert(i + 1, right);
        }
        Ok((pieces, seps))
    }

    /// Removes `key`; returns true when it was present.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        debug_assert_eq!(key.len(), self.geo.key_size);
        let mut path = Path::new();
        let mut leaf = self.descend(key, &mut path)?;
        self.stats.inc_leaf_searches();
        let position = match leaf.position_of(key) {
            Ok(i) => i,
            Err(_) => return Ok(false),
        };
        leaf.entries.remove(position);
        *self.record_count = self.record_count.saturating_sub(1);

        if path.is_empty() {
            // a root leaf has no minimum occupancy; an empty tree stays a
            // single empty leaf
            self.write_leaf(&mut leaf)?;
            *self.root = leaf.id;
            return Ok(true);
        }
        if self.leaf_underflow(&leaf) {
            self.fix_leaf_underflow(path, leaf)?;
        } else {
            self.write_leaf(&mut leaf)?;
            self.propagate_up(path, leaf.id, Vec::new())?;
        }
        Ok(true)
    }

    fn leaf_underflow(&self, leaf: &LeafNode) -> bool {
        leaf.entries.is_empty() || leaf.stream_len(self.geo) < self.geo.leaf_min_bytes()
    }

    fn fix_leaf_underflow(&mut self, mut path: Path, leaf: LeafNode) -> Result<()> {
        let PathStep { node: mut parent, slot } = match path.pop() {
            Some(step) => step,
            None => unreachable!("caller handles the root leaf"),
        };
        if parent.entries.is_empty() {
            let mut leaf = leaf;
            self.write_leaf(&mut leaf)?;
            if path.is_empty() {
                // root holding a single leaf child: promote the leaf
                *self.root = leaf.id;
                *self.root_is_leaf = true;
                self.free_index(parent.id);
            } else {
                parent.set_child(slot, leaf.id);
                self.write_node(&mut parent)?;
                self.propagate_up(path, parent.id, Vec::new())?;
            }
            return Ok(());
        }

        let (left_slot, right_slot) = if slot < parent.entries.len() {
            (slot, slot + 1)
        } else {
            (slot - 1, slot)
        };
        let sep_index = right_slot - 1;
        let (mut left, mut right) = if slot == left_slot {
            let sibling = LeafNode::read(self.store, parent.child_at(right_slot), self.geo)?;
            (leaf, sibling)
        } else {
            let sibling = LeafNode::read(self.store, parent.child_at(left_slot), self.geo)?;
            (sibling, leaf)
        };

        let left_len = left.entries.len();
        let mut combined = std::mem::take(&mut left.entries);
        combined.append(&mut right.entries);
        let total: usize = combined
            .iter()
            .map(|(_, v)| self.geo.leaf_entry_size(v.len()))
            .sum();

        if let Some(split) = self.shift_split(&combined) {
            right.entries = combined.split_off(split);
            left.entries = combined;
            self.write_leaf(&mut left)?;
            self.write_leaf(&mut right)?;
            parent.entries[sep_index].0 = right.entries[0].0.clone();
            parent.set_child(left_slot, left.id);
            parent.set_child(right_slot, right.id);
            self.write_node(&mut parent)?;
            self.stats.inc_leaf_shifts();
            return self.propagate_up(path, parent.id, Vec::new());
        }

        if total <= self.geo.leaf_payload() {
            left.entries = combined;
            self.write_leaf(&mut left)?;
            right.free(self.store);
            parent.entries.remove(sep_index);
            parent.set_child(left_slot, left.id);
            self.stats.inc_leaf_merges();
            return self.finish_index_removal(path, parent);
        }

        // neither fix applies: persist the removal and leave occupancy as is
        right.entries = combined.split_off(left_len.min(combined.len()));
        left.entries = combined;
        self.write_leaf(&mut left)?;
        self.write_leaf(&mut right)?;
        parent.set_child(left_slot, left.id);
        parent.set_child(right_slot, right.id);
        self.write_node(&mut parent)?;
        self.propagate_up(path, parent.id, Vec::new())
    }

    /// Balanced redistribution point for a combined leaf entry list, or
    /// `None` when no split leaves both sides above minimum occupancy and
    /// within one block.
    fn shift_split(&self, combined: &[(Vec<u8>, Vec<u8>)]) -> Option<usize> {
        if combined.len() < 2 {
            return None;
        }
        let split = balanced_split(combined, self.geo);
        let bytes = |range: &[(Vec<u8>, Vec<u8>)]| -> usize {
            range
                .iter()
                .map(|(_, v)| self.geo.leaf_entry_size(v.len()))
                .sum()
        };
        let left_bytes = bytes(&combined[..split]);
        let right_bytes = bytes(&combined[split..]);
        let min = self.geo.leaf_min_bytes();
        let payload = self.geo.leaf_payload();
        (left_bytes >= min && right_bytes >= min && left_bytes <= payload && right_bytes <= payload)
            .then_some(split)
    }

    /// Writes back an index node after an entry removal, cascading shifts,
    /// merges and root collapse upward.
    fn finish_index_removal(&mut self, mut path: Path, mut node: IndexNode) -> Result<()> {
        loop {
            if path.is_empty() {
                if node.entries.is_empty() {
                    // root with a lone child: shrink the tree by one level
                    *self.root = node.begin;
                    *self.root_is_leaf = node.level == 0;
                    self.free_index(node.id);
                    debug!(root = %self.root, "tree shed its root level");
                } else {
                    self.write_node(&mut node)?;
                    *self.root = node.id;
                }
                return Ok(());
            }
            if node.entries.len() >= self.geo.index_min() {
                self.write_node(&mut node)?;
                return self.propagate_up(path, node.id, Vec::new());
            }

            let PathStep { node: mut parent, slot } = match path.pop() {
                Some(step) => step,
                None => unreachable!(),
            };
            if parent.entries.is_empty() {
                // root holding a single index child; write the child and let
                // the next iteration collapse the root
                self.write_node(&mut node)?;
                parent.set_child(slot, node.id);
                node = parent;
                continue;
            }
            let (left_slot, right_slot) = if slot < parent.entries.len() {
                (slot, slot + 1)
            } else {
                (slot - 1, slot)
            };
            let sep_index = right_slot - 1;
            let (mut left, mut right) = if slot == left_slot {
                let sibling = self.load_index(parent.child_at(right_slot), Some(node.level))?;
                (node, sibling)
            } else {
                let sibling = self.load_index(parent.child_at(left_slot), Some(node.level))?;
                (sibling, node)
            };

            let mut combined = std::mem::take(&mut left.entries);
            combined.push((parent.entries[sep_index].0.clone(), right.begin));
            combined.append(&mut right.entries);

            let min = self.geo.index_min();
            if combined.len() >= 2 * min + 1 {
                // redistribute around the midpoint, rotating the boundary
                // entry through the parent separator
                let split = combined.len() / 2;
                let mut rest = combined.split_off(split);
                let (sep, new_begin) = rest.remove(0);
                left.entries = combined;
                right.begin = new_begin;
                right.entries = rest;
                self.write_node(&mut left)?;
                self.write_node(&mut right)?;
                parent.entries[sep_index].0 = sep;
                parent.set_child(left_slot, left.id);
                parent.set_child(right_slot, right.id);
                self.write_node(&mut parent)?;
                self.stats.inc_index_shifts();
                return self.propagate_up(path, parent.id, Vec::new());
            }

            // combined is at most 2 * min, which always fits one block
            left.entries = combined;
            self.write_node(&mut left)?;
            self.free_index(right.id);
            parent.entries.remove(sep_index);
            parent.set_child(left_slot, left.id);
            self.stats.inc_index_merges();
            node = parent;
        }
    }

    /// Maintenance pass: merges adjacent same-parent leaves whose combined
    /// stream fits one block, collapses single-child index nodes, then
    /// shrinks the root while it has a lone child. Optional; the tree is
    /// correct without it.
    pub fn flatten(&mut self) -> Result<()> {
        if *self.root_is_leaf {
            return Ok(());
        }
        let mut root = self.load_index(*self.root, None)?;
        if self.flatten_subtree(&mut root)? {
            self.write_node(&mut root)?;
            *self.root = root.id;
        }
        while !*self.root_is_leaf {
            let node = self.load_index(*self.root, None)?;
            if !node.entries.is_empty() {
                break;
            }
            *self.root = node.begin;
            *self.root_is_leaf = node.level == 0;
            self.free_index(node.id);
        }
        debug!(root = %self.root, "flatten pass complete");
        Ok(())
    }

    /// Returns true when the subtree changed and `node` needs rewriting;
    /// untouched subtrees keep their committed blocks.
    fn flatten_subtree(&mut self, node: &mut IndexNode) -> Result<bool> {
        let mut changed = false;
        if node.level > 0 {
            let child_level = node.level - 1;
            for slot in 0..=node.entries.len() {
                let mut child = self.load_index(node.child_at(slot), Some(child_level))?;
                let child_changed = self.flatten_subtree(&mut child)?;
                if child.entries.is_empty() {
                    // single-child index node: splice its lone child in
                    node.set_child(slot, child.begin);
                    self.free_index(child.id);
                    changed = true;
                } else if child_changed {
                    self.write_node(&mut child)?;
                    node.set_child(slot, child.id);
                    changed = true;
                }
            }
            return Ok(changed);
        }

        let payload = self.geo.leaf_payload();
        let mut slot = 0;
        while slot < node.entries.len() {
            let mut left = LeafNode::read(self.store, node.child_at(slot), self.geo)?;
            let mut right = LeafNode::read(self.store, node.child_at(slot + 1), self.geo)?;
            if left.stream_len(self.geo) + right.stream_len(self.geo) <= payload {
                left.entries.append(&mut right.entries);
                self.write_leaf(&mut left)?;
                node.set_child(slot, left.id);
                right.free(self.store);
                node.entries.remove(slot);
                self.stats.inc_leaf_merges();
                changed = true;
            } else {
                slot += 1;
            }
        }
        Ok(changed)
    }
}

/// Index (entry count on the left side) splitting `entries` so both sides
/// carry roughly equal encoded bytes. Always in `[1, len - 1]`.
fn balanced_split(entries: &[(Vec<u8>, Vec<u8>)], geo: Geometry) -> usize {
    let total: usize = entries.iter().map(|(_, v)| geo.leaf_entry_size(v.len())).sum();
    let half = total / 2;
    let mut accumulated = 0;
    for (i, (_, value)) in entries.iter().enumerate() {
        accumulated += geo.leaf_entry_size(value.len());
        if accumulated >= half && i + 1 < entries.len() {
            return i + 1;
        }
    }
    entries.len().saturating_sub(1).max(1)
}
