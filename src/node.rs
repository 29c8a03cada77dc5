//! Index and leaf node codec.
//!
//! Index blocks: marker `IN` | level (u8) | entry count (u16) | begin child
//! (u32) | entries of [key | child (u32)]. Leaf blocks: marker `LF` | entry
//! count (u16) | first tail (u32) | packed entry stream of [key | value
//! length (u32) | value]. Stream bytes beyond the leaf block continue in a
//! chain of `TL` tail blocks, opaque to the tree algorithm. Leaves carry no
//! sibling pointers; range scans walk the index structure instead, so a
//! committed leaf never needs rewriting when its neighbor moves.

use crate::blocks::BlockStore;
use crate::error::{Result, StoreError};
use crate::format::{BlockId, BlockKind, Geometry};

/// Decoded non-leaf routing node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexNode {
    /// Block holding this node.
    pub id: BlockId,
    /// Distance from the leaf level; 0 means children are leaves.
    pub level: u8,
    /// Leftmost child, covering keys below the first separator.
    pub begin: BlockId,
    /// Ordered (separator key, child) pairs.
    pub entries: Vec<(Vec<u8>, BlockId)>,
}

impl IndexNode {
    /// Child to descend into for `key`, plus its slot (0 is the begin
    /// pointer, `i + 1` is `entries[i]`). Routing picks the rightmost entry
    /// whose separator is `<= key`.
    pub fn child_for(&self, key: &[u8]) -> (usize, BlockId) {
        match self
            .entries
            .binary_search_by(|(sep, _)| sep.as_slice().cmp(key))
        {
            Ok(i) => (i + 1, self.entries[i].1),
            Err(0) => (0, self.begin),
            Err(i) => (i, self.entries[i - 1].1),
        }
    }

    /// Child pointer at `slot` in begin-first order.
    pub fn child_at(&self, slot: usize) -> BlockId {
        if slot == 0 {
            self.begin
        } else {
            self.entries[slot - 1].1
        }
    }

    /// Replaces the child pointer at `slot`.
    pub fn set_child(&mut self, slot: usize, id: BlockId) {
        if slot == 0 {
            self.begin = id;
        } else {
            self.entries[slot - 1].1 = id;
        }
    }

    /// Serializes the node into one block.
    pub fn encode(&self, geo: Geometry) -> Vec<u8> {
        debug_assert!(self.entries.len() <= geo.index_capacity());
        let mut buf = vec![0u8; geo.block_size];
        buf[0..2].copy_from_slice(&BlockKind::Index.marker());
        buf[2] = self.level;
        buf[3..5].copy_from_slice(&(self.entries.len() as u16).to_be_bytes());
        buf[5..9].copy_from_slice(&self.begin.0.to_be_bytes());
        let mut off = 9;
        for (key, child) in &self.entries {
            debug_assert_eq!(key.len(), geo.key_size);
            buf[off..off + geo.key_size].copy_from_slice(key);
            off += geo.key_size;
            buf[off..off + 4].copy_from_slice(&child.0.to_be_bytes());
            off += 4;
        }
        buf
    }

    /// Parses an index node out of a block.
    pub fn decode(id: BlockId, buf: &[u8], geo: Geometry) -> Result<Self> {
        if buf[0..2] != BlockKind::Index.marker() {
            return Err(StoreError::Corruption("expected index block marker"));
        }
        let level = buf[2];
        let count = u16::from_be_bytes(buf[3..5].try_into().unwrap()) as usize;
        if count > geo.index_capacity() {
            return Err(StoreError::Corruption("index entry count exceeds capacity"));
        }
        let begin = BlockId(u32::from_be_bytes(buf[5..9].try_into().unwrap()));
        let mut entries = Vec::with_capacity(count);
        let mut off = 9;
        for _ in 0..count {
            let key = buf[off..off + geo.key_size].to_vec();
            off += geo.key_size;
            let child = BlockId(u32::from_be_bytes(buf[off..off + 4].try_into().unwrap()));
            off += 4;
            entries.push((key, child));
        }
        Ok(Self {
            id,
            level,
            begin,
            entries,
        })
    }
}

/// Decoded terminal node, including its overflow tail chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafNode {
    /// Block holding this leaf.
    pub id: BlockId,
    /// Ordered (key, value) pairs.
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
    /// Tail blocks currently carrying overflow for this leaf, in order.
    pub tails: Vec<BlockId>,
}

impl LeafNode {
    /// Creates an empty leaf occupying `id`.
    pub fn empty(id: BlockId) -> Self {
        Self {
            id,
            entries: Vec::new(),
            tails: Vec::new(),
        }
    }

    /// Total encoded size of the entry stream.
    pub fn stream_len(&self, geo: Geometry) -> usize {
        self.entries
            .iter()
            .map(|(_, v)| geo.leaf_entry_size(v.len()))
            .sum()
    }

    /// Position of `key` in this leaf, `Err` holding the insertion point.
    pub fn position_of(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.as_slice().cmp(key))
    }

    /// Reads and parses the leaf at `id`, following its tail chain.
    pub fn read(store: &BlockStore, id: BlockId, geo: Geometry) -> Result<Self> {
        let buf = store.read_block(id)?;
        if buf[0..2] != BlockKind::Leaf.marker() {
            return Err(StoreError::Corruption("expected leaf block marker"));
        }
        let count = u16::from_be_bytes(buf[2..4].try_into().unwrap()) as usize;
        let first_tail = BlockId(u32::from_be_bytes(buf[4..8].try_into().unwrap()));

        let mut stream = buf[8..].to_vec();
        let mut tails = Vec::new();
        let mut tail = first_tail;
        while tail.is_valid() {
            if tails.len() >= store.total_blocks() as usize {
                return Err(StoreError::Corruption("leaf tail chain forms a cycle"));
            }
            let tbuf = store.read_block(tail)?;
            if tbuf[0..2] != BlockKind::Tail.marker() {
                return Err(StoreError::Corruption("expected tail block marker"));
            }
            tails.push(tail);
            tail = BlockId(u32::from_be_bytes(tbuf[2..6].try_into().unwrap()));
            stream.extend_from_slice(&tbuf[6..]);
        }

        let mut entries = Vec::with_capacity(count);
        let mut off = 0;
        for _ in 0..count {
            if off + geo.key_size + 4 > stream.len() {
                return Err(StoreError::Corruption("leaf entry stream truncated"));
            }
            let key = stream[off..off + geo.key_size].to_vec();
            off += geo.key_size;
            let vlen = u32::from_be_bytes(stream[off..off + 4].try_into().unwrap()) as usize;
            off += 4;
            if off + vlen > stream.len() {
                return Err(StoreError::Corruption("leaf value exceeds entry stream"));
            }
            entries.push((key, stream[off..off + vlen].to_vec()));
            off += vlen;
        }
        Ok(Self { id, entries, tails })
    }

    /// Encodes and writes the leaf, reserving or releasing tail blocks so
    /// the chain exactly covers the entry stream.
    pub fn write(&mut self, store: &mut BlockStore, geo: Geometry) -> Result<()> {
        let mut stream = Vec::with_capacity(self.stream_len(geo));
        for (key, value) in &self.entries {
            debug_assert_eq!(key.len(), geo.key_size);
            stream.extend_from_slice(key);
            stream.extend_from_slice(&(value.len() as u32).to_be_bytes());
            stream.extend_from_slice(value);
        }

        let overflow = stream.len().saturating_sub(geo.leaf_payload());
        let needed = overflow.div_ceil(geo.tail_payload());
        while self.tails.len() < needed {
            self.tails.push(store.reserve()?);
        }
        while self.tails.len() > needed {
            let id = self.tails.pop().unwrap_or(BlockId::NIL);
            store.release(id);
        }

        debug_assert!(self.entries.len() <= u16::MAX as usize);
        let mut buf = vec![0u8; geo.block_size];
        buf[0..2].copy_from_slice(&BlockKind::Leaf.marker());
        buf[2..4].copy_from_slice(&(self.entries.len() as u16).to_be_bytes());
        let first_tail = self.tails.first().copied().unwrap_or(BlockId::NIL);
        buf[4..8].copy_from_slice(&first_tail.0.to_be_bytes());
        let head = stream.len().min(geo.leaf_payload());
        buf[8..8 + head].copy_from_slice(&stream[..head]);
        store.write_block(self.id, &buf)?;

        let mut rest = &stream[head..];
        for (i, &tail) in self.tails.iter().enumerate() {
            let next = self.tails.get(i + 1).copied().unwrap_or(BlockId::NIL);
            let mut tbuf = vec![0u8; geo.block_size];
            tbuf[0..2].copy_from_slice(&BlockKind::Tail.marker());
            tbuf[2..6].copy_from_slice(&next.0.to_be_bytes());
            let take = rest.len().min(geo.tail_payload());
            tbuf[6..6 + take].copy_from_slice(&rest[..take]);
            store.write_block(tail, &tbuf)?;
            rest = &rest[take..];
        }
        Ok(())
    }

    /// Releases the leaf block and its entire tail chain.
    pub fn free(self, store: &mut BlockStore) {
        store.release(self.id);
        for tail in self.tails {
            store.release(tail);
        }
    }
}
