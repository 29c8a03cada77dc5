//! Block allocation, free-list bookkeeping and transaction shadow state.
//!
//! The block store tracks four tiers of free blocks:
//!
//! * `available`: free on disk as of the last commit, the ids listed in the
//!   committed free chain. Safe to reuse immediately, since neither the
//!   committed root nor the committed chain structure reads their contents.
//! * `chain_blocks`: the physical blocks holding the committed free chain.
//!   Overwriting one before the selector flip would damage the old chain on
//!   a crash, so they become reusable only after the next commit.
//! * `pending_free`: committed blocks released this transaction. Still
//!   referenced by the committed root; reusable only after the next commit.
//! * `fresh`: blocks reserved this transaction. Releasing one returns it
//!   straight to `available`; it was never reachable from committed state.
//!
//! The tree writes every mutated node to a freshly reserved block and parks
//! the node's previous block in `pending_free`, so blocks the committed root
//! references are never overwritten before the selector flip. The shadow map
//! backstops any remaining in-place overwrite of a committed block by
//! snapshotting its prior bytes for rollback.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::device::BlockDevice;
use crate::error::{Result, StoreError};
use crate::format::{BlockId, BlockKind, Geometry, HEADER_SIZE};

/// Free-chain bytes written ahead of a commit, plus the tier rebaseline to
/// apply once the selector flip succeeds.
#[derive(Debug)]
pub struct StagedChain {
    /// Head of the newly written chain, or `NIL` when nothing is free.
    pub head: BlockId,
    entries: Vec<BlockId>,
    structure: Vec<BlockId>,
}

/// Owns the device plus all block allocation and transaction state.
pub struct BlockStore {
    device: Arc<dyn BlockDevice>,
    geo: Geometry,
    block_count: u32,
    committed_len: u64,
    available: Vec<BlockId>,
    chain_blocks: Vec<BlockId>,
    pending_free: Vec<BlockId>,
    fresh: HashSet<BlockId>,
    shadow: HashMap<BlockId, Vec<u8>>,
    dirty: bool,
}

impl BlockStore {
    /// Attaches to a device whose committed free chain starts at `free_head`
    /// (`NIL` for none), loading the chain eagerly.
    pub fn open(device: Arc<dyn BlockDevice>, geo: Geometry, free_head: BlockId) -> Result<Self> {
        let len = device.len()?;
        let block_count = Self::blocks_in(len, geo);
        let mut store = Self {
            device,
            geo,
            block_count,
            committed_len: len,
            available: Vec::new(),
            chain_blocks: Vec::new(),
            pending_free: Vec::new(),
            fresh: HashSet::new(),
            shadow: HashMap::new(),
            dirty: false,
        };
        store.load_chain(free_head)?;
        Ok(store)
    }

    fn blocks_in(len: u64, geo: Geometry) -> u32 {
        if len <= HEADER_SIZE {
            0
        } else {
            ((len - HEADER_SIZE) / geo.block_size as u64) as u32
        }
    }

    fn load_chain(&mut self, head: BlockId) -> Result<()> {
        let mut next = head;
        while next.is_valid() {
            let buf = self.read_block(next)?;
            if buf[0..2] != BlockKind::Free.marker() {
                return Err(StoreError::Corruption("free-list block has wrong marker"));
            }
            let count = u16::from_be_bytes(buf[2..4].try_into().unwrap()) as usize;
            if count > self.geo.free_list_capacity() {
                return Err(StoreError::Corruption("free-list entry count out of range"));
            }
            self.chain_blocks.push(next);
            next = BlockId(u32::from_be_bytes(buf[4..8].try_into().unwrap()));
            for i in 0..count {
                let off = 8 + i * 4;
                self.available
                    .push(BlockId(u32::from_be_bytes(buf[off..off + 4].try_into().unwrap())));
            }
        }
        Ok(())
    }

    fn offset_of(&self, id: BlockId) -> Result<u64> {
        if !id.is_valid() || id.0 >= self.block_count {
            return Err(StoreError::Corruption("block index out of range"));
        }
        Ok(HEADER_SIZE + id.0 as u64 * self.geo.block_size as u64)
    }

    /// Reads one full block.
    pub fn read_block(&self, id: BlockId) -> Result<Vec<u8>> {
        let off = self.offset_of(id)?;
        let mut buf = vec![0u8; self.geo.block_size];
        self.device.read_at(off, &mut buf)?;
        Ok(buf)
    }

    /// Writes one full block, snapshotting prior committed bytes for
    /// rollback on the first overwrite within a transaction.
    pub fn write_block(&mut self, id: BlockId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.geo.block_size);
        let off = self.offset_of(id)?;
        if !self.fresh.contains(&id) && !self.shadow.contains_key(&id) {
            let mut prior = vec![0u8; self.geo.block_size];
            self.device.read_at(off, &mut prior)?;
            self.shadow.insert(id, prior);
        }
        self.device.write_at(off, buf)?;
        self.dirty = true;
        Ok(())
    }

    /// Hands out a free block: available set first, then device extension.
    pub fn reserve(&mut self) -> Result<BlockId> {
        let id = match self.available.pop() {
            Some(id) => id,
            None => {
                let id = BlockId(self.block_count);
                let new_len = HEADER_SIZE + (self.block_count as u64 + 1) * self.geo.block_size as u64;
                self.device.resize(new_len)?;
                self.block_count += 1;
                id
            }
        };
        self.fresh.insert(id);
        self.dirty = true;
        Ok(id)
    }

    /// Returns a block to the free pool. Blocks allocated within the current
    /// transaction become reusable immediately; committed blocks park until
    /// the next commit.
    pub fn release(&mut self, id: BlockId) {
        if self.fresh.remove(&id) {
            self.available.push(id);
        } else {
            self.pending_free.push(id);
        }
        self.dirty = true;
    }

    /// True when `id` was reserved within the current transaction, meaning
    /// no committed state references it and it may be rewritten in place.
    pub fn is_fresh(&self, id: BlockId) -> bool {
        self.fresh.contains(&id)
    }

    /// True once any block has been written or reserved since the last
    /// commit.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Total number of blocks in the device.
    pub fn total_blocks(&self) -> u32 {
        self.block_count
    }

    /// Number of blocks currently free in any tier.
    pub fn free_blocks(&self) -> u64 {
        (self.available.len() + self.chain_blocks.len() + self.pending_free.len()) as u64
    }

    /// Writes a fresh free-list chain covering every block that will be free
    /// after this commit. Chain structure blocks are drawn through
    /// [`BlockStore::reserve`], so they land only in crash-safe tiers.
    pub fn stage_free_chain(&mut self) -> Result<StagedChain> {
        let per_block = self.geo.free_list_capacity();
        let mut structure: Vec<BlockId> = Vec::new();
        loop {
            let listed = self.available.len() + self.chain_blocks.len() + self.pending_free.len();
            let needed = listed.div_ceil(per_block);
            if structure.len() >= needed {
                break;
            }
            structure.push(self.reserve()?);
        }

        let mut entries: Vec<BlockId> = Vec::new();
        entries.extend_from_slice(&self.available);
        entries.extend_from_slice(&self.chain_blocks);
        entries.extend_from_slice(&self.pending_free);

        let mut head = BlockId::NIL;
        for (i, chunk) in entries.chunks(per_block.max(1)).enumerate() {
            let id = structure[i];
            let next = structure.get(i + 1).copied().unwrap_or(BlockId::NIL);
            let mut buf = vec![0u8; self.geo.block_size];
            buf[0..2].copy_from_slice(&BlockKind::Free.marker());
            buf[2..4].copy_from_slice(&(chunk.len() as u16).to_be_bytes());
            buf[4..8].copy_from_slice(&next.0.to_be_bytes());
            for (j, entry) in chunk.iter().enumerate() {
                let off = 8 + j * 4;
                buf[off..off + 4].copy_from_slice(&entry.0.to_be_bytes());
            }
            if i == 0 {
                head = id;
            }
            self.write_block(id, &buf)?;
        }
        Ok(StagedChain {
            head,
            entries,
            structure,
        })
    }

    /// Rebaselines the tiers after the selector flip made `staged` the
    /// committed chain.
    pub fn finish_commit(&mut self, staged: StagedChain) {
        self.available = staged.entries;
        self.chain_blocks = staged.structure;
        self.pending_free.clear();
        self.fresh.clear();
        self.shadow.clear();
        self.dirty = false;
        self.committed_len = HEADER_SIZE + self.block_count as u64 * self.geo.block_size as u64;
        debug!(
            free = self.available.len() + self.chain_blocks.len(),
            total = self.block_count,
            "block store committed"
        );
    }

    /// Restores every overwritten committed block from the shadow map,
    /// truncates transaction-grown space away and resets the tiers to the
    /// committed baseline.
    pub fn rollback(&mut self) -> Result<()> {
        let committed_blocks = Self::blocks_in(self.committed_len, self.geo);
        for (id, prior) in std::mem::take(&mut self.shadow) {
            let off = HEADER_SIZE + id.0 as u64 * self.geo.block_size as u64;
            self.device.write_at(off, &prior)?;
        }
        for id in std::mem::take(&mut self.fresh) {
            if id.0 < committed_blocks {
                self.available.push(id);
            }
        }
        // released extension blocks fall away with the truncation
        self.available.retain(|id| id.0 < committed_blocks);
        self.device.resize(self.committed_len)?;
        self.block_count = committed_blocks;
        self.pending_free.clear();
        self.dirty = false;
        debug!(total = self.block_count, "block store rolled back");
        Ok(())
    }
}
