//! On-disk format: header layout, root descriptors, block markers, geometry.
//!
//! All integers are stored big-endian. The 512-byte header at offset 0 holds
//! two root descriptor slots plus a one-byte selector; a commit writes the
//! new descriptor into the inactive slot and then flips the selector with a
//! single one-byte write, so a crash mid-commit always leaves one fully
//! written root reachable.

use std::fmt;

use crate::error::{Result, StoreError};

/// Size of the reserved header region at the start of the device.
pub const HEADER_SIZE: u64 = 512;

/// Eight-byte format magic at offset 0.
pub const FORMAT_MAGIC: [u8; 8] = *b"UMBRADB\0";

/// Device offset of the one-byte root selector.
pub const SELECTOR_OFFSET: u64 = 32;

/// Maximum length of the content identifier stored in the header.
pub const CONTENT_ID_SIZE: usize = 16;

/// Encoded size of one root descriptor slot.
pub const ROOT_DESCRIPTOR_SIZE: usize = 17;

const SLOT_OFFSETS: [u64; 2] = [33, 50];
const BLOCK_SIZE_OFFSET: usize = 68;
const KEY_SIZE_OFFSET: usize = 72;
const CONTENT_ID_OFFSET: usize = 76;

/// Smallest block size the engine accepts.
pub const MIN_BLOCK_SIZE: u32 = 64;

/// Index naming a fixed-size block within the device.
///
/// Block `i` lives at byte offset `HEADER_SIZE + i * block_size`. The device
/// is effectively an arena and `BlockId` values are arena indices; no block
/// ever holds a native pointer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Reserved "invalid/none" sentinel.
    pub const NIL: BlockId = BlockId(u32::MAX);

    /// Returns true unless this is the [`BlockId::NIL`] sentinel.
    pub fn is_valid(self) -> bool {
        self != Self::NIL
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "BlockId({})", self.0)
        } else {
            write!(f, "BlockId(NIL)")
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "nil")
        }
    }
}

/// Classification of a block by its leading two-byte marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// Non-leaf routing node.
    Index,
    /// Terminal node holding key/value entries.
    Leaf,
    /// Overflow continuation of a leaf's entry stream.
    Tail,
    /// Member of the on-disk free-list chain.
    Free,
}

impl BlockKind {
    /// Two-byte marker written at the start of every block of this kind.
    pub fn marker(self) -> [u8; 2] {
        match self {
            BlockKind::Index => *b"IN",
            BlockKind::Leaf => *b"LF",
            BlockKind::Tail => *b"TL",
            BlockKind::Free => *b"FR",
        }
    }

    /// Classifies a marker; `None` means the block is unrecognized. Recovery
    /// scanning must rely on this, never on traversal context.
    pub fn from_marker(marker: [u8; 2]) -> Option<Self> {
        match &marker {
            b"IN" => Some(BlockKind::Index),
            b"LF" => Some(BlockKind::Leaf),
            b"TL" => Some(BlockKind::Tail),
            b"FR" => Some(BlockKind::Free),
            _ => None,
        }
    }
}

/// Fixed block/key geometry of an open store.
#[derive(Clone, Copy, Debug)]
pub struct Geometry {
    /// Block size in bytes, fixed for the lifetime of the file.
    pub block_size: usize,
    /// Key size in bytes, fixed for the lifetime of the file.
    pub key_size: usize,
}

impl Geometry {
    const INDEX_HEADER: usize = 9; // marker(2) level(1) count(2) begin(4)
    const LEAF_HEADER: usize = 8; // marker(2) count(2) first_tail(4)
    const TAIL_HEADER: usize = 6; // marker(2) next(4)
    const FREE_HEADER: usize = 8; // marker(2) count(2) next(4)

    // Entry counts are encoded as u16 in index, leaf and free-list blocks.
    const MAX_BLOCK_ENTRIES: usize = u16::MAX as usize;

    /// Validates that the block size can hold useful nodes for this key size.
    pub fn validate(self) -> Result<()> {
        if self.key_size == 0 {
            return Err(StoreError::Usage("key size must be set before open"));
        }
        if self.block_size < MIN_BLOCK_SIZE as usize {
            return Err(StoreError::Usage("block size below minimum"));
        }
        if self.index_capacity() < 2 {
            return Err(StoreError::Usage("key size too large for block size"));
        }
        if self.index_capacity() > Self::MAX_BLOCK_ENTRIES
            || self.leaf_payload() / self.leaf_entry_size(0) > Self::MAX_BLOCK_ENTRIES
            || self.free_list_capacity() > Self::MAX_BLOCK_ENTRIES
        {
            return Err(StoreError::Usage("block size too large for 16-bit entry counts"));
        }
        Ok(())
    }

    /// Maximum number of (separator, child) entries in one index block.
    pub fn index_capacity(self) -> usize {
        (self.block_size - Self::INDEX_HEADER) / (self.key_size + 4)
    }

    /// Minimum entry count for a non-root index node.
    pub fn index_min(self) -> usize {
        self.index_capacity() / 2
    }

    /// Bytes of entry stream that fit in the leaf block itself.
    pub fn leaf_payload(self) -> usize {
        self.block_size - Self::LEAF_HEADER
    }

    /// Bytes of entry stream that fit in one tail block.
    pub fn tail_payload(self) -> usize {
        self.block_size - Self::TAIL_HEADER
    }

    /// Minimum bytes of entry stream for a non-root leaf.
    pub fn leaf_min_bytes(self) -> usize {
        self.leaf_payload() / 4
    }

    /// Encoded size of one leaf entry with a value of `value_len` bytes.
    pub fn leaf_entry_size(self, value_len: usize) -> usize {
        self.key_size + 4 + value_len
    }

    /// Free-list entries that fit in one free-list block.
    pub fn free_list_capacity(self) -> usize {
        (self.block_size - Self::FREE_HEADER) / 4
    }

    /// Right-pads `key` with zero bytes to the configured key size.
    pub fn pad_key(self, key: &[u8]) -> Result<Vec<u8>> {
        if key.len() > self.key_size {
            return Err(StoreError::Capacity("key longer than configured key size"));
        }
        let mut padded = vec![0u8; self.key_size];
        padded[..key.len()].copy_from_slice(key);
        Ok(padded)
    }
}

/// One candidate root: everything a commit makes authoritative in one flip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootDescriptor {
    /// Root block of the tree.
    pub root: BlockId,
    /// True when the root block is a leaf (empty or near-empty tree).
    pub root_is_leaf: bool,
    /// Head of the on-disk free-list chain, or `NIL`.
    pub free_head: BlockId,
    /// Number of live records under this root.
    pub record_count: u64,
}

impl RootDescriptor {
    /// Descriptor for a freshly created store: an empty leaf root.
    pub fn initial(root: BlockId) -> Self {
        Self {
            root,
            root_is_leaf: true,
            free_head: BlockId::NIL,
            record_count: 0,
        }
    }

    fn encode(&self) -> [u8; ROOT_DESCRIPTOR_SIZE] {
        let mut buf = [0u8; ROOT_DESCRIPTOR_SIZE];
        buf[0..4].copy_from_slice(&self.root.0.to_be_bytes());
        buf[4] = u8::from(self.root_is_leaf);
        buf[5..9].copy_from_slice(&self.free_head.0.to_be_bytes());
        buf[9..17].copy_from_slice(&self.record_count.to_be_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let root = BlockId(u32::from_be_bytes(buf[0..4].try_into().unwrap()));
        let root_is_leaf = match buf[4] {
            0 => false,
            1 => true,
            _ => return Err(StoreError::Corruption("root descriptor leaf flag invalid")),
        };
        let free_head = BlockId(u32::from_be_bytes(buf[5..9].try_into().unwrap()));
        let record_count = u64::from_be_bytes(buf[9..17].try_into().unwrap());
        Ok(Self {
            root,
            root_is_leaf,
            free_head,
            record_count,
        })
    }
}

/// Decoded 512-byte file header.
#[derive(Clone, Debug)]
pub struct Header {
    selector: u8,
    slots: [RootDescriptor; 2],
    /// Block size recorded at creation.
    pub block_size: u32,
    /// Key size recorded at creation.
    pub key_size: u32,
    /// NUL-padded content identifier recorded at creation.
    pub content_id: [u8; CONTENT_ID_SIZE],
}

/// Staged output of [`Header::stage_commit`].
///
/// Commit is modeled as a pure function from the old header and the pending
/// root to these bytes, so the write-then-flip order is enforced by the type
/// rather than by convention: callers write `slot_bytes` at `slot_offset`,
/// sync, then write `selector_byte` at [`SELECTOR_OFFSET`].
#[derive(Debug)]
pub struct StagedCommit {
    /// Device offset of the inactive descriptor slot.
    pub slot_offset: u64,
    /// Encoded descriptor bytes for the inactive slot.
    pub slot_bytes: [u8; ROOT_DESCRIPTOR_SIZE],
    /// Selector value activating the freshly written slot.
    pub selector_byte: u8,
    /// Header as it reads after the flip.
    pub header: Header,
}

impl Header {
    /// Builds the header of a newly created store.
    pub fn new(block_size: u32, key_size: u32, content_id: &[u8], active: RootDescriptor) -> Result<Self> {
        if content_id.len() > CONTENT_ID_SIZE {
            return Err(StoreError::Usage("content identifier longer than 16 bytes"));
        }
        let mut id = [0u8; CONTENT_ID_SIZE];
        id[..content_id.len()].copy_from_slice(content_id);
        Ok(Self {
            selector: 0,
            slots: [active, active],
            block_size,
            key_size,
            content_id: id,
        })
    }

    /// Currently authoritative root descriptor.
    pub fn active(&self) -> &RootDescriptor {
        &self.slots[self.selector as usize]
    }

    /// Stages a commit of `descriptor` into the inactive slot.
    pub fn stage_commit(&self, descriptor: RootDescriptor) -> StagedCommit {
        let inactive = 1 - self.selector;
        let mut header = self.clone();
        header.slots[inactive as usize] = descriptor;
        header.selector = inactive;
        StagedCommit {
            slot_offset: SLOT_OFFSETS[inactive as usize],
            slot_bytes: descriptor.encode(),
            selector_byte: inactive,
            header,
        }
    }

    /// Serializes the full 512-byte header.
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(&FORMAT_MAGIC);
        buf[SELECTOR_OFFSET as usize] = self.selector;
        for (slot, off) in self.slots.iter().zip(SLOT_OFFSETS) {
            let off = off as usize;
            buf[off..off + ROOT_DESCRIPTOR_SIZE].copy_from_slice(&slot.encode());
        }
        buf[BLOCK_SIZE_OFFSET..BLOCK_SIZE_OFFSET + 4].copy_from_slice(&self.block_size.to_be_bytes());
        buf[KEY_SIZE_OFFSET..KEY_SIZE_OFFSET + 4].copy_from_slice(&self.key_size.to_be_bytes());
        buf[CONTENT_ID_OFFSET..CONTENT_ID_OFFSET + CONTENT_ID_SIZE].copy_from_slice(&self.content_id);
        buf
    }

    /// Parses and validates a 512-byte header.
    pub fn decode(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        if buf[0..8] != FORMAT_MAGIC {
            return Err(StoreError::Corruption("format magic mismatch"));
        }
        let selector = buf[SELECTOR_OFFSET as usize];
        if selector > 1 {
            return Err(StoreError::Corruption("root selector byte invalid"));
        }
        let mut slots = [RootDescriptor::initial(BlockId::NIL); 2];
        for (slot, off) in slots.iter_mut().zip(SLOT_OFFSETS) {
            let off = off as usize;
            *slot = RootDescriptor::decode(&buf[off..off + ROOT_DESCRIPTOR_SIZE])?;
        }
        let block_size = u32::from_be_bytes(buf[BLOCK_SIZE_OFFSET..BLOCK_SIZE_OFFSET + 4].try_into().unwrap());
        let key_size = u32::from_be_bytes(buf[KEY_SIZE_OFFSET..KEY_SIZE_OFFSET + 4].try_into().unwrap());
        if block_size < MIN_BLOCK_SIZE {
            return Err(StoreError::Corruption("header block size out of range"));
        }
        if key_size == 0 {
            return Err(StoreError::Corruption("header key size is zero"));
        }
        let mut content_id = [0u8; CONTENT_ID_SIZE];
        content_id.copy_from_slice(&buf[CONTENT_ID_OFFSET..CONTENT_ID_OFFSET + CONTENT_ID_SIZE]);
        Ok(Self {
            selector,
            slots,
            block_size,
            key_size,
            content_id,
        })
    }
}
