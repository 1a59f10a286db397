//! Leaf Node Module
//!
//! One fixed-size B-tree leaf block, mutated in place.
//!
//! ## Block Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (12 bytes)                                           │
//! │   Magic (4) | NumPairs (2) | LiveSize (2) | Frontmost (2)   │
//! │   | TstampCutpoint (2)                                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Pair Offsets: u16 × NumPairs, ordered by key  ──▶ grows     │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Free gap                                                    │
//! ├──────────────────────────────── frontmost ──────────────────┤
//! │ [Timestamp (4)][Entry] ... newest first      ◀── grows      │
//! ├──────────────────────────────── tstamp_cutpoint ────────────┤
//! │ [Entry] ... no timestamps                                   │
//! └──────────────────────────────── block_size ─────────────────┘
//! ```
//!
//! A pair offset points at the start of a record: the timestamp when the
//! offset is below `tstamp_cutpoint`, otherwise the entry itself. Callers
//! never deal with that distinction; [`LeafNode::get_entry`] and the
//! iterators resolve it.
//!
//! ## Space Accounting
//! The node keeps only what it is obligated to: live pairs, the timestamps
//! of the [`MANDATORY_TIMESTAMPS`] most recent writes, and a capped reserve of
//! recent deletion entries. Everything else is garbage that compaction may
//! drop at any time. See the `cost` module.

mod backfill;
mod cost;
mod entry;
mod fsck;
mod iter;
mod mutate;
mod rebalance;

use crate::sizer::ValueSizer;
use crate::timestamp::ReplTimestamp;

pub use backfill::{Backfill, BackfillEntry};
pub use cost::{free_space, leaf_epsilon};
pub use entry::{
    deletion_entry_size, entry_fits, entry_key, entry_size, entry_value, live_entry_size,
    write_deletion, write_live, write_skip, Entry, DELETE_ENTRY_CODE, SKIP_ENTRY_CODE_MANY,
    SKIP_ENTRY_CODE_ONE, SKIP_ENTRY_CODE_TWO, SKIP_ENTRY_RESERVED,
};
pub use fsck::{LeafDump, LeafSummary};
pub use iter::{EntryIter, PairIter, RawEntry};
pub use rebalance::{Leveled, SiblingSide};

pub use crate::timestamp::TIMESTAMP_SIZE;

// =============================================================================
// Format Constants
// =============================================================================

/// Longest key; also the largest tag value denoting a live entry
pub const MAX_KEY_SIZE: usize = 250;

/// Byte offsets of the header fields
pub const MAGIC_OFFSET: usize = 0;
pub const NUM_PAIRS_OFFSET: usize = 4;
pub const LIVE_SIZE_OFFSET: usize = 6;
pub const FRONTMOST_OFFSET: usize = 8;
pub const TSTAMP_CUTPOINT_OFFSET: usize = 10;
pub const PAIR_OFFSETS_OFFSET: usize = 12;

/// Header size: everything before the pair-offset array
pub const HEADER_SIZE: usize = PAIR_OFFSETS_OFFSET;

/// Size of one pair-offset slot
pub const PAIR_OFFSET_SIZE: usize = 2;

/// Number of most recent writes whose timestamps a node must keep
pub const MANDATORY_TIMESTAMPS: usize = 5;

/// Deletion entries may claim at most `free_space / DELETION_RESERVE_FRACTION`
/// bytes of mandatory cost
pub const DELETION_RESERVE_FRACTION: usize = 10;

// =============================================================================
// Leaf Node
// =============================================================================

/// A leaf block viewed through its buffer.
///
/// `B` is anything that derefs to the block bytes: an owned `Vec<u8>`, a
/// borrowed slice, or a guard handed out by a buffer cache. Read-only
/// operations need `B: AsRef<[u8]>`; mutations also need `AsMut<[u8]>`.
pub struct LeafNode<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> LeafNode<B> {
    /// Wrap a buffer without checking it. Call [`LeafNode::init`] on fresh
    /// buffers, or use [`LeafNode::open`] for existing ones.
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    /// Wrap an existing block after checking every format invariant
    pub fn open(buf: B, sizer: &dyn ValueSizer) -> crate::Result<Self> {
        let node = Self::new(buf);
        node.validate(sizer)?;
        Ok(node)
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    // -------------------------------------------------------------------------
    // Header
    // -------------------------------------------------------------------------

    pub fn magic(&self) -> [u8; 4] {
        let buf = self.as_bytes();
        [buf[0], buf[1], buf[2], buf[3]]
    }

    pub fn num_pairs(&self) -> usize {
        read_u16(self.as_bytes(), NUM_PAIRS_OFFSET) as usize
    }

    /// Bytes used by live entries and their pair-offset slots
    pub fn live_size(&self) -> usize {
        read_u16(self.as_bytes(), LIVE_SIZE_OFFSET) as usize
    }

    pub fn frontmost(&self) -> usize {
        read_u16(self.as_bytes(), FRONTMOST_OFFSET) as usize
    }

    pub fn tstamp_cutpoint(&self) -> usize {
        read_u16(self.as_bytes(), TSTAMP_CUTPOINT_OFFSET) as usize
    }

    /// Offset of the record for the `index`th key
    pub fn pair_offset(&self, index: usize) -> usize {
        debug_assert!(index < self.num_pairs());
        read_u16(self.as_bytes(), PAIR_OFFSETS_OFFSET + index * PAIR_OFFSET_SIZE) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_pairs() == 0
    }

    /// End of the pair-offset array
    pub(crate) fn pair_offsets_end(&self) -> usize {
        HEADER_SIZE + self.num_pairs() * PAIR_OFFSET_SIZE
    }

    // -------------------------------------------------------------------------
    // Entries
    // -------------------------------------------------------------------------

    /// Whether the record at `offset` carries a timestamp
    pub fn has_timestamp(&self, offset: usize) -> bool {
        offset < self.tstamp_cutpoint()
    }

    /// Timestamp of the record at `offset`, if it has one
    pub fn timestamp_at(&self, offset: usize) -> Option<ReplTimestamp> {
        if !self.has_timestamp(offset) {
            return None;
        }
        let buf = self.as_bytes();
        Some(ReplTimestamp::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]))
    }

    /// Start of the entry bytes of the record at `offset`
    pub(crate) fn entry_start(&self, offset: usize) -> usize {
        if self.has_timestamp(offset) {
            offset + TIMESTAMP_SIZE
        } else {
            offset
        }
    }

    /// Entry of the record at `offset` (a pair offset, not a raw byte position)
    pub fn get_entry<'a>(&'a self, sizer: &dyn ValueSizer, offset: usize) -> Entry<'a> {
        Entry::parse(&self.as_bytes()[self.entry_start(offset)..], sizer)
    }

    /// Key of the `index`th pair
    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.pair_offset(index);
        match entry_key(&self.as_bytes()[self.entry_start(offset)..]) {
            Some(key) => key,
            None => panic!("pair {index} at offset {offset} references a skip entry"),
        }
    }

    /// Binary search for `key` among the pairs.
    ///
    /// `Ok(index)` if the key has an entry (live or deletion), otherwise
    /// `Err(index)` where it would be inserted.
    pub fn find_key(&self, key: &[u8]) -> Result<usize, usize> {
        let (mut lo, mut hi) = (0, self.num_pairs());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at(mid).cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Value of a live key; None if the key is absent or deleted
    pub fn lookup<'a>(&'a self, sizer: &dyn ValueSizer, key: &[u8]) -> Option<&'a [u8]> {
        let index = self.find_key(key).ok()?;
        self.get_entry(sizer, self.pair_offset(index)).value()
    }

    /// Physical walk over every record from `frontmost` to the block end
    pub fn entries<'a>(&'a self, sizer: &'a dyn ValueSizer) -> EntryIter<'a> {
        EntryIter::new(
            self.as_bytes(),
            sizer,
            self.frontmost(),
            self.tstamp_cutpoint(),
            sizer.block_size(),
        )
    }

    /// Walk over the pairs in key order
    pub fn pairs<'a>(&'a self, sizer: &'a dyn ValueSizer) -> PairIter<'a, B> {
        PairIter::new(self, sizer)
    }

    /// Live key/value pairs in key order
    pub fn live_pairs<'a>(
        &'a self,
        sizer: &'a dyn ValueSizer,
    ) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
        self.pairs(sizer).filter_map(|raw| match raw.entry {
            Entry::Live { key, value } => Some((key, value)),
            _ => None,
        })
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafNode<B> {
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    pub(crate) fn set_magic(&mut self, magic: [u8; 4]) {
        self.bytes_mut()[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&magic);
    }

    pub(crate) fn set_num_pairs(&mut self, n: usize) {
        write_u16(self.bytes_mut(), NUM_PAIRS_OFFSET, n);
    }

    pub(crate) fn set_live_size(&mut self, size: usize) {
        write_u16(self.bytes_mut(), LIVE_SIZE_OFFSET, size);
    }

    pub(crate) fn set_frontmost(&mut self, offset: usize) {
        write_u16(self.bytes_mut(), FRONTMOST_OFFSET, offset);
    }

    pub(crate) fn set_tstamp_cutpoint(&mut self, offset: usize) {
        write_u16(self.bytes_mut(), TSTAMP_CUTPOINT_OFFSET, offset);
    }

    pub(crate) fn set_pair_offset(&mut self, index: usize, offset: usize) {
        write_u16(
            self.bytes_mut(),
            PAIR_OFFSETS_OFFSET + index * PAIR_OFFSET_SIZE,
            offset,
        );
    }

    pub(crate) fn write_timestamp(&mut self, offset: usize, tstamp: ReplTimestamp) {
        self.bytes_mut()[offset..offset + TIMESTAMP_SIZE].copy_from_slice(&tstamp.to_le_bytes());
    }
}

// =============================================================================
// Byte Helpers
// =============================================================================

pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn write_u16(buf: &mut [u8], at: usize, value: usize) {
    debug_assert!(value <= u16::MAX as usize, "{value} does not fit a u16 field");
    buf[at..at + 2].copy_from_slice(&(value as u16).to_le_bytes());
}
