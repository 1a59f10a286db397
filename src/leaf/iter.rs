//! Leaf Iterators
//!
//! Two cursors over the same records:
//!
//! - [`EntryIter`] walks the entry region physically, from `frontmost` to the
//!   block end, so it also sees skip padding and unreferenced garbage.
//! - [`PairIter`] walks the pair-offset array in key order and only sees
//!   referenced live and deletion entries.
//!
//! Both hide the timestamp boundary: a record below the cutpoint yields its
//! timestamp and the entry behind it.

use crate::sizer::ValueSizer;
use crate::timestamp::{ReplTimestamp, TIMESTAMP_SIZE};

use super::entry::Entry;
use super::LeafNode;

/// One record: an entry and the timestamp stored in front of it, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEntry<'a> {
    /// Record start; this is the value stored in `pair_offsets`
    pub offset: usize,
    pub timestamp: Option<ReplTimestamp>,
    pub entry: Entry<'a>,
}

impl<'a> RawEntry<'a> {
    /// Offset of the entry bytes, past the timestamp
    pub fn entry_start(&self) -> usize {
        match self.timestamp {
            Some(_) => self.offset + TIMESTAMP_SIZE,
            None => self.offset,
        }
    }

    /// Bytes occupied by the record, timestamp included
    pub fn record_size(&self) -> usize {
        self.entry_start() - self.offset + self.entry.size()
    }

    /// First offset after the record
    pub fn end(&self) -> usize {
        self.entry_start() + self.entry.size()
    }
}

/// Physical cursor over the entry region
pub struct EntryIter<'a> {
    buf: &'a [u8],
    sizer: &'a dyn ValueSizer,
    /// Offset of the next record
    offset: usize,
    cutpoint: usize,
    end: usize,
}

impl<'a> EntryIter<'a> {
    pub(super) fn new(
        buf: &'a [u8],
        sizer: &'a dyn ValueSizer,
        start: usize,
        cutpoint: usize,
        end: usize,
    ) -> Self {
        Self {
            buf,
            sizer,
            offset: start,
            cutpoint,
            end,
        }
    }

    /// Offset of the record the next call to `next` would yield
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = RawEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }

        let offset = self.offset;
        let (timestamp, entry_start) = if offset < self.cutpoint {
            let ts = ReplTimestamp::from_le_bytes([
                self.buf[offset],
                self.buf[offset + 1],
                self.buf[offset + 2],
                self.buf[offset + 3],
            ]);
            (Some(ts), offset + TIMESTAMP_SIZE)
        } else {
            (None, offset)
        };

        let entry = Entry::parse(&self.buf[entry_start..self.end], self.sizer);
        self.offset = entry_start + entry.size();

        Some(RawEntry {
            offset,
            timestamp,
            entry,
        })
    }
}

/// Key-order cursor over the pair-offset array
pub struct PairIter<'a, B> {
    node: &'a LeafNode<B>,
    sizer: &'a dyn ValueSizer,
    index: usize,
    len: usize,
}

impl<'a, B: AsRef<[u8]>> PairIter<'a, B> {
    pub(super) fn new(node: &'a LeafNode<B>, sizer: &'a dyn ValueSizer) -> Self {
        Self {
            node,
            sizer,
            index: 0,
            len: node.num_pairs(),
        }
    }
}

impl<'a, B: AsRef<[u8]>> Iterator for PairIter<'a, B> {
    type Item = RawEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.len {
            return None;
        }

        let offset = self.node.pair_offset(self.index);
        self.index += 1;

        Some(RawEntry {
            offset,
            timestamp: self.node.timestamp_at(offset),
            entry: self.node.get_entry(self.sizer, offset),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.index;
        (remaining, Some(remaining))
    }
}

impl<'a, B: AsRef<[u8]>> ExactSizeIterator for PairIter<'a, B> {}
