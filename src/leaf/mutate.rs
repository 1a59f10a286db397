//! Leaf Mutators
//!
//! In-place writes to a single node.
//!
//! ## Write Path
//! ```text
//! insert(key, value, t)
//!   │
//!   ├── gap too small? ──▶ garbage_collect(MANDATORY_TIMESTAMPS - 1)
//!   │
//!   ├── key present?   ──▶ old entry becomes skip padding, slot reused
//!   │   otherwise      ──▶ open a slot at the sorted index
//!   │
//!   └── write [t][len][key][value] just below frontmost
//! ```
//!
//! Compaction rewrites the entry region as
//! `[stamped records, newest first][plain live entries]` and leaves the
//! header's `live_size` untouched: live entries are never dropped.

use crate::sizer::ValueSizer;
use crate::timestamp::{ReplTimestamp, TIMESTAMP_SIZE};

use super::backfill::Horizon;
use super::entry::{
    deletion_entry_size, live_entry_size, write_deletion, write_live, write_skip, Entry,
};
use super::iter::RawEntry;
use super::{LeafNode, MANDATORY_TIMESTAMPS, MAX_KEY_SIZE, PAIR_OFFSET_SIZE, PAIR_OFFSETS_OFFSET};

/// What compaction does with one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retention {
    /// Keep the record with its timestamp
    KeepStamped,
    /// Keep the entry, drop its timestamp
    KeepPlain,
    /// Drop the record and, for deletions, the pair slot referencing it
    Drop,
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafNode<B> {
    // =========================================================================
    // Initialization
    // =========================================================================

    /// Format the buffer as an empty leaf
    pub fn init(&mut self, sizer: &dyn ValueSizer) {
        let block_size = sizer.block_size();
        assert_eq!(
            self.as_bytes().len(),
            block_size,
            "leaf buffer does not match the block size"
        );

        self.set_magic(sizer.leaf_magic());
        self.set_num_pairs(0);
        self.set_live_size(0);
        self.set_frontmost(block_size);
        self.set_tstamp_cutpoint(block_size);
    }

    // =========================================================================
    // Insert / Remove
    // =========================================================================

    /// Insert or replace `key`, stamping the new entry with `tstamp`.
    ///
    /// `value` must be exactly one encoded value. Panics if the node
    /// [`is_full`](Self::is_full) for this pair.
    pub fn insert(
        &mut self,
        sizer: &dyn ValueSizer,
        key: &[u8],
        value: &[u8],
        tstamp: ReplTimestamp,
    ) {
        assert!(key.len() <= MAX_KEY_SIZE, "key of {} bytes", key.len());
        assert_eq!(sizer.size(value), value.len(), "value is not one encoded value");
        assert!(!self.is_full(sizer, key, value), "insert into a full leaf node");

        let entry_len = live_entry_size(key.len(), value.len());
        if !self.has_room(1, TIMESTAMP_SIZE + entry_len) {
            self.garbage_collect(sizer, MANDATORY_TIMESTAMPS - 1);
            assert!(self.has_room(1, TIMESTAMP_SIZE + entry_len));
        }

        let index = match self.find_key(key) {
            Ok(index) => {
                self.clean_pair(sizer, index);
                index
            }
            Err(index) => {
                self.open_slot(index);
                index
            }
        };

        let offset = self.frontmost() - entry_len - TIMESTAMP_SIZE;
        let start = offset + TIMESTAMP_SIZE;
        write_live(&mut self.bytes_mut()[start..start + entry_len], key, value);
        self.write_timestamp(offset, tstamp);
        self.set_frontmost(offset);
        self.set_pair_offset(index, offset);
        self.set_live_size(self.live_size() + PAIR_OFFSET_SIZE + entry_len);

        self.debug_validate(sizer);
    }

    /// Replace the live entry for `key` with a deletion entry stamped `tstamp`.
    ///
    /// Panics if `key` has no live entry or the node
    /// [`is_full_for_removal`](Self::is_full_for_removal).
    pub fn remove(&mut self, sizer: &dyn ValueSizer, key: &[u8], tstamp: ReplTimestamp) {
        let is_live = match self.find_key(key) {
            Ok(index) => self.get_entry(sizer, self.pair_offset(index)).is_live(),
            Err(_) => false,
        };
        assert!(is_live, "remove of \"{}\", which is not live", key.escape_ascii());
        assert!(
            !self.is_full_for_removal(sizer, key),
            "remove from a leaf node with no room for a tombstone"
        );

        let entry_len = deletion_entry_size(key.len());
        if !self.has_room(0, TIMESTAMP_SIZE + entry_len) {
            self.garbage_collect(sizer, MANDATORY_TIMESTAMPS - 1);
            assert!(self.has_room(0, TIMESTAMP_SIZE + entry_len));
        }

        // compaction may have dropped slots in front of the key
        let Ok(index) = self.find_key(key) else {
            panic!("live key \"{}\" lost by compaction", key.escape_ascii());
        };
        self.clean_pair(sizer, index);

        let offset = self.frontmost() - entry_len - TIMESTAMP_SIZE;
        let start = offset + TIMESTAMP_SIZE;
        write_deletion(&mut self.bytes_mut()[start..start + entry_len], key);
        self.write_timestamp(offset, tstamp);
        self.set_frontmost(offset);
        self.set_pair_offset(index, offset);

        self.debug_validate(sizer);
    }

    /// Forget `key` entirely, leaving no tombstone behind.
    ///
    /// Returns whether the key had a live or deletion entry.
    pub fn erase_presence(&mut self, sizer: &dyn ValueSizer, key: &[u8]) -> bool {
        let Ok(index) = self.find_key(key) else {
            return false;
        };

        self.clean_pair(sizer, index);
        self.remove_slots(index, index + 1);
        self.debug_validate(sizer);
        true
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Drop deletion entries older than `min_tstamp` and the timestamps of
    /// older live entries
    pub fn erase_deletions(&mut self, sizer: &dyn ValueSizer, min_tstamp: ReplTimestamp) {
        let pairs_before = self.num_pairs();

        self.compact(sizer, |raw| match (raw.entry, raw.timestamp) {
            (Entry::Skip(_), _) => Retention::Drop,
            (_, Some(ts)) if ts >= min_tstamp => Retention::KeepStamped,
            (Entry::Live { .. }, _) => Retention::KeepPlain,
            (Entry::Deletion { .. }, _) => Retention::Drop,
        });

        tracing::debug!(
            min_tstamp = min_tstamp.value(),
            pairs_before,
            pairs_after = self.num_pairs(),
            "erased old deletions"
        );
        self.debug_validate(sizer);
    }

    /// Compact down to exactly `mandatory_cost(num_tstamped)`: counted records
    /// keep their timestamps, other live entries lose them, everything else
    /// is dropped
    pub(crate) fn garbage_collect(&mut self, sizer: &dyn ValueSizer, num_tstamped: usize) {
        let scan = self.scan_mandatory(sizer, num_tstamped);
        let gap_before = self.frontmost() - self.pair_offsets_end();

        self.compact(sizer, |raw| {
            if scan.is_counted(raw.offset) {
                Retention::KeepStamped
            } else if raw.entry.is_live() {
                Retention::KeepPlain
            } else {
                Retention::Drop
            }
        });

        tracing::trace!(
            num_tstamped,
            gap_before,
            gap_after = self.frontmost() - self.pair_offsets_end(),
            "garbage collected leaf"
        );
    }

    /// Rewrite the entry region keeping records as `retain` decides.
    ///
    /// Stamped records keep their relative order at the front, plain entries
    /// follow in their old order. Pair slots of dropped records go away.
    ///
    /// A record `retain` keeps stamped is still demoted when its timestamp is
    /// older than one this pass discards: live entries lose the stamp,
    /// deletions are dropped. No change newer than the oldest stamp left
    /// behind is ever lost.
    pub(crate) fn compact<F>(&mut self, sizer: &dyn ValueSizer, mut retain: F)
    where
        F: FnMut(&RawEntry<'_>) -> Retention,
    {
        let block_size = sizer.block_size();
        let snapshot = self.as_bytes().to_vec();
        let old = LeafNode::new(snapshot.as_slice());

        let decisions: Vec<_> = old
            .entries(sizer)
            .map(|raw| {
                let retention = retain(&raw);
                (raw, retention)
            })
            .collect();

        // a kept timestamp may not be older than any timestamp thrown away here
        let horizon = decisions
            .iter()
            .filter(|(raw, retention)| *retention != Retention::KeepStamped && !raw.entry.is_skip())
            .filter_map(|(raw, _)| raw.timestamp)
            .map(Horizon::At)
            .fold(Horizon::Open, Horizon::max);

        let mut stamped = Vec::new();
        let mut plain = Vec::new();
        let mut demoted = 0;
        for (raw, retention) in decisions {
            let retention = match (retention, raw.timestamp) {
                (Retention::KeepStamped, Some(ts)) if !horizon.admits(ts) => {
                    demoted += 1;
                    if raw.entry.is_live() {
                        Retention::KeepPlain
                    } else {
                        Retention::Drop
                    }
                }
                (retention, _) => retention,
            };
            match retention {
                Retention::KeepStamped => {
                    debug_assert!(raw.timestamp.is_some());
                    stamped.push(raw);
                }
                Retention::KeepPlain => plain.push(raw),
                Retention::Drop => {
                    assert!(!raw.entry.is_live(), "compaction dropped a live entry");
                }
            }
        }

        let stamped_size: usize = stamped.iter().map(RawEntry::record_size).sum();
        let plain_size: usize = plain.iter().map(|raw| raw.entry.size()).sum();
        let frontmost = block_size - stamped_size - plain_size;
        let cutpoint = frontmost + stamped_size;

        // (old record offset, new record offset), sorted by old offset below
        let mut moves = Vec::with_capacity(stamped.len() + plain.len());
        let mut cursor = frontmost;
        {
            let buf = self.bytes_mut();
            for raw in &stamped {
                let len = raw.record_size();
                buf[cursor..cursor + len].copy_from_slice(&snapshot[raw.offset..raw.offset + len]);
                moves.push((raw.offset, cursor));
                cursor += len;
            }
            for raw in &plain {
                let start = raw.entry_start();
                let len = raw.entry.size();
                buf[cursor..cursor + len].copy_from_slice(&snapshot[start..start + len]);
                moves.push((raw.offset, cursor));
                cursor += len;
            }
        }
        debug_assert_eq!(cursor, block_size);
        moves.sort_unstable();

        let mut kept = 0;
        for index in 0..old.num_pairs() {
            let old_offset = old.pair_offset(index);
            if let Ok(pos) = moves.binary_search_by_key(&old_offset, |&(from, _)| from) {
                self.set_pair_offset(kept, moves[pos].1);
                kept += 1;
            }
        }

        self.set_num_pairs(kept);
        self.set_frontmost(frontmost);
        self.set_tstamp_cutpoint(cutpoint);

        if demoted > 0 {
            tracing::trace!(
                demoted,
                ?horizon,
                "dropped timestamps older than discarded history"
            );
        }
    }

    // =========================================================================
    // Slot Helpers
    // =========================================================================

    /// Turn the entry of the `index`th pair into skip padding. The slot stays.
    pub(crate) fn clean_pair(&mut self, sizer: &dyn ValueSizer, index: usize) {
        let offset = self.pair_offset(index);
        let start = self.entry_start(offset);
        let (size, live) = {
            let entry = self.get_entry(sizer, offset);
            (entry.size(), entry.is_live())
        };

        if live {
            self.set_live_size(self.live_size() - PAIR_OFFSET_SIZE - size);
        }
        write_skip(&mut self.bytes_mut()[start..start + size]);
    }

    /// Insert an uninitialized slot at `index`
    pub(crate) fn open_slot(&mut self, index: usize) {
        let n = self.num_pairs();
        debug_assert!(index <= n);
        let from = PAIR_OFFSETS_OFFSET + index * PAIR_OFFSET_SIZE;
        let to = PAIR_OFFSETS_OFFSET + n * PAIR_OFFSET_SIZE;
        self.bytes_mut().copy_within(from..to, from + PAIR_OFFSET_SIZE);
        self.set_num_pairs(n + 1);
    }

    /// Remove the slots `[beg, end)`, shifting later slots down
    pub(crate) fn remove_slots(&mut self, beg: usize, end: usize) {
        let n = self.num_pairs();
        debug_assert!(beg <= end && end <= n);
        let from = PAIR_OFFSETS_OFFSET + end * PAIR_OFFSET_SIZE;
        let to = PAIR_OFFSETS_OFFSET + n * PAIR_OFFSET_SIZE;
        self.bytes_mut()
            .copy_within(from..to, PAIR_OFFSETS_OFFSET + beg * PAIR_OFFSET_SIZE);
        self.set_num_pairs(n - (end - beg));
    }

    /// Whether the gap below `frontmost` fits `extra_slots` new slots plus
    /// `bytes` of records
    pub(crate) fn has_room(&self, extra_slots: usize, bytes: usize) -> bool {
        self.pair_offsets_end() + extra_slots * PAIR_OFFSET_SIZE + bytes <= self.frontmost()
    }

    pub(crate) fn debug_validate(&self, sizer: &dyn ValueSizer) {
        if cfg!(debug_assertions) {
            if let Err(e) = self.validate(sizer) {
                panic!("leaf node invariant broken: {e}");
            }
        }
    }
}
