//! Cost Accounting
//!
//! A node does not have to keep everything it physically holds. Its
//! *mandatory cost* is what compaction could not shrink:
//!
//! ```text
//! mandatory_cost(k) = live_size
//!                   + 4 bytes for each live entry among the k most recent records
//!                   + (slot + timestamp + entry) for recent deletions, while the
//!                     deletion reserve (free_space / 10) is not used up
//! ```
//!
//! Fullness and underfullness are judged on this cost rather than on the
//! physical footprint, so a node full of stale timestamps and tombstones is
//! never split just because nobody has compacted it yet.

use crate::sizer::ValueSizer;
use crate::timestamp::TIMESTAMP_SIZE;

use super::entry::{deletion_entry_size, live_entry_size, Entry};
use super::{
    LeafNode, DELETION_RESERVE_FRACTION, HEADER_SIZE, MANDATORY_TIMESTAMPS, MAX_KEY_SIZE,
    PAIR_OFFSET_SIZE,
};

/// Bytes available to pair offsets and entries
pub fn free_space(sizer: &dyn ValueSizer) -> usize {
    sizer.block_size() - HEADER_SIZE
}

/// Upper bound on the mandatory footprint of a single pair
pub fn leaf_epsilon(sizer: &dyn ValueSizer) -> usize {
    // key length tag + key, value, pair offset, timestamp
    (1 + MAX_KEY_SIZE) + sizer.max_possible_size().max(1) + PAIR_OFFSET_SIZE + TIMESTAMP_SIZE
}

/// Running total of the bytes deletion entries have claimed in one scan
#[derive(Debug)]
pub(crate) struct DeletionBudget {
    spent: usize,
    max: usize,
}

impl DeletionBudget {
    pub(crate) fn new(sizer: &dyn ValueSizer) -> Self {
        Self {
            spent: 0,
            max: free_space(sizer) / DELETION_RESERVE_FRACTION,
        }
    }

    /// Charge `cost` if the reserve is not exhausted yet
    pub(crate) fn admit(&mut self, cost: usize) -> bool {
        if self.spent < self.max {
            self.spent += cost;
            true
        } else {
            false
        }
    }
}

/// Outcome of one mandatory-cost walk
#[derive(Debug, Clone, Default)]
pub(crate) struct MandatoryScan {
    pub(crate) cost: usize,
    /// Offset where the walk stopped
    pub(crate) back_offset: usize,
    /// Record offsets of the entries the walk counted, newest first
    pub(crate) counted: Vec<usize>,
}

impl MandatoryScan {
    pub(crate) fn is_counted(&self, offset: usize) -> bool {
        self.counted.contains(&offset)
    }
}

impl<B: AsRef<[u8]>> LeafNode<B> {
    /// Mandatory cost when the `required_timestamps` most recent writes must
    /// keep their timestamps
    pub fn mandatory_cost(&self, sizer: &dyn ValueSizer, required_timestamps: usize) -> usize {
        self.scan_mandatory(sizer, required_timestamps).cost
    }

    /// [`mandatory_cost`](Self::mandatory_cost) plus the offset of the first
    /// record the walk did not reach
    pub fn mandatory_cost_with_offset(
        &self,
        sizer: &dyn ValueSizer,
        required_timestamps: usize,
    ) -> (usize, usize) {
        let scan = self.scan_mandatory(sizer, required_timestamps);
        (scan.cost, scan.back_offset)
    }

    pub(crate) fn scan_mandatory(
        &self,
        sizer: &dyn ValueSizer,
        required_timestamps: usize,
    ) -> MandatoryScan {
        let mut scan = MandatoryScan {
            cost: self.live_size(),
            back_offset: self.frontmost(),
            counted: Vec::with_capacity(required_timestamps),
        };
        let mut budget = DeletionBudget::new(sizer);
        let cutpoint = self.tstamp_cutpoint();

        let mut iter = self.entries(sizer);
        while scan.counted.len() < required_timestamps && iter.offset() < cutpoint {
            let Some(raw) = iter.next() else {
                break;
            };

            match raw.entry {
                Entry::Live { .. } => {
                    scan.cost += TIMESTAMP_SIZE;
                    scan.counted.push(raw.offset);
                }
                Entry::Deletion { .. } => {
                    let cost = PAIR_OFFSET_SIZE + TIMESTAMP_SIZE + raw.entry.size();
                    if budget.admit(cost) {
                        scan.cost += cost;
                        scan.counted.push(raw.offset);
                    }
                }
                Entry::Skip(_) => {}
            }
        }

        scan.back_offset = iter.offset();
        scan
    }

    /// Share of the mandatory cost carried by the `index`th pair, given the
    /// scan that produced `scan`. Summing this over every pair reproduces
    /// `scan.cost` exactly.
    pub(crate) fn pair_weight(
        &self,
        sizer: &dyn ValueSizer,
        index: usize,
        scan: &MandatoryScan,
    ) -> usize {
        let offset = self.pair_offset(index);
        let counted = scan.is_counted(offset);
        match self.get_entry(sizer, offset) {
            Entry::Live { key, value } => {
                let stamp = if counted { TIMESTAMP_SIZE } else { 0 };
                PAIR_OFFSET_SIZE + live_entry_size(key.len(), value.len()) + stamp
            }
            Entry::Deletion { key } if counted => {
                PAIR_OFFSET_SIZE + TIMESTAMP_SIZE + deletion_entry_size(key.len())
            }
            Entry::Deletion { .. } => 0,
            Entry::Skip(_) => panic!("pair {index} references a skip entry"),
        }
    }

    // -------------------------------------------------------------------------
    // Predicates
    // -------------------------------------------------------------------------

    /// Whether inserting `key` with `value` would overflow the node.
    ///
    /// The owning tree splits the node first when this returns true.
    pub fn is_full(&self, sizer: &dyn ValueSizer, key: &[u8], value: &[u8]) -> bool {
        let cost = self.mandatory_cost(sizer, MANDATORY_TIMESTAMPS - 1);
        let needed =
            live_entry_size(key.len(), sizer.size(value)) + PAIR_OFFSET_SIZE + TIMESTAMP_SIZE;
        cost + needed > free_space(sizer)
    }

    /// Whether writing a tombstone for `key` would overflow the node
    pub fn is_full_for_removal(&self, sizer: &dyn ValueSizer, key: &[u8]) -> bool {
        let cost = self.mandatory_cost(sizer, MANDATORY_TIMESTAMPS - 1);
        let needed = deletion_entry_size(key.len()) + PAIR_OFFSET_SIZE + TIMESTAMP_SIZE;
        cost + needed > free_space(sizer)
    }

    /// Whether the node holds so little that it should be merged or leveled
    pub fn is_underfull(&self, sizer: &dyn ValueSizer) -> bool {
        let threshold = (free_space(sizer) / 2).saturating_sub(leaf_epsilon(sizer));
        self.mandatory_cost(sizer, MANDATORY_TIMESTAMPS) < threshold
    }
}
