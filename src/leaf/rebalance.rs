//! Leaf Rebalancing
//!
//! Split, merge and level all reduce to one primitive: move a key range of
//! pairs from one node to the front or back of another.
//!
//! ```text
//!            split                    merge                    level
//! ┌──────────────────┐     ┌──────┐ ┌──────┐         ┌──────┐ ┌──────────┐
//! │ a b c d e f g h  │     │ a b  │ │ c d  │         │ a b  │ │ c d e f g│
//! └──────────────────┘     └──────┘ └──────┘         └──────┘ └──────────┘
//!          │                    │                          │
//!          ▼                    ▼                          ▼
//! ┌─────────┐ ┌────────┐   ┌──────┐ ┌──────────┐     ┌──────────┐ ┌──────┐
//! │ a b c d │ │ e f g h│   │      │ │ a b c d  │     │ a b c d  │ │ e f g│
//! └─────────┘ └────────┘   └──────┘ └──────────┘     └──────────┘ └──────┘
//! ```
//!
//! Moved entries keep their timestamps only if they were among the source's
//! mandatory-timestamped records; uncounted deletions are dropped on the way.
//! The destination is rebuilt from scratch with its stamped records ordered
//! newest first. A stamp older than one discarded on the way, or older than
//! the oldest stamp of either node, is discarded as well: the destination's
//! history is only as deep as the shallower of the two.

use std::cmp::Reverse;

use crate::key::BtreeKey;
use crate::sizer::ValueSizer;
use crate::timestamp::{ReplTimestamp, TIMESTAMP_SIZE};

use super::backfill::Horizon;
use super::cost::{free_space, leaf_epsilon};
use super::{LeafNode, MANDATORY_TIMESTAMPS, PAIR_OFFSET_SIZE};

/// Which side of the underfull node its sibling is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingSide {
    Left,
    Right,
}

/// Separator change after a successful [`LeafNode::level`].
///
/// Both keys belong to the left node of the pair: the parent finds the
/// separator bounding that node through `key_to_replace` and replaces it with
/// `replacement_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leveled {
    pub key_to_replace: BtreeKey,
    pub replacement_key: BtreeKey,
}

/// Where moved pairs land in the destination's key order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    Front,
    Back,
}

/// A record copied out of a node
#[derive(Debug, Clone)]
pub(crate) struct MovedEntry {
    pub(crate) timestamp: Option<ReplTimestamp>,
    pub(crate) bytes: Vec<u8>,
    pub(crate) live: bool,
}

/// Records copied out of a node, with the horizon of what they carry
#[derive(Debug, Clone)]
pub(crate) struct Gathered {
    pub(crate) entries: Vec<MovedEntry>,
    pub(crate) horizon: Horizon,
}

impl MovedEntry {
    fn record_size(&self) -> usize {
        self.bytes.len() + if self.timestamp.is_some() { TIMESTAMP_SIZE } else { 0 }
    }
}

impl<B: AsRef<[u8]>> LeafNode<B> {
    /// Copy out the pairs `[beg, end)` in key order, keeping timestamps of
    /// mandatory-timestamped records and skipping uncounted deletions
    pub(crate) fn gather(&self, sizer: &dyn ValueSizer, beg: usize, end: usize) -> Gathered {
        let scan = self.scan_mandatory(sizer, MANDATORY_TIMESTAMPS);
        let mut gathered = Gathered {
            entries: Vec::with_capacity(end - beg),
            horizon: self.horizon(sizer),
        };

        for index in beg..end {
            let offset = self.pair_offset(index);
            let counted = scan.is_counted(offset);
            let timestamp = self.timestamp_at(offset);
            if let (false, Some(ts)) = (counted, timestamp) {
                gathered.horizon = gathered.horizon.max(Horizon::At(ts));
            }

            let entry = self.get_entry(sizer, offset);
            if entry.is_deletion() && !counted {
                continue;
            }

            let start = self.entry_start(offset);
            gathered.entries.push(MovedEntry {
                timestamp: if counted { timestamp } else { None },
                bytes: self.as_bytes()[start..start + entry.size()].to_vec(),
                live: entry.is_live(),
            });
        }

        gathered
    }

    fn first_key(&self) -> Option<BtreeKey> {
        (!self.is_empty()).then(|| BtreeKey::from_node(self.key_at(0)))
    }

    fn last_key(&self) -> Option<BtreeKey> {
        let n = self.num_pairs();
        (n > 0).then(|| BtreeKey::from_node(self.key_at(n - 1)))
    }

    /// First and last key of a node known to be the left one of a leveled pair
    fn leveled_keys(&self) -> Leveled {
        match (self.first_key(), self.last_key()) {
            (Some(key_to_replace), Some(replacement_key)) => Leveled {
                key_to_replace,
                replacement_key,
            },
            _ => panic!("leveling left the left node empty"),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafNode<B> {
    // =========================================================================
    // Split / Merge / Level
    // =========================================================================

    /// Move the upper half of a full node, by mandatory cost, into `rnode`.
    ///
    /// `rnode` is reinitialized. Returns the last key left in `self`, the
    /// separator between the two nodes.
    pub fn split<C>(&mut self, sizer: &dyn ValueSizer, rnode: &mut LeafNode<C>) -> BtreeKey
    where
        C: AsRef<[u8]> + AsMut<[u8]>,
    {
        let scan = self.scan_mandatory(sizer, MANDATORY_TIMESTAMPS);
        let total = scan.cost;
        assert!(
            total >= free_space(sizer).saturating_sub(leaf_epsilon(sizer)),
            "split of a leaf node that is not full (cost {total})"
        );

        let n = self.num_pairs();
        let (mut index, mut prev, mut left_cost) = (0, 0, 0);
        while index < n && left_cost < total / 2 {
            prev = left_cost;
            left_cost += self.pair_weight(sizer, index, &scan);
            index += 1;
        }
        assert!(index > 0 && index < n, "no split point among {n} pairs");

        // pick whichever of [0, index - 1) and [0, index) is closer to half
        let (total, prev, left_cost) = (total as i64, prev as i64, left_cost as i64);
        let split_index = if (total - prev) - prev < left_cost - (total - left_cost) {
            index - 1
        } else {
            index
        };
        assert!(split_index > 0);

        let moved = self.take_pairs(sizer, split_index, n);
        rnode.init(sizer);
        rnode.rebuild(sizer, moved.entries, moved.horizon);
        rnode.debug_validate(sizer);

        tracing::debug!(
            pairs = n,
            split_index,
            cost = total,
            left_cost = self.mandatory_cost(sizer, MANDATORY_TIMESTAMPS),
            right_cost = rnode.mandatory_cost(sizer, MANDATORY_TIMESTAMPS),
            "split leaf"
        );

        match self.last_key() {
            Some(median) => median,
            None => panic!("split left an empty node"),
        }
    }

    /// Move every pair of `left` into `self`, its right sibling, and
    /// reinitialize `left`.
    ///
    /// Returns the first key of the combined node.
    pub fn merge<C>(
        &mut self,
        sizer: &dyn ValueSizer,
        left: &mut LeafNode<C>,
    ) -> Option<BtreeKey>
    where
        C: AsRef<[u8]> + AsMut<[u8]>,
    {
        let left_cost = left.mandatory_cost(sizer, MANDATORY_TIMESTAMPS);
        let right_cost = self.mandatory_cost(sizer, MANDATORY_TIMESTAMPS);
        assert!(
            left_cost + right_cost <= free_space(sizer),
            "merge of leaf nodes that do not fit together ({left_cost} + {right_cost})"
        );

        let moved = left.num_pairs();
        let taken = left.take_pairs(sizer, 0, moved);
        left.init(sizer);
        self.absorb(sizer, taken, Placement::Front);

        tracing::debug!(
            moved,
            pairs = self.num_pairs(),
            cost = self.mandatory_cost(sizer, MANDATORY_TIMESTAMPS),
            "merged leaves"
        );

        self.first_key()
    }

    /// Pull pairs from a fuller sibling until both sides carry about the same
    /// mandatory cost.
    ///
    /// Returns `None` when no weight would move; the caller merges instead.
    pub fn level<C>(
        &mut self,
        sizer: &dyn ValueSizer,
        sibling: &mut LeafNode<C>,
        side: SiblingSide,
    ) -> Option<Leveled>
    where
        C: AsRef<[u8]> + AsMut<[u8]>,
    {
        assert!(self.is_underfull(sizer), "level of a leaf node that is not underfull");
        assert!(!sibling.is_underfull(sizer), "level from an underfull sibling");

        let node_cost = self.mandatory_cost(sizer, MANDATORY_TIMESTAMPS) as i64;
        let scan = sibling.scan_mandatory(sizer, MANDATORY_TIMESTAMPS);
        let sibling_cost = scan.cost as i64;
        let sibling_pairs = sibling.num_pairs();

        let (mut count, mut moved) = (0, 0i64);
        while count < sibling_pairs {
            let index = match side {
                SiblingSide::Right => count,
                SiblingSide::Left => sibling_pairs - 1 - count,
            };
            let weight = sibling.pair_weight(sizer, index, &scan) as i64;

            let prev_diff = (sibling_cost - moved) - (node_cost + moved);
            let diff = (sibling_cost - moved - weight) - (node_cost + moved + weight);
            if diff <= 0 {
                if prev_diff >= -diff {
                    count += 1;
                    moved += weight;
                }
                break;
            }

            count += 1;
            moved += weight;
        }

        if moved == 0 {
            tracing::debug!(node_cost, sibling_cost, "could not level leaves");
            return None;
        }

        let leveled = match side {
            SiblingSide::Right => {
                let taken = sibling.take_pairs(sizer, 0, count);
                self.absorb(sizer, taken, Placement::Back);
                self.leveled_keys()
            }
            SiblingSide::Left => {
                let taken = sibling.take_pairs(sizer, sibling_pairs - count, sibling_pairs);
                self.absorb(sizer, taken, Placement::Front);
                sibling.leveled_keys()
            }
        };

        tracing::debug!(
            ?side,
            count,
            moved,
            node_cost = self.mandatory_cost(sizer, MANDATORY_TIMESTAMPS),
            sibling_cost = sibling.mandatory_cost(sizer, MANDATORY_TIMESTAMPS),
            "leveled leaves"
        );

        Some(leveled)
    }

    // =========================================================================
    // Moving Pairs
    // =========================================================================

    /// Copy out the pairs `[beg, end)` and remove them from `self`
    pub(crate) fn take_pairs(
        &mut self,
        sizer: &dyn ValueSizer,
        beg: usize,
        end: usize,
    ) -> Gathered {
        let taken = self.gather(sizer, beg, end);

        for index in beg..end {
            self.clean_pair(sizer, index);
        }
        self.remove_slots(beg, end);
        self.debug_validate(sizer);

        taken
    }

    /// Combine `moved` with the node's own pairs and rebuild
    fn absorb(&mut self, sizer: &dyn ValueSizer, moved: Gathered, placement: Placement) {
        let own = self.gather(sizer, 0, self.num_pairs());
        let horizon = moved.horizon.max(own.horizon);
        let combined = match placement {
            Placement::Front => moved.entries.into_iter().chain(own.entries).collect(),
            Placement::Back => own.entries.into_iter().chain(moved.entries).collect(),
        };
        self.rebuild(sizer, combined, horizon);
        self.debug_validate(sizer);
    }

    /// Rewrite the node from `entries`, given in key order.
    ///
    /// Stamps `horizon` does not admit are dropped, and their deletions with
    /// them.
    fn rebuild(
        &mut self,
        sizer: &dyn ValueSizer,
        mut entries: Vec<MovedEntry>,
        horizon: Horizon,
    ) {
        entries.retain_mut(|entry| match entry.timestamp {
            Some(ts) if !horizon.admits(ts) => {
                entry.timestamp = None;
                entry.live
            }
            _ => true,
        });

        let block_size = sizer.block_size();
        let records: usize = entries.iter().map(MovedEntry::record_size).sum();
        assert!(
            entries.len() * PAIR_OFFSET_SIZE + records <= free_space(sizer),
            "moved pairs do not fit in the destination leaf"
        );

        // stamped records newest first, then plain entries
        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&i| (entries[i].timestamp.is_none(), Reverse(entries[i].timestamp)));

        let frontmost = block_size - records;
        let mut offsets = vec![0; entries.len()];
        let mut cursor = frontmost;
        let mut cutpoint = frontmost;
        for &i in &order {
            let entry = &entries[i];
            offsets[i] = cursor;
            if let Some(ts) = entry.timestamp {
                self.write_timestamp(cursor, ts);
                cursor += TIMESTAMP_SIZE;
            }
            self.bytes_mut()[cursor..cursor + entry.bytes.len()].copy_from_slice(&entry.bytes);
            cursor += entry.bytes.len();
            if entry.timestamp.is_some() {
                cutpoint = cursor;
            }
        }

        let live_size = entries
            .iter()
            .filter(|entry| entry.live)
            .map(|entry| PAIR_OFFSET_SIZE + entry.bytes.len())
            .sum();

        self.set_num_pairs(entries.len());
        for (index, &offset) in offsets.iter().enumerate() {
            self.set_pair_offset(index, offset);
        }
        self.set_live_size(live_size);
        self.set_frontmost(frontmost);
        self.set_tstamp_cutpoint(cutpoint);
    }
}
