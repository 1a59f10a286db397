//! Backfill Dump
//!
//! Replication consumers ask a node for everything modified at or after some
//! timestamp. A node only remembers the timestamps of its recent writes, so
//! it answers incrementally when its stamped history reaches back far enough
//! and falls back to a full dump of its live pairs otherwise.

use crate::key::BtreeKey;
use crate::sizer::ValueSizer;
use crate::timestamp::ReplTimestamp;

use super::entry::Entry;
use super::LeafNode;

/// One change reported by an incremental backfill
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillEntry {
    Set {
        key: BtreeKey,
        value: Vec<u8>,
        timestamp: ReplTimestamp,
    },
    Delete {
        key: BtreeKey,
        timestamp: ReplTimestamp,
    },
}

impl BackfillEntry {
    pub fn key(&self) -> &BtreeKey {
        match self {
            BackfillEntry::Set { key, .. } | BackfillEntry::Delete { key, .. } => key,
        }
    }

    pub fn timestamp(&self) -> ReplTimestamp {
        match self {
            BackfillEntry::Set { timestamp, .. } | BackfillEntry::Delete { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

/// How far back a node's stamped history is complete
///
/// Ordered so that the later of two horizons is the larger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Horizon {
    /// Nothing has been discarded
    Open,
    /// Changes newer than this timestamp are all on record
    At(ReplTimestamp),
    /// No change is known to be on record
    Closed,
}

impl Horizon {
    /// Whether a record stamped `ts` may keep its stamp under this horizon
    pub(crate) fn admits(self, ts: ReplTimestamp) -> bool {
        Horizon::At(ts) >= self
    }
}

/// Answer to [`LeafNode::entries_since`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backfill {
    /// Changes at or after the requested timestamp, in key order
    Incremental(Vec<BackfillEntry>),
    /// History is too short: every live pair, in key order. The consumer must
    /// treat the node's whole key range as changed.
    Full(Vec<(BtreeKey, Vec<u8>)>),
}

impl<B: AsRef<[u8]>> LeafNode<B> {
    /// Oldest timestamp still stored, skip records included
    pub fn oldest_tstamp(&self, sizer: &dyn ValueSizer) -> Option<ReplTimestamp> {
        let cutpoint = self.tstamp_cutpoint();
        self.entries(sizer)
            .take_while(|raw| raw.offset < cutpoint)
            .filter_map(|raw| raw.timestamp)
            .min()
    }

    /// Horizon of this node's history as it stands
    pub(crate) fn horizon(&self, sizer: &dyn ValueSizer) -> Horizon {
        match self.oldest_tstamp(sizer) {
            Some(ts) => Horizon::At(ts),
            None => Horizon::Closed,
        }
    }

    /// Whether the stamped history covers every change since `min_tstamp`.
    ///
    /// Compaction and rebalancing never keep a timestamp older than one they
    /// discard, or older than the oldest stamp of a node they combine, so
    /// every change newer than the oldest stamp still present is on record.
    /// A node without stamps covers nothing, even when it has never dropped
    /// any.
    pub fn covers_since(&self, sizer: &dyn ValueSizer, min_tstamp: ReplTimestamp) -> bool {
        matches!(self.oldest_tstamp(sizer), Some(ts) if ts < min_tstamp)
    }

    /// Changes made at or after `min_tstamp`
    pub fn entries_since(&self, sizer: &dyn ValueSizer, min_tstamp: ReplTimestamp) -> Backfill {
        if !self.covers_since(sizer, min_tstamp) {
            let pairs = self
                .live_pairs(sizer)
                .map(|(key, value)| (BtreeKey::from_node(key), value.to_vec()))
                .collect();
            return Backfill::Full(pairs);
        }

        let changes = self
            .pairs(sizer)
            .filter_map(|raw| {
                let timestamp = raw.timestamp.filter(|&ts| ts >= min_tstamp)?;
                match raw.entry {
                    Entry::Live { key, value } => Some(BackfillEntry::Set {
                        key: BtreeKey::from_node(key),
                        value: value.to_vec(),
                        timestamp,
                    }),
                    Entry::Deletion { key } => Some(BackfillEntry::Delete {
                        key: BtreeKey::from_node(key),
                        timestamp,
                    }),
                    Entry::Skip(_) => None,
                }
            })
            .collect();
        Backfill::Incremental(changes)
    }
}
