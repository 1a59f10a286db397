//! Leaf Validation
//!
//! `fsck` walks a block without trusting any of it and reports the first
//! broken invariant. Everything else in the crate assumes a block that passed.

use std::fmt;

use crate::error::{LeafError, Result};
use crate::sizer::ValueSizer;
use crate::timestamp::{ReplTimestamp, TIMESTAMP_SIZE};

use super::cost::free_space;
use super::entry::Entry;
use super::iter::RawEntry;
use super::{LeafNode, HEADER_SIZE, MANDATORY_TIMESTAMPS, PAIR_OFFSET_SIZE};

/// Counts describing one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafSummary {
    pub num_pairs: usize,
    pub live_entries: usize,
    pub deletion_entries: usize,
    pub skip_entries: usize,
    pub timestamped_entries: usize,
    pub live_size: usize,
    pub mandatory_cost: usize,
    /// Bytes between the pair-offset array and `frontmost`
    pub free_gap: usize,
    pub underfull: bool,
}

impl<B: AsRef<[u8]>> LeafNode<B> {
    /// Check every structural invariant, plus that all keys fall within
    /// `(left_exclusive, right_inclusive]`
    pub fn fsck(
        &self,
        sizer: &dyn ValueSizer,
        left_exclusive: Option<&[u8]>,
        right_inclusive: Option<&[u8]>,
    ) -> Result<()> {
        let buf = self.as_bytes();
        let block_size = sizer.block_size();

        if buf.len() != block_size {
            return Err(LeafError::BlockSize {
                expected: block_size,
                found: buf.len(),
            });
        }
        if block_size < HEADER_SIZE {
            return Err(corruption(format!(
                "block of {block_size} bytes has no room for a header"
            )));
        }
        if self.magic() != sizer.leaf_magic() {
            return Err(LeafError::BadMagic {
                expected: sizer.leaf_magic(),
                found: self.magic(),
            });
        }

        // ---------------------------------------------------------------------
        // Header bounds
        // ---------------------------------------------------------------------
        let num_pairs = self.num_pairs();
        let frontmost = self.frontmost();
        let cutpoint = self.tstamp_cutpoint();
        let offsets_end = self.pair_offsets_end();
        if offsets_end > frontmost || frontmost > cutpoint || cutpoint > block_size {
            return Err(corruption(format!(
                "header out of order: pair offsets end at {offsets_end}, \
                 frontmost {frontmost}, cutpoint {cutpoint}, block size {block_size}"
            )));
        }

        // ---------------------------------------------------------------------
        // Entry region walk
        // ---------------------------------------------------------------------
        let records = walk_records(buf, sizer, frontmost, cutpoint, block_size)?;

        // ---------------------------------------------------------------------
        // Pair offsets
        // ---------------------------------------------------------------------
        let mut referenced = vec![false; records.len()];
        let mut first_key: Option<&[u8]> = None;
        let mut prev_key: Option<&[u8]> = None;
        let mut live_size = 0;
        for index in 0..num_pairs {
            let offset = self.pair_offset(index);
            let Ok(pos) = records.binary_search_by_key(&offset, |raw| raw.offset) else {
                return Err(corruption(format!(
                    "pair {index} offset {offset} does not start an entry"
                )));
            };
            if referenced[pos] {
                return Err(corruption(format!("pair {index} repeats offset {offset}")));
            }
            referenced[pos] = true;

            let raw = &records[pos];
            let key = match raw.entry {
                Entry::Live { key, value } => {
                    live_size += PAIR_OFFSET_SIZE + 1 + key.len() + value.len();
                    key
                }
                Entry::Deletion { key } => key,
                Entry::Skip(_) => {
                    return Err(corruption(format!(
                        "pair {index} offset {offset} references a skip entry"
                    )));
                }
            };

            if let Some(prev) = prev_key {
                if prev >= key {
                    return Err(corruption(format!(
                        "pair {index} key \"{}\" is not above \"{}\"",
                        key.escape_ascii(),
                        prev.escape_ascii()
                    )));
                }
            }
            first_key = first_key.or(Some(key));
            prev_key = Some(key);
        }

        if let (Some(bound), Some(first)) = (left_exclusive, first_key) {
            if first <= bound {
                return Err(corruption(format!(
                    "first key \"{}\" is not above the left bound \"{}\"",
                    first.escape_ascii(),
                    bound.escape_ascii()
                )));
            }
        }
        if let (Some(bound), Some(last)) = (right_inclusive, prev_key) {
            if last > bound {
                return Err(corruption(format!(
                    "last key \"{}\" is above the right bound \"{}\"",
                    last.escape_ascii(),
                    bound.escape_ascii()
                )));
            }
        }

        if live_size != self.live_size() {
            return Err(corruption(format!(
                "live size is {} but live entries add up to {live_size}",
                self.live_size()
            )));
        }

        if let Some(orphan) = records
            .iter()
            .zip(&referenced)
            .find(|&(raw, &seen)| !seen && !raw.entry.is_skip())
            .map(|(raw, _)| raw.offset)
        {
            return Err(corruption(format!("entry at {orphan} has no pair offset")));
        }

        let mandatory = self.mandatory_cost(sizer, MANDATORY_TIMESTAMPS);
        if mandatory > free_space(sizer) {
            return Err(corruption(format!(
                "mandatory cost {mandatory} exceeds free space {}",
                free_space(sizer)
            )));
        }

        Ok(())
    }

    /// [`fsck`](Self::fsck) without key bounds
    pub fn validate(&self, sizer: &dyn ValueSizer) -> Result<()> {
        self.fsck(sizer, None, None)
    }

    pub fn summary(&self, sizer: &dyn ValueSizer) -> LeafSummary {
        let mut summary = LeafSummary {
            num_pairs: self.num_pairs(),
            live_size: self.live_size(),
            mandatory_cost: self.mandatory_cost(sizer, MANDATORY_TIMESTAMPS),
            free_gap: self.frontmost() - self.pair_offsets_end(),
            underfull: self.is_underfull(sizer),
            ..LeafSummary::default()
        };

        for raw in self.entries(sizer) {
            match raw.entry {
                Entry::Live { .. } => summary.live_entries += 1,
                Entry::Deletion { .. } => summary.deletion_entries += 1,
                Entry::Skip(_) => summary.skip_entries += 1,
            }
            if raw.timestamp.is_some() {
                summary.timestamped_entries += 1;
            }
        }

        summary
    }

    /// Human-readable rendering of the header and the pairs in key order
    pub fn dump<'a>(&'a self, sizer: &'a dyn ValueSizer) -> LeafDump<'a, B> {
        LeafDump { node: self, sizer }
    }
}

/// Walk `[frontmost, block_size)` with bounds checks, returning every record
/// in offset order
fn walk_records<'a>(
    buf: &'a [u8],
    sizer: &dyn ValueSizer,
    frontmost: usize,
    cutpoint: usize,
    block_size: usize,
) -> Result<Vec<RawEntry<'a>>> {
    let mut records = Vec::new();
    let mut offset = frontmost;

    while offset < block_size {
        let stamped = offset < cutpoint;
        let (timestamp, start, limit) = if stamped {
            if offset + TIMESTAMP_SIZE > cutpoint {
                return Err(corruption(format!(
                    "timestamp at {offset} straddles the cutpoint {cutpoint}"
                )));
            }
            let ts = ReplTimestamp::from_le_bytes([
                buf[offset],
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
            ]);
            (Some(ts), offset + TIMESTAMP_SIZE, cutpoint)
        } else {
            (None, offset, block_size)
        };

        let entry = Entry::decode(&buf[start..limit], sizer).map_err(|_| {
            if stamped {
                corruption(format!("entry at {start} runs past the cutpoint {cutpoint}"))
            } else {
                corruption(format!("entry at {start} runs past the block end"))
            }
        })?;

        if entry.is_deletion() && !stamped {
            return Err(corruption(format!("deletion entry at {offset} has no timestamp")));
        }

        records.push(RawEntry {
            offset,
            timestamp,
            entry,
        });
        offset = start + entry.size();
    }

    Ok(records)
}

fn corruption(message: String) -> LeafError {
    LeafError::Corruption(message)
}

// =============================================================================
// Dump
// =============================================================================

/// `Display` adapter returned by [`LeafNode::dump`]
pub struct LeafDump<'a, B> {
    node: &'a LeafNode<B>,
    sizer: &'a dyn ValueSizer,
}

impl<'a, B: AsRef<[u8]>> fmt::Display for LeafDump<'a, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node;
        writeln!(
            f,
            "leaf pairs={} live_size={} frontmost={} cutpoint={}",
            node.num_pairs(),
            node.live_size(),
            node.frontmost(),
            node.tstamp_cutpoint()
        )?;

        for (index, raw) in node.pairs(self.sizer).enumerate() {
            write!(f, "  [{index}] @{}", raw.offset)?;
            match raw.timestamp {
                Some(ts) => write!(f, " {ts}")?,
                None => write!(f, " -")?,
            }
            match raw.entry {
                Entry::Live { key, value } => writeln!(
                    f,
                    " \"{}\" = \"{}\"",
                    key.escape_ascii(),
                    value.escape_ascii()
                )?,
                Entry::Deletion { key } => writeln!(f, " \"{}\" deleted", key.escape_ascii())?,
                Entry::Skip(len) => writeln!(f, " skip({len})")?,
            }
        }

        Ok(())
    }
}
