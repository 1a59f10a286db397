//! Block File Inspection
//!
//! Offline checks over a file of back-to-back blocks, as a serializer would
//! lay them out:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬─────┐
//! │ block 0      │ block 1      │ block 2      │ ... │
//! │ (block_size) │ (block_size) │ (block_size) │     │
//! └──────────────┴──────────────┴──────────────┴─────┘
//! ```
//!
//! Zeroed blocks are free, blocks carrying the leaf magic are fscked and
//! summarized, anything else is reported as foreign (internal nodes, metadata).

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{LeafError, Result};
use crate::leaf::{LeafNode, LeafSummary};
use crate::sizer::ValueSizer;

/// What a block turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// A leaf node; `error` holds the first fsck failure, if any
    Leaf {
        summary: Option<LeafSummary>,
        error: Option<String>,
    },
    /// A block with some other magic
    Foreign([u8; 4]),
    /// An all-zero block
    Zeroed,
}

/// Inspection result for one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReport {
    pub index: usize,
    pub offset: usize,
    pub kind: BlockKind,
}

impl BlockReport {
    /// Whether this is a leaf that failed fsck
    pub fn is_corrupt(&self) -> bool {
        matches!(self.kind, BlockKind::Leaf { error: Some(_), .. })
    }
}

/// Inspect every `block_size` block of `bytes`.
///
/// A trailing partial block is an error.
pub fn inspect_blocks(bytes: &[u8], sizer: &dyn ValueSizer) -> Result<Vec<BlockReport>> {
    let block_size = sizer.block_size();
    if bytes.len() % block_size != 0 {
        return Err(LeafError::BlockSize {
            expected: block_size,
            found: bytes.len() % block_size,
        });
    }

    let reports = bytes
        .chunks_exact(block_size)
        .enumerate()
        .map(|(index, block)| BlockReport {
            index,
            offset: index * block_size,
            kind: classify(index, block, sizer),
        })
        .collect();
    Ok(reports)
}

fn classify(index: usize, block: &[u8], sizer: &dyn ValueSizer) -> BlockKind {
    if block.iter().all(|&b| b == 0) {
        return BlockKind::Zeroed;
    }

    let magic = match block {
        [a, b, c, d, ..] => [*a, *b, *c, *d],
        _ => return BlockKind::Foreign([0; 4]),
    };
    if magic != sizer.leaf_magic() {
        return BlockKind::Foreign(magic);
    }

    match LeafNode::open(block, sizer) {
        Ok(node) => BlockKind::Leaf {
            summary: Some(node.summary(sizer)),
            error: None,
        },
        Err(e) => {
            tracing::warn!(block = index, "corrupt leaf block: {}", e);
            BlockKind::Leaf {
                summary: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Read `path` and inspect its blocks
pub fn inspect_file(path: &Path, sizer: &dyn ValueSizer) -> Result<Vec<BlockReport>> {
    let bytes = fs::read(path)?;
    tracing::debug!(path = %path.display(), len = bytes.len(), "inspecting block file");
    inspect_blocks(&bytes, sizer)
}

/// Write `blocks` back-to-back to `path`, replacing any existing file
pub fn write_block_file<B: AsRef<[u8]>>(path: &Path, blocks: &[LeafNode<B>]) -> Result<()> {
    let mut file = fs::File::create(path)?;
    for node in blocks {
        file.write_all(node.as_bytes())?;
    }
    file.sync_all()?;
    Ok(())
}
