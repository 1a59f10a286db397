//! Value Sizer
//!
//! The leaf format never interprets value bytes itself. Everything it needs to
//! know about a value (its encoded length, whether a length read from disk is
//! trustworthy, the largest possible value) comes through [`ValueSizer`], along
//! with the block size and magic tag of the tree the node belongs to.
//!
//! [`ShortValueSizer`] is the stock implementation: a value is a one-byte
//! length followed by that many payload bytes.
//!
//! ```text
//! ┌─────────┬──────────────────────────┐
//! │ Len (1) │ Payload (Len bytes)      │
//! └─────────┴──────────────────────────┘
//! ```

use crate::config::Config;
use crate::error::{LeafError, Result};

/// Capability describing the values stored in a leaf node.
///
/// The trait is object safe; node operations take `&dyn ValueSizer` so the
/// node type stays generic over its buffer only.
pub trait ValueSizer {
    /// Encoded length of the value starting at `value[0]`.
    ///
    /// `value` may extend past the end of the value; the sizer reads only the
    /// bytes it needs.
    fn size(&self, value: &[u8]) -> usize;

    /// Whether a complete value can be read from `value` without going past
    /// `available` bytes.
    fn fits(&self, value: &[u8], available: usize) -> bool;

    /// Largest encoded value this sizer can produce.
    fn max_possible_size(&self) -> usize;

    /// Size of the block holding the node.
    fn block_size(&self) -> usize;

    /// Magic tag identifying a leaf block of this tree.
    fn leaf_magic(&self) -> [u8; 4];
}

/// Sizer for values encoded as `[len: u8][payload]`.
#[derive(Debug, Clone)]
pub struct ShortValueSizer {
    block_size: usize,
    leaf_magic: [u8; 4],
    max_value_len: usize,
}

impl ShortValueSizer {
    /// Sizer for `block_size` blocks with the default magic and value limit
    pub fn new(block_size: usize) -> Result<Self> {
        Self::from_config(&Config::builder().block_size(block_size).build())
    }

    /// Build a sizer from a validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            block_size: config.block_size,
            leaf_magic: config.leaf_magic,
            max_value_len: config.max_value_len,
        })
    }

    /// Encode `payload` as a short value
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > self.max_value_len {
            return Err(LeafError::ValueTooLong {
                len: payload.len(),
                max: self.max_value_len,
            });
        }

        let mut value = Vec::with_capacity(1 + payload.len());
        value.push(payload.len() as u8);
        value.extend_from_slice(payload);
        Ok(value)
    }

    /// Payload of an encoded short value, or `None` if `value` is cut short
    pub fn payload(value: &[u8]) -> Option<&[u8]> {
        let (&len, rest) = value.split_first()?;
        rest.get(..len as usize)
    }

    /// Largest payload this sizer accepts
    pub fn max_value_len(&self) -> usize {
        self.max_value_len
    }
}

impl Default for ShortValueSizer {
    fn default() -> Self {
        let config = Config::default();
        Self {
            block_size: config.block_size,
            leaf_magic: config.leaf_magic,
            max_value_len: config.max_value_len,
        }
    }
}

impl ValueSizer for ShortValueSizer {
    fn size(&self, value: &[u8]) -> usize {
        1 + value[0] as usize
    }

    fn fits(&self, value: &[u8], available: usize) -> bool {
        match value.first() {
            Some(&len) => {
                let size = 1 + len as usize;
                len as usize <= self.max_value_len && size <= available && size <= value.len()
            }
            None => false,
        }
    }

    fn max_possible_size(&self) -> usize {
        1 + self.max_value_len
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn leaf_magic(&self) -> [u8; 4] {
        self.leaf_magic
    }
}
