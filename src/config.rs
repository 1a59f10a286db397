//! Configuration for leafkv
//!
//! Centralized block-format configuration with sensible defaults.

use crate::error::{LeafError, Result};
use crate::leaf::{HEADER_SIZE, MAX_KEY_SIZE, PAIR_OFFSET_SIZE, TIMESTAMP_SIZE};

/// Largest supported block size. Every in-block reference is a u16 offset and
/// `frontmost` must be able to hold the block size itself.
pub const MAX_BLOCK_SIZE: usize = 32 * 1024;

/// Longest value payload a one-byte length prefix can describe.
pub const MAX_SHORT_VALUE_LEN: usize = u8::MAX as usize;

/// Leaf block configuration
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Block Configuration
    // -------------------------------------------------------------------------
    /// Size of every block in bytes, header included.
    pub block_size: usize,

    /// Tag written at offset 0 of every leaf block by `init`.
    pub leaf_magic: [u8; 4],

    // -------------------------------------------------------------------------
    // Value Configuration
    // -------------------------------------------------------------------------
    /// Max payload length of a short value (the encoded value is one byte longer)
    pub max_value_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 4096,
            leaf_magic: *b"leaf",
            max_value_len: MAX_SHORT_VALUE_LEN,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the configuration describes a usable leaf format.
    ///
    /// The split and merge guarantees need room for several worst-case
    /// entries on each side of the half-full mark, so tiny blocks are rejected.
    pub fn validate(&self) -> Result<()> {
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(LeafError::Config(format!(
                "block size {} exceeds the maximum of {}",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }

        if self.max_value_len > MAX_SHORT_VALUE_LEN {
            return Err(LeafError::Config(format!(
                "max value length {} exceeds the maximum of {}",
                self.max_value_len, MAX_SHORT_VALUE_LEN
            )));
        }

        let epsilon = self.epsilon();
        let free_space = self.block_size.saturating_sub(HEADER_SIZE);
        if free_space < 4 * epsilon {
            return Err(LeafError::Config(format!(
                "block size {} is too small: free space {} must be at least 4 * epsilon ({})",
                self.block_size,
                free_space,
                4 * epsilon
            )));
        }

        Ok(())
    }

    /// Worst-case footprint of one entry under this configuration
    fn epsilon(&self) -> usize {
        let key_cost = 1 + MAX_KEY_SIZE;
        let value_cost = (1 + self.max_value_len).max(1);
        key_cost + value_cost + PAIR_OFFSET_SIZE + TIMESTAMP_SIZE
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the leaf magic tag
    pub fn leaf_magic(mut self, magic: [u8; 4]) -> Self {
        self.config.leaf_magic = magic;
        self
    }

    /// Set the maximum short-value payload length (in bytes)
    pub fn max_value_len(mut self, len: usize) -> Self {
        self.config.max_value_len = len;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
