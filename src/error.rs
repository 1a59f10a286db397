//! Error types for leafkv
//!
//! Provides a unified error type for the recoverable surface of the crate.
//! Caller contract violations (inserting into a full node, removing an absent
//! key, rebalancing nodes that do not meet the size preconditions) are not
//! represented here: they panic.

use thiserror::Error;

/// Result type alias using LeafError
pub type Result<T> = std::result::Result<T, LeafError>;

/// Unified error type for leafkv operations
#[derive(Debug, Error)]
pub enum LeafError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Input Errors
    // -------------------------------------------------------------------------
    #[error("Key too long: {len} bytes (max {max})")]
    KeyTooLong { len: usize, max: usize },

    #[error("Value too long: {len} bytes (max {max})")]
    ValueTooLong { len: usize, max: usize },

    // -------------------------------------------------------------------------
    // Block Format Errors
    // -------------------------------------------------------------------------
    #[error("Bad leaf magic: expected {expected:?}, got {found:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    #[error("Block size mismatch: expected {expected} bytes, got {found}")]
    BlockSize { expected: usize, found: usize },

    #[error("Leaf node corruption: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
