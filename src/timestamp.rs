//! Replication timestamps
//!
//! Logical modification times stored in front of recently written entries.

use std::fmt;

/// Size of an encoded timestamp in bytes
pub const TIMESTAMP_SIZE: usize = 4;

/// Logical time of the most recent modification to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ReplTimestamp(u32);

impl ReplTimestamp {
    /// Earlier than every real modification
    pub const DISTANT_PAST: Self = Self(0);

    pub const fn new(time: u32) -> Self {
        Self(time)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// The following tick (saturating)
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn to_le_bytes(self) -> [u8; TIMESTAMP_SIZE] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; TIMESTAMP_SIZE]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }
}

impl From<u32> for ReplTimestamp {
    fn from(time: u32) -> Self {
        Self(time)
    }
}

impl fmt::Display for ReplTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}
