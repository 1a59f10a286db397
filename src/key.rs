//! B-tree keys
//!
//! An owned key whose length is checked once, at construction, against the
//! leaf format's one-byte key length tag.

use std::fmt;
use std::ops::Deref;

use bytes::Bytes;

use crate::error::{LeafError, Result};
use crate::leaf::MAX_KEY_SIZE;

/// Owned key of at most [`MAX_KEY_SIZE`] bytes.
///
/// Cloning is cheap, so separator keys returned by rebalancing can be handed
/// to the parent level without copying.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BtreeKey(Bytes);

impl BtreeKey {
    /// Copy `key` into a new key, rejecting keys longer than `MAX_KEY_SIZE`
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self> {
        let key = key.as_ref();
        if key.len() > MAX_KEY_SIZE {
            return Err(LeafError::KeyTooLong {
                len: key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        Ok(Self(Bytes::copy_from_slice(key)))
    }

    /// Key read back out of a node; its length was checked when it was written.
    pub(crate) fn from_node(key: &[u8]) -> Self {
        debug_assert!(key.len() <= MAX_KEY_SIZE);
        Self(Bytes::copy_from_slice(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Bytes a key occupies inside a live entry: length tag plus contents
    pub fn full_size(&self) -> usize {
        1 + self.0.len()
    }
}

impl Deref for BtreeKey {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for BtreeKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for BtreeKey {
    type Error = LeafError;

    fn try_from(key: &[u8]) -> Result<Self> {
        Self::new(key)
    }
}

impl TryFrom<&str> for BtreeKey {
    type Error = LeafError;

    fn try_from(key: &str) -> Result<Self> {
        Self::new(key.as_bytes())
    }
}

impl fmt::Debug for BtreeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BtreeKey(\"{}\")", self.0.escape_ascii())
    }
}

impl fmt::Display for BtreeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}
