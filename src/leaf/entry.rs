//! Entry Codec
//!
//! One variable-length record inside the entry region. The first byte tells
//! the kinds apart:
//!
//! ```text
//! tag 0..=250   live       [key_len][key][value]
//! tag 251       reserved   (never starts an entry)
//! tag 252       skip-many  [252][n: u16][n bytes]
//! tag 253       skip-two   [253][251]
//! tag 254       skip-one   [254]
//! tag 255       deletion   [255][key_len][key]
//! ```

use crate::error::{LeafError, Result};
use crate::sizer::ValueSizer;

use super::MAX_KEY_SIZE;

pub const DELETE_ENTRY_CODE: u8 = 255;
pub const SKIP_ENTRY_CODE_ONE: u8 = 254;
pub const SKIP_ENTRY_CODE_TWO: u8 = 253;
pub const SKIP_ENTRY_CODE_MANY: u8 = 252;
pub const SKIP_ENTRY_RESERVED: u8 = 251;

/// Header bytes of a skip-many entry: tag + u16 length
const SKIP_MANY_HEADER: usize = 3;

/// A decoded entry borrowing from the node buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry<'a> {
    /// Key/value pair; `value` is exactly as long as the sizer reports
    Live { key: &'a [u8], value: &'a [u8] },
    /// Tombstone recording that `key` was removed
    Deletion { key: &'a [u8] },
    /// Padding over reclaimed bytes, with its total length
    Skip(usize),
}

impl<'a> Entry<'a> {
    /// Decode the entry at the start of trusted `bytes`.
    ///
    /// Panics on a reserved tag or truncated bytes; use [`Entry::decode`] on
    /// buffers that have not been validated.
    pub fn parse(bytes: &'a [u8], sizer: &dyn ValueSizer) -> Entry<'a> {
        match bytes[0] {
            DELETE_ENTRY_CODE => {
                let len = bytes[1] as usize;
                Entry::Deletion {
                    key: &bytes[2..2 + len],
                }
            }
            SKIP_ENTRY_CODE_ONE => Entry::Skip(1),
            SKIP_ENTRY_CODE_TWO => Entry::Skip(2),
            SKIP_ENTRY_CODE_MANY => {
                let n = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
                Entry::Skip(SKIP_MANY_HEADER + n)
            }
            SKIP_ENTRY_RESERVED => panic!("reserved tag {SKIP_ENTRY_RESERVED} at an entry start"),
            len => {
                let len = len as usize;
                let value_start = 1 + len;
                let value_size = sizer.size(&bytes[value_start..]);
                Entry::Live {
                    key: &bytes[1..value_start],
                    value: &bytes[value_start..value_start + value_size],
                }
            }
        }
    }

    /// Bounds-checked decode of the entry at the start of `bytes`
    pub fn decode(bytes: &'a [u8], sizer: &dyn ValueSizer) -> Result<Entry<'a>> {
        if !entry_fits(bytes, sizer) {
            return Err(LeafError::Corruption(match bytes.first() {
                Some(&tag) => format!("entry with tag {} does not fit in {} bytes", tag, bytes.len()),
                None => "entry starts at the end of the buffer".to_string(),
            }));
        }
        Ok(Self::parse(bytes, sizer))
    }

    /// Total encoded size, tag and length fields included
    pub fn size(&self) -> usize {
        match *self {
            Entry::Live { key, value } => 1 + key.len() + value.len(),
            Entry::Deletion { key } => 2 + key.len(),
            Entry::Skip(len) => len,
        }
    }

    pub fn key(&self) -> Option<&'a [u8]> {
        match *self {
            Entry::Live { key, .. } | Entry::Deletion { key } => Some(key),
            Entry::Skip(_) => None,
        }
    }

    /// Value bytes; None for deletions and skips
    pub fn value(&self) -> Option<&'a [u8]> {
        match *self {
            Entry::Live { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Entry::Live { .. })
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, Entry::Deletion { .. })
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Entry::Skip(_))
    }
}

/// Key of the live or deletion entry at the start of trusted `bytes`.
///
/// Does not consult the sizer, so it is cheaper than a full parse.
pub fn entry_key(bytes: &[u8]) -> Option<&[u8]> {
    match bytes[0] {
        DELETE_ENTRY_CODE => {
            let len = bytes[1] as usize;
            Some(&bytes[2..2 + len])
        }
        len if len as usize <= MAX_KEY_SIZE => Some(&bytes[1..1 + len as usize]),
        _ => None,
    }
}

/// Value of the live entry at the start of trusted `bytes`
pub fn entry_value<'a>(bytes: &'a [u8], sizer: &dyn ValueSizer) -> Option<&'a [u8]> {
    Entry::parse(bytes, sizer).value()
}

/// Encoded size of the entry at the start of trusted `bytes`
pub fn entry_size(bytes: &[u8], sizer: &dyn ValueSizer) -> usize {
    Entry::parse(bytes, sizer).size()
}

/// Whether a complete entry can be read from `bytes` without running off its end.
pub fn entry_fits(bytes: &[u8], sizer: &dyn ValueSizer) -> bool {
    let available = bytes.len();
    let Some(&tag) = bytes.first() else {
        return false;
    };

    match tag {
        DELETE_ENTRY_CODE => {
            available >= 2
                && bytes[1] as usize <= MAX_KEY_SIZE
                && 2 + bytes[1] as usize <= available
        }
        SKIP_ENTRY_CODE_ONE => true,
        SKIP_ENTRY_CODE_TWO => available >= 2,
        SKIP_ENTRY_CODE_MANY => {
            available >= SKIP_MANY_HEADER
                && SKIP_MANY_HEADER + u16::from_le_bytes([bytes[1], bytes[2]]) as usize <= available
        }
        SKIP_ENTRY_RESERVED => false,
        len => {
            let value_start = 1 + len as usize;
            value_start <= available && sizer.fits(&bytes[value_start..], available - value_start)
        }
    }
}

/// Encoded size of a live entry
pub fn live_entry_size(key_len: usize, value_size: usize) -> usize {
    1 + key_len + value_size
}

/// Encoded size of a deletion entry
pub fn deletion_entry_size(key_len: usize) -> usize {
    2 + key_len
}

/// Write a live entry into `dst`, which must be exactly its size
pub fn write_live(dst: &mut [u8], key: &[u8], value: &[u8]) {
    debug_assert!(key.len() <= MAX_KEY_SIZE);
    debug_assert_eq!(dst.len(), live_entry_size(key.len(), value.len()));
    dst[0] = key.len() as u8;
    dst[1..1 + key.len()].copy_from_slice(key);
    dst[1 + key.len()..].copy_from_slice(value);
}

/// Write a deletion entry into `dst`, which must be exactly its size
pub fn write_deletion(dst: &mut [u8], key: &[u8]) {
    debug_assert!(key.len() <= MAX_KEY_SIZE);
    debug_assert_eq!(dst.len(), deletion_entry_size(key.len()));
    dst[0] = DELETE_ENTRY_CODE;
    dst[1] = key.len() as u8;
    dst[2..].copy_from_slice(key);
}

/// Overwrite all of `dst` with a single skip entry of the same width
pub fn write_skip(dst: &mut [u8]) {
    match dst.len() {
        0 => {}
        1 => dst[0] = SKIP_ENTRY_CODE_ONE,
        2 => {
            dst[0] = SKIP_ENTRY_CODE_TWO;
            dst[1] = SKIP_ENTRY_RESERVED;
        }
        len => {
            let n = len - SKIP_MANY_HEADER;
            debug_assert!(n <= u16::MAX as usize);
            dst[0] = SKIP_ENTRY_CODE_MANY;
            dst[1..SKIP_MANY_HEADER].copy_from_slice(&(n as u16).to_le_bytes());
            dst[SKIP_MANY_HEADER..].fill(SKIP_ENTRY_RESERVED);
        }
    }
}
