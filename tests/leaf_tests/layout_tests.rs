//! Tests for the leaf block layout and entry codec
//!
//! These tests verify:
//! - Byte-exact header offsets
//! - Live, deletion and skip entry encodings
//! - Bounds-checked decoding near the buffer edge
//! - Physical and key-order iteration across the timestamp cutpoint
//! - Key, value and configuration validation

use leafkv::leaf::{
    entry_fits, entry_key, write_deletion, write_live, write_skip, Entry, HEADER_SIZE,
    MAX_KEY_SIZE, SKIP_ENTRY_CODE_MANY, SKIP_ENTRY_CODE_ONE, SKIP_ENTRY_CODE_TWO,
    SKIP_ENTRY_RESERVED, TIMESTAMP_SIZE,
};
use leafkv::{BtreeKey, Config, LeafError, LeafNode, ReplTimestamp, ShortValueSizer, ValueSizer};

// =============================================================================
// Helper Functions
// =============================================================================

fn new_leaf(sizer: &ShortValueSizer) -> LeafNode<Vec<u8>> {
    let mut node = LeafNode::new(vec![0u8; sizer.block_size()]);
    node.init(sizer);
    node
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_after_init() {
    let sizer = ShortValueSizer::default();
    let node = new_leaf(&sizer);
    let buf = node.as_bytes();

    assert_eq!(&buf[0..4], b"leaf");
    assert_eq!(u16_at(buf, 4), 0); // num_pairs
    assert_eq!(u16_at(buf, 6), 0); // live_size
    assert_eq!(u16_at(buf, 8), 4096); // frontmost
    assert_eq!(u16_at(buf, 10), 4096); // tstamp_cutpoint
    assert_eq!(HEADER_SIZE, 12);
    assert!(node.is_empty());
}

#[test]
fn test_header_after_first_insert() {
    let sizer = ShortValueSizer::default();
    let mut node = new_leaf(&sizer);
    node.insert(&sizer, b"a", &[1, 9], ReplTimestamp::new(7));

    let buf = node.as_bytes();
    assert_eq!(u16_at(buf, 4), 1);
    assert_eq!(u16_at(buf, 6), 2 + 4);
    assert_eq!(u16_at(buf, 8), 4088);
    assert_eq!(u16_at(buf, 10), 4096);
    assert_eq!(u16_at(buf, 12), 4088);

    // [timestamp][len]["a"][value]
    assert_eq!(&buf[4088..4092], &7u32.to_le_bytes());
    assert_eq!(&buf[4092..4096], &[1, b'a', 1, 9]);
}

#[test]
#[should_panic(expected = "does not match the block size")]
fn test_init_rejects_wrong_buffer_size() {
    let sizer = ShortValueSizer::default();
    let mut node = LeafNode::new(vec![0u8; 1000]);
    node.init(&sizer);
}

// =============================================================================
// Entry Codec Tests
// =============================================================================

#[test]
fn test_live_entry_roundtrip() {
    let sizer = ShortValueSizer::default();
    let mut buf = [0u8; 8];
    write_live(&mut buf, b"key", &[3, b'x', b'y', b'z']);

    let entry = Entry::decode(&buf, &sizer).unwrap();
    assert_eq!(
        entry,
        Entry::Live {
            key: b"key",
            value: &[3, b'x', b'y', b'z']
        }
    );
    assert_eq!(entry.size(), 8);
    assert_eq!(entry_key(&buf), Some(&b"key"[..]));
}

#[test]
fn test_deletion_entry_layout() {
    let sizer = ShortValueSizer::default();
    let mut buf = [0u8; 5];
    write_deletion(&mut buf, b"abc");

    assert_eq!(buf, [255, 3, b'a', b'b', b'c']);
    let entry = Entry::parse(&buf, &sizer);
    assert!(entry.is_deletion());
    assert_eq!(entry.key(), Some(&b"abc"[..]));
    assert_eq!(entry.value(), None);
}

#[test]
fn test_skip_encodings() {
    let sizer = ShortValueSizer::default();

    let mut one = [0u8; 1];
    write_skip(&mut one);
    assert_eq!(one, [SKIP_ENTRY_CODE_ONE]);
    assert_eq!(Entry::parse(&one, &sizer), Entry::Skip(1));

    let mut two = [0u8; 2];
    write_skip(&mut two);
    assert_eq!(two, [SKIP_ENTRY_CODE_TWO, SKIP_ENTRY_RESERVED]);
    assert_eq!(Entry::parse(&two, &sizer), Entry::Skip(2));

    let mut many = [0u8; 40];
    write_skip(&mut many);
    assert_eq!(many[0], SKIP_ENTRY_CODE_MANY);
    assert_eq!(u16_at(&many, 1), 37);
    assert_eq!(Entry::parse(&many, &sizer), Entry::Skip(40));
    assert_eq!(entry_key(&many), None);
}

#[test]
fn test_decode_rejects_reserved_tag() {
    let sizer = ShortValueSizer::default();
    let buf = [SKIP_ENTRY_RESERVED, 0, 0];

    assert!(!entry_fits(&buf, &sizer));
    assert!(matches!(
        Entry::decode(&buf, &sizer),
        Err(LeafError::Corruption(_))
    ));
}

#[test]
fn test_entry_fits_near_buffer_end() {
    let sizer = ShortValueSizer::default();

    // live entry whose value runs off the end
    assert!(!entry_fits(&[2, b'a', b'b', 5, 1, 2], &sizer));
    assert!(entry_fits(&[2, b'a', b'b', 2, 1, 2], &sizer));

    // deletion whose key runs off the end
    assert!(!entry_fits(&[255, 4, b'a'], &sizer));
    assert!(!entry_fits(&[255], &sizer));

    // skip-many with a truncated length field or body
    assert!(!entry_fits(&[SKIP_ENTRY_CODE_MANY, 9], &sizer));
    assert!(!entry_fits(&[SKIP_ENTRY_CODE_MANY, 9, 0, 0], &sizer));

    assert!(!entry_fits(&[SKIP_ENTRY_CODE_TWO], &sizer));
    assert!(!entry_fits(&[], &sizer));
}

// =============================================================================
// Iteration Tests
// =============================================================================

#[test]
fn test_entries_walk_is_newest_first() {
    let sizer = ShortValueSizer::default();
    let mut node = new_leaf(&sizer);
    node.insert(&sizer, b"b", &[0], ReplTimestamp::new(1));
    node.insert(&sizer, b"a", &[0], ReplTimestamp::new(2));
    node.insert(&sizer, b"c", &[0], ReplTimestamp::new(3));

    let keys: Vec<_> = node
        .entries(&sizer)
        .map(|raw| raw.entry.key().unwrap().to_vec())
        .collect();
    assert_eq!(keys, vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]);

    let stamps: Vec<_> = node
        .entries(&sizer)
        .map(|raw| raw.timestamp.unwrap().value())
        .collect();
    assert_eq!(stamps, vec![3, 2, 1]);
}

#[test]
fn test_pairs_walk_in_key_order() {
    let sizer = ShortValueSizer::default();
    let mut node = new_leaf(&sizer);
    for (i, key) in ["m", "c", "x", "a"].iter().enumerate() {
        node.insert(&sizer, key.as_bytes(), &[1, i as u8], ReplTimestamp::new(i as u32));
    }

    let keys: Vec<_> = node.live_pairs(&sizer).map(|(k, _)| k.to_vec()).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec(), b"m".to_vec(), b"x".to_vec()]);
    assert_eq!(node.pairs(&sizer).len(), 4);
}

#[test]
fn test_get_entry_hides_the_cutpoint() {
    let sizer = ShortValueSizer::default();
    let mut node = new_leaf(&sizer);
    for i in 0..8u8 {
        node.insert(&sizer, &[b'k', i], &[1, i], ReplTimestamp::new(i as u32));
    }
    // strip every timestamp older than 5
    node.erase_deletions(&sizer, ReplTimestamp::new(5));

    for index in 0..node.num_pairs() {
        let offset = node.pair_offset(index);
        let entry = node.get_entry(&sizer, offset);
        assert_eq!(entry.key(), Some(node.key_at(index)));
        assert_eq!(node.timestamp_at(offset).is_some(), index >= 5);
    }
    assert_eq!(
        node.tstamp_cutpoint() - node.frontmost(),
        3 * (TIMESTAMP_SIZE + 1 + 2 + 2)
    );
}

#[test]
fn test_find_key_and_lookup() {
    let sizer = ShortValueSizer::default();
    let mut node = new_leaf(&sizer);
    node.insert(&sizer, b"b", &[1, 2], ReplTimestamp::new(1));
    node.insert(&sizer, b"d", &[1, 4], ReplTimestamp::new(2));

    assert_eq!(node.find_key(b"b"), Ok(0));
    assert_eq!(node.find_key(b"d"), Ok(1));
    assert_eq!(node.find_key(b"a"), Err(0));
    assert_eq!(node.find_key(b"c"), Err(1));
    assert_eq!(node.find_key(b"e"), Err(2));

    assert_eq!(node.lookup(&sizer, b"d"), Some(&[1u8, 4][..]));
    assert_eq!(node.lookup(&sizer, b"c"), None);
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_key_length_limit() {
    assert!(BtreeKey::new(vec![b'k'; MAX_KEY_SIZE]).is_ok());
    assert!(matches!(
        BtreeKey::new(vec![b'k'; MAX_KEY_SIZE + 1]),
        Err(LeafError::KeyTooLong { len: 251, max: 250 })
    ));
}

#[test]
fn test_short_value_encoding() {
    let sizer = ShortValueSizer::default();
    let value = sizer.encode(b"hello").unwrap();

    assert_eq!(value, b"\x05hello");
    assert_eq!(sizer.size(&value), 6);
    assert_eq!(ShortValueSizer::payload(&value), Some(&b"hello"[..]));
    assert_eq!(ShortValueSizer::payload(b"\x02hi trailing"), Some(&b"hi"[..]));
    assert!(matches!(
        sizer.encode(&[0u8; 256]),
        Err(LeafError::ValueTooLong { len: 256, max: 255 })
    ));
}

#[test]
fn test_short_value_payload_of_truncated_bytes() {
    assert_eq!(ShortValueSizer::payload(&[]), None);
    assert_eq!(ShortValueSizer::payload(&[5, b'a', b'b']), None);
    assert_eq!(ShortValueSizer::payload(&[0]), Some(&[][..]));
}

#[test]
fn test_config_validation() {
    assert!(Config::default().validate().is_ok());
    assert!(Config::builder().block_size(65536).build().validate().is_err());
    assert!(Config::builder().block_size(2048).build().validate().is_err());
    assert!(Config::builder().max_value_len(300).build().validate().is_err());

    // smaller values shrink epsilon, so smaller blocks become usable
    let config = Config::builder().block_size(2048).max_value_len(8).build();
    assert!(ShortValueSizer::from_config(&config).is_ok());
}

#[test]
fn test_open_validates() {
    let sizer = ShortValueSizer::default();
    let mut node = new_leaf(&sizer);
    node.insert(&sizer, b"k", &[0], ReplTimestamp::new(1));
    let mut buf = node.into_inner();

    assert!(LeafNode::open(buf.as_slice(), &sizer).is_ok());

    // point the only pair into the middle of its entry
    let bad = u16_at(&buf, 12) + 1;
    buf[12..14].copy_from_slice(&bad.to_le_bytes());
    assert!(matches!(
        LeafNode::open(buf.as_slice(), &sizer),
        Err(LeafError::Corruption(_))
    ));

    assert!(matches!(
        LeafNode::open(&buf[..100], &sizer),
        Err(LeafError::BlockSize { .. })
    ));
}
