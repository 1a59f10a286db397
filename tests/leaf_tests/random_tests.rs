//! Randomized workloads over a chain of leaves
//!
//! A tiny stand-in for the owning B-tree: a row of leaves separated by keys,
//! split before an operation that would overflow, leveled or merged after an
//! operation that leaves a leaf underfull. After every step the touched leaf
//! is fscked against its key range, and the chain as a whole is compared to a
//! `BTreeMap` reference at regular intervals. With ordered timestamps every
//! leaf's backfill is also checked against the last write to each key.

use std::collections::BTreeMap;

use leafkv::{
    Backfill, BackfillEntry, LeafNode, ReplTimestamp, ShortValueSizer, SiblingSide, ValueSizer,
};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const STEPS: usize = 4000;
const KEY_SPACE: u32 = 2000;
const MAX_PAYLOAD: usize = 40;

/// Last write to each key: its timestamp and value, `None` for a delete
type History = BTreeMap<Vec<u8>, (ReplTimestamp, Option<Vec<u8>>)>;

// =============================================================================
// Leaf Chain
// =============================================================================

/// How timestamps are handed out to writes
#[derive(Debug, Clone, Copy)]
enum Stamps {
    Zero,
    Increasing,
    Random,
}

struct Chain {
    sizer: ShortValueSizer,
    leaves: Vec<LeafNode<Vec<u8>>>,
    /// `seps[i]` is the largest key allowed in `leaves[i]`
    seps: Vec<Vec<u8>>,
}

impl Chain {
    fn new() -> Self {
        let sizer = ShortValueSizer::default();
        let leaf = new_leaf(&sizer);
        Self {
            sizer,
            leaves: vec![leaf],
            seps: Vec::new(),
        }
    }

    fn locate(&self, key: &[u8]) -> usize {
        self.seps.partition_point(|sep| sep.as_slice() < key)
    }

    fn bounds(&self, i: usize) -> (Option<&[u8]>, Option<&[u8]>) {
        let lower = i.checked_sub(1).map(|l| self.seps[l].as_slice());
        let upper = self.seps.get(i).map(Vec::as_slice);
        (lower, upper)
    }

    fn split(&mut self, i: usize) {
        let mut right = new_leaf(&self.sizer);
        let median = self.leaves[i].split(&self.sizer, &mut right);
        self.leaves.insert(i + 1, right);
        self.seps.insert(i, median.to_vec());
    }

    fn insert(&mut self, key: &[u8], value: &[u8], ts: ReplTimestamp) {
        let mut i = self.locate(key);
        if self.leaves[i].is_full(&self.sizer, key, value) {
            self.split(i);
            i = self.locate(key);
            assert!(!self.leaves[i].is_full(&self.sizer, key, value));
        }
        self.leaves[i].insert(&self.sizer, key, value, ts);
        self.rebalance(i);
    }

    fn remove(&mut self, key: &[u8], ts: ReplTimestamp) {
        let mut i = self.locate(key);
        if self.leaves[i].is_full_for_removal(&self.sizer, key) {
            self.split(i);
            i = self.locate(key);
            assert!(!self.leaves[i].is_full_for_removal(&self.sizer, key));
        }
        self.leaves[i].remove(&self.sizer, key, ts);
        self.rebalance(i);
    }

    fn erase(&mut self, key: &[u8]) -> bool {
        let i = self.locate(key);
        let erased = self.leaves[i].erase_presence(&self.sizer, key);
        self.rebalance(i);
        erased
    }

    fn erase_deletions(&mut self, min: ReplTimestamp) {
        for leaf in &mut self.leaves {
            leaf.erase_deletions(&self.sizer, min);
        }
    }

    /// Level or merge `leaves[i]` with a neighbor if it is underfull
    fn rebalance(&mut self, i: usize) {
        if self.leaves.len() == 1 || !self.leaves[i].is_underfull(&self.sizer) {
            return;
        }

        let j = if i + 1 < self.leaves.len() { i + 1 } else { i - 1 };
        let (l, r) = (i.min(j), i.max(j));

        if !self.leaves[j].is_underfull(&self.sizer) {
            let (head, tail) = self.leaves.split_at_mut(r);
            let leveled = if j > i {
                head[l].level(&self.sizer, &mut tail[0], SiblingSide::Right)
            } else {
                tail[0].level(&self.sizer, &mut head[l], SiblingSide::Left)
            };
            if let Some(leveled) = leveled {
                assert_eq!(
                    Some(leveled.key_to_replace.as_bytes()),
                    self.leaves[l].pairs(&self.sizer).next().and_then(|raw| raw.entry.key())
                );
                self.seps[l] = leveled.replacement_key.to_vec();
                self.check_leaf(l);
                self.check_leaf(r);
                return;
            }
        }

        let (head, tail) = self.leaves.split_at_mut(r);
        tail[0].merge(&self.sizer, &mut head[l]);
        assert!(self.leaves[l].is_empty());
        self.leaves.remove(l);
        self.seps.remove(l);
        self.check_leaf(l);
    }

    fn check_leaf(&self, i: usize) {
        let (lower, upper) = self.bounds(i);
        if let Err(e) = self.leaves[i].fsck(&self.sizer, lower, upper) {
            panic!("leaf {i} of {} failed fsck: {e}", self.leaves.len());
        }
    }

    fn check_against(&self, model: &BTreeMap<Vec<u8>, Vec<u8>>) {
        assert_eq!(self.seps.len() + 1, self.leaves.len());
        for i in 0..self.leaves.len() {
            self.check_leaf(i);
        }

        let actual: Vec<(Vec<u8>, Vec<u8>)> = self
            .leaves
            .iter()
            .flat_map(|leaf| leaf.live_pairs(&self.sizer))
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        let expected: Vec<(Vec<u8>, Vec<u8>)> =
            model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        assert_eq!(actual, expected);
    }

    /// Each leaf either dumps exactly its live pairs or reports exactly the
    /// keys in its range last written at or after `min`
    fn check_backfill(&self, history: &History, min: ReplTimestamp) {
        for (i, leaf) in self.leaves.iter().enumerate() {
            let (lower, upper) = self.bounds(i);
            let in_range = |key: &[u8]| {
                lower.map_or(true, |l| key > l) && upper.map_or(true, |u| key <= u)
            };

            match leaf.entries_since(&self.sizer, min) {
                Backfill::Full(pairs) => {
                    let actual: Vec<(Vec<u8>, Vec<u8>)> = pairs
                        .into_iter()
                        .map(|(k, v)| (k.as_bytes().to_vec(), v))
                        .collect();
                    let expected: Vec<(Vec<u8>, Vec<u8>)> = history
                        .iter()
                        .filter(|(k, _)| in_range(k.as_slice()))
                        .filter_map(|(k, (_, v))| v.clone().map(|v| (k.clone(), v)))
                        .collect();
                    assert_eq!(actual, expected, "leaf {i} full backfill since {min}");
                }
                Backfill::Incremental(changes) => {
                    let actual: Vec<(Vec<u8>, ReplTimestamp, Option<Vec<u8>>)> = changes
                        .into_iter()
                        .map(|change| match change {
                            BackfillEntry::Set {
                                key,
                                value,
                                timestamp,
                            } => (key.as_bytes().to_vec(), timestamp, Some(value)),
                            BackfillEntry::Delete { key, timestamp } => {
                                (key.as_bytes().to_vec(), timestamp, None)
                            }
                        })
                        .collect();
                    let expected: Vec<(Vec<u8>, ReplTimestamp, Option<Vec<u8>>)> = history
                        .iter()
                        .filter(|(k, (t, _))| in_range(k.as_slice()) && *t >= min)
                        .map(|(k, (t, v))| (k.clone(), *t, v.clone()))
                        .collect();
                    assert_eq!(actual, expected, "leaf {i} incremental backfill since {min}");
                }
            }
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn new_leaf(sizer: &ShortValueSizer) -> LeafNode<Vec<u8>> {
    let mut node = LeafNode::new(vec![0u8; sizer.block_size()]);
    node.init(sizer);
    node
}

/// Keys of 6 to 24 bytes; the same `n` always gives the same key
fn key_for(n: u32) -> Vec<u8> {
    let mut key = format!("k{n:05}").into_bytes();
    key.resize(key.len() + (n % 19) as usize, b'x');
    key
}

fn random_live_key(model: &BTreeMap<Vec<u8>, Vec<u8>>, rng: &mut ChaCha8Rng) -> Option<Vec<u8>> {
    if model.is_empty() {
        return None;
    }
    let index = rng.gen_range(0..model.len());
    model.keys().nth(index).cloned()
}

fn next_stamp(stamps: Stamps, clock: &mut u32, rng: &mut ChaCha8Rng) -> ReplTimestamp {
    *clock += 1;
    match stamps {
        Stamps::Zero => ReplTimestamp::DISTANT_PAST,
        Stamps::Increasing => ReplTimestamp::new(*clock),
        Stamps::Random => ReplTimestamp::new(rng.gen_range(0..1_000_000)),
    }
}

// =============================================================================
// Workload
// =============================================================================

fn run_workload(seed: u64, stamps: Stamps) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut chain = Chain::new();
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    let mut history = History::new();
    let mut clock = 0u32;
    let mut max_leaves = 1;

    for step in 0..STEPS {
        let roll = rng.gen_range(0..100);
        if roll < 55 {
            let key = key_for(rng.gen_range(0..KEY_SPACE));
            let payload: Vec<u8> = (0..rng.gen_range(0..=MAX_PAYLOAD)).map(|_| rng.gen()).collect();
            let value = chain.sizer.encode(&payload).unwrap();
            let ts = next_stamp(stamps, &mut clock, &mut rng);

            chain.insert(&key, &value, ts);
            model.insert(key.clone(), value.clone());
            history.insert(key.clone(), (ts, Some(value.clone())));
            let i = chain.locate(&key);
            assert_eq!(chain.leaves[i].lookup(&chain.sizer, &key), Some(value.as_slice()));
        } else if roll < 85 {
            let Some(key) = random_live_key(&model, &mut rng) else {
                continue;
            };
            let ts = next_stamp(stamps, &mut clock, &mut rng);

            chain.remove(&key, ts);
            model.remove(&key);
            history.insert(key.clone(), (ts, None));
            let i = chain.locate(&key);
            assert_eq!(chain.leaves[i].lookup(&chain.sizer, &key), None);
        } else {
            let key = key_for(rng.gen_range(0..KEY_SPACE));
            let was_live = model.remove(&key).is_some();
            history.remove(&key);
            let erased = chain.erase(&key);
            assert!(erased || !was_live, "live key {key:?} was not erased");
        }

        let i = chain.locate(&key_for(rng.gen_range(0..KEY_SPACE)));
        chain.check_leaf(i);
        max_leaves = max_leaves.max(chain.leaves.len());

        if step % 250 == 249 {
            let min = ReplTimestamp::new(clock.saturating_sub(200));
            chain.erase_deletions(min);
        }
        if step % 100 == 99 {
            chain.check_against(&model);
            // backfill assumes later writes carry later timestamps
            if !matches!(stamps, Stamps::Random) {
                for back in [0, 1, 20, 150, 400, 4000] {
                    chain.check_backfill(&history, ReplTimestamp::new(clock.saturating_sub(back)));
                }
            }
        }
    }

    chain.check_against(&model);
    assert!(max_leaves > 2, "workload never split ({stamps:?}, seed {seed})");
}

#[test]
fn test_random_workload_zero_timestamps() {
    for seed in 0..10 {
        run_workload(seed, Stamps::Zero);
    }
}

#[test]
fn test_random_workload_increasing_timestamps() {
    for seed in 0..10 {
        run_workload(0x5eed_0000 + seed, Stamps::Increasing);
    }
}

#[test]
fn test_random_workload_random_timestamps() {
    for seed in 0..10 {
        run_workload(0xbad_5eed + seed, Stamps::Random);
    }
}

// =============================================================================
// Drain
// =============================================================================

#[test]
fn test_backfill_through_splits_and_merges() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let mut chain = Chain::new();
    let mut history = History::new();
    let mut t = 0;

    // grow past many splits, then delete most keys so leaves merge and level
    for n in 0..KEY_SPACE {
        t += 1;
        let key = key_for(n);
        let value = chain.sizer.encode(&[n as u8; 12]).unwrap();
        chain.insert(&key, &value, ReplTimestamp::new(t));
        history.insert(key, (ReplTimestamp::new(t), Some(value)));
    }
    let peak = chain.leaves.len();

    for _ in 0..KEY_SPACE * 3 / 4 {
        let live: Vec<Vec<u8>> = history
            .iter()
            .filter(|(_, (_, v))| v.is_some())
            .map(|(k, _)| k.clone())
            .collect();
        let key = live[rng.gen_range(0..live.len())].clone();
        t += 1;
        chain.remove(&key, ReplTimestamp::new(t));
        history.insert(key, (ReplTimestamp::new(t), None));

        if t % 150 == 0 {
            chain.erase_deletions(ReplTimestamp::new(t - 300));
            for back in [1, 40, 300, 1000] {
                chain.check_backfill(&history, ReplTimestamp::new(t.saturating_sub(back)));
            }
        }
    }

    assert!(chain.leaves.len() < peak);
    for back in [0, 1, 10, 100, 1000, t] {
        chain.check_backfill(&history, ReplTimestamp::new(t - back));
    }
}

#[test]
fn test_fill_then_drain_shrinks_chain() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut chain = Chain::new();
    let mut model = BTreeMap::new();

    for n in 0..KEY_SPACE {
        let key = key_for(n);
        let value = chain.sizer.encode(&[n as u8; 16]).unwrap();
        chain.insert(&key, &value, ReplTimestamp::new(n));
        model.insert(key, value);
    }
    let peak = chain.leaves.len();
    chain.check_against(&model);

    let mut t = KEY_SPACE;
    while let Some(key) = random_live_key(&model, &mut rng) {
        chain.remove(&key, ReplTimestamp::new(t));
        model.remove(&key);
        t += 1;
    }
    chain.erase_deletions(ReplTimestamp::new(t));
    chain.check_against(&model);

    assert!(peak > 10);
    assert!(chain.leaves.len() < peak);
    // every tombstone is older than `t`
    assert!(chain.leaves.iter().all(|leaf| leaf.is_empty()));
}
