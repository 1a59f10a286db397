//! # leafkv
//!
//! Leaf-node storage format for a B-tree key/value engine:
//! - Variable-length live, deletion and skip entries in one flat block
//! - Bounded history of per-entry replication timestamps
//! - Mandatory-cost accounting that keeps splits and merges from oscillating
//! - Byte-level invariants checked by `fsck`
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Owning B-tree (external)                        │
//! │   is_full / is_underfull ──▶ insert, remove, split, level    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ &mut LeafNode<B>
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     LeafNode                                 │
//! │  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌──────────┐  │
//! │  │  mutate   │  │ rebalance │  │   fsck    │  │ backfill │  │
//! │  └─────┬─────┘  └─────┬─────┘  └─────┬─────┘  └────┬─────┘  │
//! │        └──────────────┴──────┬───────┴─────────────┘        │
//! │                     ┌────────▼────────┐                      │
//! │                     │  cost  /  iter  │                      │
//! │                     └────────┬────────┘                      │
//! │                     ┌────────▼────────┐                      │
//! │                     │   entry codec   │                      │
//! │                     └─────────────────┘                      │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │
//!                        ┌──────▼──────┐
//!                        │ ValueSizer  │
//!                        └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod key;
pub mod sizer;
pub mod timestamp;
pub mod leaf;
pub mod inspect;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LeafError, Result};
pub use config::Config;
pub use key::BtreeKey;
pub use leaf::{Backfill, BackfillEntry, Entry, LeafNode, LeafSummary, Leveled, SiblingSide};
pub use sizer::{ShortValueSizer, ValueSizer};
pub use timestamp::ReplTimestamp;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of leafkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
