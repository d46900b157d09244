//! Partition-local indexes
//!
//! Every index here is derived state: rebuilt from a partition's sorted
//! records after any insert, delete, split or merge, before the partition
//! serves another query.
//!
//! - `LearnedIndex`: key -> position model with an exact error bound
//! - `CategoricalBitmap`: value -> positions for one low-cardinality field
//! - `ZoneMap`: per-field min/max used to prove a predicate cannot match

mod errors;
mod learned;
mod secondary;

pub use errors::{IndexError, IndexErrorCode, IndexResult};
pub use learned::{Keyed, LearnedIndex};
pub use secondary::{
    CategoricalBitmap, ZoneMap, BLOCK_CATEGORICAL, BLOCK_ZONE_MAP, MAX_CATEGORIES,
};
