//! Reserved result words
//!
//! The top four values of a 32-bit result word never name a partition, so a
//! node can always answer with a distinguishable outcome instead of staying
//! silent. Partition ids are allocated well below [`RESERVED_MIN`].

use serde::{Deserialize, Serialize};

/// Smallest reserved word
pub const RESERVED_MIN: u32 = u32::MAX - 3;

/// Out-of-band node outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentinel {
    /// Lookup found nothing in the error-bounded window
    NotFound,
    /// Predicate names a missing field or the wrong type (node error)
    PredicateMismatch,
    /// Partition span misses every query span; skipped without a scan
    RangeNoOverlap,
    /// More matches than the result channel holds; output truncated
    ResultOverflow,
}

impl Sentinel {
    /// Wire word
    pub fn word(&self) -> u32 {
        match self {
            Sentinel::NotFound => u32::MAX,
            Sentinel::PredicateMismatch => u32::MAX - 1,
            Sentinel::RangeNoOverlap => u32::MAX - 2,
            Sentinel::ResultOverflow => u32::MAX - 3,
        }
    }

    /// Parses a word; `None` for ordinary values
    pub fn from_word(word: u32) -> Option<Self> {
        match word {
            u32::MAX => Some(Sentinel::NotFound),
            w if w == u32::MAX - 1 => Some(Sentinel::PredicateMismatch),
            w if w == u32::MAX - 2 => Some(Sentinel::RangeNoOverlap),
            w if w == u32::MAX - 3 => Some(Sentinel::ResultOverflow),
            _ => None,
        }
    }

    /// Whether the outcome means the node failed, as opposed to a valid
    /// empty or skipped answer
    pub fn is_node_error(&self) -> bool {
        matches!(self, Sentinel::PredicateMismatch | Sentinel::ResultOverflow)
    }
}
