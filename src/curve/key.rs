//! Key-space value types

use serde::{Deserialize, Serialize};

/// Single-integer position of a record on the space-filling curve.
///
/// Keys are at most 128 bits wide (`dims * bits_per_dim <= 128`).
pub type SpatialKey = u128;

/// Widest supported key, in bits
pub const MAX_KEY_BITS: u32 = 128;

/// Widest supported coordinate, in bits
pub const MAX_BITS_PER_DIM: u32 = 32;

/// Ordered per-axis integer coordinates of one record.
///
/// Every component lies in `[0, 2^bits_per_dim)` of the curve that encodes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoordinateVector(Vec<u32>);

impl CoordinateVector {
    /// Wraps raw axis values
    pub fn new(values: Vec<u32>) -> Self {
        Self(values)
    }

    /// Number of axes
    pub fn dims(&self) -> usize {
        self.0.len()
    }

    /// Axis values in curve order
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Value on one axis
    pub fn get(&self, dim: usize) -> Option<u32> {
        self.0.get(dim).copied()
    }

    /// True when every axis lies inside the inclusive box `[min, max]`
    pub fn within(&self, min: &CoordinateVector, max: &CoordinateVector) -> bool {
        self.0
            .iter()
            .zip(min.0.iter().zip(max.0.iter()))
            .all(|(v, (lo, hi))| lo <= v && v <= hi)
            && self.dims() == min.dims()
            && self.dims() == max.dims()
    }

    /// Consumes the vector and returns the raw values
    pub fn into_inner(self) -> Vec<u32> {
        self.0
    }
}

impl From<Vec<u32>> for CoordinateVector {
    fn from(values: Vec<u32>) -> Self {
        Self(values)
    }
}

impl From<&[u32]> for CoordinateVector {
    fn from(values: &[u32]) -> Self {
        Self(values.to_vec())
    }
}

/// Inclusive run of spatial keys `[first, last]`.
///
/// Inclusive bounds let a single span cover the full 128-bit key space, which
/// a half-open `[lo, hi)` pair cannot express. A half-open range `[lo, hi)`
/// corresponds to `KeySpan { first: lo, last: hi - 1 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeySpan {
    /// Lowest key in the span
    pub first: SpatialKey,
    /// Highest key in the span
    pub last: SpatialKey,
}

impl KeySpan {
    /// Creates a span; `first` must not exceed `last`
    pub fn new(first: SpatialKey, last: SpatialKey) -> Self {
        debug_assert!(first <= last, "span bounds inverted");
        Self { first, last }
    }

    /// A span holding exactly one key
    pub fn point(key: SpatialKey) -> Self {
        Self {
            first: key,
            last: key,
        }
    }

    /// The entire key space of a curve with `key_bits` bits
    pub fn full(key_bits: u32) -> Self {
        Self {
            first: 0,
            last: max_key(key_bits),
        }
    }

    /// Returns true if `key` lies in the span
    pub fn contains(&self, key: SpatialKey) -> bool {
        self.first <= key && key <= self.last
    }

    /// Returns true if the two spans share at least one key
    pub fn intersects(&self, other: &KeySpan) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    /// Returns true if `other` starts immediately after this span ends
    pub fn abuts(&self, other: &KeySpan) -> bool {
        self.last.checked_add(1) == Some(other.first)
    }

    /// Number of keys between the end of this span and the start of `other`
    pub fn gap_to(&self, other: &KeySpan) -> u128 {
        other.first.saturating_sub(self.last).saturating_sub(1)
    }
}

/// Largest key representable in `key_bits` bits
pub fn max_key(key_bits: u32) -> SpatialKey {
    low_mask(key_bits)
}

/// Mask with the low `bits` bits set
pub(crate) fn low_mask(bits: u32) -> u128 {
    match bits {
        0 => 0,
        b if b >= 128 => u128::MAX,
        b => (1u128 << b) - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_contains_and_intersects() {
        let a = KeySpan::new(10, 20);
        let b = KeySpan::new(20, 30);
        let c = KeySpan::new(21, 30);
        assert!(a.contains(10));
        assert!(a.contains(20));
        assert!(!a.contains(21));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.abuts(&c));
        assert_eq!(a.gap_to(&KeySpan::new(25, 26)), 4);
    }

    #[test]
    fn test_full_span_covers_max_key() {
        let span = KeySpan::full(128);
        assert!(span.contains(u128::MAX));
        assert_eq!(KeySpan::full(15).last, 0x7fff);
        assert!(!KeySpan::new(0, u128::MAX).abuts(&KeySpan::point(0)));
    }

    #[test]
    fn test_within_box() {
        let v = CoordinateVector::new(vec![3, 7]);
        let lo = CoordinateVector::new(vec![0, 7]);
        let hi = CoordinateVector::new(vec![3, 9]);
        assert!(v.within(&lo, &hi));
        assert!(!CoordinateVector::new(vec![4, 7]).within(&lo, &hi));
    }
}
