//! Curve Codec Tests
//!
//! Tests for curve invariants:
//! - Decoding an encoded vector returns the vector
//! - Region spans cover every point in the box
//! - Spans are sorted, disjoint and within budget

use proptest::prelude::*;
use tessdb::curve::{CoordinateVector, CurveCodec, CurveErrorCode, KeySpan};

// =============================================================================
// Helper Functions
// =============================================================================

fn covered(spans: &[KeySpan], key: u128) -> bool {
    spans.iter().any(|s| s.contains(key))
}

fn point(values: &[u32]) -> CoordinateVector {
    CoordinateVector::new(values.to_vec())
}

// =============================================================================
// Round Trip
// =============================================================================

proptest! {
    /// decode(encode(v)) == v for every valid vector.
    #[test]
    fn prop_round_trip(dims in 1u32..6, bits in 1u32..12, seed in any::<u64>()) {
        let codec = CurveCodec::new(dims, bits).unwrap();
        let max = codec.max_coordinate() as u64;
        let values: Vec<u32> = (0..dims as u64)
            .map(|d| (seed.rotate_left(d as u32 * 11) % (max + 1)) as u32)
            .collect();
        let v = CoordinateVector::new(values);
        let key = codec.encode(&v).unwrap();
        prop_assert!(key <= codec.max_key());
        prop_assert_eq!(codec.decode(key).unwrap(), v);
    }

    /// Every point inside a random 2-D box lies in a returned span.
    #[test]
    fn prop_region_covers_box(
        a in 0u32..32, b in 0u32..32, c in 0u32..32, d in 0u32..32, budget in 1usize..8,
    ) {
        let codec = CurveCodec::new(2, 5).unwrap();
        let min = point(&[a.min(b), c.min(d)]);
        let max = point(&[a.max(b), c.max(d)]);
        let spans = codec.region_to_ranges(&min, &max, budget).unwrap();
        prop_assert!(!spans.is_empty());
        prop_assert!(spans.len() <= budget);
        for pair in spans.windows(2) {
            prop_assert!(pair[0].last < pair[1].first);
        }
        for x in min.as_slice()[0]..=max.as_slice()[0] {
            for y in min.as_slice()[1]..=max.as_slice()[1] {
                let key = codec.encode(&point(&[x, y])).unwrap();
                prop_assert!(covered(&spans, key));
            }
        }
    }
}

/// Every key decodes to a distinct vector on a small curve.
#[test]
fn test_encode_is_bijective_on_small_curve() {
    let codec = CurveCodec::new(3, 2).unwrap();
    let mut seen = std::collections::HashSet::new();
    for key in 0..=codec.max_key() {
        let v = codec.decode(key).unwrap();
        assert_eq!(codec.encode(&v).unwrap(), key);
        assert!(seen.insert(v.into_inner()));
    }
    assert_eq!(seen.len(), 64);
}

// =============================================================================
// Region Decomposition
// =============================================================================

/// A box pinned on one dimension covers every matching coordinate and
/// leaves out coordinates far outside it.
#[test]
fn test_region_on_one_dimension() {
    let codec = CurveCodec::new(3, 5).unwrap();
    let min = point(&[0, 0, 0]);
    let max = point(&[31, 31, 9]);
    let spans = codec.region_to_ranges(&min, &max, 1024).unwrap();

    for x in (0..32).step_by(3) {
        for y in (0..32).step_by(5) {
            for price in 0..=9 {
                let key = codec.encode(&point(&[x, y, price])).unwrap();
                assert!(covered(&spans, key), "missing ({}, {}, {})", x, y, price);
            }
        }
    }
    let outside = codec.encode(&point(&[4, 4, 31])).unwrap();
    assert!(!covered(&spans, outside));
}

/// A budget of one collapses the cover into a single span.
#[test]
fn test_region_budget_of_one() {
    let codec = CurveCodec::new(2, 4).unwrap();
    let spans = codec
        .region_to_ranges(&point(&[1, 1]), &point(&[14, 2]), 1)
        .unwrap();
    assert_eq!(spans.len(), 1);
}

/// Single-cell box is exactly one key.
#[test]
fn test_region_single_cell() {
    let codec = CurveCodec::new(2, 4).unwrap();
    let p = point(&[7, 3]);
    let key = codec.encode(&p).unwrap();
    let spans = codec.region_to_ranges(&p, &p, 4).unwrap();
    assert_eq!(spans, vec![KeySpan::point(key)]);
}

// =============================================================================
// Rejections
// =============================================================================

#[test]
fn test_rejects_out_of_range_coordinate() {
    let codec = CurveCodec::new(2, 4).unwrap();
    let err = codec.encode(&point(&[16, 0])).unwrap_err();
    assert_eq!(err.code(), CurveErrorCode::EncodingOutOfRange);
}

#[test]
fn test_rejects_wrong_dimension_count() {
    let codec = CurveCodec::new(2, 4).unwrap();
    let err = codec.encode(&point(&[1, 2, 3])).unwrap_err();
    assert_eq!(err.code(), CurveErrorCode::DimensionMismatch);
}

#[test]
fn test_rejects_inverted_box() {
    let codec = CurveCodec::new(2, 4).unwrap();
    let err = codec
        .region_to_ranges(&point(&[5, 5]), &point(&[4, 9]), 8)
        .unwrap_err();
    assert_eq!(err.code(), CurveErrorCode::InvalidCurve);
}

#[test]
fn test_rejects_key_wider_than_curve() {
    let codec = CurveCodec::new(2, 4).unwrap();
    assert!(codec.decode(codec.max_key() + 1).is_err());
}
