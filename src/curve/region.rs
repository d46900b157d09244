//! Axis-aligned box to covering key spans
//!
//! The curve folds through space, so one box generally maps to many disjoint
//! key spans. The decomposition walks key prefixes breadth-first: every
//! prefix is an axis-aligned cell; cells inside the box are emitted whole,
//! cells outside are dropped, straddling cells are split on the next key bit.
//!
//! Given an unlimited span budget the result is exact: at full key depth a
//! cell is a single point and is either inside or outside the box. When the
//! budget would be exceeded, the remaining straddling cells are emitted whole
//! and the closest spans are coalesced. The result then over-covers the box
//! (it may include keys of points outside it) but never misses a point inside.
//! Callers that need exact answers re-check decoded coordinates.

use super::codec::CurveCodec;
use super::errors::{CurveError, CurveResult};
use super::key::{low_mask, CoordinateVector, KeySpan};

/// Where a curve cell sits relative to the query box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    Outside,
    Inside,
    Straddles,
}

/// A key prefix of `len` bits
#[derive(Debug, Clone, Copy)]
struct Cell {
    prefix: u128,
    len: u32,
}

impl CurveCodec {
    /// Covering key spans for the inclusive box `[min_corner, max_corner]`.
    ///
    /// Returns sorted, non-overlapping, non-adjacent spans, at most
    /// `max_ranges` of them (a budget of zero is treated as one).
    pub fn region_to_ranges(
        &self,
        min_corner: &CoordinateVector,
        max_corner: &CoordinateVector,
        max_ranges: usize,
    ) -> CurveResult<Vec<KeySpan>> {
        self.check(min_corner)?;
        self.check(max_corner)?;
        for (dim, (lo, hi)) in min_corner
            .as_slice()
            .iter()
            .zip(max_corner.as_slice())
            .enumerate()
        {
            if lo > hi {
                return Err(CurveError::invalid_curve(format!(
                    "Box is inverted on dimension {}: {} > {}",
                    dim, lo, hi
                )));
            }
        }

        let budget = max_ranges.max(1);
        let total = self.key_bits();
        let mut spans = Vec::new();
        let mut frontier = vec![Cell { prefix: 0, len: 0 }];

        while !frontier.is_empty() {
            let mut straddling = Vec::new();
            for cell in frontier {
                match self.classify(cell, min_corner, max_corner) {
                    Coverage::Outside => {}
                    Coverage::Inside => spans.push(self.cell_span(cell)),
                    Coverage::Straddles => straddling.push(cell),
                }
            }

            // A point cell never straddles, so straddling cells are shorter than the key.
            if spans.len() + 2 * straddling.len() > budget {
                spans.extend(straddling.iter().map(|&c| self.cell_span(c)));
                break;
            }

            frontier = Vec::with_capacity(straddling.len() * 2);
            for cell in straddling {
                debug_assert!(cell.len < total);
                frontier.push(Cell {
                    prefix: cell.prefix << 1,
                    len: cell.len + 1,
                });
                frontier.push(Cell {
                    prefix: (cell.prefix << 1) | 1,
                    len: cell.len + 1,
                });
            }
        }

        Ok(coalesce(spans, budget))
    }

    /// Keys covered by a prefix cell
    fn cell_span(&self, cell: Cell) -> KeySpan {
        let rest = self.key_bits() - cell.len;
        if cell.len == 0 {
            return self.key_space();
        }
        let first = cell.prefix << rest;
        KeySpan::new(first, first | low_mask(rest))
    }

    fn classify(
        &self,
        cell: Cell,
        min_corner: &CoordinateVector,
        max_corner: &CoordinateVector,
    ) -> Coverage {
        let span = self.cell_span(cell);
        // Padding a prefix with zeros / ones yields the cell's low / high corner.
        let low = self.decode_unchecked(span.first);
        let high = self.decode_unchecked(span.last);

        let mut inside = true;
        for dim in 0..self.dims() {
            let (cell_lo, cell_hi) = (low.as_slice()[dim], high.as_slice()[dim]);
            let (box_lo, box_hi) = (min_corner.as_slice()[dim], max_corner.as_slice()[dim]);
            if cell_hi < box_lo || cell_lo > box_hi {
                return Coverage::Outside;
            }
            if cell_lo < box_lo || cell_hi > box_hi {
                inside = false;
            }
        }
        if inside {
            Coverage::Inside
        } else {
            Coverage::Straddles
        }
    }
}

/// Sorts, merges overlapping/adjacent spans, then closes the smallest gaps
/// until at most `budget` spans remain.
pub fn coalesce(mut spans: Vec<KeySpan>, budget: usize) -> Vec<KeySpan> {
    spans.sort();
    let mut merged: Vec<KeySpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if last.intersects(&span) || last.abuts(&span) => {
                last.last = last.last.max(span.last);
            }
            _ => merged.push(span),
        }
    }

    let budget = budget.max(1);
    while merged.len() > budget {
        let narrowest = (0..merged.len() - 1)
            .min_by_key(|&i| (merged[i].gap_to(&merged[i + 1]), i))
            .unwrap_or(0);
        let next = merged.remove(narrowest + 1);
        merged[narrowest].last = next.last;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(spans: &[KeySpan], key: u128) -> bool {
        spans.iter().any(|s| s.contains(key))
    }

    #[test]
    fn test_full_box_is_one_span() {
        let codec = CurveCodec::new(2, 4).unwrap();
        let spans = codec
            .region_to_ranges(
                &CoordinateVector::new(vec![0, 0]),
                &CoordinateVector::new(vec![15, 15]),
                64,
            )
            .unwrap();
        assert_eq!(spans, vec![codec.key_space()]);
    }

    #[test]
    fn test_exact_cover_two_dims() {
        let codec = CurveCodec::new(2, 4).unwrap();
        let lo = CoordinateVector::new(vec![3, 5]);
        let hi = CoordinateVector::new(vec![9, 12]);
        let spans = codec.region_to_ranges(&lo, &hi, 1024).unwrap();

        for x in 0..16u32 {
            for y in 0..16u32 {
                let v = CoordinateVector::new(vec![x, y]);
                let key = codec.encode(&v).unwrap();
                assert_eq!(covered(&spans, key), v.within(&lo, &hi), "{:?}", v);
            }
        }
    }

    #[test]
    fn test_spans_sorted_and_disjoint() {
        let codec = CurveCodec::new(3, 4).unwrap();
        let spans = codec
            .region_to_ranges(
                &CoordinateVector::new(vec![1, 2, 3]),
                &CoordinateVector::new(vec![11, 9, 14]),
                256,
            )
            .unwrap();
        for pair in spans.windows(2) {
            assert!(pair[0].last < pair[1].first);
            assert!(!pair[0].abuts(&pair[1]));
        }
    }

    #[test]
    fn test_budget_over_covers_but_never_misses() {
        let codec = CurveCodec::new(2, 5).unwrap();
        let lo = CoordinateVector::new(vec![3, 7]);
        let hi = CoordinateVector::new(vec![20, 25]);
        let spans = codec.region_to_ranges(&lo, &hi, 4).unwrap();
        assert!(spans.len() <= 4);

        for x in 0..32u32 {
            for y in 0..32u32 {
                let v = CoordinateVector::new(vec![x, y]);
                if v.within(&lo, &hi) {
                    assert!(covered(&spans, codec.encode(&v).unwrap()));
                }
            }
        }
    }

    #[test]
    fn test_zero_budget_yields_single_span() {
        let codec = CurveCodec::new(2, 3).unwrap();
        let spans = codec
            .region_to_ranges(
                &CoordinateVector::new(vec![1, 1]),
                &CoordinateVector::new(vec![2, 6]),
                0,
            )
            .unwrap();
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn test_inverted_box_rejected() {
        let codec = CurveCodec::new(2, 3).unwrap();
        assert!(codec
            .region_to_ranges(
                &CoordinateVector::new(vec![5, 1]),
                &CoordinateVector::new(vec![2, 6]),
                8,
            )
            .is_err());
    }

    #[test]
    fn test_coalesce_closes_smallest_gap() {
        let spans = vec![
            KeySpan::new(0, 1),
            KeySpan::new(10, 11),
            KeySpan::new(13, 14),
        ];
        let merged = coalesce(spans, 2);
        assert_eq!(merged, vec![KeySpan::new(0, 1), KeySpan::new(10, 14)]);
    }
}
