//! Per-partition learned index
//!
//! A least-squares line from key to sorted position, plus the exact maximum
//! residual observed at fit time. Because the residual is measured over the
//! very keys that were fitted (not estimated), a key that is present is
//! always inside `predict(key) ± max_error`.
//!
//! The model regresses on `key - min_key` rather than the raw key: 128-bit
//! keys lose their low bits when converted to `f64`, and offsetting keeps the
//! fitted range small. Any precision that is still lost only widens
//! `max_error`; it never makes a lookup miss.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::errors::{IndexError, IndexResult};
use crate::bytes::{ByteReader, ByteWriter};
use crate::curve::SpatialKey;

/// Anything stored in key order that a learned index can search
pub trait Keyed {
    /// The spatial key the slice is sorted by
    fn spatial_key(&self) -> SpatialKey;
}

impl Keyed for SpatialKey {
    fn spatial_key(&self) -> SpatialKey {
        *self
    }
}

/// Linear position model over one partition's sorted keys.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearnedIndex {
    slope: f64,
    intercept: f64,
    /// Smallest fitted key (inclusive)
    min_key: SpatialKey,
    /// Largest fitted key (inclusive)
    max_key: SpatialKey,
    max_error: u32,
    /// Number of positions covered; predictions clamp to `len - 1`
    len: u32,
}

impl LearnedIndex {
    /// Size of the serialized block in bytes
    pub const ENCODED_LEN: usize = 8 + 8 + 16 + 16 + 4 + 4;

    /// Model over an empty partition; every lookup misses.
    pub fn empty() -> Self {
        Self {
            slope: 0.0,
            intercept: 0.0,
            min_key: 0,
            max_key: 0,
            max_error: 0,
            len: 0,
        }
    }

    /// Fits keys to their slice positions `0..keys.len()`.
    pub fn fit_keys(keys: &[SpatialKey]) -> IndexResult<Self> {
        let positions: Vec<usize> = (0..keys.len()).collect();
        Self::fit(keys, &positions)
    }

    /// Ordinary least-squares fit of `(key, position)` pairs.
    ///
    /// # Errors
    ///
    /// `TESS_INDEX_FIT_FAILED` if the inputs differ in length, keys are not
    /// ascending, or positions are not ascending.
    pub fn fit(sorted_keys: &[SpatialKey], sorted_positions: &[usize]) -> IndexResult<Self> {
        if sorted_keys.len() != sorted_positions.len() {
            return Err(IndexError::fit_failed(format!(
                "{} keys but {} positions",
                sorted_keys.len(),
                sorted_positions.len()
            )));
        }
        if sorted_keys.windows(2).any(|w| w[0] > w[1]) {
            return Err(IndexError::fit_failed("keys are not sorted ascending"));
        }
        if sorted_positions.windows(2).any(|w| w[0] > w[1]) {
            return Err(IndexError::fit_failed("positions are not sorted ascending"));
        }
        let (Some(&min_key), Some(&max_key), Some(&last_pos)) = (
            sorted_keys.first(),
            sorted_keys.last(),
            sorted_positions.last(),
        ) else {
            return Ok(Self::empty());
        };
        let len = u32::try_from(last_pos + 1)
            .map_err(|_| IndexError::fit_failed("position exceeds u32 range"))?;

        let n = sorted_keys.len() as f64;
        let xs: Vec<f64> = sorted_keys.iter().map(|&k| (k - min_key) as f64).collect();
        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = sorted_positions.iter().map(|&p| p as f64).sum::<f64>() / n;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (x, &p) in xs.iter().zip(sorted_positions) {
            let dx = x - mean_x;
            sxx += dx * dx;
            sxy += dx * (p as f64 - mean_y);
        }
        let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
        let intercept = mean_y - slope * mean_x;

        let mut model = Self {
            slope,
            intercept,
            min_key,
            max_key,
            max_error: 0,
            len,
        };

        let mut max_error = 0u64;
        for (&key, &pos) in sorted_keys.iter().zip(sorted_positions) {
            let predicted = model.predict(key) as u64;
            max_error = max_error.max(predicted.abs_diff(pos as u64));
        }
        model.max_error = u32::try_from(max_error).unwrap_or(u32::MAX);
        Ok(model)
    }

    /// `clamp(round(slope * (key - min_key) + intercept), 0, len - 1)`
    pub fn predict(&self, key: SpatialKey) -> usize {
        if self.len == 0 {
            return 0;
        }
        let x = if key >= self.min_key {
            (key - self.min_key) as f64
        } else {
            -((self.min_key - key) as f64)
        };
        let raw = (self.slope * x + self.intercept).round();
        let last = (self.len - 1) as f64;
        // `as` saturates and maps NaN to zero.
        raw.clamp(0.0, last) as usize
    }

    /// Positions that must contain `key` if it was fitted, clamped to `data_len`.
    pub fn search_window(&self, key: SpatialKey, data_len: usize) -> Range<usize> {
        let center = self.predict(key);
        let lo = center.saturating_sub(self.max_error as usize);
        let hi = center
            .saturating_add(self.max_error as usize)
            .saturating_add(1)
            .min(data_len)
            .min(self.len as usize);
        lo.min(hi)..hi
    }

    /// Error-bounded search for the first item with exactly `key`.
    ///
    /// Returns `None` when `key` lies outside `[min_key, max_key]` or is not in
    /// the window.
    pub fn lookup<'a, R: Keyed>(&self, key: SpatialKey, data: &'a [R]) -> Option<&'a R> {
        self.lookup_position(key, data).map(|pos| &data[pos])
    }

    /// Like [`lookup`](Self::lookup) but returns the position.
    pub fn lookup_position<R: Keyed>(&self, key: SpatialKey, data: &[R]) -> Option<usize> {
        if self.len == 0 || key < self.min_key || key > self.max_key {
            return None;
        }
        let window = self.search_window(key, data.len());
        let offset = data[window.clone()].partition_point(|r| r.spatial_key() < key);
        let pos = window.start + offset;
        match data.get(pos) {
            Some(r) if r.spatial_key() == key && pos < window.end => Some(pos),
            _ => None,
        }
    }

    /// First position whose key is `>= key`, for keys that may be absent.
    ///
    /// The error bound only covers fitted keys, so the window answer is
    /// verified against its neighbours and falls back to a full binary search.
    pub fn lower_bound<R: Keyed>(&self, key: SpatialKey, data: &[R]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let window = self.search_window(key, data.len());
        let pos = window.start + data[window.clone()].partition_point(|r| r.spatial_key() < key);
        let left_ok = pos == 0 || data[pos - 1].spatial_key() < key;
        let right_ok = pos == data.len() || data[pos].spatial_key() >= key;
        if left_ok && right_ok {
            pos
        } else {
            data.partition_point(|r| r.spatial_key() < key)
        }
    }

    /// Line slope
    pub fn slope(&self) -> f64 {
        self.slope
    }

    /// Line intercept
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Smallest fitted key
    pub fn min_key(&self) -> SpatialKey {
        self.min_key
    }

    /// Largest fitted key
    pub fn max_key(&self) -> SpatialKey {
        self.max_key
    }

    /// Exact maximum absolute residual over the fitted keys
    pub fn max_error(&self) -> u32 {
        self.max_error
    }

    /// Number of fitted positions
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// True when fitted over no keys
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Serializes the model to its fixed block layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::ENCODED_LEN);
        w.f64(self.slope)
            .f64(self.intercept)
            .u128(self.min_key)
            .u128(self.max_key)
            .u32(self.max_error)
            .u32(self.len);
        w.into_inner()
    }

    /// Parses a block written by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(data: &[u8]) -> IndexResult<Self> {
        let mut r = ByteReader::new(data);
        let parsed = (|| {
            Some(Self {
                slope: r.f64()?,
                intercept: r.f64()?,
                min_key: r.u128()?,
                max_key: r.u128()?,
                max_error: r.u32()?,
                len: r.u32()?,
            })
        })();
        let model = parsed.ok_or_else(|| {
            IndexError::block_corrupt(format!(
                "learned index block needs {} bytes, got {}",
                Self::ENCODED_LEN,
                data.len()
            ))
        })?;
        if !model.slope.is_finite() || !model.intercept.is_finite() || model.min_key > model.max_key {
            return Err(IndexError::block_corrupt("learned index parameters are invalid"));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfectly_linear_keys_have_zero_error() {
        let keys: Vec<u128> = (0..100).map(|i| i * 10).collect();
        let model = LearnedIndex::fit_keys(&keys).unwrap();
        assert_eq!(model.max_error(), 0);
        assert_eq!(model.predict(500), 50);
        assert_eq!(model.lookup(500, &keys), Some(&500));
    }

    #[test]
    fn test_skewed_keys_always_found() {
        let mut keys: Vec<u128> = (0..50).map(|i| i * i * i).collect();
        keys.extend((0..50).map(|i| 1_000_000 + i));
        keys.sort();
        let model = LearnedIndex::fit_keys(&keys).unwrap();
        for (pos, &k) in keys.iter().enumerate() {
            let predicted = model.predict(k);
            assert!(predicted.abs_diff(pos) <= model.max_error() as usize);
            assert_eq!(model.lookup_position(k, &keys), Some(pos));
        }
    }

    #[test]
    fn test_duplicate_keys_find_first() {
        let keys: Vec<u128> = vec![1, 5, 5, 5, 9];
        let model = LearnedIndex::fit_keys(&keys).unwrap();
        assert_eq!(model.lookup_position(5, &keys), Some(1));
    }

    #[test]
    fn test_absent_and_outside_keys_miss() {
        let keys: Vec<u128> = vec![10, 50, 90, 130];
        let model = LearnedIndex::fit_keys(&keys).unwrap();
        assert_eq!(model.lookup(70, &keys), None);
        assert_eq!(model.lookup(5, &keys), None);
        assert_eq!(model.lookup(131, &keys), None);
    }

    #[test]
    fn test_empty_and_single() {
        let empty: Vec<u128> = vec![];
        let model = LearnedIndex::fit_keys(&empty).unwrap();
        assert!(model.is_empty());
        assert_eq!(model.lookup(0, &empty), None);

        let one = vec![u128::MAX];
        let model = LearnedIndex::fit_keys(&one).unwrap();
        assert_eq!(model.lookup(u128::MAX, &one), Some(&u128::MAX));
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        assert!(LearnedIndex::fit(&[3, 1], &[0, 1]).is_err());
        assert!(LearnedIndex::fit(&[1, 3], &[0]).is_err());
        assert!(LearnedIndex::fit(&[1, 3], &[1, 0]).is_err());
    }

    #[test]
    fn test_lower_bound_for_absent_keys() {
        let keys: Vec<u128> = vec![2, 4, 8, 16, 32, 64, 128];
        let model = LearnedIndex::fit_keys(&keys).unwrap();
        assert_eq!(model.lower_bound(0, &keys), 0);
        assert_eq!(model.lower_bound(9, &keys), 3);
        assert_eq!(model.lower_bound(64, &keys), 5);
        assert_eq!(model.lower_bound(500, &keys), 7);
    }

    #[test]
    fn test_wide_keys_stay_correct() {
        let base = u128::MAX - 1_000_000;
        let keys: Vec<u128> = (0..200u128).map(|i| base + i * i * 17).collect();
        let model = LearnedIndex::fit_keys(&keys).unwrap();
        for (pos, &k) in keys.iter().enumerate() {
            assert_eq!(model.lookup_position(k, &keys), Some(pos));
        }
    }

    #[test]
    fn test_block_round_trip_and_truncation() {
        let keys: Vec<u128> = vec![3, 9, 27, 81];
        let model = LearnedIndex::fit_keys(&keys).unwrap();
        let bytes = model.to_bytes();
        assert_eq!(bytes.len(), LearnedIndex::ENCODED_LEN);
        assert_eq!(LearnedIndex::from_bytes(&bytes).unwrap(), model);
        assert!(LearnedIndex::from_bytes(&bytes[..20]).is_err());
    }
}
