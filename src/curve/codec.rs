//! Morton (Z-order) codec
//!
//! Bits are interleaved most-significant level first and, within a level,
//! dimension 0 first:
//!
//! ```text
//! key = d0[b-1] d1[b-1] .. dN[b-1]  d0[b-2] d1[b-2] ..  ..  d0[0] .. dN[0]
//! ```
//!
//! so a key prefix of length `j` fixes the top `j / D` bits of every axis plus
//! one more bit on the first `j % D` axes. That prefix structure is what
//! `region_to_ranges` walks.

use serde::{Deserialize, Serialize};

use super::errors::{CurveError, CurveResult};
use super::key::{
    max_key, CoordinateVector, KeySpan, SpatialKey, MAX_BITS_PER_DIM, MAX_KEY_BITS,
};

/// Encoder/decoder for one curve geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveCodec {
    dims: u32,
    bits_per_dim: u32,
}

impl CurveCodec {
    /// Creates a codec for `dims` axes of `bits_per_dim` bits each.
    ///
    /// # Errors
    ///
    /// `TESS_INVALID_CURVE` if either parameter is zero, an axis is wider
    /// than 32 bits, or the key would exceed 128 bits.
    pub fn new(dims: u32, bits_per_dim: u32) -> CurveResult<Self> {
        if dims == 0 {
            return Err(CurveError::invalid_curve("Curve needs at least one dimension"));
        }
        if bits_per_dim == 0 || bits_per_dim > MAX_BITS_PER_DIM {
            return Err(CurveError::invalid_curve(format!(
                "bits_per_dim must be in 1..={}, got {}",
                MAX_BITS_PER_DIM, bits_per_dim
            )));
        }
        let key_bits = dims.checked_mul(bits_per_dim).unwrap_or(u32::MAX);
        if key_bits > MAX_KEY_BITS {
            return Err(CurveError::invalid_curve(format!(
                "{} dims x {} bits = {} bits exceeds the {}-bit key",
                dims, bits_per_dim, key_bits, MAX_KEY_BITS
            )));
        }
        Ok(Self { dims, bits_per_dim })
    }

    /// Number of axes
    pub fn dims(&self) -> usize {
        self.dims as usize
    }

    /// Bits per axis
    pub fn bits_per_dim(&self) -> u32 {
        self.bits_per_dim
    }

    /// Total key width in bits
    pub fn key_bits(&self) -> u32 {
        self.dims * self.bits_per_dim
    }

    /// Largest legal coordinate on any axis
    pub fn max_coordinate(&self) -> u32 {
        ((1u64 << self.bits_per_dim) - 1) as u32
    }

    /// Largest key this curve can produce
    pub fn max_key(&self) -> SpatialKey {
        max_key(self.key_bits())
    }

    /// Span covering every key of this curve
    pub fn key_space(&self) -> KeySpan {
        KeySpan::full(self.key_bits())
    }

    /// Validates a coordinate vector against the curve geometry.
    pub fn check(&self, coords: &CoordinateVector) -> CurveResult<()> {
        if coords.dims() != self.dims() {
            return Err(CurveError::dimension_mismatch(self.dims(), coords.dims()));
        }
        let max = self.max_coordinate();
        for (dim, &value) in coords.as_slice().iter().enumerate() {
            if value > max {
                return Err(CurveError::out_of_range(dim, value, max));
            }
        }
        Ok(())
    }

    /// Interleaves the bits of `coords` into a single key.
    pub fn encode(&self, coords: &CoordinateVector) -> CurveResult<SpatialKey> {
        self.check(coords)?;
        let values = coords.as_slice();
        let mut key: SpatialKey = 0;
        for level in (0..self.bits_per_dim).rev() {
            for &value in values {
                key = (key << 1) | u128::from((value >> level) & 1);
            }
        }
        Ok(key)
    }

    /// Exact inverse of [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// `TESS_ENCODING_OUT_OF_RANGE` if `key` has bits above the key width.
    pub fn decode(&self, key: SpatialKey) -> CurveResult<CoordinateVector> {
        if key > self.max_key() {
            return Err(CurveError::key_out_of_range(key, self.key_bits()));
        }
        Ok(self.decode_unchecked(key))
    }

    pub(crate) fn decode_unchecked(&self, key: SpatialKey) -> CoordinateVector {
        let dims = self.dims();
        let total = self.key_bits();
        let mut values = vec![0u32; dims];
        for j in 0..total {
            let bit = ((key >> (total - 1 - j)) & 1) as u32;
            let dim = j as usize % dims;
            values[dim] = (values[dim] << 1) | bit;
        }
        CoordinateVector::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CurveErrorCode;

    #[test]
    fn test_two_dim_interleave() {
        let codec = CurveCodec::new(2, 2).unwrap();
        // x = 0b10, y = 0b01 -> x1 y1 x0 y0 = 1 0 0 1
        let key = codec.encode(&CoordinateVector::new(vec![2, 1])).unwrap();
        assert_eq!(key, 0b1001);
        assert_eq!(codec.decode(key).unwrap().as_slice(), &[2, 1]);
    }

    #[test]
    fn test_origin_and_corner() {
        let codec = CurveCodec::new(3, 5).unwrap();
        assert_eq!(codec.encode(&CoordinateVector::new(vec![0, 0, 0])).unwrap(), 0);
        let corner = codec
            .encode(&CoordinateVector::new(vec![31, 31, 31]))
            .unwrap();
        assert_eq!(corner, codec.max_key());
        assert_eq!(corner, (1u128 << 15) - 1);
    }

    #[test]
    fn test_full_width_key() {
        let codec = CurveCodec::new(4, 32).unwrap();
        let v = CoordinateVector::new(vec![u32::MAX, 0, 12345, u32::MAX - 7]);
        let key = codec.encode(&v).unwrap();
        assert_eq!(codec.decode(key).unwrap(), v);
        let max = CoordinateVector::new(vec![u32::MAX; 4]);
        assert_eq!(codec.encode(&max).unwrap(), u128::MAX);
    }

    #[test]
    fn test_coordinate_out_of_range() {
        let codec = CurveCodec::new(3, 5).unwrap();
        let err = codec
            .encode(&CoordinateVector::new(vec![1, 32, 0]))
            .unwrap_err();
        assert_eq!(err.code(), CurveErrorCode::EncodingOutOfRange);
    }

    #[test]
    fn test_dimension_mismatch() {
        let codec = CurveCodec::new(3, 5).unwrap();
        let err = codec.encode(&CoordinateVector::new(vec![1, 2])).unwrap_err();
        assert_eq!(err.code(), CurveErrorCode::DimensionMismatch);
    }

    #[test]
    fn test_decode_rejects_wide_key() {
        let codec = CurveCodec::new(2, 4).unwrap();
        assert!(codec.decode(0xff).is_ok());
        assert!(codec.decode(0x100).is_err());
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(CurveCodec::new(0, 5).is_err());
        assert!(CurveCodec::new(3, 0).is_err());
        assert!(CurveCodec::new(2, 33).is_err());
        assert!(CurveCodec::new(5, 32).is_err());
        assert!(CurveCodec::new(128, 1).is_ok());
    }

    #[test]
    fn test_order_preserves_locality_within_cell() {
        // All points of the 2x2 cell at the origin precede anything outside it.
        let codec = CurveCodec::new(2, 3).unwrap();
        let inside: Vec<u128> = [[0, 0], [1, 0], [0, 1], [1, 1]]
            .iter()
            .map(|c| codec.encode(&CoordinateVector::new(c.to_vec())).unwrap())
            .collect();
        let outside = codec.encode(&CoordinateVector::new(vec![2, 0])).unwrap();
        assert!(inside.iter().all(|&k| k < outside));
    }
}
