//! Secondary index blocks
//!
//! Both blocks are rebuilt together with the learned index whenever a
//! partition's sorted order changes, and serialized into the partition image
//! after the primary block.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::{IndexError, IndexResult};
use crate::bytes::{ByteReader, ByteWriter};

/// Most distinct values a categorical bitmap tracks before giving up
pub const MAX_CATEGORIES: usize = 16;

/// Block kind tags inside a partition image
pub const BLOCK_CATEGORICAL: u8 = 1;
/// Zone map block tag
pub const BLOCK_ZONE_MAP: u8 = 2;

/// Value -> set of record positions for one low-cardinality field.
///
/// The bitmap is complete: a value with no entry has no records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalBitmap {
    field: u8,
    len: u32,
    entries: BTreeMap<u32, Vec<u64>>,
}

impl CategoricalBitmap {
    /// Builds a bitmap from field values listed in record position order.
    ///
    /// Returns `None` when the field has more than [`MAX_CATEGORIES`]
    /// distinct values.
    pub fn build(field: u8, values: impl IntoIterator<Item = u32>) -> Option<Self> {
        let values: Vec<u32> = values.into_iter().collect();
        let words = values.len().div_ceil(64);
        let mut entries: BTreeMap<u32, Vec<u64>> = BTreeMap::new();
        for (pos, value) in values.iter().enumerate() {
            if !entries.contains_key(value) && entries.len() == MAX_CATEGORIES {
                return None;
            }
            let bits = entries.entry(*value).or_insert_with(|| vec![0u64; words]);
            bits[pos / 64] |= 1u64 << (pos % 64);
        }
        Some(Self {
            field,
            len: values.len() as u32,
            entries,
        })
    }

    /// Field index the bitmap covers
    pub fn field(&self) -> u8 {
        self.field
    }

    /// Number of distinct values
    pub fn cardinality(&self) -> usize {
        self.entries.len()
    }

    /// Positions holding `value`, ascending
    pub fn positions(&self, value: u32) -> Vec<usize> {
        let Some(bits) = self.entries.get(&value) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (w, &word) in bits.iter().enumerate() {
            let mut word = word;
            while word != 0 {
                let bit = word.trailing_zeros() as usize;
                out.push(w * 64 + bit);
                word &= word - 1;
            }
        }
        out
    }

    /// Number of records holding `value`
    pub fn count(&self, value: u32) -> u64 {
        self.entries
            .get(&value)
            .map(|bits| bits.iter().map(|w| u64::from(w.count_ones())).sum())
            .unwrap_or(0)
    }

    /// Serialized size in bytes
    pub fn encoded_len(&self) -> usize {
        let words = (self.len as usize).div_ceil(64);
        1 + 4 + 2 + self.entries.len() * (4 + words * 8)
    }

    /// Serializes the block body (without the kind tag)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(self.encoded_len());
        w.u8(self.field).u32(self.len).u16(self.entries.len() as u16);
        for (value, bits) in &self.entries {
            w.u32(*value);
            for word in bits {
                w.u64(*word);
            }
        }
        w.into_inner()
    }

    /// Parses a block body written by [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(data: &[u8]) -> IndexResult<Self> {
        let mut r = ByteReader::new(data);
        let corrupt = || IndexError::block_corrupt("categorical bitmap block truncated");
        let field = r.u8().ok_or_else(corrupt)?;
        let len = r.u32().ok_or_else(corrupt)?;
        let count = r.u16().ok_or_else(corrupt)? as usize;
        if count > MAX_CATEGORIES {
            return Err(IndexError::block_corrupt(format!(
                "categorical bitmap claims {} values",
                count
            )));
        }
        let words = (len as usize).div_ceil(64);
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let value = r.u32().ok_or_else(corrupt)?;
            let mut bits = Vec::with_capacity(words);
            for _ in 0..words {
                bits.push(r.u64().ok_or_else(corrupt)?);
            }
            entries.insert(value, bits);
        }
        Ok(Self {
            field,
            len,
            entries,
        })
    }
}

/// Inclusive value bounds of one numeric field across a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneMap {
    field: u8,
    min: i64,
    max: i64,
}

impl ZoneMap {
    /// Serialized size in bytes
    pub const ENCODED_LEN: usize = 1 + 8 + 8;

    /// Builds a zone map; `None` for an empty partition.
    pub fn build(field: u8, values: impl IntoIterator<Item = i64>) -> Option<Self> {
        let mut iter = values.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        Some(Self { field, min, max })
    }

    /// Field index the zone covers
    pub fn field(&self) -> u8 {
        self.field
    }

    /// Smallest value present
    pub fn min(&self) -> i64 {
        self.min
    }

    /// Largest value present
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Serializes the block body (without the kind tag)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::ENCODED_LEN);
        w.u8(self.field).i64(self.min).i64(self.max);
        w.into_inner()
    }

    /// Parses a block body written by [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(data: &[u8]) -> IndexResult<Self> {
        let mut r = ByteReader::new(data);
        let parsed = (|| Some((r.u8()?, r.i64()?, r.i64()?)))();
        match parsed {
            Some((field, min, max)) if min <= max => Ok(Self { field, min, max }),
            Some(_) => Err(IndexError::block_corrupt("zone map bounds inverted")),
            None => Err(IndexError::block_corrupt("zone map block truncated")),
        }
    }
}
