//! Fixed-width record layout
//!
//! ```text
//! +------------------+
//! | Spatial key      | (u128 LE)
//! +------------------+
//! | Local id         | (u32 LE)
//! +------------------+
//! | Edge count       | (u8)
//! +------------------+
//! | Scalar fields    | (u32 LE x fields)
//! +------------------+
//! | Embedding        | (i8 x embedding_dim)
//! +------------------+
//! | Edge slots       | ((u32, u32) LE x max_edges, unused slots zeroed)
//! +------------------+
//! | Padding          | (to 8-byte alignment)
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};

use super::errors::{PartitionError, PartitionResult};
use super::schema::RecordSchema;
use crate::bytes::{ByteReader, ByteWriter};
use crate::curve::SpatialKey;
use crate::index::Keyed;

/// Identifier of a partition (tile)
pub type PartitionId = u32;

/// Record identifier, unique within the store that assigned it
pub type LocalId = u32;

/// Full identifier of a record: owning partition plus local id.
///
/// Also used for graph edges, where `partition` is the partition the target
/// lived in when the edge was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    /// Owning partition
    pub partition: PartitionId,
    /// Identifier within the partition
    pub local_id: LocalId,
}

impl RecordRef {
    /// Creates a reference
    pub fn new(partition: PartitionId, local_id: LocalId) -> Self {
        Self {
            partition,
            local_id,
        }
    }
}

/// One indexed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Curve position; immutable once assigned
    pub key: SpatialKey,
    /// Local identifier
    pub id: LocalId,
    /// Scalar field values, typed by the schema
    pub fields: Vec<i64>,
    /// Quantized embedding
    pub embedding: Vec<i8>,
    /// Graph edges
    pub edges: Vec<RecordRef>,
}

impl Record {
    /// Creates a record
    pub fn new(
        key: SpatialKey,
        id: LocalId,
        fields: Vec<i64>,
        embedding: Vec<i8>,
        edges: Vec<RecordRef>,
    ) -> Self {
        Self {
            key,
            id,
            fields,
            embedding,
            edges,
        }
    }

    /// Value of field `index`
    pub fn field(&self, index: u8) -> Option<i64> {
        self.fields.get(index as usize).copied()
    }

    /// Sort order inside a partition: key, then id
    pub fn sort_key(&self) -> (SpatialKey, LocalId) {
        (self.key, self.id)
    }

    /// Checks the record against the schema.
    pub fn validate(&self, schema: &RecordSchema) -> PartitionResult<()> {
        if self.fields.len() != schema.fields.len() {
            return Err(PartitionError::record_invalid(format!(
                "record {} has {} fields, schema declares {}",
                self.id,
                self.fields.len(),
                schema.fields.len()
            )));
        }
        for (index, (value, ty)) in self.fields.iter().zip(&schema.fields).enumerate() {
            if !ty.accepts(*value) {
                return Err(PartitionError::record_invalid(format!(
                    "record {} field {} value {} does not fit {:?}",
                    self.id, index, value, ty
                )));
            }
        }
        if self.embedding.len() != schema.embedding_dim {
            return Err(PartitionError::record_invalid(format!(
                "record {} embedding has {} dims, schema declares {}",
                self.id,
                self.embedding.len(),
                schema.embedding_dim
            )));
        }
        if self.edges.len() > schema.max_edges {
            return Err(PartitionError::record_invalid(format!(
                "record {} has {} edges, schema allows {}",
                self.id,
                self.edges.len(),
                schema.max_edges
            )));
        }
        Ok(())
    }

    /// Serializes to exactly `schema.record_size()` bytes.
    ///
    /// The record must already have passed [`validate`](Self::validate).
    pub fn encode(&self, schema: &RecordSchema) -> Vec<u8> {
        let size = schema.record_size();
        let mut w = ByteWriter::with_capacity(size);
        w.u128(self.key).u32(self.id).u8(self.edges.len() as u8);
        for (value, ty) in self.fields.iter().zip(&schema.fields) {
            w.u32(ty.to_word(*value));
        }
        for &v in &self.embedding {
            w.u8(v as u8);
        }
        for slot in 0..schema.max_edges {
            let edge = self.edges.get(slot).copied().unwrap_or(RecordRef::new(0, 0));
            w.u32(edge.partition).u32(edge.local_id);
        }
        let mut buf = w.into_inner();
        buf.resize(size, 0);
        buf
    }

    /// Parses one record slot.
    pub fn decode(data: &[u8], schema: &RecordSchema) -> PartitionResult<Self> {
        let mut r = ByteReader::new(data);
        let truncated = || PartitionError::image_corrupt("record slot truncated");
        let key = r.u128().ok_or_else(truncated)?;
        let id = r.u32().ok_or_else(truncated)?;
        let edge_count = r.u8().ok_or_else(truncated)? as usize;
        if edge_count > schema.max_edges {
            return Err(PartitionError::image_corrupt(format!(
                "record {} claims {} edges",
                id, edge_count
            )));
        }
        let mut fields = Vec::with_capacity(schema.fields.len());
        for ty in &schema.fields {
            fields.push(ty.from_word(r.u32().ok_or_else(truncated)?));
        }
        let embedding = r
            .bytes(schema.embedding_dim)
            .ok_or_else(truncated)?
            .iter()
            .map(|&b| b as i8)
            .collect();
        let mut edges = Vec::with_capacity(edge_count);
        for slot in 0..schema.max_edges {
            let partition = r.u32().ok_or_else(truncated)?;
            let local_id = r.u32().ok_or_else(truncated)?;
            if slot < edge_count {
                edges.push(RecordRef::new(partition, local_id));
            }
        }
        Ok(Self {
            key,
            id,
            fields,
            embedding,
            edges,
        })
    }

    /// Squared Euclidean distance between the embedding and `query`.
    ///
    /// Dimensions missing on either side count as zero.
    pub fn squared_distance(&self, query: &[i8]) -> u32 {
        let dims = self.embedding.len().max(query.len());
        (0..dims)
            .map(|i| {
                let a = i32::from(self.embedding.get(i).copied().unwrap_or(0));
                let b = i32::from(query.get(i).copied().unwrap_or(0));
                ((a - b) * (a - b)) as u32
            })
            .sum()
    }
}

impl Keyed for Record {
    fn spatial_key(&self) -> SpatialKey {
        self.key
    }
}

/// Quantizes a unit-range float embedding to signed bytes (`x * 127`, clamped).
pub fn quantize_embedding(values: &[f32]) -> Vec<i8> {
    values
        .iter()
        .map(|&v| {
            let v = if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
            (v * 127.0).round() as i8
        })
        .collect()
}
