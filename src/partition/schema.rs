//! Record schema and fixed record width

use serde::{Deserialize, Serialize};

use super::errors::{PartitionError, PartitionResult};

/// Bytes per scalar field
pub const FIELD_WIDTH: usize = 4;
/// Bytes per edge reference (partition u32 + local id u32)
pub const EDGE_WIDTH: usize = 8;
/// Record alignment inside a partition image
pub const RECORD_ALIGN: usize = 8;
/// Key (16) + local id (4) + edge count (1)
pub const RECORD_HEADER_WIDTH: usize = 16 + 4 + 1;

/// Most scalar fields a schema may declare
pub const MAX_FIELDS: usize = 32;
/// Widest quantized embedding
pub const MAX_EMBEDDING_DIM: usize = 256;
/// Most edges per record (count is stored in one byte)
pub const MAX_EDGES: usize = 255;

/// Storage type of a scalar field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Unsigned 32-bit integer
    U32,
    /// Signed 32-bit integer
    I32,
    /// Unsigned category code; supports only equality predicates
    Category,
}

impl FieldType {
    /// Wire tag
    pub fn tag(&self) -> u8 {
        match self {
            FieldType::U32 => 1,
            FieldType::I32 => 2,
            FieldType::Category => 3,
        }
    }

    /// Parses a wire tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(FieldType::U32),
            2 => Some(FieldType::I32),
            3 => Some(FieldType::Category),
            _ => None,
        }
    }

    /// Whether `<`/`>` style comparisons are meaningful
    pub fn is_ordered(&self) -> bool {
        !matches!(self, FieldType::Category)
    }

    /// Whether `value` is representable in this type
    pub fn accepts(&self, value: i64) -> bool {
        match self {
            FieldType::U32 | FieldType::Category => (0..=i64::from(u32::MAX)).contains(&value),
            FieldType::I32 => (i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&value),
        }
    }

    /// Encodes a value known to be accepted
    pub(crate) fn to_word(&self, value: i64) -> u32 {
        match self {
            FieldType::I32 => (value as i32) as u32,
            _ => value as u32,
        }
    }

    /// Decodes a stored word
    pub(crate) fn from_word(&self, word: u32) -> i64 {
        match self {
            FieldType::I32 => i64::from(word as i32),
            _ => i64::from(word),
        }
    }
}

/// Shape of every record in a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Scalar field types, addressed by index
    pub fields: Vec<FieldType>,
    /// Quantized embedding width
    #[serde(default)]
    pub embedding_dim: usize,
    /// Edge slots per record
    #[serde(default)]
    pub max_edges: usize,
    /// Category field that gets a bitmap index
    #[serde(default)]
    pub categorical_field: Option<u8>,
}

impl RecordSchema {
    /// Creates a schema without a categorical bitmap
    pub fn new(fields: Vec<FieldType>, embedding_dim: usize, max_edges: usize) -> Self {
        Self {
            fields,
            embedding_dim,
            max_edges,
            categorical_field: None,
        }
    }

    /// Designates the bitmap-indexed field
    pub fn with_categorical_field(mut self, field: u8) -> Self {
        self.categorical_field = Some(field);
        self
    }

    /// Fixed serialized width of one record, padded to [`RECORD_ALIGN`]
    pub fn record_size(&self) -> usize {
        let raw = RECORD_HEADER_WIDTH
            + self.fields.len() * FIELD_WIDTH
            + self.embedding_dim
            + self.max_edges * EDGE_WIDTH;
        raw.div_ceil(RECORD_ALIGN) * RECORD_ALIGN
    }

    /// Type of field `index`
    pub fn field_type(&self, index: u8) -> Option<FieldType> {
        self.fields.get(index as usize).copied()
    }

    /// Checks structural limits (capacity is checked by `CapacityPlan`)
    pub fn validate(&self) -> PartitionResult<()> {
        if self.fields.len() > MAX_FIELDS {
            return Err(PartitionError::schema_invalid(format!(
                "{} fields exceeds the maximum of {}",
                self.fields.len(),
                MAX_FIELDS
            )));
        }
        if self.embedding_dim > MAX_EMBEDDING_DIM {
            return Err(PartitionError::schema_invalid(format!(
                "embedding_dim {} exceeds the maximum of {}",
                self.embedding_dim, MAX_EMBEDDING_DIM
            )));
        }
        if self.max_edges > MAX_EDGES {
            return Err(PartitionError::schema_invalid(format!(
                "max_edges {} exceeds the maximum of {}",
                self.max_edges, MAX_EDGES
            )));
        }
        if let Some(field) = self.categorical_field {
            match self.field_type(field) {
                Some(FieldType::Category) => {}
                Some(other) => {
                    return Err(PartitionError::schema_invalid(format!(
                        "categorical_field {} has type {:?}, expected category",
                        field, other
                    )))
                }
                None => {
                    return Err(PartitionError::schema_invalid(format!(
                        "categorical_field {} does not exist",
                        field
                    )))
                }
            }
        }
        Ok(())
    }
}
