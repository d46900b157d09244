//! Node capacity accounting
//!
//! A partition image must fit one node:
//!
//! ```text
//! record_count * record_size + index_overhead(record_count) <= node_capacity
//! ```
//!
//! `index_overhead` covers the metadata block, the learned index block, the
//! worst-case secondary blocks and the checksum trailer. It grows with the
//! record count because the categorical bitmap keeps one bit per record.

use serde::{Deserialize, Serialize};

use super::errors::{PartitionError, PartitionResult};
use super::image::{block_footprint, METADATA_LEN, TRAILER_LEN};
use super::schema::RecordSchema;
use crate::index::{LearnedIndex, ZoneMap, MAX_CATEGORIES};

/// Default per-node budget (48 KiB)
pub const DEFAULT_NODE_CAPACITY: usize = 48 * 1024;

/// Fewest records a partition must be able to hold; a schema whose records
/// are wider than `node_capacity / MIN_RECORDS_PER_PARTITION` is rejected.
pub const MIN_RECORDS_PER_PARTITION: usize = 8;

/// Validated sizing of partitions for one schema and node budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPlan {
    /// Bytes available on each node
    pub node_capacity: usize,
    /// Fixed width of one record
    pub record_size: usize,
    /// Most records one partition may hold
    pub max_records: usize,
    /// Bytes of non-record overhead at `max_records`
    pub overhead: usize,
    fields: usize,
    categorical: bool,
}

impl CapacityPlan {
    /// Derives the plan, rejecting schemas that cannot meet the minimum
    /// record count on one node.
    pub fn for_schema(schema: &RecordSchema, node_capacity: usize) -> PartitionResult<Self> {
        schema.validate()?;
        if node_capacity > u32::MAX as usize {
            return Err(PartitionError::schema_invalid(format!(
                "node capacity {} does not fit a 32-bit image length",
                node_capacity
            )));
        }
        let record_size = schema.record_size();
        if record_size > node_capacity / MIN_RECORDS_PER_PARTITION {
            return Err(PartitionError::schema_invalid(format!(
                "record size {} exceeds node capacity {} / {} minimum records",
                record_size, node_capacity, MIN_RECORDS_PER_PARTITION
            )));
        }

        let mut plan = Self {
            node_capacity,
            record_size,
            max_records: 0,
            overhead: 0,
            fields: schema.fields.len(),
            categorical: schema.categorical_field.is_some(),
        };
        let base = plan.index_overhead(0);
        let mut n = node_capacity.saturating_sub(base) / record_size;
        while n > 0 && !plan.fits(n) {
            n -= 1;
        }
        if n < MIN_RECORDS_PER_PARTITION {
            return Err(PartitionError::schema_invalid(format!(
                "only {} records of {} bytes fit after {} bytes of index overhead",
                n,
                record_size,
                plan.index_overhead(n)
            )));
        }
        plan.max_records = n;
        plan.overhead = plan.index_overhead(n);
        Ok(plan)
    }

    /// Worst-case non-record bytes of an image holding `record_count` records
    pub fn index_overhead(&self, record_count: usize) -> usize {
        let mut total = METADATA_LEN + block_footprint(LearnedIndex::ENCODED_LEN);
        if self.categorical {
            let words = record_count.div_ceil(64);
            total += block_footprint(1 + 4 + 2 + MAX_CATEGORIES * (4 + words * 8));
        }
        total += self.fields * block_footprint(ZoneMap::ENCODED_LEN);
        total + TRAILER_LEN
    }

    /// Whether `record_count` records fit one node
    pub fn fits(&self, record_count: usize) -> bool {
        record_count
            .checked_mul(self.record_size)
            .and_then(|bytes| bytes.checked_add(self.index_overhead(record_count)))
            .is_some_and(|total| total <= self.node_capacity)
    }

    /// Bytes an image with `record_count` records occupies before padding
    pub fn used_bytes(&self, record_count: usize) -> usize {
        record_count * self.record_size + self.index_overhead(record_count)
    }

    /// Serializable summary
    pub fn report(&self) -> CapacityReport {
        CapacityReport {
            node_capacity: self.node_capacity,
            record_size: self.record_size,
            max_records: self.max_records,
            index_overhead: self.overhead,
            min_records: MIN_RECORDS_PER_PARTITION,
            headroom: self.node_capacity - self.used_bytes(self.max_records),
        }
    }
}

/// Capacity summary printed by `tessdb check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityReport {
    /// Bytes per node
    pub node_capacity: usize,
    /// Bytes per record
    pub record_size: usize,
    /// Records per full partition
    pub max_records: usize,
    /// Index bytes at full occupancy
    pub index_overhead: usize,
    /// Required minimum records per partition
    pub min_records: usize,
    /// Unused bytes at full occupancy
    pub headroom: usize,
}
