//! Partition (tile): a fixed-capacity, key-sorted record arena
//!
//! The arena is allocated once at `max_records` and never grows; a full
//! partition is split by its store instead. Every mutation that changes the
//! sorted order refits the learned index and rebuilds the secondary blocks
//! before returning, so queries never observe a stale index.

use super::errors::{PartitionError, PartitionResult};
use super::record::{LocalId, PartitionId, Record};
use super::schema::{FieldType, RecordSchema};
use crate::curve::{KeySpan, SpatialKey};
use crate::index::{CategoricalBitmap, LearnedIndex, ZoneMap};

/// One tile of the key space.
#[derive(Debug, Clone)]
pub struct Partition {
    id: PartitionId,
    span: KeySpan,
    max_records: usize,
    records: Vec<Record>,
    index: LearnedIndex,
    bitmap: Option<CategoricalBitmap>,
    zones: Vec<ZoneMap>,
}

impl Partition {
    /// Creates an empty partition owning `span`.
    pub fn new(id: PartitionId, span: KeySpan, max_records: usize) -> Self {
        Self {
            id,
            span,
            max_records,
            records: Vec::with_capacity(max_records),
            index: LearnedIndex::empty(),
            bitmap: None,
            zones: Vec::new(),
        }
    }

    /// Rebuilds a partition from already sorted records (image import).
    pub(crate) fn from_parts(
        id: PartitionId,
        span: KeySpan,
        max_records: usize,
        records: Vec<Record>,
        index: LearnedIndex,
        bitmap: Option<CategoricalBitmap>,
        zones: Vec<ZoneMap>,
    ) -> Self {
        Self {
            id,
            span,
            max_records,
            records,
            index,
            bitmap,
            zones,
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Owned key range (inclusive)
    pub fn span(&self) -> KeySpan {
        self.span
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Arena size fixed at creation
    pub fn capacity(&self) -> usize {
        self.max_records
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.max_records
    }

    /// Records in ascending `(key, id)` order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn index(&self) -> &LearnedIndex {
        &self.index
    }

    pub fn bitmap(&self) -> Option<&CategoricalBitmap> {
        self.bitmap.as_ref()
    }

    pub fn zones(&self) -> &[ZoneMap] {
        &self.zones
    }

    /// Zone map of `field`, if the partition is non-empty
    pub fn zone(&self, field: u8) -> Option<&ZoneMap> {
        self.zones.iter().find(|z| z.field() == field)
    }

    /// First record with exactly `key`, via the learned index
    pub fn lookup(&self, key: SpatialKey) -> Option<&Record> {
        self.index.lookup(key, &self.records)
    }

    /// Position of the record `(key, id)`
    pub fn position_of(&self, key: SpatialKey, id: LocalId) -> Option<usize> {
        let start = self.index.lower_bound(key, &self.records);
        self.records[start..]
            .iter()
            .take_while(|r| r.key == key)
            .position(|r| r.id == id)
            .map(|offset| start + offset)
    }

    /// Record with local id `id`, wherever it sits
    pub fn find_by_id(&self, id: LocalId) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Records whose key falls in `span`
    pub fn records_in(&self, span: &KeySpan) -> &[Record] {
        let start = self.index.lower_bound(span.first, &self.records);
        let len = self.records[start..].partition_point(|r| r.key <= span.last);
        &self.records[start..start + len]
    }

    /// Inserts `record` at its sorted slot and refits.
    ///
    /// # Errors
    ///
    /// - `TESS_KEY_OUT_OF_RANGE` if the key is outside this partition's span
    /// - `TESS_CAPACITY_EXCEEDED` if the arena is full
    /// - `TESS_RECORD_INVALID` if the record does not match the schema or
    ///   duplicates an existing `(key, id)`
    pub fn insert(&mut self, record: Record, schema: &RecordSchema) -> PartitionResult<usize> {
        if !self.span.contains(record.key) {
            return Err(PartitionError::key_out_of_range(
                record.key,
                self.span.first,
                self.span.last,
            ));
        }
        record.validate(schema)?;
        if self.is_full() {
            return Err(PartitionError::capacity_exceeded(format!(
                "partition {} holds {} of {} records",
                self.id,
                self.records.len(),
                self.max_records
            )));
        }
        let start = self.index.lower_bound(record.key, &self.records);
        let offset = self.records[start..]
            .iter()
            .take_while(|r| r.key == record.key && r.id <= record.id)
            .count();
        let pos = start + offset;
        if pos > start && self.records[pos - 1].sort_key() == record.sort_key() {
            return Err(PartitionError::record_invalid(format!(
                "record {} already present at key {}",
                record.id, record.key
            )));
        }
        self.records.insert(pos, record);
        self.refit(schema)?;
        Ok(pos)
    }

    /// Removes the record `(key, id)` and refits.
    pub fn delete(
        &mut self,
        key: SpatialKey,
        id: LocalId,
        schema: &RecordSchema,
    ) -> PartitionResult<Option<Record>> {
        let Some(pos) = self.position_of(key, id) else {
            return Ok(None);
        };
        let removed = self.records.remove(pos);
        self.refit(schema)?;
        Ok(Some(removed))
    }

    /// Replaces the record at the same `(key, id)` slot.
    ///
    /// Returns the previous record, or `None` if no such slot exists (in
    /// which case nothing changes).
    pub fn replace(&mut self, record: Record, schema: &RecordSchema) -> PartitionResult<Option<Record>> {
        record.validate(schema)?;
        let Some(pos) = self.position_of(record.key, record.id) else {
            return Ok(None);
        };
        let previous = std::mem::replace(&mut self.records[pos], record);
        // Order is unchanged; only field-derived blocks need rebuilding.
        self.rebuild_secondary(schema);
        Ok(Some(previous))
    }

    /// Splits at the median into `self` (left) and a new right partition.
    ///
    /// The cut is moved off the median so that records sharing a key stay in
    /// one partition; spans remain disjoint and keys never straddle them.
    /// Returns the right half and the first key of its span.
    ///
    /// # Errors
    ///
    /// `TESS_CAPACITY_EXCEEDED` if every record shares one key and no cut
    /// exists.
    pub fn split(
        &mut self,
        right_id: PartitionId,
        schema: &RecordSchema,
    ) -> PartitionResult<(Partition, SpatialKey)> {
        let cut = self.split_point().ok_or_else(|| {
            PartitionError::capacity_exceeded(format!(
                "partition {} cannot split: all {} records share one key",
                self.id,
                self.records.len()
            ))
        })?;
        let boundary = self.records[cut].key;
        let right_span = KeySpan::new(boundary, self.span.last);
        let mut right = Partition::new(right_id, right_span, self.max_records);
        right.records.extend(self.records.drain(cut..));
        self.span = KeySpan::new(self.span.first, boundary - 1);
        self.refit(schema)?;
        right.refit(schema)?;
        Ok((right, boundary))
    }

    fn split_point(&self) -> Option<usize> {
        let len = self.records.len();
        if len < 2 {
            return None;
        }
        let median = self.records[len / 2].key;
        let first_of_median = self.records.partition_point(|r| r.key < median);
        if first_of_median > 0 {
            return Some(first_of_median);
        }
        let after_median = self.records.partition_point(|r| r.key <= median);
        (after_median < len).then_some(after_median)
    }

    /// Absorbs an adjacent partition whose span directly follows this one.
    ///
    /// # Errors
    ///
    /// `TESS_MERGE_REJECTED` if the spans do not abut in that order or the
    /// union would not fit the arena.
    pub fn merge(&mut self, right: Partition, schema: &RecordSchema) -> PartitionResult<()> {
        if !self.span.abuts(&right.span) {
            return Err(PartitionError::merge_rejected(format!(
                "partition {} [{}, {}] does not directly precede partition {} [{}, {}]",
                self.id,
                self.span.first,
                self.span.last,
                right.id,
                right.span.first,
                right.span.last
            )));
        }
        let total = self.records.len() + right.records.len();
        if total > self.max_records {
            return Err(PartitionError::merge_rejected(format!(
                "merged partition would hold {} records, capacity is {}",
                total, self.max_records
            )));
        }
        self.span = KeySpan::new(self.span.first, right.span.last);
        self.records.extend(right.records);
        self.refit(schema)
    }

    /// Refits the learned index and rebuilds secondary blocks.
    pub fn refit(&mut self, schema: &RecordSchema) -> PartitionResult<()> {
        let keys: Vec<SpatialKey> = self.records.iter().map(|r| r.key).collect();
        self.index = LearnedIndex::fit_keys(&keys)?;
        self.rebuild_secondary(schema);
        Ok(())
    }

    fn rebuild_secondary(&mut self, schema: &RecordSchema) {
        self.bitmap = schema.categorical_field.and_then(|field| {
            let ty = schema.field_type(field)?;
            let values = self
                .records
                .iter()
                .map(|r| ty.to_word(r.field(field).unwrap_or(0)));
            CategoricalBitmap::build(field, values)
        });
        self.zones = schema
            .fields
            .iter()
            .enumerate()
            .filter(|(_, ty)| **ty != FieldType::Category)
            .filter_map(|(i, _)| {
                let field = i as u8;
                ZoneMap::build(field, self.records.iter().filter_map(|r| r.field(field)))
            })
            .collect();
    }
}
