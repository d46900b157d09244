//! PartitionStore: owns every partition and keeps them within capacity
//!
//! Inserts go to the partition whose span contains the key. A full partition
//! is split at its median into two fixed-capacity arenas before the insert
//! proceeds, and the caller receives a [`SplitSignal`] describing the new
//! boundary and the node chosen for the right half.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::assignment::{PartitionAssignment, Placement};
use super::capacity::CapacityPlan;
use super::errors::{PartitionError, PartitionResult};
use super::record::{LocalId, PartitionId, Record, RecordRef};
use super::schema::RecordSchema;
use super::tile::Partition;
use crate::curve::{KeySpan, SpatialKey};
use crate::mesh::NodeCoord;
use crate::observability::{log_event, Event};

/// Emitted when an insert split a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSignal {
    /// Partition that kept the left half
    pub parent: PartitionId,
    /// Left span after the split
    pub parent_span: KeySpan,
    /// Newly created right partition
    pub child: PartitionId,
    /// Right span
    pub child_span: KeySpan,
    /// First key of the right span
    pub boundary: SpatialKey,
    /// Node chosen for the right half
    pub node: NodeCoord,
}

/// Emitted when two neighbours were merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSignal {
    pub survivor: PartitionId,
    pub span: KeySpan,
    pub absorbed: PartitionId,
    /// Node that no longer hosts a partition
    pub released: NodeCoord,
}

/// Result of a successful insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Where the record now lives
    pub record: RecordRef,
    /// Present if the insert first split a partition
    pub split: Option<SplitSignal>,
}

/// Partition set of one deployment.
#[derive(Debug)]
pub struct PartitionStore {
    schema: RecordSchema,
    plan: CapacityPlan,
    key_space: KeySpan,
    partitions: BTreeMap<PartitionId, Partition>,
    assignment: PartitionAssignment,
    /// Partition -> partitions its records moved to (split children or
    /// merge survivor)
    lineage: BTreeMap<PartitionId, Vec<PartitionId>>,
    keys_by_id: HashMap<LocalId, SpatialKey>,
    next_partition: PartitionId,
    next_local_id: LocalId,
}

impl PartitionStore {
    /// Creates a store whose key space is divided evenly into
    /// `initial_partitions` empty partitions, placed on `nodes` in order.
    pub fn new(
        schema: RecordSchema,
        plan: CapacityPlan,
        key_space: KeySpan,
        nodes: impl IntoIterator<Item = NodeCoord>,
        initial_partitions: usize,
    ) -> PartitionResult<Self> {
        schema.validate()?;
        if initial_partitions == 0 {
            return Err(PartitionError::schema_invalid("at least one initial partition is required"));
        }
        let width = key_space.last - key_space.first;
        let count = initial_partitions as u128;
        if count > 1 && width < count - 1 {
            return Err(PartitionError::schema_invalid(format!(
                "key space of {} keys cannot be divided into {} partitions",
                width.saturating_add(1),
                initial_partitions
            )));
        }

        let mut store = Self {
            schema,
            plan,
            key_space,
            partitions: BTreeMap::new(),
            assignment: PartitionAssignment::new(nodes),
            lineage: BTreeMap::new(),
            keys_by_id: HashMap::new(),
            next_partition: 0,
            next_local_id: 0,
        };
        let step = width / count;
        let mut first = key_space.first;
        for i in 0..count {
            let last = if i + 1 == count {
                key_space.last
            } else {
                first + step.max(1) - 1
            };
            store.create_partition(KeySpan::new(first, last))?;
            first = last.wrapping_add(1);
        }
        Ok(store)
    }

    fn create_partition(&mut self, span: KeySpan) -> PartitionResult<PartitionId> {
        let pid = self.next_partition;
        self.assignment.place(pid, span)?;
        self.partitions
            .insert(pid, Partition::new(pid, span, self.plan.max_records));
        self.next_partition += 1;
        Ok(pid)
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn plan(&self) -> &CapacityPlan {
        &self.plan
    }

    pub fn key_space(&self) -> KeySpan {
        self.key_space
    }

    pub fn assignment(&self) -> &PartitionAssignment {
        &self.assignment
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(&id)
    }

    /// Live partitions in id order
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    /// Total records across all partitions
    pub fn record_count(&self) -> usize {
        self.keys_by_id.len()
    }

    /// Reserves a fresh local id
    pub fn allocate_id(&mut self) -> LocalId {
        let id = self.next_local_id;
        self.next_local_id = self.next_local_id.wrapping_add(1);
        id
    }

    /// Current location of a record id
    pub fn locate(&self, id: LocalId) -> Option<RecordRef> {
        let key = self.keys_by_id.get(&id)?;
        let placement = self.assignment.locate(*key)?;
        Some(RecordRef::new(placement.partition, id))
    }

    /// Placement of the partition owning `key`
    pub fn placement_for_key(&self, key: SpatialKey) -> Option<&Placement> {
        self.assignment.locate(key)
    }

    /// Inserts a record, splitting its partition first if it is full.
    ///
    /// # Errors
    ///
    /// - `TESS_RECORD_INVALID` for schema violations or a duplicate id
    /// - `TESS_KEY_OUT_OF_RANGE` for a key outside the store's key space
    /// - `TESS_CAPACITY_EXCEEDED` when a split is needed but no mesh node
    ///   is free, or the full partition holds a single key
    pub fn insert(&mut self, record: Record) -> PartitionResult<InsertOutcome> {
        record.validate(&self.schema)?;
        if self.keys_by_id.contains_key(&record.id) {
            return Err(PartitionError::record_invalid(format!(
                "local id {} already in use",
                record.id
            )));
        }
        let pid = self.owner_of(record.key)?;

        let mut split = None;
        let mut target = pid;
        if self.partitions.get(&pid).is_some_and(Partition::is_full) {
            let signal = self.split(pid)?;
            if signal.child_span.contains(record.key) {
                target = signal.child;
            }
            split = Some(signal);
        }

        let (key, id) = (record.key, record.id);
        let partition = self
            .partitions
            .get_mut(&target)
            .ok_or_else(|| PartitionError::not_found(target))?;
        partition.insert(record, &self.schema)?;
        self.keys_by_id.insert(id, key);
        if id >= self.next_local_id {
            self.next_local_id = id.wrapping_add(1);
        }
        Ok(InsertOutcome {
            record: RecordRef::new(target, id),
            split,
        })
    }

    fn owner_of(&self, key: SpatialKey) -> PartitionResult<PartitionId> {
        self.assignment
            .locate(key)
            .map(|p| p.partition)
            .ok_or_else(|| {
                PartitionError::key_out_of_range(key, self.key_space.first, self.key_space.last)
            })
    }

    fn split(&mut self, pid: PartitionId) -> PartitionResult<SplitSignal> {
        if !self.assignment.has_free_node() {
            return Err(PartitionError::capacity_exceeded(format!(
                "partition {} is full and no mesh node is free for a split",
                pid
            )));
        }
        let child = self.next_partition;
        let partition = self
            .partitions
            .get_mut(&pid)
            .ok_or_else(|| PartitionError::not_found(pid))?;
        let (right, boundary) = partition.split(child, &self.schema)?;
        let parent_span = partition.span();
        let child_span = right.span();

        self.assignment.resize(pid, parent_span)?;
        let placement = self.assignment.place(child, child_span)?;
        self.partitions.insert(child, right);
        self.lineage.entry(pid).or_default().push(child);
        self.next_partition += 1;

        Ok(SplitSignal {
            parent: pid,
            parent_span,
            child,
            child_span,
            boundary,
            node: placement.node,
        })
    }

    /// Deletes the record with local id `id`.
    ///
    /// Returns the partition it was removed from and the record, or `None`
    /// if the id is unknown.
    pub fn delete(&mut self, id: LocalId) -> PartitionResult<Option<(PartitionId, Record)>> {
        let Some(&key) = self.keys_by_id.get(&id) else {
            return Ok(None);
        };
        let pid = self.owner_of(key)?;
        let partition = self
            .partitions
            .get_mut(&pid)
            .ok_or_else(|| PartitionError::not_found(pid))?;
        let removed = partition.delete(key, id, &self.schema)?;
        self.keys_by_id.remove(&id);
        Ok(removed.map(|r| (pid, r)))
    }

    /// Replaces a record.
    ///
    /// Same key: the slot is overwritten in place. Different key: the old
    /// record is deleted and the new one inserted, which may split.
    /// Returns the partitions touched and any split.
    pub fn update(&mut self, record: Record) -> PartitionResult<(Vec<PartitionId>, Option<SplitSignal>)> {
        record.validate(&self.schema)?;
        let Some(&old_key) = self.keys_by_id.get(&record.id) else {
            return Err(PartitionError::record_invalid(format!(
                "local id {} does not exist",
                record.id
            )));
        };
        if old_key == record.key {
            let pid = self.owner_of(old_key)?;
            let partition = self
                .partitions
                .get_mut(&pid)
                .ok_or_else(|| PartitionError::not_found(pid))?;
            partition.replace(record, &self.schema)?;
            return Ok((vec![pid], None));
        }

        // Validate the destination before removing anything.
        self.owner_of(record.key)?;
        let removed = self.delete(record.id)?;
        let outcome = match self.insert(record) {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Some((_, old)) = removed {
                    let id = old.id;
                    if let Err(rollback) = self.insert(old) {
                        log_event(
                            Event::UpdateRollbackFailed,
                            &[("id", &id.to_string()), ("error", &rollback.to_string())],
                        );
                    }
                }
                return Err(err);
            }
        };
        let mut touched: Vec<PartitionId> = removed.map(|(pid, _)| pid).into_iter().collect();
        if let Some(split) = outcome.split {
            touched.push(split.parent);
            touched.push(split.child);
        }
        touched.push(outcome.record.partition);
        touched.sort_unstable();
        touched.dedup();
        Ok((touched, outcome.split))
    }

    /// Merges partition `left` with the partition directly after it when
    /// their union fits one node.
    pub fn merge_adjacent(&mut self, left: PartitionId) -> PartitionResult<MergeSignal> {
        let span = self
            .partitions
            .get(&left)
            .map(Partition::span)
            .ok_or_else(|| PartitionError::not_found(left))?;
        let right = self
            .assignment
            .successor(&span)
            .map(|p| p.partition)
            .ok_or_else(|| {
                PartitionError::merge_rejected(format!("partition {} has no right neighbour", left))
            })?;
        let right_len = self.partitions.get(&right).map_or(0, Partition::len);
        let left_len = self.partitions.get(&left).map_or(0, Partition::len);
        if left_len + right_len > self.plan.max_records {
            return Err(PartitionError::merge_rejected(format!(
                "partitions {} and {} hold {} records, capacity is {}",
                left,
                right,
                left_len + right_len,
                self.plan.max_records
            )));
        }

        let absorbed = self
            .partitions
            .remove(&right)
            .ok_or_else(|| PartitionError::not_found(right))?;
        let survivor = self
            .partitions
            .get_mut(&left)
            .ok_or_else(|| PartitionError::not_found(left))?;
        survivor.merge(absorbed, &self.schema)?;
        let merged_span = survivor.span();
        let released = self.assignment.release(right)?;
        self.assignment.resize(left, merged_span)?;
        self.lineage.entry(right).or_default().push(left);

        Ok(MergeSignal {
            survivor: left,
            span: merged_span,
            absorbed: right,
            released: released.node,
        })
    }

    /// Live partitions now holding the records that lived in `partition`
    /// when it was recorded (the partition itself if it still exists, plus
    /// every split descendant and merge survivor).
    pub fn resolve(&self, partition: PartitionId) -> Vec<PartitionId> {
        let mut out = Vec::new();
        let mut seen = vec![partition];
        let mut queue = VecDeque::from([partition]);
        while let Some(pid) = queue.pop_front() {
            if self.partitions.contains_key(&pid) && !out.contains(&pid) {
                out.push(pid);
            }
            for &next in self.lineage.get(&pid).map(Vec::as_slice).unwrap_or(&[]) {
                if !seen.contains(&next) {
                    seen.push(next);
                    queue.push_back(next);
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Serialized image of one partition
    pub fn export(&self, partition: PartitionId) -> PartitionResult<Vec<u8>> {
        self.partitions
            .get(&partition)
            .ok_or_else(|| PartitionError::not_found(partition))?
            .export_for_distribution(&self.schema, &self.plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{FieldType, PartitionErrorCode};

    fn store(nodes: usize) -> PartitionStore {
        let schema = RecordSchema::new(vec![FieldType::U32], 0, 0);
        let mut plan = CapacityPlan::for_schema(&schema, 4096).unwrap();
        plan.max_records = 8;
        let nodes = (0..nodes as u16).map(|x| NodeCoord::new(x, 0));
        PartitionStore::new(schema, plan, KeySpan::new(0, 1023), nodes, 1).unwrap()
    }

    fn rec(key: SpatialKey, id: LocalId) -> Record {
        Record::new(key, id, vec![key as i64], vec![], vec![])
    }

    #[test]
    fn test_insert_splits_when_full() {
        let mut s = store(4);
        for i in 0..8u32 {
            let out = s.insert(rec(u128::from(i) * 100, i)).unwrap();
            assert!(out.split.is_none());
        }
        let out = s.insert(rec(850, 8)).unwrap();
        let split = out.split.unwrap();
        assert_eq!(split.parent, 0);
        assert_eq!(split.child, 1);
        assert_eq!(split.boundary, 400);
        assert_eq!(split.parent_span, KeySpan::new(0, 399));
        assert_eq!(split.child_span, KeySpan::new(400, 1023));
        assert_eq!(split.node, NodeCoord::new(1, 0));
        assert_eq!(out.record, RecordRef::new(1, 8));
        assert_eq!(s.partition(0).unwrap().len(), 4);
        assert_eq!(s.partition(1).unwrap().len(), 5);
        assert_eq!(s.record_count(), 9);
    }

    #[test]
    fn test_no_free_node_is_capacity_exceeded() {
        let mut s = store(1);
        for i in 0..8u32 {
            s.insert(rec(u128::from(i), i)).unwrap();
        }
        let err = s.insert(rec(100, 8)).unwrap_err();
        assert_eq!(err.code(), PartitionErrorCode::CapacityExceeded);
        assert_eq!(s.record_count(), 8);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut s = store(2);
        s.insert(rec(1, 7)).unwrap();
        assert!(s.insert(rec(2, 7)).is_err());
        assert_eq!(s.allocate_id(), 8);
    }

    #[test]
    fn test_update_moves_record() {
        let mut s = store(4);
        for i in 0..9u32 {
            s.insert(rec(u128::from(i) * 100, i)).unwrap();
        }
        let (touched, split) = s.update(rec(50, 8)).unwrap();
        assert!(split.is_none());
        assert_eq!(touched, vec![0, 1]);
        assert_eq!(s.locate(8), Some(RecordRef::new(0, 8)));

        let mut same = rec(50, 8);
        same.fields[0] = 1;
        let (touched, _) = s.update(same).unwrap();
        assert_eq!(touched, vec![0]);
        assert_eq!(s.partition(0).unwrap().lookup(50).unwrap().fields[0], 1);
    }

    #[test]
    fn test_failed_move_keeps_original_error_and_record() {
        let mut s = store(2);
        for i in 0..9u32 {
            let key = if i == 8 { 850 } else { u128::from(i) * 100 };
            s.insert(rec(key, i)).unwrap();
        }
        for (id, key) in [(9, 900), (10, 950), (11, 1000)] {
            s.insert(rec(key, id)).unwrap();
        }
        assert_eq!(s.partition(1).unwrap().len(), 8);

        // Partition 1 is full and no node is free for a split.
        let err = s.update(rec(1010, 0)).unwrap_err();
        assert_eq!(err.code(), PartitionErrorCode::CapacityExceeded);
        assert_eq!(s.locate(0), Some(RecordRef::new(0, 0)));
        assert_eq!(s.partition(0).unwrap().lookup(0).unwrap().id, 0);
        assert_eq!(s.record_count(), 12);
    }

    #[test]
    fn test_delete_then_merge_and_resolve() {
        let mut s = store(4);
        for i in 0..9u32 {
            s.insert(rec(u128::from(i) * 100, i)).unwrap();
        }
        for id in [5, 6, 7] {
            assert!(s.delete(id).unwrap().is_some());
        }
        assert!(s.delete(42).unwrap().is_none());

        let merged = s.merge_adjacent(0).unwrap();
        assert_eq!(merged.absorbed, 1);
        assert_eq!(merged.span, KeySpan::new(0, 1023));
        assert_eq!(merged.released, NodeCoord::new(1, 0));
        assert!(s.partition(1).is_none());
        assert_eq!(s.resolve(1), vec![0]);
        assert_eq!(s.locate(8), Some(RecordRef::new(0, 8)));
    }

    #[test]
    fn test_initial_partitions_tile_key_space() {
        let schema = RecordSchema::new(vec![FieldType::U32], 0, 0);
        let plan = CapacityPlan::for_schema(&schema, 4096).unwrap();
        let nodes = (0..4u16).map(|x| NodeCoord::new(x, 0));
        let s = PartitionStore::new(schema, plan, KeySpan::new(0, 99), nodes, 3).unwrap();
        let spans: Vec<_> = s.assignment().placements().map(|p| p.span).collect();
        assert_eq!(
            spans,
            vec![KeySpan::new(0, 32), KeySpan::new(33, 65), KeySpan::new(66, 99)]
        );
        assert!(s.export(2).is_ok());
    }
}
