//! Partition Split Tests
//!
//! Tests for partition invariants:
//! - A split loses and duplicates nothing
//! - Spans stay disjoint and keep tiling the key space
//! - Split lineage resolves old partition ids to current ones
//! - A partition image reloads into the same partition

use proptest::prelude::*;
use tessdb::curve::KeySpan;
use tessdb::mesh::NodeCoord;
use tessdb::partition::{
    CapacityPlan, FieldType, Partition, PartitionErrorCode, PartitionStore, Record, RecordSchema,
};

// =============================================================================
// Helper Functions
// =============================================================================

/// Small node budget so splits happen after a handful of records
const NODE_BYTES: usize = 1024;

fn schema() -> RecordSchema {
    RecordSchema::new(vec![FieldType::U32], 0, 0)
}

fn record(key: u128, id: u32) -> Record {
    Record::new(key, id, vec![i64::from(id % 100)], vec![], vec![])
}

fn store(nodes: u16, max_records: usize) -> PartitionStore {
    let mut plan = CapacityPlan::for_schema(&schema(), 4096).unwrap();
    plan.max_records = max_records;
    let nodes = (0..nodes).map(|x| NodeCoord::new(x, 0));
    PartitionStore::new(schema(), plan, KeySpan::new(0, 4095), nodes, 1).unwrap()
}

fn sorted_ids(records: &[Record]) -> Vec<u32> {
    let mut ids: Vec<u32> = records.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    ids
}

// =============================================================================
// Partition Split
// =============================================================================

proptest! {
    /// left ∪ right equals the partition before the split, and each half
    /// still fits one node.
    #[test]
    fn prop_split_preserves_records(keys in prop::collection::vec(0u128..1_000, 2..64)) {
        let schema = schema();
        let plan = CapacityPlan::for_schema(&schema, NODE_BYTES).unwrap();
        let keys = &keys[..keys.len().min(plan.max_records)];
        prop_assume!(keys.iter().any(|&k| k != keys[0]));
        let mut left = Partition::new(0, KeySpan::new(0, 999), plan.max_records);
        for (id, &key) in keys.iter().enumerate() {
            left.insert(record(key, id as u32), &schema).unwrap();
        }
        let before = sorted_ids(left.records());

        let (right, boundary) = left.split(1, &schema).unwrap();
        let mut after = sorted_ids(left.records());
        after.extend(sorted_ids(right.records()));
        after.sort_unstable();
        prop_assert_eq!(after, before);

        prop_assert!(!left.is_empty() && !right.is_empty());
        prop_assert_eq!(left.span().last + 1, boundary);
        prop_assert_eq!(right.span().first, boundary);
        prop_assert!(left.records().iter().all(|r| r.key < boundary));
        prop_assert!(right.records().iter().all(|r| r.key >= boundary));
        for r in left.records() {
            prop_assert!(left.lookup(r.key).is_some());
        }
        for r in right.records() {
            prop_assert!(right.lookup(r.key).is_some());
        }

        for half in [&left, &right] {
            prop_assert!(plan.fits(half.len()));
            let image = half.export_for_distribution(&schema, &plan).unwrap();
            prop_assert!(image.len() <= plan.node_capacity);
        }
    }
}

/// Records sharing one key cannot be split apart.
#[test]
fn test_split_refuses_single_key() {
    let schema = schema();
    let mut partition = Partition::new(0, KeySpan::new(0, 99), 8);
    for id in 0..4 {
        partition.insert(record(42, id), &schema).unwrap();
    }
    let err = partition.split(1, &schema).unwrap_err();
    assert_eq!(err.code(), PartitionErrorCode::CapacityExceeded);
    assert_eq!(partition.len(), 4);
}

/// Equal keys stay together on one side of the cut.
#[test]
fn test_split_keeps_duplicate_keys_together() {
    let schema = schema();
    let mut left = Partition::new(0, KeySpan::new(0, 99), 16);
    for (id, key) in [5u128, 7, 7, 7, 7, 9].into_iter().enumerate() {
        left.insert(record(key, id as u32), &schema).unwrap();
    }
    let (right, boundary) = left.split(1, &schema).unwrap();
    let sevens_left = left.records().iter().filter(|r| r.key == 7).count();
    let sevens_right = right.records().iter().filter(|r| r.key == 7).count();
    assert!(sevens_left == 4 || sevens_right == 4);
    assert!(boundary == 7 || boundary == 9);
}

// =============================================================================
// Store Splits and Lineage
// =============================================================================

/// Inserting past capacity splits; every record stays reachable.
#[test]
fn test_store_splits_and_tiles_key_space() {
    let mut store = store(32, 8);
    for id in 0..60u32 {
        let key = u128::from(id) * 67 % 4096;
        store.insert(record(key, id)).unwrap();
    }
    assert_eq!(store.record_count(), 60);
    assert!(store.assignment().len() > 1);

    let mut spans: Vec<KeySpan> = store.partitions().map(Partition::span).collect();
    spans.sort();
    assert_eq!(spans.first().unwrap().first, 0);
    assert_eq!(spans.last().unwrap().last, 4095);
    for pair in spans.windows(2) {
        assert_eq!(pair[0].last + 1, pair[1].first);
    }
    for p in store.partitions() {
        assert!(p.len() <= 8);
    }

    for id in 0..60u32 {
        let at = store.locate(id).unwrap();
        let partition = store.partition(at.partition).unwrap();
        assert!(partition.find_by_id(id).is_some());
    }
}

/// Splits made while inserting leave every partition exportable to one
/// node of the real budget.
#[test]
fn test_store_splits_fit_node_budget() {
    let schema = schema();
    let plan = CapacityPlan::for_schema(&schema, NODE_BYTES).unwrap();
    let nodes = (0..16u16).map(|x| NodeCoord::new(x, 0));
    let mut store = PartitionStore::new(schema.clone(), plan.clone(), KeySpan::new(0, 4095), nodes, 1).unwrap();
    let total = plan.max_records * 3;
    for id in 0..total as u32 {
        store.insert(record(u128::from(id) * 13 % 4096, id)).unwrap();
    }
    assert!(store.assignment().len() > 1);
    assert_eq!(store.record_count(), total);

    for partition in store.partitions() {
        assert!(partition.len() <= plan.max_records);
        let image = partition.export_for_distribution(&schema, &plan).unwrap();
        assert!(image.len() <= NODE_BYTES);
    }
}

/// The first partition's lineage covers every partition split off it.
#[test]
fn test_resolve_follows_split_lineage() {
    let mut store = store(16, 8);
    for id in 0..40u32 {
        store.insert(record(u128::from(id) * 100, id)).unwrap();
    }
    let live: Vec<u32> = store.partitions().map(Partition::id).collect();
    assert_eq!(store.resolve(0), live);
}

/// A full mesh refuses the split and keeps the store unchanged.
#[test]
fn test_store_full_when_no_node_is_free() {
    let mut store = store(1, 8);
    for id in 0..8u32 {
        store.insert(record(u128::from(id) * 10, id)).unwrap();
    }
    let err = store.insert(record(1_000, 8)).unwrap_err();
    assert_eq!(err.code(), PartitionErrorCode::CapacityExceeded);
    assert_eq!(store.record_count(), 8);
    assert!(store.locate(8).is_none());
}

/// Merging neighbours releases a node and keeps lineage resolvable.
#[test]
fn test_merge_after_deletes() {
    let mut store = store(4, 8);
    for id in 0..9u32 {
        store.insert(record(u128::from(id) * 400, id)).unwrap();
    }
    assert_eq!(store.assignment().len(), 2);
    for id in 0..6u32 {
        assert!(store.delete(id).unwrap().is_some());
    }
    let signal = store.merge_adjacent(0).unwrap();
    assert_eq!(signal.survivor, 0);
    assert_eq!(store.assignment().len(), 1);
    assert_eq!(store.resolve(signal.absorbed), vec![0]);
    for id in 6..9u32 {
        assert_eq!(store.locate(id).unwrap().partition, 0);
    }
}

// =============================================================================
// Partition Image
// =============================================================================

#[test]
fn test_image_reloads_same_partition() {
    let schema = schema();
    let plan = CapacityPlan::for_schema(&schema, 4096).unwrap();
    let mut partition = Partition::new(3, KeySpan::new(100, 900), plan.max_records);
    for id in 0..20u32 {
        partition.insert(record(100 + u128::from(id) * 37, id), &schema).unwrap();
    }
    let image = partition.export_for_distribution(&schema, &plan).unwrap();
    assert_eq!(image.len(), plan.node_capacity);

    let loaded = Partition::from_image(&image, &schema, &plan).unwrap();
    assert_eq!(loaded.id(), 3);
    assert_eq!(loaded.span(), partition.span());
    assert_eq!(loaded.records(), partition.records());
}

#[test]
fn test_corrupt_image_is_rejected() {
    let schema = schema();
    let plan = CapacityPlan::for_schema(&schema, 4096).unwrap();
    let mut partition = Partition::new(0, KeySpan::new(0, 99), plan.max_records);
    partition.insert(record(5, 1), &schema).unwrap();
    let mut image = partition.export_for_distribution(&schema, &plan).unwrap();
    image[70] ^= 0xFF;
    let err = Partition::from_image(&image, &schema, &plan).unwrap_err();
    assert_eq!(err.code(), PartitionErrorCode::ImageCorrupt);
}
