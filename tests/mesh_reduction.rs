//! Mesh Reduction Tests
//!
//! Tests for reduction invariants:
//! - Aggregate merges give the same answer in any order and grouping
//! - Best-K merges keep exactly the K best of the union
//! - Node tallies add up along the tree

use proptest::prelude::*;
use tessdb::mesh::{
    AggregateOp, AggregateState, AggregateValue, KBest, PartialBody, PartialResult, Scored, Sentinel,
};
use tessdb::partition::RecordRef;

// =============================================================================
// Helper Functions
// =============================================================================

fn aggregate(sum: i128, count: u64) -> PartialResult {
    PartialResult::new(PartialBody::Aggregate(AggregateState {
        count,
        sum,
        min: None,
        max: None,
    }))
}

fn best(k: usize, candidates: &[(i64, u32)]) -> PartialResult {
    let mut kbest = KBest::new(k);
    for &(rank, id) in candidates {
        kbest.offer(Scored::new(rank, RecordRef::new(id % 4, id)));
    }
    PartialResult::new(PartialBody::Best(kbest))
}

fn fold(parts: Vec<PartialResult>) -> PartialResult {
    let mut root = PartialResult::new(PartialBody::Empty);
    for part in parts {
        root.merge(part);
    }
    root
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![vec![]];
    }
    let mut out = Vec::new();
    for rest in permutations(n - 1) {
        for slot in 0..=rest.len() {
            let mut p = rest.clone();
            p.insert(slot, n - 1);
            out.push(p);
        }
    }
    out
}

// =============================================================================
// Aggregates
// =============================================================================

/// Four node partials reach the same sum and count in every arrival order.
#[test]
fn test_sum_and_count_in_every_order() {
    let parts = [(10, 2), (20, 3), (5, 1), (0, 0)];
    for order in permutations(parts.len()) {
        let root = fold(order.iter().map(|&i| aggregate(parts[i].0, parts[i].1)).collect());
        let state = root.aggregate();
        assert_eq!(state.sum, 35, "order {:?}", order);
        assert_eq!(state.count, 6, "order {:?}", order);
    }
}

/// Folding along a tree equals folding the flat list.
#[test]
fn test_tree_grouping_matches_flat_fold() {
    let values: Vec<i64> = vec![4, -7, 12, 0, 3, 99, -1];
    let mut flat = AggregateState::default();
    for &v in &values {
        flat.add(Some(v));
    }

    let leaves: Vec<PartialResult> = values
        .iter()
        .map(|&v| {
            let mut s = AggregateState::default();
            s.add(Some(v));
            PartialResult::new(PartialBody::Aggregate(s))
        })
        .collect();
    let mut left = fold(leaves[..3].to_vec());
    let right = fold(leaves[3..].to_vec());
    left.merge(right);

    assert_eq!(left.aggregate(), flat);
    assert_eq!(flat.finalize(AggregateOp::Min), AggregateValue::Min(Some(-7)));
    assert_eq!(flat.finalize(AggregateOp::Max), AggregateValue::Max(Some(99)));
}

/// The average of nothing is absent rather than zero.
#[test]
fn test_average_of_no_records() {
    let root = fold(vec![aggregate(0, 0), PartialResult::sentinel(Sentinel::RangeNoOverlap)]);
    assert_eq!(root.aggregate().finalize(AggregateOp::Avg), AggregateValue::Avg(None));
    assert_eq!(root.tally.skipped, 1);
}

proptest! {
    /// Any split of the inputs into node partials merges to the flat fold.
    #[test]
    fn prop_aggregate_merge_is_order_free(
        values in prop::collection::vec(-1_000i64..1_000, 0..40),
        cuts in prop::collection::vec(0usize..40, 0..6),
        reverse in any::<bool>(),
    ) {
        let mut flat = AggregateState::default();
        for &v in &values {
            flat.add(Some(v));
        }

        let mut bounds: Vec<usize> = cuts.into_iter().map(|c| c.min(values.len())).collect();
        bounds.push(0);
        bounds.push(values.len());
        bounds.sort_unstable();
        let mut parts: Vec<PartialResult> = bounds
            .windows(2)
            .map(|w| {
                let mut s = AggregateState::default();
                for &v in &values[w[0]..w[1]] {
                    s.add(Some(v));
                }
                PartialResult::new(PartialBody::Aggregate(s))
            })
            .collect();
        if reverse {
            parts.reverse();
        }
        prop_assert_eq!(fold(parts).aggregate(), flat);
    }
}

// =============================================================================
// Best-K Selection
// =============================================================================

/// Distances 5, 3, 9 and 1 on four nodes; the best two are 1 and 3.
#[test]
fn test_best_two_of_four_nodes() {
    let nodes = [(5, 10u32), (3, 11), (9, 12), (1, 13)];
    for order in permutations(nodes.len()) {
        let root = fold(order.iter().map(|&i| best(2, &[nodes[i]])).collect());
        let ranks: Vec<i64> = root.best().iter().map(|s| s.rank).collect();
        assert_eq!(ranks, vec![1, 3], "order {:?}", order);
    }
}

/// Equal ranks are ordered by local id, so ties resolve the same way.
#[test]
fn test_ties_break_on_local_id() {
    let a = best(2, &[(7, 30), (7, 20)]);
    let b = best(2, &[(7, 10), (8, 5)]);
    let mut ab = a.clone();
    ab.merge(b.clone());
    let mut ba = b;
    ba.merge(a);
    let ids: Vec<u32> = ab.best().iter().map(|s| s.id.local_id).collect();
    assert_eq!(ids, vec![10, 20]);
    assert_eq!(ab.best(), ba.best());
}

proptest! {
    /// Merging per-node best-K sets keeps the K best of the union.
    #[test]
    fn prop_kbest_merge_keeps_global_best(
        ranks in prop::collection::vec(-500i64..500, 1..60),
        k in 1usize..10,
        groups in 1usize..6,
    ) {
        let candidates: Vec<(i64, u32)> = ranks.iter().enumerate().map(|(i, &r)| (r, i as u32)).collect();
        let parts: Vec<PartialResult> = (0..groups)
            .map(|g| {
                let mine: Vec<(i64, u32)> = candidates
                    .iter()
                    .copied()
                    .filter(|(_, id)| *id as usize % groups == g)
                    .collect();
                best(k, &mine)
            })
            .collect();

        let mut expected: Vec<Scored> = candidates
            .iter()
            .map(|&(r, id)| Scored::new(r, RecordRef::new(id % 4, id)))
            .collect();
        expected.sort();
        expected.truncate(k);

        prop_assert_eq!(fold(parts).best(), expected);
    }
}

// =============================================================================
// Id Lists and Tallies
// =============================================================================

/// Id lists union, dedupe and truncate to capacity.
#[test]
fn test_id_lists_truncate_at_capacity() {
    let ids = |range: std::ops::Range<u32>| PartialBody::Ids {
        ids: range.map(|i| RecordRef::new(0, i)).collect(),
        capacity: 5,
        truncated: false,
    };
    let mut root = PartialResult::new(ids(0..3));
    root.merge(PartialResult::new(ids(2..6)));
    assert_eq!(root.ids().len(), 5);
    assert!(root.is_truncated());
    assert_eq!(root.ids()[0], RecordRef::new(0, 0));
}

/// Sentinel partials count their node without contributing a value.
#[test]
fn test_sentinels_land_in_tally() {
    let root = fold(vec![
        aggregate(3, 1),
        PartialResult::sentinel(Sentinel::PredicateMismatch),
        PartialResult::sentinel(Sentinel::RangeNoOverlap),
        PartialResult::sentinel(Sentinel::ResultOverflow),
    ]);
    assert_eq!(root.aggregate().sum, 3);
    assert_eq!(root.tally.mismatched, 1);
    assert_eq!(root.tally.skipped, 1);
    assert_eq!(root.tally.overflowed, 1);
    assert!(root.is_truncated());
}
