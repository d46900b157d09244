//! Bounded best-K selection
//!
//! Lower rank is better. Ties are broken by the lower local id, then the
//! lower partition id, so the order over candidates is total and merging is
//! associative and commutative: the best K of a union does not depend on how
//! the union was grouped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::partition::RecordRef;

/// One ranked candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scored {
    /// Distance for KNN, negated field value for top-K
    pub rank: i64,
    pub id: RecordRef,
}

impl Scored {
    pub fn new(rank: i64, id: RecordRef) -> Self {
        Self { rank, id }
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            .then(self.id.local_id.cmp(&other.id.local_id))
            .then(self.id.partition.cmp(&other.id.partition))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap holding at most `k` best candidates.
#[derive(Debug, Clone)]
pub struct KBest {
    k: usize,
    heap: BinaryHeap<Scored>,
}

impl KBest {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Current worst kept candidate
    pub fn worst(&self) -> Option<&Scored> {
        self.heap.peek()
    }

    /// Offers a candidate; it replaces the current worst only if strictly
    /// better. Returns whether it was kept.
    pub fn offer(&mut self, candidate: Scored) -> bool {
        if self.k == 0 {
            return false;
        }
        if self.heap.len() < self.k {
            self.heap.push(candidate);
            return true;
        }
        match self.heap.peek() {
            Some(worst) if candidate < *worst => {
                self.heap.pop();
                self.heap.push(candidate);
                true
            }
            _ => false,
        }
    }

    /// Keeps the best K of both sets. Either side may be empty or short.
    pub fn merge(&mut self, other: KBest) {
        self.k = self.k.max(other.k);
        for candidate in other.heap {
            self.offer(candidate);
        }
    }

    /// Candidates best first
    pub fn to_sorted(&self) -> Vec<Scored> {
        self.heap.clone().into_sorted_vec()
    }

    pub fn into_sorted(self) -> Vec<Scored> {
        self.heap.into_sorted_vec()
    }
}

impl PartialEq for KBest {
    fn eq(&self, other: &Self) -> bool {
        self.k == other.k && self.to_sorted() == other.to_sorted()
    }
}

impl Eq for KBest {}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(rank: i64, id: u32) -> Scored {
        Scored::new(rank, RecordRef::new(0, id))
    }

    #[test]
    fn test_keeps_k_closest() {
        let mut best = KBest::new(2);
        for (id, d) in [5, 3, 9, 1].into_iter().enumerate() {
            best.offer(s(d, id as u32));
        }
        let ranks: Vec<_> = best.into_sorted().iter().map(|c| (c.rank, c.id.local_id)).collect();
        assert_eq!(ranks, vec![(1, 3), (3, 1)]);
    }

    #[test]
    fn test_equal_rank_does_not_displace() {
        let mut best = KBest::new(1);
        best.offer(s(4, 2));
        assert!(!best.offer(s(4, 9)));
        assert!(best.offer(s(4, 1)));
        assert_eq!(best.worst().unwrap().id.local_id, 1);
    }

    #[test]
    fn test_merge_with_empty_and_short_sides() {
        let mut left = KBest::new(3);
        left.offer(s(7, 1));
        let right = KBest::new(3);
        left.merge(right);
        assert_eq!(left.len(), 1);

        let mut empty = KBest::new(3);
        empty.merge(left.clone());
        assert_eq!(empty.to_sorted(), left.to_sorted());
    }

    #[test]
    fn test_merge_ties_use_lower_id() {
        let mut a = KBest::new(2);
        a.offer(s(1, 8));
        a.offer(s(2, 5));
        let mut b = KBest::new(2);
        b.offer(s(1, 3));
        b.offer(s(2, 4));
        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);
        assert_eq!(ab.to_sorted(), ba.to_sorted());
        assert_eq!(ab.to_sorted(), vec![s(1, 3), s(1, 8)]);
    }

    #[test]
    fn test_zero_k_keeps_nothing() {
        let mut best = KBest::new(0);
        assert!(!best.offer(s(0, 0)));
        assert!(best.is_empty());
    }
}
