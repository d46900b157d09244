//! Bounded partial results and their combinators
//!
//! Every combinator here is associative and commutative, so the value that
//! reaches the reduction root does not depend on which node finished first.

use serde::{Deserialize, Serialize};

use super::kbest::{KBest, Scored};
use super::sentinel::Sentinel;
use crate::partition::RecordRef;

/// Scalar aggregate requested by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Count,
    Sum,
    Min,
    Max,
    /// Computed by the host as `sum / count`; never reduced directly
    Avg,
}

/// Distributable aggregate state for one field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateState {
    pub count: u64,
    pub sum: i128,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl AggregateState {
    /// Folds in one matching record; `value` is `None` for a count-only
    /// aggregate.
    pub fn add(&mut self, value: Option<i64>) {
        self.count += 1;
        if let Some(v) = value {
            self.sum += i128::from(v);
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
    }

    pub fn merge(&mut self, other: &AggregateState) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    /// Final scalar; average of zero records is `None`
    pub fn finalize(&self, op: AggregateOp) -> AggregateValue {
        match op {
            AggregateOp::Count => AggregateValue::Count(self.count),
            AggregateOp::Sum => AggregateValue::Sum(self.sum),
            AggregateOp::Min => AggregateValue::Min(self.min),
            AggregateOp::Max => AggregateValue::Max(self.max),
            AggregateOp::Avg => AggregateValue::Avg(
                (self.count > 0).then(|| self.sum as f64 / self.count as f64),
            ),
        }
    }
}

/// Final aggregate answer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateValue {
    Count(u64),
    Sum(i128),
    Min(Option<i64>),
    Max(Option<i64>),
    Avg(Option<f64>),
}

/// Per-node outcome counters, summed along the reduction tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTally {
    /// Nodes that scanned their partition
    pub evaluated: u32,
    /// Nodes skipped (`RangeNoOverlap`, empty, or excluded by zone maps)
    pub skipped: u32,
    /// Nodes that reported `PredicateMismatch`
    pub mismatched: u32,
    /// Nodes that reported `ResultOverflow`
    pub overflowed: u32,
}

impl NodeTally {
    pub fn merge(&mut self, other: &NodeTally) {
        self.evaluated += other.evaluated;
        self.skipped += other.skipped;
        self.mismatched += other.mismatched;
        self.overflowed += other.overflowed;
    }

    /// Nodes accounted for
    pub fn total(&self) -> u32 {
        self.evaluated + self.skipped + self.mismatched
    }

    pub fn record(&mut self, sentinel: Sentinel) {
        match sentinel {
            Sentinel::RangeNoOverlap | Sentinel::NotFound => self.skipped += 1,
            Sentinel::PredicateMismatch => self.mismatched += 1,
            Sentinel::ResultOverflow => self.overflowed += 1,
        }
    }
}

/// Operation-specific part of a partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialBody {
    /// Identity of every operation
    Empty,
    /// Matching ids, ascending, at most `capacity`
    Ids {
        ids: Vec<RecordRef>,
        capacity: usize,
        truncated: bool,
    },
    Aggregate(AggregateState),
    Best(KBest),
}

impl PartialBody {
    pub fn ids(capacity: usize) -> Self {
        PartialBody::Ids {
            ids: Vec::new(),
            capacity,
            truncated: false,
        }
    }

    fn merge(&mut self, other: PartialBody) {
        if matches!(self, PartialBody::Empty) {
            *self = other;
            return;
        }
        match (self, other) {
            (_, PartialBody::Empty) => {}
            (
                PartialBody::Ids {
                    ids,
                    capacity,
                    truncated,
                },
                PartialBody::Ids {
                    ids: more,
                    capacity: other_capacity,
                    truncated: other_truncated,
                },
            ) => {
                *capacity = (*capacity).max(other_capacity);
                ids.extend(more);
                ids.sort_unstable();
                ids.dedup();
                *truncated |= other_truncated || ids.len() > *capacity;
                ids.truncate(*capacity);
            }
            (PartialBody::Aggregate(a), PartialBody::Aggregate(b)) => a.merge(&b),
            (PartialBody::Best(a), PartialBody::Best(b)) => a.merge(b),
            // Bodies of different kinds only meet when a node misread the
            // operation; that node already counted itself as mismatched.
            _ => {}
        }
    }
}

/// What a node (or subtree) contributes to a reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResult {
    pub body: PartialBody,
    pub tally: NodeTally,
}

impl PartialResult {
    pub fn new(body: PartialBody) -> Self {
        Self {
            body,
            tally: NodeTally::default(),
        }
    }

    /// Zero contribution tagged with a sentinel
    pub fn sentinel(sentinel: Sentinel) -> Self {
        let mut tally = NodeTally::default();
        tally.record(sentinel);
        Self {
            body: PartialBody::Empty,
            tally,
        }
    }

    /// Combines two partials; order of arguments never matters.
    pub fn merge(&mut self, other: PartialResult) {
        self.tally.merge(&other.tally);
        self.body.merge(other.body);
    }

    /// Ids of a scan or range partial
    pub fn ids(&self) -> &[RecordRef] {
        match &self.body {
            PartialBody::Ids { ids, .. } => ids,
            _ => &[],
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self.body, PartialBody::Ids { truncated: true, .. }) || self.tally.overflowed > 0
    }

    pub fn aggregate(&self) -> AggregateState {
        match &self.body {
            PartialBody::Aggregate(state) => *state,
            _ => AggregateState::default(),
        }
    }

    pub fn best(&self) -> Vec<Scored> {
        match &self.body {
            PartialBody::Best(best) => best.to_sorted(),
            _ => Vec::new(),
        }
    }
}
