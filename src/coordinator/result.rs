//! Query answers as the host sees them

use serde::{Deserialize, Serialize};

use crate::mesh::{AggregateOp, AggregateValue, NodeTally};
use crate::partition::{LocalId, Predicate, RecordRef};

/// How much of the mesh contributed to an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    /// Every node evaluated or was legitimately skipped
    Complete,
    /// Some node reported an error sentinel and contributed nothing
    Degraded,
    /// Some id list hit its capacity; the ids returned are a subset
    Truncated,
}

impl QueryStatus {
    /// Degraded outranks truncated: a missing node loses more than a
    /// clipped list.
    pub fn from_tally(tally: &NodeTally, truncated: bool) -> Self {
        if tally.mismatched > 0 {
            QueryStatus::Degraded
        } else if truncated {
            QueryStatus::Truncated
        } else {
            QueryStatus::Complete
        }
    }
}

/// A reduced answer plus the bookkeeping that qualifies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome<T> {
    pub value: T,
    pub status: QueryStatus,
    pub tally: NodeTally,
    /// Mesh steps spent waiting for the answer
    pub steps: u64,
}

impl<T> QueryOutcome<T> {
    pub fn is_complete(&self) -> bool {
        self.status == QueryStatus::Complete
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryOutcome<U> {
        QueryOutcome {
            value: f(self.value),
            status: self.status,
            tally: self.tally,
            steps: self.steps,
        }
    }
}

/// KNN hit, nearest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: RecordRef,
    /// Squared L2 distance over the quantized embedding
    pub distance: u32,
}

/// Top-K hit, highest value first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranked {
    pub id: RecordRef,
    pub value: i64,
}

/// One record reached by a traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub id: RecordRef,
    /// Hops from the start record
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traversal {
    /// Breadth-first order; each record appears once
    pub visited: Vec<Visit>,
    /// Edges whose target no longer exists
    pub dangling: Vec<RecordRef>,
    /// Deepest level that produced a record
    pub depth_reached: u32,
}

/// Serializable description of a query, for batches and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QuerySpec {
    Scan {
        #[serde(default)]
        predicates: Vec<Predicate>,
    },
    Range {
        min: Vec<u32>,
        max: Vec<u32>,
        #[serde(default)]
        predicates: Vec<Predicate>,
    },
    Point {
        coords: Vec<u32>,
    },
    Knn {
        /// Unit-range floats, quantized like stored embeddings
        vector: Vec<f32>,
        k: u32,
        #[serde(default)]
        predicates: Vec<Predicate>,
    },
    TopK {
        field: u8,
        k: u32,
        #[serde(default)]
        predicates: Vec<Predicate>,
    },
    Aggregate {
        aggregate: AggregateOp,
        #[serde(default)]
        field: Option<u8>,
        #[serde(default)]
        predicates: Vec<Predicate>,
    },
    Traverse {
        start: LocalId,
        #[serde(default)]
        max_depth: Option<u32>,
    },
}

impl QuerySpec {
    pub fn name(&self) -> &'static str {
        match self {
            QuerySpec::Scan { .. } => "scan",
            QuerySpec::Range { .. } => "range",
            QuerySpec::Point { .. } => "point",
            QuerySpec::Knn { .. } => "knn",
            QuerySpec::TopK { .. } => "top_k",
            QuerySpec::Aggregate { .. } => "aggregate",
            QuerySpec::Traverse { .. } => "traverse",
        }
    }
}

/// Answer to a [`QuerySpec`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResponse {
    Ids(QueryOutcome<Vec<RecordRef>>),
    Point { found: Option<RecordRef> },
    Neighbors(QueryOutcome<Vec<Neighbor>>),
    Ranked(QueryOutcome<Vec<Ranked>>),
    Aggregate(QueryOutcome<AggregateValue>),
    Traversal(Traversal),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_precedence() {
        let mut tally = NodeTally::default();
        assert_eq!(QueryStatus::from_tally(&tally, false), QueryStatus::Complete);
        assert_eq!(QueryStatus::from_tally(&tally, true), QueryStatus::Truncated);
        tally.mismatched = 1;
        assert_eq!(QueryStatus::from_tally(&tally, true), QueryStatus::Degraded);
    }

    #[test]
    fn test_query_spec_parses() {
        let spec: QuerySpec = serde_json::from_str(
            r#"{"op": "range", "min": [0, 0], "max": [3, 3],
                "predicates": [{"field": 0, "op": "ge", "value": {"u32": 10}}]}"#,
        )
        .unwrap();
        match spec {
            QuerySpec::Range { min, predicates, .. } => {
                assert_eq!(min, vec![0, 0]);
                assert_eq!(predicates.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        let spec: QuerySpec = serde_json::from_str(r#"{"op": "aggregate", "aggregate": "count"}"#).unwrap();
        assert_eq!(spec.name(), "aggregate");
    }
}
