//! Key range -> mesh node placement
//!
//! The assigned spans always tile the key space exactly: every key belongs
//! to one span, spans never overlap. Each node hosts at most one partition.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::errors::{PartitionError, PartitionResult};
use super::record::PartitionId;
use crate::curve::{KeySpan, SpatialKey};
use crate::mesh::NodeCoord;

/// One placed partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub partition: PartitionId,
    pub span: KeySpan,
    pub node: NodeCoord,
}

/// Ordered map from key spans to their hosting nodes.
#[derive(Debug, Clone, Default)]
pub struct PartitionAssignment {
    /// Keyed by `span.first`
    by_first: BTreeMap<SpatialKey, Placement>,
    free: VecDeque<NodeCoord>,
}

impl PartitionAssignment {
    /// Creates an assignment with `nodes` available for placement, taken in
    /// the given order.
    pub fn new(nodes: impl IntoIterator<Item = NodeCoord>) -> Self {
        Self {
            by_first: BTreeMap::new(),
            free: nodes.into_iter().collect(),
        }
    }

    /// Places a partition on the next free node.
    pub fn place(&mut self, partition: PartitionId, span: KeySpan) -> PartitionResult<Placement> {
        let node = self.free.pop_front().ok_or_else(|| {
            PartitionError::capacity_exceeded(format!(
                "no free mesh node for partition {}",
                partition
            ))
        })?;
        let placement = Placement {
            partition,
            span,
            node,
        };
        self.by_first.insert(span.first, placement);
        Ok(placement)
    }

    /// Whether a node is still available
    pub fn has_free_node(&self) -> bool {
        !self.free.is_empty()
    }

    /// Number of unplaced nodes
    pub fn free_nodes(&self) -> usize {
        self.free.len()
    }

    /// Shrinks a placement's span in place (left half of a split, or the
    /// survivor of a merge).
    pub fn resize(&mut self, partition: PartitionId, span: KeySpan) -> PartitionResult<()> {
        let old_first = self
            .by_first
            .iter()
            .find(|(_, p)| p.partition == partition)
            .map(|(first, _)| *first)
            .ok_or_else(|| PartitionError::not_found(partition))?;
        if let Some(mut placement) = self.by_first.remove(&old_first) {
            placement.span = span;
            self.by_first.insert(span.first, placement);
        }
        Ok(())
    }

    /// Removes a placement and returns its node to the free pool.
    pub fn release(&mut self, partition: PartitionId) -> PartitionResult<Placement> {
        let first = self
            .by_first
            .iter()
            .find(|(_, p)| p.partition == partition)
            .map(|(first, _)| *first)
            .ok_or_else(|| PartitionError::not_found(partition))?;
        let placement = self
            .by_first
            .remove(&first)
            .ok_or_else(|| PartitionError::not_found(partition))?;
        self.free.push_back(placement.node);
        Ok(placement)
    }

    /// Placement whose span contains `key`
    pub fn locate(&self, key: SpatialKey) -> Option<&Placement> {
        self.by_first
            .range(..=key)
            .next_back()
            .map(|(_, p)| p)
            .filter(|p| p.span.contains(key))
    }

    /// Placement of a partition
    pub fn placement(&self, partition: PartitionId) -> Option<&Placement> {
        self.by_first.values().find(|p| p.partition == partition)
    }

    /// Placement hosted on `node`
    pub fn on_node(&self, node: NodeCoord) -> Option<&Placement> {
        self.by_first.values().find(|p| p.node == node)
    }

    /// Placement whose span starts right after `span`
    pub fn successor(&self, span: &KeySpan) -> Option<&Placement> {
        let next = span.last.checked_add(1)?;
        self.by_first.get(&next)
    }

    /// Placements whose spans intersect any of `spans`
    pub fn intersecting<'a>(&'a self, spans: &'a [KeySpan]) -> impl Iterator<Item = &'a Placement> + 'a {
        self.by_first
            .values()
            .filter(move |p| spans.iter().any(|s| s.intersects(&p.span)))
    }

    /// All placements in key order
    pub fn placements(&self) -> impl Iterator<Item = &Placement> {
        self.by_first.values()
    }

    pub fn len(&self) -> usize {
        self.by_first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_first.is_empty()
    }
}
