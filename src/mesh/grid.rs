//! Mesh executor
//!
//! Owns the W x H grid of nodes and every link between them. Each step first
//! delivers the transfers issued in the previous step (firing completions
//! for blocking sends), then lets each runnable node execute one unit of
//! work in an order chosen by the scheduler. The host sits outside the grid:
//! it injects messages at row 0 or at the root and collects what the root
//! sends back through `drain_egress`.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::errors::{MeshError, MeshResult};
use super::eval::NodeContext;
use super::message::{Message, QueryId, Tag};
use super::node::{MeshNode, NodeState, Outgoing};
use super::scheduler::{Scheduler, SchedulerPolicy};
use super::topology::{GridShape, NodeCoord, Port};
use crate::partition::{Partition, PartitionId};

/// Largest supported edge of the grid
pub const MAX_GRID_EDGE: u16 = 1024;

/// One message on a link
#[derive(Debug, Clone)]
struct Transfer {
    /// `None` when injected by the host
    from: Option<NodeCoord>,
    /// `None` when addressed to the host
    to: Option<NodeCoord>,
    /// Port the receiver sees the message arrive on
    port: Port,
    message: Message,
    blocking: bool,
}

/// Executor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub steps: u64,
    pub delivered: u64,
    pub units_run: u64,
    pub stalls: u64,
    /// Sends across a port with no neighbour
    pub dropped: u64,
}

#[derive(Debug)]
pub struct MeshExecutor {
    shape: GridShape,
    nodes: Vec<MeshNode>,
    scheduler: Scheduler,
    in_flight: VecDeque<Transfer>,
    egress: Vec<Message>,
    arrivals: u64,
    stats: ExecutorStats,
}

impl MeshExecutor {
    pub fn new(shape: GridShape, ctx: NodeContext, policy: SchedulerPolicy) -> MeshResult<Self> {
        if shape.is_empty() {
            return Err(MeshError::invalid_shape("grid must have at least one node"));
        }
        if shape.width > MAX_GRID_EDGE || shape.height > MAX_GRID_EDGE {
            return Err(MeshError::invalid_shape(format!(
                "{}x{} grid exceeds the {} node edge limit",
                shape.width, shape.height, MAX_GRID_EDGE
            )));
        }
        let ctx = Arc::new(ctx);
        let nodes = shape
            .coords()
            .map(|coord| MeshNode::new(coord, shape, Arc::clone(&ctx)))
            .collect();
        Ok(Self {
            shape,
            nodes,
            scheduler: Scheduler::new(policy),
            in_flight: VecDeque::new(),
            egress: Vec::new(),
            arrivals: 0,
            stats: ExecutorStats::default(),
        })
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats
    }

    pub fn policy(&self) -> SchedulerPolicy {
        self.scheduler.policy()
    }

    fn slot(&self, coord: NodeCoord) -> MeshResult<usize> {
        if !self.shape.contains(coord) {
            return Err(MeshError::out_of_bounds(
                coord.x,
                coord.y,
                self.shape.width,
                self.shape.height,
            ));
        }
        Ok(self.shape.index(coord))
    }

    pub fn node(&self, coord: NodeCoord) -> MeshResult<&MeshNode> {
        let slot = self.slot(coord)?;
        Ok(&self.nodes[slot])
    }

    /// Partition currently hosted on `coord`
    pub fn tile(&self, coord: NodeCoord) -> MeshResult<Option<&Partition>> {
        Ok(self.node(coord)?.tile())
    }

    /// Deploys a partition image to one node.
    pub fn load_tile(&mut self, coord: NodeCoord, image: &[u8]) -> MeshResult<PartitionId> {
        let slot = self.slot(coord)?;
        self.nodes[slot]
            .load_tile(image)
            .map_err(MeshError::tile_rejected)
    }

    pub fn clear_tile(&mut self, coord: NodeCoord) -> MeshResult<()> {
        let slot = self.slot(coord)?;
        self.nodes[slot].clear_tile();
        Ok(())
    }

    /// Sends `messages` to every node of row 0; they fan out south from there.
    pub fn inject_broadcast(&mut self, messages: &[Message]) {
        for x in 0..self.shape.width {
            for message in messages {
                self.in_flight.push_back(Transfer {
                    from: None,
                    to: Some(NodeCoord::new(x, 0)),
                    port: Port::Host,
                    message: message.clone(),
                    blocking: false,
                });
            }
        }
    }

    /// Sends `messages` to the root node only.
    pub fn inject_root(&mut self, messages: Vec<Message>) {
        for message in messages {
            self.in_flight.push_back(Transfer {
                from: None,
                to: Some(NodeCoord::new(0, 0)),
                port: Port::Host,
                message,
                blocking: false,
            });
        }
    }

    /// Installs the path from the root to `target` for a targeted query.
    pub fn configure_route(&mut self, query: QueryId, target: NodeCoord) -> MeshResult<()> {
        let target_slot = self.slot(target)?;
        for (hop, port) in self.shape.route_from_root(target) {
            let slot = self.shape.index(hop);
            self.nodes[slot].configure_route(query, Some(port));
        }
        self.nodes[target_slot].configure_route(query, None);
        Ok(())
    }

    /// Cancels `query` everywhere. The signal enters at row 0 and each node
    /// forwards it south as soon as it arrives.
    pub fn broadcast_cancel(&mut self, query: QueryId) {
        self.inject_broadcast(&[Message::signal(query, Tag::Cancel)]);
    }

    /// Clears the cancel marker for `query` on every node. Returns false and
    /// keeps the markers while anything for `query` is still on the mesh.
    pub fn release_cancel(&mut self, query: QueryId) -> bool {
        if self.holds(query) {
            return false;
        }
        for node in &mut self.nodes {
            node.forget_cancel(query);
        }
        true
    }

    /// Cancel markers held across all nodes
    pub fn cancel_markers(&self) -> usize {
        self.nodes.iter().map(MeshNode::cancelled_count).sum()
    }

    /// Messages the root has sent to the host since the last drain
    pub fn drain_egress(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.egress)
    }

    /// No transfer in flight, no node blocked or holding work
    pub fn is_quiescent(&self) -> bool {
        self.in_flight.is_empty()
            && self
                .nodes
                .iter()
                .all(|n| !n.has_work() && !matches!(n.state(), NodeState::Blocked { .. }))
    }

    /// Whether any node still holds state for `query`
    pub fn holds(&self, query: QueryId) -> bool {
        self.in_flight.iter().any(|t| t.message.query == query)
            || self.nodes.iter().any(|n| n.holds(query))
    }

    /// Runs one step; returns whether anything happened.
    pub fn step(&mut self) -> bool {
        let delivered = self.deliver_in_flight();
        let ran = self.run_nodes();
        self.stats.steps += 1;
        delivered || ran
    }

    /// Steps until quiescent or `max_steps` have run; returns whether the
    /// mesh went quiet.
    pub fn run_until_quiescent(&mut self, max_steps: u64) -> bool {
        for _ in 0..max_steps {
            if self.is_quiescent() {
                return true;
            }
            self.step();
        }
        self.is_quiescent()
    }

    fn deliver_in_flight(&mut self) -> bool {
        let batch: Vec<Transfer> = self.in_flight.drain(..).collect();
        let any = !batch.is_empty();
        for transfer in batch {
            self.stats.delivered += 1;
            let query = transfer.message.query;
            match transfer.to {
                None => self.egress.push(transfer.message),
                Some(to) => {
                    self.arrivals += 1;
                    let slot = self.shape.index(to);
                    let forwarded = self.nodes[slot].deliver(transfer.port, transfer.message, self.arrivals);
                    self.dispatch(to, forwarded);
                }
            }
            if let (true, Some(from)) = (transfer.blocking, transfer.from) {
                let slot = self.shape.index(from);
                self.nodes[slot].complete(query);
            }
        }
        any
    }

    fn run_nodes(&mut self) -> bool {
        let order = self.scheduler.visit_order(self.nodes.len());
        let mut ran = false;
        let mut skipped = None;
        for slot in order {
            if !self.nodes[slot].is_runnable() {
                continue;
            }
            if self.scheduler.stalls() {
                self.stats.stalls += 1;
                skipped.get_or_insert(slot);
                continue;
            }
            self.run_one(slot);
            ran = true;
        }
        // Stalls delay work, they never stop the mesh.
        if let (false, Some(slot)) = (ran, skipped) {
            self.run_one(slot);
            ran = true;
        }
        ran
    }

    fn run_one(&mut self, slot: usize) {
        let coord = self.nodes[slot].coord();
        let out = self.nodes[slot].run_unit(&mut self.scheduler);
        self.stats.units_run += 1;
        self.dispatch(coord, out);
    }

    fn dispatch(&mut self, from: NodeCoord, out: Vec<Outgoing>) {
        for Outgoing {
            port,
            message,
            blocking,
        } in out
        {
            let (to, arrival) = match port {
                Port::Local => (Some(from), Port::Local),
                Port::Host => (None, Port::Host),
                _ => match self.shape.neighbor(from, port) {
                    Some(next) => (Some(next), port.opposite()),
                    None => {
                        self.stats.dropped += 1;
                        if blocking {
                            let slot = self.shape.index(from);
                            self.nodes[slot].complete(message.query);
                        }
                        continue;
                    }
                },
            };
            self.in_flight.push_back(Transfer {
                from: Some(from),
                to,
                port: arrival,
                message,
                blocking,
            });
        }
    }
}
