//! Mesh node: an isolated, message-driven state machine
//!
//! A node owns at most one partition and never sees another node's memory.
//! It performs work only when a message is waiting, runs one unit to
//! completion, and reports what it sends as [`Outgoing`] values for the
//! executor to carry. Sending a reduction partial or a point reply blocks the
//! node until the executor signals completion of that transfer.
//!
//! ```text
//!          message delivered           unit finished, inbox empty
//!   Idle ─────────────────────▶ Ready ◀──────────────────┐
//!    ▲                          │  scheduler picks       │
//!    │                          ▼                        │
//!    └──────────────────── Running ──── blocking send ──▶ Blocked
//!       unit finished,                                   │
//!       inbox empty                 completion signal ───┘
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::eval::{evaluate, Evaluation, NodeContext};
use super::message::{Message, QueryId, QueryOp, Tag};
use super::partial::PartialResult;
use super::request::{QueryRequest, RequestAssembler};
use super::scheduler::{Candidate, Scheduler};
use super::sentinel::Sentinel;
use super::topology::{GridShape, NodeCoord, Port};
use crate::partition::{Partition, PartitionId, PartitionResult};

/// Activation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Nothing to do
    Idle,
    /// At least one message is waiting
    Ready,
    /// Executing a unit of work
    Running,
    /// Waiting for the completion of a send made for `query`
    Blocked { query: QueryId },
}

/// A message leaving the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub port: Port,
    pub message: Message,
    /// Sender blocks until the transfer completes
    pub blocking: bool,
}

impl Outgoing {
    fn forward(port: Port, message: Message) -> Self {
        Self {
            port,
            message,
            blocking: false,
        }
    }

    fn blocking(port: Port, message: Message) -> Self {
        Self {
            port,
            message,
            blocking: true,
        }
    }
}

/// Counters local to one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub units_run: u64,
    pub evaluations: u64,
    pub forwarded: u64,
    pub dropped: u64,
}

/// Targeted-routing entry for one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Route {
    /// `None` on the destination node
    forward: Option<Port>,
    passed: u32,
    /// Header plus operands, known once the header has passed
    expected: Option<u32>,
}

/// An assembled request waiting for its evaluate activation
#[derive(Debug)]
enum Assembled {
    Request(QueryRequest),
    /// Decoding failed; only the operation (if readable) is known
    Malformed(Option<QueryOp>),
}

#[derive(Debug, Default)]
struct Reduction {
    evaluated: bool,
    received: usize,
    acc: Option<PartialResult>,
}

impl Reduction {
    fn absorb(&mut self, partial: PartialResult) {
        match &mut self.acc {
            Some(acc) => acc.merge(partial),
            None => self.acc = Some(partial),
        }
    }
}

#[derive(Debug)]
pub struct MeshNode {
    coord: NodeCoord,
    shape: GridShape,
    ctx: Arc<NodeContext>,
    tile: Option<Partition>,
    inbox: [VecDeque<(u64, Message)>; 6],
    state: NodeState,
    assembling: HashMap<QueryId, RequestAssembler>,
    assembled: HashMap<QueryId, Assembled>,
    reductions: HashMap<QueryId, Reduction>,
    routes: HashMap<QueryId, Route>,
    cancelled: HashSet<QueryId>,
    stats: NodeStats,
}

impl MeshNode {
    pub fn new(coord: NodeCoord, shape: GridShape, ctx: Arc<NodeContext>) -> Self {
        Self {
            coord,
            shape,
            ctx,
            tile: None,
            inbox: Default::default(),
            state: NodeState::Idle,
            assembling: HashMap::new(),
            assembled: HashMap::new(),
            reductions: HashMap::new(),
            routes: HashMap::new(),
            cancelled: HashSet::new(),
            stats: NodeStats::default(),
        }
    }

    pub fn coord(&self) -> NodeCoord {
        self.coord
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    /// Read-only view of the hosted partition
    pub fn tile(&self) -> Option<&Partition> {
        self.tile.as_ref()
    }

    /// Replaces the hosted partition with one parsed from `image`.
    ///
    /// A corrupt image is refused and the previous tile is kept.
    pub fn load_tile(&mut self, image: &[u8]) -> PartitionResult<PartitionId> {
        let tile = Partition::from_image(image, &self.ctx.schema, &self.ctx.plan)?;
        let id = tile.id();
        self.tile = Some(tile);
        Ok(id)
    }

    pub fn clear_tile(&mut self) {
        self.tile = None;
    }

    /// Installs a targeted-routing entry; `None` marks this node as the
    /// destination.
    pub fn configure_route(&mut self, query: QueryId, forward: Option<Port>) {
        self.routes.insert(
            query,
            Route {
                forward,
                passed: 0,
                expected: None,
            },
        );
    }

    pub fn has_work(&self) -> bool {
        self.inbox.iter().any(|q| !q.is_empty())
    }

    /// Eligible to run a unit this step
    pub fn is_runnable(&self) -> bool {
        !matches!(self.state, NodeState::Blocked { .. }) && self.has_work()
    }

    /// Whether the node holds any state for `query`
    pub fn holds(&self, query: QueryId) -> bool {
        self.assembling.contains_key(&query)
            || self.assembled.contains_key(&query)
            || self.reductions.contains_key(&query)
            || self.routes.contains_key(&query)
            || matches!(self.state, NodeState::Blocked { query: q } if q == query)
            || self.inbox.iter().flatten().any(|(_, m)| m.query == query)
    }

    /// Accepts a message from a link.
    ///
    /// Cancellation is control traffic: it takes effect on arrival, even
    /// while the node is blocked, and is forwarded down the column at once.
    pub fn deliver(&mut self, port: Port, message: Message, arrival: u64) -> Vec<Outgoing> {
        if message.tag == Tag::Cancel {
            return self.cancel(port, message);
        }
        if self.cancelled.contains(&message.query) {
            self.stats.dropped += 1;
            return Vec::new();
        }
        self.inbox[port.index()].push_back((arrival, message));
        if self.state == NodeState::Idle {
            self.state = NodeState::Ready;
        }
        Vec::new()
    }

    /// Drops the cancel marker for `query` so the id can be issued again.
    ///
    /// Only valid once no message for `query` is left anywhere on the mesh.
    pub fn forget_cancel(&mut self, query: QueryId) {
        self.cancelled.remove(&query);
    }

    /// Number of cancel markers currently held
    pub fn cancelled_count(&self) -> usize {
        self.cancelled.len()
    }

    /// Completion signal for a blocking send made for `query`
    pub fn complete(&mut self, query: QueryId) {
        if self.state == (NodeState::Blocked { query }) {
            self.settle();
        }
    }

    fn settle(&mut self) {
        self.state = if self.has_work() {
            NodeState::Ready
        } else {
            NodeState::Idle
        };
    }

    fn cancel(&mut self, port: Port, message: Message) -> Vec<Outgoing> {
        let query = message.query;
        if !self.cancelled.insert(query) {
            return Vec::new();
        }
        self.assembling.remove(&query);
        self.assembled.remove(&query);
        self.reductions.remove(&query);
        self.routes.remove(&query);
        for queue in &mut self.inbox {
            queue.retain(|(_, m)| m.query != query);
        }
        match self.state {
            NodeState::Blocked { query: q } if q != query => {}
            NodeState::Running => {}
            _ => self.settle(),
        }
        let downstream = matches!(port, Port::North | Port::Host);
        match self.shape.neighbor(self.coord, Port::South) {
            Some(_) if downstream => vec![Outgoing::forward(Port::South, message)],
            _ => Vec::new(),
        }
    }

    /// Runs one unit of work chosen by `scheduler`.
    pub fn run_unit(&mut self, scheduler: &mut Scheduler) -> Vec<Outgoing> {
        if !self.is_runnable() {
            return Vec::new();
        }
        let candidates: Vec<Candidate> = self
            .inbox
            .iter()
            .enumerate()
            .filter_map(|(slot, q)| q.front().map(|(arrival, _)| Candidate { slot, arrival: *arrival }))
            .collect();
        let Some(slot) = scheduler.pick(&candidates) else {
            return Vec::new();
        };
        let Some((_, message)) = self.inbox[slot].pop_front() else {
            return Vec::new();
        };

        self.state = NodeState::Running;
        self.stats.units_run += 1;
        let out = self.handle(Port::ALL[slot], message);
        match out.iter().find(|o| o.blocking) {
            Some(send) => {
                self.state = NodeState::Blocked {
                    query: send.message.query,
                }
            }
            None => self.settle(),
        }
        out
    }

    fn handle(&mut self, port: Port, message: Message) -> Vec<Outgoing> {
        match message.tag {
            Tag::Header | Tag::Operand => self.on_request_chunk(port, message),
            Tag::Evaluate => self.on_evaluate(message.query),
            Tag::RowPartial | Tag::ColumnPartial => self.on_partial(message),
            Tag::PointReply => self.on_point_reply(message),
            Tag::Result | Tag::Cancel => {
                self.stats.dropped += 1;
                Vec::new()
            }
        }
    }

    fn on_request_chunk(&mut self, port: Port, message: Message) -> Vec<Outgoing> {
        let query = message.query;
        let mut out = Vec::new();
        match self.routes.get_mut(&query) {
            Some(route) if route.forward.is_some() => {
                // Intermediate hop: pass through untouched, then forget.
                route.passed += 1;
                if message.tag == Tag::Header {
                    route.expected = message.as_words().map(|[_, count]| count + 1);
                }
                let next = route.forward;
                if route.expected == Some(route.passed) {
                    self.routes.remove(&query);
                }
                self.stats.forwarded += 1;
                return next
                    .map(|port| Outgoing::forward(port, message))
                    .into_iter()
                    .collect();
            }
            Some(_) => {}
            None => {
                let from_above = matches!(port, Port::North | Port::Host);
                if from_above && self.shape.neighbor(self.coord, Port::South).is_some() {
                    self.stats.forwarded += 1;
                    out.push(Outgoing::forward(Port::South, message.clone()));
                }
            }
        }

        let assembler = self.assembling.entry(query).or_default();
        if assembler.push(&message) {
            if let Some(assembler) = self.assembling.remove(&query) {
                let op = assembler
                    .header()
                    .and_then(|h| QueryOp::from_u8(h.query_op));
                let assembled = match assembler.finish() {
                    Ok(request) => Assembled::Request(request),
                    Err(_) => Assembled::Malformed(op),
                };
                self.assembled.insert(query, assembled);
                out.push(Outgoing::forward(Port::Local, Message::signal(query, Tag::Evaluate)));
            }
        }
        out
    }

    fn on_evaluate(&mut self, query: QueryId) -> Vec<Outgoing> {
        let Some(assembled) = self.assembled.remove(&query) else {
            return Vec::new();
        };
        self.stats.evaluations += 1;
        let evaluation = match assembled {
            Assembled::Request(request) => evaluate(self.tile.as_ref(), &self.ctx, &request),
            Assembled::Malformed(Some(QueryOp::Point)) => {
                Evaluation::Point([Sentinel::PredicateMismatch.word(), 0])
            }
            Assembled::Malformed(_) => {
                Evaluation::Partial(PartialResult::sentinel(Sentinel::PredicateMismatch))
            }
        };
        match evaluation {
            Evaluation::Point(words) => {
                self.routes.remove(&query);
                let port = self.shape.reduction_port(self.coord);
                vec![Outgoing::blocking(
                    port,
                    Message::words(query, Tag::PointReply, 0, words),
                )]
            }
            Evaluation::Partial(partial) => {
                let reduction = self.reductions.entry(query).or_default();
                reduction.evaluated = true;
                reduction.absorb(partial);
                self.try_reduce(query).into_iter().collect()
            }
        }
    }

    fn on_partial(&mut self, message: Message) -> Vec<Outgoing> {
        let query = message.query;
        let Some(partial) = message.into_partial() else {
            self.stats.dropped += 1;
            return Vec::new();
        };
        let reduction = self.reductions.entry(query).or_default();
        reduction.received += 1;
        reduction.absorb(partial);
        self.try_reduce(query).into_iter().collect()
    }

    /// Sends the merged partial downstream once the local evaluation and
    /// every upstream partial are in.
    fn try_reduce(&mut self, query: QueryId) -> Option<Outgoing> {
        let expected = self.shape.reduction_inputs(self.coord);
        let done = self
            .reductions
            .get(&query)
            .is_some_and(|r| r.evaluated && r.received >= expected);
        if !done {
            return None;
        }
        let acc = self.reductions.remove(&query)?.acc?;
        let port = self.shape.reduction_port(self.coord);
        let tag = match port {
            Port::West => Tag::RowPartial,
            Port::North => Tag::ColumnPartial,
            _ => Tag::Result,
        };
        Some(Outgoing::blocking(port, Message::partial(query, tag, acc)))
    }

    fn on_point_reply(&mut self, message: Message) -> Vec<Outgoing> {
        self.routes.remove(&message.query);
        self.stats.forwarded += 1;
        let port = self.shape.reduction_port(self.coord);
        vec![Outgoing::forward(port, message)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{CurveCodec, KeySpan};
    use crate::mesh::scheduler::SchedulerPolicy;
    use crate::partition::{CapacityPlan, FieldType, Record, RecordSchema};

    fn ctx() -> Arc<NodeContext> {
        let schema = RecordSchema::new(vec![FieldType::U32], 0, 0);
        let plan = CapacityPlan::for_schema(&schema, 2048).unwrap();
        Arc::new(NodeContext {
            codec: CurveCodec::new(2, 8).unwrap(),
            schema,
            plan,
        })
    }

    fn corner_node() -> MeshNode {
        // A 1x1 grid: the node is both the broadcast entry and the root.
        MeshNode::new(NodeCoord::new(0, 0), GridShape::new(1, 1), ctx())
    }

    fn drain(node: &mut MeshNode, scheduler: &mut Scheduler) -> Vec<Outgoing> {
        let mut sent = Vec::new();
        let mut arrival = 1000;
        while node.is_runnable() {
            for o in node.run_unit(scheduler) {
                if o.port == Port::Local {
                    arrival += 1;
                    node.deliver(Port::Local, o.message, arrival);
                } else {
                    sent.push(o);
                }
            }
        }
        sent
    }

    #[test]
    fn test_evaluate_is_chained_after_assembly() {
        let mut node = corner_node();
        let mut scheduler = Scheduler::new(SchedulerPolicy::Fifo);
        let messages = QueryRequest::aggregate(Some(0), vec![]).to_messages(1).unwrap();
        for (i, m) in messages.into_iter().enumerate() {
            node.deliver(Port::Host, m, i as u64);
        }
        assert_eq!(node.state(), NodeState::Ready);
        let sent = drain(&mut node, &mut scheduler);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].port, Port::Host);
        assert_eq!(sent[0].message.tag, Tag::Result);
        assert!(sent[0].blocking);
        assert_eq!(node.state(), NodeState::Blocked { query: 1 });

        node.complete(1);
        assert_eq!(node.state(), NodeState::Idle);
    }

    #[test]
    fn test_blocked_node_does_not_run() {
        let mut node = corner_node();
        let mut scheduler = Scheduler::new(SchedulerPolicy::Fifo);
        for m in QueryRequest::scan(vec![], 8).to_messages(1).unwrap() {
            node.deliver(Port::Host, m, 0);
        }
        drain(&mut node, &mut scheduler);
        for m in QueryRequest::scan(vec![], 8).to_messages(2).unwrap() {
            node.deliver(Port::Host, m, 1);
        }
        assert!(!node.is_runnable());
        assert!(node.run_unit(&mut scheduler).is_empty());
        node.complete(2);
        assert!(!node.is_runnable());
        node.complete(1);
        assert!(node.is_runnable());
    }

    #[test]
    fn test_cancel_unblocks_and_purges() {
        let mut node = corner_node();
        let mut scheduler = Scheduler::new(SchedulerPolicy::Fifo);
        for m in QueryRequest::scan(vec![], 8).to_messages(1).unwrap() {
            node.deliver(Port::Host, m, 0);
        }
        drain(&mut node, &mut scheduler);
        assert_eq!(node.state(), NodeState::Blocked { query: 1 });

        node.deliver(Port::Host, Message::signal(1, Tag::Cancel), 5);
        assert_eq!(node.state(), NodeState::Idle);
        assert!(!node.holds(1));

        // Late traffic for a cancelled query is discarded on arrival.
        node.deliver(Port::Host, Message::signal(1, Tag::Evaluate), 6);
        assert!(!node.has_work());
        assert_eq!(node.stats().dropped, 1);
    }

    #[test]
    fn test_forgotten_cancel_admits_reused_id() {
        let mut node = corner_node();
        for query in 0..500 {
            node.deliver(Port::Host, Message::signal(query, Tag::Cancel), u64::from(query));
        }
        assert_eq!(node.cancelled_count(), 500);
        for query in 0..500 {
            node.forget_cancel(query);
        }
        assert_eq!(node.cancelled_count(), 0);

        node.deliver(Port::Host, Message::signal(5, Tag::Evaluate), 600);
        assert!(node.has_work());
        assert_eq!(node.stats().dropped, 0);
    }

    #[test]
    fn test_intermediate_hop_only_forwards() {
        let shape = GridShape::new(3, 1);
        let mut node = MeshNode::new(NodeCoord::new(1, 0), shape, ctx());
        let mut scheduler = Scheduler::new(SchedulerPolicy::Fifo);
        node.configure_route(4, Some(Port::East));
        let messages = QueryRequest::point(9).to_messages(4).unwrap();
        let count = messages.len();
        for (i, m) in messages.into_iter().enumerate() {
            node.deliver(Port::West, m, i as u64);
        }
        let sent = drain(&mut node, &mut scheduler);
        assert_eq!(sent.len(), count);
        assert!(sent.iter().all(|o| o.port == Port::East && !o.blocking));
        assert_eq!(node.stats().evaluations, 0);
        assert!(!node.holds(4));
    }

    #[test]
    fn test_loads_tile_from_image() {
        let ctx = ctx();
        let mut tile = Partition::new(2, KeySpan::new(0, 1000), ctx.plan.max_records);
        tile.insert(Record::new(5, 1, vec![10], vec![], vec![]), &ctx.schema).unwrap();
        let image = tile.export_for_distribution(&ctx.schema, &ctx.plan).unwrap();

        let mut node = MeshNode::new(NodeCoord::new(0, 0), GridShape::new(1, 1), ctx);
        assert_eq!(node.load_tile(&image).unwrap(), 2);
        assert_eq!(node.tile().unwrap().len(), 1);

        let mut bad = image.clone();
        bad[70] ^= 1;
        assert!(node.load_tile(&bad).is_err());
        assert_eq!(node.tile().unwrap().id(), 2);
    }
}
