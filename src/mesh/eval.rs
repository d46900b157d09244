//! Node-local query evaluation
//!
//! Runs against the node's own partition only. Every outcome is expressed
//! as a bounded partial (or a point reply), never as an error: a request the
//! node cannot satisfy produces a sentinel so the host can tell it apart from
//! an empty answer.

use super::kbest::{KBest, Scored};
use super::message::QueryOp;
use super::partial::{AggregateState, PartialBody, PartialResult};
use super::request::QueryRequest;
use super::sentinel::Sentinel;
use crate::curve::{CurveCodec, KeySpan};
use crate::partition::{CapacityPlan, Partition, PredicateOp, Record, RecordRef, RecordSchema};

/// Read-only deployment parameters every node is configured with.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub codec: CurveCodec,
    pub schema: RecordSchema,
    pub plan: CapacityPlan,
}

/// Result of evaluating one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Contribution to a reduction
    Partial(PartialResult),
    /// `[partition or sentinel word, local id]`
    Point([u32; 2]),
}

/// Evaluates `request` against `tile`.
pub fn evaluate(tile: Option<&Partition>, ctx: &NodeContext, request: &QueryRequest) -> Evaluation {
    match request.op {
        Some(QueryOp::Point) => Evaluation::Point(evaluate_point(tile, ctx, request)),
        Some(op) => Evaluation::Partial(evaluate_reduced(op, tile, ctx, request)),
        None => Evaluation::Partial(PartialResult::sentinel(Sentinel::PredicateMismatch)),
    }
}

fn evaluate_point(tile: Option<&Partition>, ctx: &NodeContext, request: &QueryRequest) -> [u32; 2] {
    let miss = [Sentinel::NotFound.word(), 0];
    if request.predicates.iter().any(|p| p.check(&ctx.schema).is_err()) {
        return [Sentinel::PredicateMismatch.word(), 0];
    }
    let Some(tile) = tile else {
        return miss;
    };
    let found = match (request.local_id, request.key) {
        (Some(id), _) => tile.find_by_id(id),
        (None, Some(key)) if tile.span().contains(key) => tile.lookup(key),
        _ => None,
    };
    match found {
        Some(record) if request.predicates.iter().all(|p| p.matches(record)) => {
            [tile.id(), record.id]
        }
        _ => miss,
    }
}

fn identity(op: QueryOp, request: &QueryRequest) -> PartialBody {
    match op {
        QueryOp::Scan | QueryOp::Range => PartialBody::ids(request.capacity as usize),
        QueryOp::Aggregate => PartialBody::Aggregate(AggregateState::default()),
        QueryOp::Knn | QueryOp::TopK => PartialBody::Best(KBest::new(request.k as usize)),
        QueryOp::Point => PartialBody::Empty,
    }
}

/// Whether the request is well-typed for this schema
fn request_fits_schema(op: QueryOp, ctx: &NodeContext, request: &QueryRequest) -> bool {
    if request.predicates.iter().any(|p| p.check(&ctx.schema).is_err()) {
        return false;
    }
    match op {
        QueryOp::TopK => request
            .field
            .and_then(|f| ctx.schema.field_type(f))
            .is_some_and(|ty| ty.is_ordered()),
        QueryOp::Aggregate => match request.field {
            Some(f) => ctx.schema.field_type(f).is_some_and(|ty| ty.is_ordered()),
            None => true,
        },
        QueryOp::Knn => request.vector.len() == ctx.schema.embedding_dim,
        QueryOp::Range => request
            .region
            .as_ref()
            .is_none_or(|(min, max)| min.dims() == ctx.codec.dims() && max.dims() == ctx.codec.dims()),
        QueryOp::Scan | QueryOp::Point => true,
    }
}

/// Zone maps prove no record can satisfy some predicate
fn zones_exclude(tile: &Partition, request: &QueryRequest) -> bool {
    request.predicates.iter().any(|p| {
        tile.zone(p.field)
            .is_some_and(|z| !p.admits_range(z.min(), z.max()))
    })
}

fn evaluate_reduced(
    op: QueryOp,
    tile: Option<&Partition>,
    ctx: &NodeContext,
    request: &QueryRequest,
) -> PartialResult {
    if !request_fits_schema(op, ctx, request) {
        return PartialResult::sentinel(Sentinel::PredicateMismatch);
    }
    let Some(tile) = tile.filter(|t| !t.is_empty()) else {
        return PartialResult::sentinel(Sentinel::RangeNoOverlap);
    };
    let span = tile.span();
    if !request.spans.is_empty() && !request.spans.iter().any(|s| s.intersects(&span)) {
        return PartialResult::sentinel(Sentinel::RangeNoOverlap);
    }
    if zones_exclude(tile, request) {
        return PartialResult::sentinel(Sentinel::RangeNoOverlap);
    }

    let mut scan = Scan::new(op, ctx, request);
    for record in candidates(tile, request) {
        if !scan.visit(tile, record) {
            break;
        }
    }
    scan.finish()
}

/// Records that may match, each yielded once, in sorted order.
fn candidates<'a>(tile: &'a Partition, request: &'a QueryRequest) -> Box<dyn Iterator<Item = &'a Record> + 'a> {
    let in_spans = move |r: &Record| request.spans.is_empty() || request.spans.iter().any(|s| s.contains(r.key));

    let bitmap_positions = tile.bitmap().and_then(|bitmap| {
        request
            .predicates
            .iter()
            .find(|p| p.field == bitmap.field() && p.op == PredicateOp::Eq)
            .map(|p| bitmap.positions(p.value.to_word()))
    });
    if let Some(positions) = bitmap_positions {
        let records = tile.records();
        return Box::new(
            positions
                .into_iter()
                .filter_map(move |pos| records.get(pos))
                .filter(move |r| in_spans(*r)),
        );
    }
    if request.spans.is_empty() {
        return Box::new(tile.records().iter());
    }
    let span = tile.span();
    Box::new(
        request
            .spans
            .iter()
            .filter(move |s| s.intersects(&span))
            .flat_map(move |s: &KeySpan| tile.records_in(s).iter()),
    )
}

/// Per-operation accumulator for one partition scan
struct Scan<'a> {
    op: QueryOp,
    ctx: &'a NodeContext,
    request: &'a QueryRequest,
    body: PartialBody,
    overflowed: bool,
}

impl<'a> Scan<'a> {
    fn new(op: QueryOp, ctx: &'a NodeContext, request: &'a QueryRequest) -> Self {
        Self {
            op,
            ctx,
            request,
            body: identity(op, request),
            overflowed: false,
        }
    }

    fn matches(&self, record: &Record) -> bool {
        if !self.request.predicates.iter().all(|p| p.matches(record)) {
            return false;
        }
        match &self.request.region {
            Some((min, max)) => self
                .ctx
                .codec
                .decode(record.key)
                .is_ok_and(|coords| coords.within(min, max)),
            None => true,
        }
    }

    /// Returns false once no further record can change the result.
    fn visit(&mut self, tile: &Partition, record: &Record) -> bool {
        if !self.matches(record) {
            return true;
        }
        let id = RecordRef::new(tile.id(), record.id);
        match &mut self.body {
            PartialBody::Ids {
                ids,
                capacity,
                truncated,
            } => {
                if ids.len() >= *capacity {
                    *truncated = true;
                    self.overflowed = true;
                    return false;
                }
                ids.push(id);
            }
            PartialBody::Aggregate(state) => {
                state.add(self.request.field.and_then(|f| record.field(f)));
            }
            PartialBody::Best(best) => {
                let rank = match self.op {
                    QueryOp::Knn => i64::from(record.squared_distance(&self.request.vector)),
                    _ => self
                        .request
                        .field
                        .and_then(|f| record.field(f))
                        .map_or(i64::MAX, |v| -v),
                };
                best.offer(Scored::new(rank, id));
            }
            PartialBody::Empty => {}
        }
        true
    }

    fn finish(self) -> PartialResult {
        let mut body = self.body;
        if let PartialBody::Ids { ids, .. } = &mut body {
            ids.sort_unstable();
        }
        let mut partial = PartialResult::new(body);
        partial.tally.evaluated = 1;
        if self.overflowed {
            partial.tally.record(Sentinel::ResultOverflow);
        }
        partial
    }
}
