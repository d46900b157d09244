//! Host-side query coordinator
//!
//! Owns the host copy of every partition, the simulated mesh, and the
//! durable record store. Writes go to the record store first, then to the
//! host copy, then to the affected nodes as fresh tile images. Queries are
//! turned into mesh messages, injected, and stepped until the answer
//! leaves the root or the budget runs out.
//!
//! A query that runs out of budget is cancelled on every node before the
//! error is returned, so a timed-out query never leaves state behind.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::errors::{CoordinatorError, CoordinatorResult};
use super::result::{
    Neighbor, QueryOutcome, QueryResponse, QuerySpec, QueryStatus, Ranked, Traversal, Visit,
};
use crate::config::EngineConfig;
use crate::curve::{CoordinateVector, CurveCodec, SpatialKey};
use crate::mesh::{
    AggregateOp, AggregateValue, Message, MeshExecutor, NodeCoord, PartialResult, QueryId,
    QueryRequest, Sentinel,
};
use crate::observability::{log_event, Event, MetricsRegistry, ObservationScope};
use crate::partition::{
    quantize_embedding, LocalId, MergeSignal, PartitionErrorCode, PartitionId, PartitionStore,
    Predicate, Record, RecordRef, SplitSignal,
};
use crate::storage::{MemoryRecordStore, RecordLog, RecordStore, WalOffset};

/// Acknowledgment of a durable, deployed insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReceipt {
    pub record: RecordRef,
    /// Position of the write in the record store
    pub offset: WalOffset,
    pub split: Option<SplitSignal>,
}

/// Messages for one query, ready to inject
struct Plan {
    query: QueryId,
    messages: Vec<Message>,
    /// Node the query is routed to; broadcast when `None`
    target: Option<NodeCoord>,
}

/// The message that answered a query
struct Answer {
    message: Message,
    steps: u64,
}

/// How a reduced answer is turned into a response
#[derive(Debug, Clone, Copy)]
enum Shape {
    Ids,
    Neighbors,
    Ranked,
    Aggregate(AggregateOp),
    Point,
}

/// Steps a cancel may take to drain, independent of the query budget
const CANCEL_STEP_LIMIT: u64 = 100_000;

fn node_label(node: NodeCoord) -> String {
    format!("({}, {})", node.x, node.y)
}

pub struct QueryCoordinator {
    /// Identifies one engine lifetime in the start and ready events
    instance: Uuid,
    config: EngineConfig,
    codec: CurveCodec,
    store: PartitionStore,
    mesh: MeshExecutor,
    records: Box<dyn RecordStore>,
    metrics: Arc<MetricsRegistry>,
    next_query: QueryId,
}

impl QueryCoordinator {
    /// Starts an engine with the record store the config asks for: the
    /// record log under `storage.data_dir`, or memory when unset.
    pub fn open(config: EngineConfig) -> CoordinatorResult<Self> {
        let records: Box<dyn RecordStore> = match &config.storage.data_dir {
            Some(dir) => Box::new(RecordLog::open(dir, config.schema.clone())?),
            None => Box::new(MemoryRecordStore::new()),
        };
        Self::with_store(config, records)
    }

    /// Starts an engine over `records`, rebuilding partitions from every
    /// live record it already holds, then deploys one tile per partition.
    pub fn with_store(config: EngineConfig, records: Box<dyn RecordStore>) -> CoordinatorResult<Self> {
        config.validate()?;
        let instance = Uuid::new_v4();
        let shape = config.mesh.shape();
        log_event(
            Event::EngineStart,
            &[
                ("instance", &instance.to_string()),
                ("width", &shape.width.to_string()),
                ("height", &shape.height.to_string()),
                ("dims", &config.curve.dims.to_string()),
            ],
        );

        let codec = config.codec()?;
        let mesh = MeshExecutor::new(shape, config.node_context()?, config.mesh.scheduler)?;
        let store = PartitionStore::new(
            config.schema.clone(),
            config.capacity_plan()?,
            codec.key_space(),
            shape.coords(),
            config.mesh.initial_partitions,
        )
        .map_err(|e| CoordinatorError::deployment_failed(e.to_string()))?;

        let mut coordinator = Self {
            instance,
            config,
            codec,
            store,
            mesh,
            records,
            metrics: Arc::new(MetricsRegistry::new()),
            next_query: 1,
        };

        let recovered = coordinator.records.live_records()?;
        for record in recovered.iter().cloned() {
            coordinator
                .store
                .insert(record)
                .map_err(|e| CoordinatorError::deployment_failed(format!("replaying record log: {}", e)))?;
        }
        let partitions: Vec<PartitionId> = coordinator.store.partitions().map(|p| p.id()).collect();
        for pid in partitions {
            coordinator.deploy(pid)?;
        }
        log_event(
            Event::EngineReady,
            &[
                ("instance", &instance.to_string()),
                ("partitions", &coordinator.store.assignment().len().to_string()),
                ("records", &recovered.len().to_string()),
            ],
        );
        Ok(coordinator)
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec(&self) -> &CurveCodec {
        &self.codec
    }

    /// Host copy of the partitions
    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    pub fn mesh(&self) -> &MeshExecutor {
        &self.mesh
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// Full records for identifiers a query returned
    pub fn hydrate(&self, ids: &[RecordRef]) -> CoordinatorResult<Vec<Record>> {
        Ok(self.records.hydrate(ids)?)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Stores a record durably, then places it and redeploys the tiles it
    /// touched.
    ///
    /// # Errors
    ///
    /// `TESS_INGEST_REJECTED` for schema violations, a duplicate id, a key
    /// outside the key space, or a full mesh. Nothing is left in the record
    /// store when the insert is rejected.
    pub fn ingest(&mut self, record: Record) -> CoordinatorResult<IngestReceipt> {
        let scope = ObservationScope::with_fields("INGEST", vec![("local_id", record.id.to_string())]);
        match self.ingest_inner(record) {
            Ok(receipt) => {
                scope.complete_with(&[("partition", &receipt.record.partition.to_string())]);
                Ok(receipt)
            }
            Err(err) => {
                scope.fail(err.message());
                Err(err)
            }
        }
    }

    fn ingest_inner(&mut self, record: Record) -> CoordinatorResult<IngestReceipt> {
        record.validate(self.store.schema())?;
        if self.store.locate(record.id).is_some() {
            return Err(CoordinatorError::ingest_rejected(format!(
                "local id {} already in use",
                record.id
            )));
        }
        if self.store.placement_for_key(record.key).is_none() {
            return Err(CoordinatorError::ingest_rejected(format!(
                "key {:#x} is outside the key space",
                record.key
            )));
        }

        let offset = self.records.durable_insert(&record)?;
        let id = record.id;
        let outcome = match self.store.insert(record) {
            Ok(outcome) => outcome,
            Err(err) => {
                // Roll back so a restart does not resurrect the record.
                self.records.durable_delete(RecordRef::new(0, id))?;
                if err.code() == PartitionErrorCode::CapacityExceeded {
                    log_event(Event::MeshFull, &[("local_id", &id.to_string()), ("reason", err.message())]);
                }
                return Err(err.into());
            }
        };
        self.metrics.increment_records_ingested();

        let mut touched = vec![outcome.record.partition];
        if let Some(split) = &outcome.split {
            self.note_split(split);
            touched.extend([split.parent, split.child]);
        }
        self.deploy_all(touched)?;
        Ok(IngestReceipt {
            record: outcome.record,
            offset,
            split: outcome.split,
        })
    }

    /// Encodes `coords`, assigns a fresh local id, and ingests.
    pub fn ingest_at(
        &mut self,
        coords: &[u32],
        fields: Vec<i64>,
        embedding: &[f32],
        edges: Vec<RecordRef>,
    ) -> CoordinatorResult<IngestReceipt> {
        let key = self.codec.encode(&CoordinateVector::new(coords.to_vec()))?;
        let id = self.store.allocate_id();
        let record = Record::new(key, id, fields, quantize_embedding(embedding), edges);
        self.ingest(record)
    }

    /// Deletes a record everywhere. Returns the removed record, or `None`
    /// when the id is unknown.
    pub fn delete(&mut self, id: LocalId) -> CoordinatorResult<Option<Record>> {
        let Some(current) = self.store.locate(id) else {
            return Ok(None);
        };
        self.records.durable_delete(current)?;
        let Some((pid, record)) = self.store.delete(id)? else {
            return Ok(None);
        };
        self.deploy(pid)?;
        self.metrics.increment_records_deleted();
        Ok(Some(record))
    }

    /// Replaces a record (same local id). A key change moves the record and
    /// may split its new partition. Returns the partitions redeployed.
    pub fn update(&mut self, record: Record) -> CoordinatorResult<Vec<PartitionId>> {
        record.validate(self.store.schema())?;
        let Some(current) = self.store.locate(record.id) else {
            return Err(CoordinatorError::ingest_rejected(format!(
                "local id {} does not exist",
                record.id
            )));
        };
        let previous = self.records.hydrate(&[current])?.pop();
        self.records.durable_insert(&record)?;
        let (touched, split) = match self.store.update(record) {
            Ok(result) => result,
            Err(err) => {
                if let Some(previous) = previous {
                    self.records.durable_insert(&previous)?;
                }
                return Err(err.into());
            }
        };
        if let Some(split) = &split {
            self.note_split(split);
        }
        self.deploy_all(touched.clone())?;
        Ok(touched)
    }

    /// Merges partition `left` with its right neighbour and frees the
    /// neighbour's node.
    pub fn merge_partitions(&mut self, left: PartitionId) -> CoordinatorResult<MergeSignal> {
        let signal = self.store.merge_adjacent(left)?;
        self.deploy(signal.survivor)?;
        self.mesh.clear_tile(signal.released)?;
        self.metrics.increment_merges();
        log_event(
            Event::TileMerged,
            &[
                ("survivor", &signal.survivor.to_string()),
                ("absorbed", &signal.absorbed.to_string()),
            ],
        );
        log_event(Event::TileCleared, &[("node", &node_label(signal.released))]);
        Ok(signal)
    }

    fn note_split(&self, split: &SplitSignal) {
        self.metrics.increment_splits();
        log_event(
            Event::TileSplit,
            &[
                ("parent", &split.parent.to_string()),
                ("child", &split.child.to_string()),
                ("boundary", &format!("{:#x}", split.boundary)),
                ("node", &node_label(split.node)),
            ],
        );
    }

    fn deploy_all(&mut self, mut partitions: Vec<PartitionId>) -> CoordinatorResult<()> {
        partitions.sort_unstable();
        partitions.dedup();
        for pid in partitions {
            self.deploy(pid)?;
        }
        Ok(())
    }

    /// Ships the host copy of `partition` to its node.
    fn deploy(&mut self, partition: PartitionId) -> CoordinatorResult<()> {
        let node = self
            .store
            .assignment()
            .placement(partition)
            .map(|p| p.node)
            .ok_or_else(|| {
                CoordinatorError::deployment_failed(format!("partition {} is not placed", partition))
            })?;
        let image = self
            .store
            .export(partition)
            .map_err(|e| CoordinatorError::deployment_failed(e.to_string()))?;
        match self.mesh.load_tile(node, &image) {
            Ok(_) => {
                self.metrics.increment_tiles_deployed();
                log_event(
                    Event::TileDeployed,
                    &[
                        ("partition", &partition.to_string()),
                        ("node", &node_label(node)),
                        ("bytes", &image.len().to_string()),
                    ],
                );
                Ok(())
            }
            Err(err) => {
                log_event(
                    Event::TileRejected,
                    &[
                        ("partition", &partition.to_string()),
                        ("node", &node_label(node)),
                        ("reason", err.message()),
                    ],
                );
                Err(CoordinatorError::deployment_failed(err.to_string()))
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Ids of every record matching all `predicates`, ascending.
    pub fn execute_scan(&mut self, predicates: Vec<Predicate>) -> CoordinatorResult<QueryOutcome<Vec<RecordRef>>> {
        let plan = self.plan_scan(predicates)?;
        let answer = self.run_single("scan", plan)?;
        self.ids_outcome(answer)
    }

    /// Ids of records inside the inclusive box `[min, max]` that match all
    /// `predicates`.
    pub fn execute_range(
        &mut self,
        min: &[u32],
        max: &[u32],
        predicates: Vec<Predicate>,
    ) -> CoordinatorResult<QueryOutcome<Vec<RecordRef>>> {
        let plan = self.plan_range(min, max, predicates)?;
        let answer = self.run_single("range", plan)?;
        self.ids_outcome(answer)
    }

    /// Record stored under exactly `key`, routed to the one node that can
    /// hold it. `None` when no record has the key.
    pub fn execute_point_lookup(&mut self, key: SpatialKey) -> CoordinatorResult<Option<RecordRef>> {
        let Some(plan) = self.plan_point(key)? else {
            return Ok(None);
        };
        let answer = self.run_single("point", plan)?;
        point_answer(answer)
    }

    /// Point lookup by coordinates
    pub fn execute_point_at(&mut self, coords: &[u32]) -> CoordinatorResult<Option<RecordRef>> {
        let key = self.codec.encode(&CoordinateVector::new(coords.to_vec()))?;
        self.execute_point_lookup(key)
    }

    /// `k` records with the smallest squared distance to `vector`, nearest
    /// first.
    pub fn execute_knn(
        &mut self,
        vector: &[f32],
        k: u32,
        predicates: Vec<Predicate>,
    ) -> CoordinatorResult<QueryOutcome<Vec<Neighbor>>> {
        let plan = self.plan_knn(vector, k, predicates)?;
        let answer = self.run_single("knn", plan)?;
        self.neighbors_outcome(answer)
    }

    /// `k` records with the largest value of `field`, largest first.
    pub fn execute_topk(
        &mut self,
        field: u8,
        k: u32,
        predicates: Vec<Predicate>,
    ) -> CoordinatorResult<QueryOutcome<Vec<Ranked>>> {
        let plan = self.plan_topk(field, k, predicates)?;
        let answer = self.run_single("top_k", plan)?;
        self.ranked_outcome(answer)
    }

    /// Scalar aggregate over matching records. `field` may be omitted for
    /// a count. The average of zero records is `Avg(None)`.
    pub fn execute_aggregate(
        &mut self,
        op: AggregateOp,
        field: Option<u8>,
        predicates: Vec<Predicate>,
    ) -> CoordinatorResult<QueryOutcome<AggregateValue>> {
        let plan = self.plan_aggregate(op, field, predicates)?;
        let answer = self.run_single("aggregate", plan)?;
        self.aggregate_outcome(op, answer)
    }

    /// Breadth-first walk over graph edges from `start`, at most
    /// `max_depth` hops. Every hop is confirmed on the mesh; edges written
    /// before a split are followed to wherever the target lives now.
    pub fn execute_traverse(&mut self, start: LocalId, max_depth: u32) -> CoordinatorResult<Traversal> {
        if max_depth > self.config.query.max_traverse_depth {
            return Err(CoordinatorError::malformed_plan(format!(
                "traversal depth {} exceeds limit {}",
                max_depth, self.config.query.max_traverse_depth
            )));
        }
        let scope = ObservationScope::with_fields(
            "TRAVERSE",
            vec![("start", start.to_string()), ("max_depth", max_depth.to_string())],
        );
        match self.traverse(start, max_depth) {
            Ok(traversal) => {
                scope.complete_with(&[("visited", &traversal.visited.len().to_string())]);
                Ok(traversal)
            }
            Err(err) => {
                scope.fail(err.message());
                Err(err)
            }
        }
    }

    fn traverse(&mut self, start: LocalId, max_depth: u32) -> CoordinatorResult<Traversal> {
        let mut traversal = Traversal {
            visited: Vec::new(),
            dangling: Vec::new(),
            depth_reached: 0,
        };
        let Some(origin) = self.store.locate(start) else {
            return Ok(traversal);
        };
        let mut seen = HashSet::from([start]);
        let mut frontier = vec![origin];
        for depth in 0..=max_depth {
            if frontier.is_empty() {
                break;
            }
            let found = self.confirm(&frontier)?;
            let mut live = Vec::new();
            for (edge, hit) in frontier.iter().zip(found) {
                match hit {
                    Some(id) => {
                        traversal.visited.push(Visit { id, depth });
                        live.push(id);
                    }
                    None => traversal.dangling.push(*edge),
                }
            }
            if !live.is_empty() {
                traversal.depth_reached = depth;
            }
            if depth == max_depth {
                break;
            }
            let mut next = Vec::new();
            for record in self.records.hydrate(&live)? {
                for edge in record.edges {
                    if seen.insert(edge.local_id) {
                        next.push(edge);
                    }
                }
            }
            frontier = next;
        }
        Ok(traversal)
    }

    /// Looks up each edge target by local id on every partition that may
    /// hold it now. All lookups run on the mesh concurrently.
    fn confirm(&mut self, edges: &[RecordRef]) -> CoordinatorResult<Vec<Option<RecordRef>>> {
        let mut plans = Vec::new();
        let mut owners = Vec::new();
        for (i, edge) in edges.iter().enumerate() {
            let mut candidates = self.store.resolve(edge.partition);
            if let Some(current) = self.store.locate(edge.local_id) {
                candidates.push(current.partition);
            }
            candidates.sort_unstable();
            candidates.dedup();
            for pid in candidates {
                let Some(node) = self.store.assignment().placement(pid).map(|p| p.node) else {
                    continue;
                };
                plans.push(self.plan(&QueryRequest::point_by_id(edge.local_id), Some(node))?);
                owners.push(i);
            }
        }

        let mut found = vec![None; edges.len()];
        for (owner, answer) in owners.into_iter().zip(self.run(plans)) {
            if let Some(id) = point_answer(answer?)? {
                found[owner].get_or_insert(id);
            }
        }
        Ok(found)
    }

    /// Runs one query described by `spec`.
    pub fn execute(&mut self, spec: QuerySpec) -> CoordinatorResult<QueryResponse> {
        if let QuerySpec::Traverse { start, max_depth } = spec {
            let depth = max_depth.unwrap_or(self.config.query.max_traverse_depth);
            return self.execute_traverse(start, depth).map(QueryResponse::Traversal);
        }
        self.execute_batch(vec![spec])
            .pop()
            .unwrap_or_else(|| Err(CoordinatorError::malformed_plan("empty batch")))
    }

    /// Runs `specs` concurrently on the mesh. Each query succeeds or fails
    /// on its own; results come back in request order. Traversals run one
    /// after another once the concurrent queries are done.
    pub fn execute_batch(&mut self, specs: Vec<QuerySpec>) -> Vec<CoordinatorResult<QueryResponse>> {
        let scope = ObservationScope::with_fields("QUERY_BATCH", vec![("queries", specs.len().to_string())]);
        let mut results: Vec<Option<CoordinatorResult<QueryResponse>>> = Vec::with_capacity(specs.len());
        let mut plans = Vec::new();
        let mut waiting = Vec::new();
        let mut traversals = Vec::new();

        for (i, spec) in specs.iter().enumerate() {
            results.push(None);
            match self.prepare(spec) {
                Ok(Prepared::Plan(plan, shape)) => {
                    plans.push(plan);
                    waiting.push((i, shape));
                }
                Ok(Prepared::NoPlacement) => results[i] = Some(Ok(QueryResponse::Point { found: None })),
                Ok(Prepared::Traverse { start, max_depth }) => traversals.push((i, start, max_depth)),
                Err(err) => results[i] = Some(Err(err)),
            }
        }

        let answers = self.run(plans);
        for ((i, shape), answer) in waiting.into_iter().zip(answers) {
            results[i] = Some(answer.and_then(|a| self.respond(shape, a)));
        }
        for (i, start, max_depth) in traversals {
            results[i] = Some(self.execute_traverse(start, max_depth).map(QueryResponse::Traversal));
        }

        let failed = results.iter().filter(|r| matches!(r, Some(Err(_)))).count();
        scope.complete_with(&[("failed", &failed.to_string())]);
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(CoordinatorError::malformed_plan("query was not planned"))))
            .collect()
    }

    fn prepare(&mut self, spec: &QuerySpec) -> CoordinatorResult<Prepared> {
        let prepared = match spec {
            QuerySpec::Scan { predicates } => Prepared::Plan(self.plan_scan(predicates.clone())?, Shape::Ids),
            QuerySpec::Range { min, max, predicates } => {
                Prepared::Plan(self.plan_range(min, max, predicates.clone())?, Shape::Ids)
            }
            QuerySpec::Point { coords } => {
                let key = self.codec.encode(&CoordinateVector::new(coords.clone()))?;
                match self.plan_point(key)? {
                    Some(plan) => Prepared::Plan(plan, Shape::Point),
                    None => Prepared::NoPlacement,
                }
            }
            QuerySpec::Knn { vector, k, predicates } => {
                Prepared::Plan(self.plan_knn(vector, *k, predicates.clone())?, Shape::Neighbors)
            }
            QuerySpec::TopK { field, k, predicates } => {
                Prepared::Plan(self.plan_topk(*field, *k, predicates.clone())?, Shape::Ranked)
            }
            QuerySpec::Aggregate {
                aggregate,
                field,
                predicates,
            } => Prepared::Plan(
                self.plan_aggregate(*aggregate, *field, predicates.clone())?,
                Shape::Aggregate(*aggregate),
            ),
            QuerySpec::Traverse { start, max_depth } => Prepared::Traverse {
                start: *start,
                max_depth: max_depth.unwrap_or(self.config.query.max_traverse_depth),
            },
        };
        Ok(prepared)
    }

    fn respond(&self, shape: Shape, answer: Answer) -> CoordinatorResult<QueryResponse> {
        match shape {
            Shape::Ids => self.ids_outcome(answer).map(QueryResponse::Ids),
            Shape::Neighbors => self.neighbors_outcome(answer).map(QueryResponse::Neighbors),
            Shape::Ranked => self.ranked_outcome(answer).map(QueryResponse::Ranked),
            Shape::Aggregate(op) => self.aggregate_outcome(op, answer).map(QueryResponse::Aggregate),
            Shape::Point => point_answer(answer).map(|found| QueryResponse::Point { found }),
        }
    }

    // ------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------

    fn allocate_query(&mut self) -> QueryId {
        let query = self.next_query;
        self.next_query = self.next_query.wrapping_add(1).max(1);
        query
    }

    fn plan(&mut self, request: &QueryRequest, target: Option<NodeCoord>) -> CoordinatorResult<Plan> {
        let query = self.allocate_query();
        let messages = request
            .to_messages(query)
            .map_err(|e| CoordinatorError::malformed_plan(e.message()))?;
        Ok(Plan {
            query,
            messages,
            target,
        })
    }

    fn check_k(&self, k: u32) -> CoordinatorResult<()> {
        if k == 0 || k > self.config.query.max_k {
            return Err(CoordinatorError::malformed_plan(format!(
                "k must be between 1 and {}, got {}",
                self.config.query.max_k, k
            )));
        }
        Ok(())
    }

    fn plan_scan(&mut self, predicates: Vec<Predicate>) -> CoordinatorResult<Plan> {
        let request = QueryRequest::scan(predicates, self.config.query.result_capacity);
        self.plan(&request, None)
    }

    fn plan_range(&mut self, min: &[u32], max: &[u32], predicates: Vec<Predicate>) -> CoordinatorResult<Plan> {
        let min = CoordinateVector::new(min.to_vec());
        let max = CoordinateVector::new(max.to_vec());
        let spans = self
            .codec
            .region_to_ranges(&min, &max, self.config.query.max_ranges)?;
        let request = QueryRequest::range(spans, min, max, predicates, self.config.query.result_capacity);
        self.plan(&request, None)
    }

    fn plan_point(&mut self, key: SpatialKey) -> CoordinatorResult<Option<Plan>> {
        let Some(node) = self.store.placement_for_key(key).map(|p| p.node) else {
            return Ok(None);
        };
        self.plan(&QueryRequest::point(key), Some(node)).map(Some)
    }

    fn plan_knn(&mut self, vector: &[f32], k: u32, predicates: Vec<Predicate>) -> CoordinatorResult<Plan> {
        self.check_k(k)?;
        let dim = self.store.schema().embedding_dim;
        if dim == 0 || vector.len() != dim {
            return Err(CoordinatorError::malformed_plan(format!(
                "query vector has {} components, embeddings have {}",
                vector.len(),
                dim
            )));
        }
        let request = QueryRequest::knn(quantize_embedding(vector), k, predicates);
        self.plan(&request, None)
    }

    fn plan_topk(&mut self, field: u8, k: u32, predicates: Vec<Predicate>) -> CoordinatorResult<Plan> {
        self.check_k(k)?;
        self.plan(&QueryRequest::topk(field, k, predicates), None)
    }

    fn plan_aggregate(
        &mut self,
        op: AggregateOp,
        field: Option<u8>,
        predicates: Vec<Predicate>,
    ) -> CoordinatorResult<Plan> {
        if op != AggregateOp::Count && field.is_none() {
            return Err(CoordinatorError::malformed_plan(format!("{:?} needs a field", op)));
        }
        self.plan(&QueryRequest::aggregate(field, predicates), None)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    fn run_single(&mut self, op: &'static str, plan: Plan) -> CoordinatorResult<Answer> {
        let scope = ObservationScope::with_fields(
            "QUERY",
            vec![("op", op.to_string()), ("query", plan.query.to_string())],
        );
        let answer = self
            .run(vec![plan])
            .pop()
            .unwrap_or_else(|| Err(CoordinatorError::malformed_plan("query produced no answer")));
        match &answer {
            Ok(a) => scope.complete_with(&[("steps", &a.steps.to_string())]),
            Err(err) => scope.fail(err.message()),
        }
        answer
    }

    /// Injects every plan, then steps the mesh until each query has
    /// answered or the shared budget is spent. Queries still outstanding
    /// at that point are cancelled and reported as timed out.
    fn run(&mut self, plans: Vec<Plan>) -> Vec<CoordinatorResult<Answer>> {
        let started = Instant::now();
        let budget = Duration::from_millis(self.config.query.budget_ms);
        let max_steps = self.config.query.max_steps;
        let before = self.mesh.stats();

        let mut results: Vec<Option<CoordinatorResult<Answer>>> = Vec::with_capacity(plans.len());
        let mut waiting: HashMap<QueryId, usize> = HashMap::new();
        for (i, plan) in plans.into_iter().enumerate() {
            results.push(None);
            log_event(Event::QueryIssued, &[("query", &plan.query.to_string())]);
            match plan.target {
                Some(target) => {
                    if let Err(err) = self.mesh.configure_route(plan.query, target) {
                        results[i] = Some(Err(err.into()));
                        continue;
                    }
                    self.mesh.inject_root(plan.messages);
                }
                None => self.mesh.inject_broadcast(&plan.messages),
            }
            waiting.insert(plan.query, i);
        }

        let mut steps = 0u64;
        while !waiting.is_empty() && steps < max_steps && started.elapsed() < budget {
            self.mesh.step();
            steps += 1;
            for message in self.mesh.drain_egress() {
                match waiting.remove(&message.query) {
                    Some(i) => {
                        self.metrics.increment_queries_executed();
                        log_event(
                            Event::QueryComplete,
                            &[("query", &message.query.to_string()), ("steps", &steps.to_string())],
                        );
                        results[i] = Some(Ok(Answer { message, steps }));
                    }
                    None => discard_late(&message),
                }
            }
        }

        if !waiting.is_empty() {
            let elapsed = started.elapsed().as_millis();
            let abandoned: Vec<QueryId> = waiting.keys().copied().collect();
            for (&query, &i) in &waiting {
                self.metrics.increment_queries_timed_out();
                log_event(
                    Event::QueryTimeout,
                    &[("query", &query.to_string()), ("steps", &steps.to_string())],
                );
                results[i] = Some(Err(CoordinatorError::timeout(query, steps, elapsed)));
            }
            self.cancel(&abandoned);
        }

        let after = self.mesh.stats();
        self.metrics.add_mesh_activity(
            after.steps.saturating_sub(before.steps),
            after.delivered.saturating_sub(before.delivered),
        );
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(CoordinatorError::malformed_plan("query was not issued"))))
            .collect()
    }

    /// Cancels `queries` on every node and steps until none holds state
    /// for them. Anything they still emit is discarded.
    fn cancel(&mut self, queries: &[QueryId]) {
        for &query in queries {
            self.mesh.broadcast_cancel(query);
        }
        let mut steps = 0u64;
        while queries.iter().any(|&q| self.mesh.holds(q)) && steps < CANCEL_STEP_LIMIT {
            self.mesh.step();
            steps += 1;
            for message in self.mesh.drain_egress() {
                discard_late(&message);
            }
        }
        for &query in queries {
            if !self.mesh.release_cancel(query) {
                log_event(Event::CancelNotDrained, &[("query", &query.to_string())]);
            }
            log_event(Event::QueryCancelled, &[("query", &query.to_string())]);
        }
    }

    // ------------------------------------------------------------------
    // Answers
    // ------------------------------------------------------------------

    fn reduced(&self, answer: Answer) -> CoordinatorResult<(PartialResult, u64)> {
        let steps = answer.steps;
        let query = answer.message.query;
        let partial = answer.message.into_partial().ok_or_else(|| {
            CoordinatorError::node_failure(format!("query {} answered without a partial result", query))
        })?;
        Ok((partial, steps))
    }

    fn qualify<T>(&self, partial: &PartialResult, value: T, steps: u64) -> QueryOutcome<T> {
        let truncated = partial.is_truncated();
        let tally = partial.tally;
        self.metrics.add_nodes_skipped(u64::from(tally.skipped));
        if tally.mismatched > 0 {
            self.metrics.increment_queries_degraded();
            log_event(Event::NodeDegraded, &[("mismatched", &tally.mismatched.to_string())]);
        }
        if truncated {
            self.metrics.increment_queries_truncated();
            log_event(Event::ResultTruncated, &[("overflowed", &tally.overflowed.to_string())]);
        }
        QueryOutcome {
            value,
            status: QueryStatus::from_tally(&tally, truncated),
            tally,
            steps,
        }
    }

    fn ids_outcome(&self, answer: Answer) -> CoordinatorResult<QueryOutcome<Vec<RecordRef>>> {
        let (partial, steps) = self.reduced(answer)?;
        let ids = partial.ids().to_vec();
        Ok(self.qualify(&partial, ids, steps))
    }

    fn neighbors_outcome(&self, answer: Answer) -> CoordinatorResult<QueryOutcome<Vec<Neighbor>>> {
        let (partial, steps) = self.reduced(answer)?;
        let neighbors = partial
            .best()
            .into_iter()
            .map(|s| Neighbor {
                id: s.id,
                distance: u32::try_from(s.rank).unwrap_or(u32::MAX),
            })
            .collect();
        Ok(self.qualify(&partial, neighbors, steps))
    }

    fn ranked_outcome(&self, answer: Answer) -> CoordinatorResult<QueryOutcome<Vec<Ranked>>> {
        let (partial, steps) = self.reduced(answer)?;
        let ranked = partial
            .best()
            .into_iter()
            .map(|s| Ranked {
                id: s.id,
                value: -s.rank,
            })
            .collect();
        Ok(self.qualify(&partial, ranked, steps))
    }

    fn aggregate_outcome(&self, op: AggregateOp, answer: Answer) -> CoordinatorResult<QueryOutcome<AggregateValue>> {
        let (partial, steps) = self.reduced(answer)?;
        let value = partial.aggregate().finalize(op);
        Ok(self.qualify(&partial, value, steps))
    }
}

enum Prepared {
    Plan(Plan, Shape),
    /// Point lookup for a key no partition covers
    NoPlacement,
    Traverse { start: LocalId, max_depth: u32 },
}

fn discard_late(message: &Message) {
    log_event(
        Event::LatePartialDiscarded,
        &[("query", &message.query.to_string()), ("tag", &format!("{:?}", message.tag))],
    );
}

/// Decodes a point reply: `[partition, local id]` or a sentinel word.
fn point_answer(answer: Answer) -> CoordinatorResult<Option<RecordRef>> {
    let [word, local_id] = answer.message.as_words().ok_or_else(|| {
        CoordinatorError::node_failure(format!("query {} answered without a point reply", answer.message.query))
    })?;
    match Sentinel::from_word(word) {
        None => Ok(Some(RecordRef::new(word, local_id))),
        Some(Sentinel::NotFound) | Some(Sentinel::RangeNoOverlap) => Ok(None),
        Some(sentinel) => Err(CoordinatorError::node_failure(format!(
            "point lookup answered {:?}",
            sentinel
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::SchedulerPolicy;
    use crate::partition::{FieldType, FieldValue, PredicateOp, RecordSchema};

    fn config(width: u16, height: u16) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.curve.dims = 2;
        config.curve.bits_per_dim = 4;
        config.schema = RecordSchema::new(vec![FieldType::U32], 0, 0);
        config.mesh.width = width;
        config.mesh.height = height;
        config.mesh.initial_partitions = (width * height) as usize;
        config
    }

    fn filled(width: u16, height: u16) -> QueryCoordinator {
        let mut coordinator = QueryCoordinator::open(config(width, height)).unwrap();
        for x in 0..16u32 {
            for y in 0..16u32 {
                coordinator.ingest_at(&[x, y], vec![i64::from(x + y)], &[], vec![]).unwrap();
            }
        }
        coordinator
    }

    #[test]
    fn test_scan_sees_every_record() {
        let mut coordinator = filled(2, 2);
        let outcome = coordinator
            .execute_scan(vec![Predicate::new(0, PredicateOp::Lt, FieldValue::U32(2))])
            .unwrap();
        // (0,0), (0,1), (1,0)
        assert_eq!(outcome.value.len(), 3);
        assert_eq!(outcome.status, QueryStatus::Complete);
        assert_eq!(outcome.tally.total(), 4);
    }

    #[test]
    fn test_count_matches_record_total() {
        let mut coordinator = filled(3, 2);
        let outcome = coordinator.execute_aggregate(AggregateOp::Count, None, vec![]).unwrap();
        assert_eq!(outcome.value, AggregateValue::Count(256));
    }

    #[test]
    fn test_point_lookup_hit_and_miss() {
        let mut coordinator = QueryCoordinator::open(config(2, 2)).unwrap();
        let receipt = coordinator.ingest_at(&[3, 9], vec![1], &[], vec![]).unwrap();
        assert_eq!(coordinator.execute_point_at(&[3, 9]).unwrap(), Some(receipt.record));
        assert_eq!(coordinator.execute_point_at(&[9, 3]).unwrap(), None);
    }

    #[test]
    fn test_step_budget_times_out_and_cleans_up() {
        let mut cfg = config(3, 3);
        cfg.query.max_steps = 1;
        let mut coordinator = QueryCoordinator::open(cfg).unwrap();
        let err = coordinator.execute_scan(vec![]).unwrap_err();
        assert!(err.is_timeout());
        assert!(coordinator.mesh().is_quiescent());
        assert_eq!(coordinator.metrics().snapshot().queries_timed_out, 1);
    }

    #[test]
    fn test_timed_out_id_can_be_issued_again() {
        let mut cfg = config(3, 3);
        cfg.query.max_steps = 1;
        let mut coordinator = QueryCoordinator::open(cfg).unwrap();
        assert!(coordinator.execute_scan(vec![]).unwrap_err().is_timeout());
        assert_eq!(coordinator.mesh().cancel_markers(), 0);

        // Reissue the same id, as happens once the counter wraps.
        coordinator.next_query = 1;
        coordinator.config.query.max_steps = 10_000;
        let outcome = coordinator.execute_scan(vec![]).unwrap();
        assert!(outcome.value.is_empty());
    }

    #[test]
    fn test_query_ids_wrap_past_zero() {
        let mut coordinator = QueryCoordinator::open(config(2, 2)).unwrap();
        coordinator.next_query = QueryId::MAX;
        assert_eq!(coordinator.allocate_query(), QueryId::MAX);
        assert_eq!(coordinator.allocate_query(), 1);
    }

    #[test]
    fn test_delete_and_update_redeploy() {
        let mut coordinator = QueryCoordinator::open(config(2, 1)).unwrap();
        let a = coordinator.ingest_at(&[1, 1], vec![5], &[], vec![]).unwrap();
        coordinator.ingest_at(&[2, 2], vec![6], &[], vec![]).unwrap();

        let mut moved = coordinator.hydrate(&[a.record]).unwrap().remove(0);
        moved.fields[0] = 50;
        coordinator.update(moved).unwrap();
        let sum = coordinator.execute_aggregate(AggregateOp::Sum, Some(0), vec![]).unwrap();
        assert_eq!(sum.value, AggregateValue::Sum(56));

        assert!(coordinator.delete(a.record.local_id).unwrap().is_some());
        assert!(coordinator.delete(a.record.local_id).unwrap().is_none());
        let sum = coordinator.execute_aggregate(AggregateOp::Sum, Some(0), vec![]).unwrap();
        assert_eq!(sum.value, AggregateValue::Sum(6));
    }

    #[test]
    fn test_rejects_bad_plans() {
        let mut coordinator = QueryCoordinator::open(config(1, 1)).unwrap();
        assert!(coordinator.execute_topk(0, 0, vec![]).is_err());
        assert!(coordinator.execute_aggregate(AggregateOp::Sum, None, vec![]).is_err());
        assert!(coordinator.execute_knn(&[0.5], 1, vec![]).is_err());
        assert!(coordinator.execute_traverse(0, 99).is_err());
    }

    #[test]
    fn test_seeded_scheduler_gives_same_answer() {
        let mut fifo = filled(2, 2);
        let mut cfg = config(2, 2);
        cfg.mesh.scheduler = SchedulerPolicy::Seeded { seed: 5 };
        let mut seeded = QueryCoordinator::open(cfg).unwrap();
        for x in 0..16u32 {
            for y in 0..16u32 {
                seeded.ingest_at(&[x, y], vec![i64::from(x + y)], &[], vec![]).unwrap();
            }
        }
        let a = fifo.execute_topk(0, 5, vec![]).unwrap();
        let b = seeded.execute_topk(0, 5, vec![]).unwrap();
        assert_eq!(a.value, b.value);
        assert_eq!(a.value[0].value, 30);
    }
}
