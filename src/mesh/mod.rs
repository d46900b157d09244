//! Mesh executor
//!
//! Simulates a two-dimensional grid of isolated compute nodes joined by
//! point-to-point links to their four neighbours. Nodes exchange fixed-size
//! messages, evaluate queries against the one partition they host, and
//! reduce partial results west along each row, then north along column 0,
//! back to the host.
//!
//! # Invariants
//!
//! - A node reads only its own partition and its own inboxes
//! - Messages on one link arrive in the order they were sent
//! - No ordering holds across different source ports
//! - Every reduction merge is commutative and associative, so the final
//!   result is identical under any scheduling order
//! - A cancelled query leaves no state behind on any node

mod errors;
mod eval;
mod grid;
mod kbest;
mod message;
mod node;
mod partial;
mod request;
mod scheduler;
mod sentinel;
mod topology;

pub use errors::{MeshError, MeshErrorCode, MeshResult, Severity};
pub use eval::{evaluate, Evaluation, NodeContext};
pub use grid::{ExecutorStats, MeshExecutor, MAX_GRID_EDGE};
pub use kbest::{KBest, Scored};
pub use message::{
    Message, Payload, QueryHeader, QueryId, QueryOp, Tag, FIELD_LOCAL_ID, FIELD_NONE, PAYLOAD_WORDS,
};
pub use node::{MeshNode, NodeState, NodeStats, Outgoing};
pub use partial::{AggregateOp, AggregateState, AggregateValue, NodeTally, PartialBody, PartialResult};
pub use request::{QueryRequest, RequestAssembler};
pub use scheduler::{Candidate, Scheduler, SchedulerPolicy};
pub use sentinel::{Sentinel, RESERVED_MIN};
pub use topology::{GridShape, NodeCoord, Port};
