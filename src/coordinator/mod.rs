//! Query coordination
//!
//! The host side of the engine: ingest and maintenance of partitions,
//! planning queries into mesh messages, driving the mesh under a budget,
//! and turning the reduced partial into an answer with an explicit status.

mod coordinator;
mod errors;
mod result;
mod service;

pub use coordinator::{IngestReceipt, QueryCoordinator};
pub use errors::{CoordinatorError, CoordinatorErrorCode, CoordinatorResult, Severity};
pub use result::{
    Neighbor, QueryOutcome, QueryResponse, QuerySpec, QueryStatus, Ranked, Traversal, Visit,
};
pub use service::QueryService;
