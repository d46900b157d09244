//! Partition (tile) storage
//!
//! Records are fixed-width, sorted by spatial key, and grouped into
//! fixed-capacity partitions. Each partition fits one mesh node: the
//! capacity plan derived from the schema bounds how many records an arena
//! holds, and the store splits a full partition rather than growing it.
//!
//! # Invariants
//!
//! - Records inside a partition are ascending by `(key, id)`
//! - A partition image never exceeds the node capacity
//! - Partition spans tile the key space with no overlap
//! - The learned index is refitted before any mutation returns

mod assignment;
mod capacity;
mod checksum;
mod errors;
mod image;
mod predicate;
mod record;
mod schema;
mod store;
mod tile;

pub use assignment::{PartitionAssignment, Placement};
pub use capacity::{CapacityPlan, CapacityReport, DEFAULT_NODE_CAPACITY, MIN_RECORDS_PER_PARTITION};
pub use checksum::compute_checksum;
pub use errors::{PartitionError, PartitionErrorCode, PartitionResult, Severity};
pub use image::{block_footprint, IMAGE_MAGIC, IMAGE_VERSION, METADATA_LEN, TRAILER_LEN};
pub use predicate::{FieldValue, Predicate, PredicateOp, TypeMismatch};
pub use record::{quantize_embedding, LocalId, PartitionId, Record, RecordRef};
pub use schema::{FieldType, RecordSchema, MAX_EDGES, MAX_EMBEDDING_DIM, MAX_FIELDS};
pub use store::{InsertOutcome, MergeSignal, PartitionStore, SplitSignal};
pub use tile::Partition;
