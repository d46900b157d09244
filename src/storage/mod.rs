//! Durable record storage
//!
//! The engine's external collaborator. The coordinator writes every record
//! here before acknowledging an ingest, and hydrates full records from here
//! after a query returns identifiers. Nothing beyond "the write happens
//! before the acknowledgment" is assumed: there are no transactions.

mod errors;
mod log;
mod memory;

pub use errors::{Severity, StorageError, StorageErrorCode, StorageResult};
pub use log::{RecordLog, LOG_FILE_NAME};
pub use memory::MemoryRecordStore;

use crate::partition::{Record, RecordRef};

/// Position of a write in the durable log
pub type WalOffset = u64;

/// Durable home of full records.
///
/// Records are identified by local id; the partition half of a
/// [`RecordRef`] is ignored because splits move records between partitions.
pub trait RecordStore: Send {
    /// Persists `record`; returns once the write is durable.
    fn durable_insert(&mut self, record: &Record) -> StorageResult<WalOffset>;

    /// Persists the deletion of `id`.
    fn durable_delete(&mut self, id: RecordRef) -> StorageResult<WalOffset>;

    /// Full records for `ids`, in the order requested.
    fn hydrate(&self, ids: &[RecordRef]) -> StorageResult<Vec<Record>>;

    /// Every live record, ascending by local id. Used to rebuild the
    /// partitions on startup.
    fn live_records(&self) -> StorageResult<Vec<Record>>;
}
