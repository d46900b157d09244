//! Lifecycle events
//!
//! Every event the engine logs outside an observation scope is listed here,
//! so the set of log lines an operator can see is closed.

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    // Deployment
    EngineStart,
    EngineReady,
    ConfigLoaded,
    /// Node refused a partition image
    TileRejected,
    TileDeployed,
    TileCleared,

    // Partition maintenance
    TileSplit,
    TileMerged,
    /// No free node left for a split
    MeshFull,
    /// A failed move could not put the record back where it was
    UpdateRollbackFailed,

    // Queries
    QueryIssued,
    QueryComplete,
    /// At least one node answered with an error sentinel
    NodeDegraded,
    /// Result buffer overflowed somewhere on the mesh
    ResultTruncated,
    QueryTimeout,
    QueryCancelled,
    /// Partial for a query that is no longer waited on
    LatePartialDiscarded,
    /// Cancel step limit hit while nodes still held the query
    CancelNotDrained,

    // Storage
    RecordLogOpened,
    RecordLogCorruption,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::EngineStart => "ENGINE_START",
            Event::EngineReady => "ENGINE_READY",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::TileRejected => "TILE_REJECTED",
            Event::TileDeployed => "TILE_DEPLOYED",
            Event::TileCleared => "TILE_CLEARED",
            Event::TileSplit => "TILE_SPLIT",
            Event::TileMerged => "TILE_MERGED",
            Event::MeshFull => "MESH_FULL",
            Event::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            Event::QueryIssued => "QUERY_ISSUED",
            Event::QueryComplete => "QUERY_COMPLETE",
            Event::NodeDegraded => "NODE_DEGRADED",
            Event::ResultTruncated => "RESULT_TRUNCATED",
            Event::QueryTimeout => "QUERY_TIMEOUT",
            Event::QueryCancelled => "QUERY_CANCELLED",
            Event::LatePartialDiscarded => "LATE_PARTIAL_DISCARDED",
            Event::CancelNotDrained => "CANCEL_NOT_DRAINED",
            Event::RecordLogOpened => "RECORD_LOG_OPENED",
            Event::RecordLogCorruption => "RECORD_LOG_CORRUPTION",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::RecordLogCorruption => Severity::Fatal,
            Event::TileRejected | Event::UpdateRollbackFailed => Severity::Error,
            Event::MeshFull
            | Event::CancelNotDrained
            | Event::NodeDegraded
            | Event::ResultTruncated
            | Event::QueryTimeout => Severity::Warn,
            Event::QueryIssued | Event::LatePartialDiscarded => Severity::Trace,
            _ => Severity::Info,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_screaming_snake() {
        for event in [Event::TileSplit, Event::QueryTimeout, Event::LatePartialDiscarded] {
            let name = event.as_str();
            assert!(name.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_severity_mapping() {
        assert!(Event::RecordLogCorruption.is_fatal());
        assert_eq!(Event::TileRejected.severity(), Severity::Error);
        assert_eq!(Event::NodeDegraded.severity(), Severity::Warn);
        assert_eq!(Event::TileDeployed.severity(), Severity::Info);
        assert!(!Event::QueryTimeout.is_fatal());
    }
}
