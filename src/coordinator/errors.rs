//! Coordinator error types
//!
//! Error codes:
//! - TESS_QUERY_TIMEOUT (ERROR)
//! - TESS_MALFORMED_PLAN (ERROR)
//! - TESS_INGEST_REJECTED (ERROR)
//! - TESS_NODE_FAILURE (ERROR)
//! - TESS_STORAGE_FAILURE (ERROR, FATAL when the log is corrupt)
//! - TESS_DEPLOYMENT_FAILED (FATAL)
//!
//! A timeout is an error, never an empty answer: callers can always tell
//! "the mesh found nothing" apart from "the mesh did not finish".

use std::fmt;

use crate::config::ConfigError;
use crate::curve::CurveError;
use crate::mesh::MeshError;
use crate::partition::PartitionError;
use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The request fails, the engine keeps serving
    Error,
    /// Mesh and host copy may disagree; the engine must stop
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorErrorCode {
    /// Budget (wall clock or mesh steps) ran out; the query was cancelled
    QueryTimeout,
    /// The request cannot be turned into mesh messages
    MalformedPlan,
    /// Record refused before anything was written
    IngestRejected,
    /// A targeted node answered with an error sentinel
    NodeFailure,
    StorageFailure,
    /// A partition image could not be (re)deployed
    DeploymentFailed,
}

impl CoordinatorErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorErrorCode::QueryTimeout => "TESS_QUERY_TIMEOUT",
            CoordinatorErrorCode::MalformedPlan => "TESS_MALFORMED_PLAN",
            CoordinatorErrorCode::IngestRejected => "TESS_INGEST_REJECTED",
            CoordinatorErrorCode::NodeFailure => "TESS_NODE_FAILURE",
            CoordinatorErrorCode::StorageFailure => "TESS_STORAGE_FAILURE",
            CoordinatorErrorCode::DeploymentFailed => "TESS_DEPLOYMENT_FAILED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            CoordinatorErrorCode::DeploymentFailed => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for CoordinatorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct CoordinatorError {
    code: CoordinatorErrorCode,
    message: String,
    /// Set when the underlying failure is fatal regardless of the code
    fatal: bool,
}

impl CoordinatorError {
    fn new(code: CoordinatorErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fatal: false,
        }
    }

    pub fn timeout(query: u32, steps: u64, elapsed_ms: u128) -> Self {
        Self::new(
            CoordinatorErrorCode::QueryTimeout,
            format!(
                "Query {} cancelled after {} steps ({} ms)",
                query, steps, elapsed_ms
            ),
        )
    }

    /// A read that did not get an answer from the coordinator in time
    pub fn wait_timeout(waited_ms: u128) -> Self {
        Self::new(
            CoordinatorErrorCode::QueryTimeout,
            format!("Query abandoned after waiting {} ms for the coordinator", waited_ms),
        )
    }

    pub fn malformed_plan(reason: impl Into<String>) -> Self {
        Self::new(CoordinatorErrorCode::MalformedPlan, reason)
    }

    pub fn ingest_rejected(reason: impl Into<String>) -> Self {
        Self::new(CoordinatorErrorCode::IngestRejected, reason)
    }

    pub fn node_failure(reason: impl Into<String>) -> Self {
        Self::new(CoordinatorErrorCode::NodeFailure, reason)
    }

    pub fn deployment_failed(reason: impl Into<String>) -> Self {
        Self::new(CoordinatorErrorCode::DeploymentFailed, reason)
    }

    pub fn code(&self) -> CoordinatorErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        if self.fatal {
            Severity::Fatal
        } else {
            self.code.severity()
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_timeout(&self) -> bool {
        self.code == CoordinatorErrorCode::QueryTimeout
    }
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code.code(), self.message)
    }
}

impl std::error::Error for CoordinatorError {}

impl From<StorageError> for CoordinatorError {
    fn from(err: StorageError) -> Self {
        Self {
            fatal: err.is_fatal(),
            ..Self::new(CoordinatorErrorCode::StorageFailure, err.to_string())
        }
    }
}

impl From<PartitionError> for CoordinatorError {
    fn from(err: PartitionError) -> Self {
        Self {
            fatal: err.is_fatal(),
            ..Self::new(CoordinatorErrorCode::IngestRejected, err.to_string())
        }
    }
}

impl From<CurveError> for CoordinatorError {
    fn from(err: CurveError) -> Self {
        Self::malformed_plan(err.to_string())
    }
}

impl From<MeshError> for CoordinatorError {
    fn from(err: MeshError) -> Self {
        if err.is_fatal() {
            Self::deployment_failed(err.to_string())
        } else {
            Self::malformed_plan(err.to_string())
        }
    }
}

impl From<ConfigError> for CoordinatorError {
    fn from(err: ConfigError) -> Self {
        Self::deployment_failed(err.to_string())
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
