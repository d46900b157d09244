//! Partition error types
//!
//! Error codes:
//! - TESS_CAPACITY_EXCEEDED (ERROR)
//! - TESS_SCHEMA_INVALID (FATAL)
//! - TESS_RECORD_INVALID (ERROR)
//! - TESS_KEY_OUT_OF_RANGE (ERROR)
//! - TESS_PARTITION_NOT_FOUND (ERROR)
//! - TESS_MERGE_REJECTED (ERROR)
//! - TESS_IMAGE_CORRUPT (FATAL)

use std::fmt;

use crate::curve::CurveError;
use crate::index::IndexError;

/// Severity levels for partition errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation rejected, store unchanged
    Error,
    /// Deployment must not proceed
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

/// Partition-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionErrorCode {
    /// Partition is over budget and cannot be split further
    CapacityExceeded,
    /// Record schema cannot fit the node capacity
    SchemaInvalid,
    /// Record does not conform to the schema
    RecordInvalid,
    /// Key lies outside the partition's span
    KeyOutOfRange,
    /// No partition with the given identifier
    PartitionNotFound,
    /// Partitions are not adjacent or do not fit together
    MergeRejected,
    /// Partition image failed validation
    ImageCorrupt,
}

impl PartitionErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            PartitionErrorCode::CapacityExceeded => "TESS_CAPACITY_EXCEEDED",
            PartitionErrorCode::SchemaInvalid => "TESS_SCHEMA_INVALID",
            PartitionErrorCode::RecordInvalid => "TESS_RECORD_INVALID",
            PartitionErrorCode::KeyOutOfRange => "TESS_KEY_OUT_OF_RANGE",
            PartitionErrorCode::PartitionNotFound => "TESS_PARTITION_NOT_FOUND",
            PartitionErrorCode::MergeRejected => "TESS_MERGE_REJECTED",
            PartitionErrorCode::ImageCorrupt => "TESS_IMAGE_CORRUPT",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            PartitionErrorCode::SchemaInvalid | PartitionErrorCode::ImageCorrupt => {
                Severity::Fatal
            }
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for PartitionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Partition error type with full context
#[derive(Debug)]
pub struct PartitionError {
    code: PartitionErrorCode,
    message: String,
}

impl PartitionError {
    fn new(code: PartitionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Partition cannot absorb another record
    pub fn capacity_exceeded(reason: impl Into<String>) -> Self {
        Self::new(PartitionErrorCode::CapacityExceeded, reason)
    }

    /// Schema violates the capacity rule or is malformed
    pub fn schema_invalid(reason: impl Into<String>) -> Self {
        Self::new(PartitionErrorCode::SchemaInvalid, reason)
    }

    /// Record does not match the schema
    pub fn record_invalid(reason: impl Into<String>) -> Self {
        Self::new(PartitionErrorCode::RecordInvalid, reason)
    }

    /// Key outside the owning span
    pub fn key_out_of_range(key: u128, first: u128, last: u128) -> Self {
        Self::new(
            PartitionErrorCode::KeyOutOfRange,
            format!("Key {:#x} outside span [{:#x}, {:#x}]", key, first, last),
        )
    }

    /// Unknown partition identifier
    pub fn not_found(partition: u32) -> Self {
        Self::new(
            PartitionErrorCode::PartitionNotFound,
            format!("Partition {} does not exist", partition),
        )
    }

    /// Merge precondition failed
    pub fn merge_rejected(reason: impl Into<String>) -> Self {
        Self::new(PartitionErrorCode::MergeRejected, reason)
    }

    /// Image failed validation
    pub fn image_corrupt(reason: impl Into<String>) -> Self {
        Self::new(PartitionErrorCode::ImageCorrupt, reason)
    }

    /// Returns the error code
    pub fn code(&self) -> PartitionErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for PartitionError {}

impl From<CurveError> for PartitionError {
    fn from(err: CurveError) -> Self {
        Self::record_invalid(err.to_string())
    }
}

impl From<IndexError> for PartitionError {
    fn from(err: IndexError) -> Self {
        if err.is_fatal() {
            Self::image_corrupt(err.to_string())
        } else {
            Self::record_invalid(err.to_string())
        }
    }
}

/// Result type for partition operations
pub type PartitionResult<T> = Result<T, PartitionError>;
