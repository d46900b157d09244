//! Index error types
//!
//! Error codes:
//! - TESS_INDEX_FIT_FAILED (ERROR)
//! - TESS_INDEX_BLOCK_CORRUPT (FATAL)

use std::fmt;

/// Severity levels for index errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Input rejected, nothing was modified
    Error,
    /// A serialized index block cannot be trusted
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

/// Index-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorCode {
    /// Training data is unsorted or keys/positions disagree in length
    FitFailed,
    /// Serialized index block is truncated or malformed
    BlockCorrupt,
}

impl IndexErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            IndexErrorCode::FitFailed => "TESS_INDEX_FIT_FAILED",
            IndexErrorCode::BlockCorrupt => "TESS_INDEX_BLOCK_CORRUPT",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            IndexErrorCode::FitFailed => Severity::Error,
            IndexErrorCode::BlockCorrupt => Severity::Fatal,
        }
    }
}

impl fmt::Display for IndexErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Index error type with full context
#[derive(Debug)]
pub struct IndexError {
    code: IndexErrorCode,
    message: String,
}

impl IndexError {
    /// Create a fit failed error
    pub fn fit_failed(reason: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::FitFailed,
            message: reason.into(),
        }
    }

    /// Create a corrupt block error
    pub fn block_corrupt(reason: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::BlockCorrupt,
            message: reason.into(),
        }
    }

    /// Returns the error code
    pub fn code(&self) -> IndexErrorCode {
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

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)
    }
}

impl std::error::Error for IndexError {}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(IndexErrorCode::FitFailed.code(), "TESS_INDEX_FIT_FAILED");
        assert_eq!(IndexErrorCode::BlockCorrupt.code(), "TESS_INDEX_BLOCK_CORRUPT");
    }

    #[test]
    fn test_error_display() {
        let err = IndexError::block_corrupt("short block");
        let display = format!("{}", err);
        assert!(display.contains("TESS_INDEX_BLOCK_CORRUPT"));
        assert!(display.contains("FATAL"));
        assert!(err.is_fatal());
    }
}
