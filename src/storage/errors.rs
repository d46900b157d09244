//! Record store error types
//!
//! Error codes:
//! - TESS_STORAGE_IO_ERROR (ERROR)
//! - TESS_STORAGE_WRITE_FAILED (ERROR)
//! - TESS_STORAGE_READ_FAILED (ERROR)
//! - TESS_RECORD_UNKNOWN (ERROR)
//! - TESS_DATA_CORRUPTION (FATAL)

use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, engine continues
    Error,
    /// Log cannot be trusted; the engine must stop
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
pub enum StorageErrorCode {
    IoError,
    WriteFailed,
    ReadFailed,
    /// Hydration asked for a record the store never saw or has deleted
    RecordUnknown,
    /// Frame checksum or framing failure
    DataCorruption,
}

impl StorageErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorCode::IoError => "TESS_STORAGE_IO_ERROR",
            StorageErrorCode::WriteFailed => "TESS_STORAGE_WRITE_FAILED",
            StorageErrorCode::ReadFailed => "TESS_STORAGE_READ_FAILED",
            StorageErrorCode::RecordUnknown => "TESS_RECORD_UNKNOWN",
            StorageErrorCode::DataCorruption => "TESS_DATA_CORRUPTION",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StorageErrorCode::DataCorruption => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct StorageError {
    code: StorageErrorCode,
    message: String,
    /// Byte offset of the offending frame, when known
    offset: Option<u64>,
    source: Option<io::Error>,
}

impl StorageError {
    fn new(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            offset: None,
            source: None,
        }
    }

    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(StorageErrorCode::IoError, message)
        }
    }

    pub fn write_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(StorageErrorCode::WriteFailed, message)
        }
    }

    pub fn read_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(StorageErrorCode::ReadFailed, message)
        }
    }

    pub fn record_unknown(local_id: u32) -> Self {
        Self::new(
            StorageErrorCode::RecordUnknown,
            format!("Record {} is not stored", local_id),
        )
    }

    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            offset: Some(offset),
            ..Self::new(StorageErrorCode::DataCorruption, reason)
        }
    }

    pub fn code(&self) -> StorageErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code, self.message)?;
        if let Some(offset) = self.offset {
            write!(f, " (byte_offset: {})", offset)?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
