//! Mesh error types
//!
//! Node-local evaluation failures are never errors here: they become
//! sentinels inside partial results. These errors cover host-side misuse
//! of the executor.

use std::fmt;

use crate::partition::PartitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
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
pub enum MeshErrorCode {
    /// Grid has no nodes or exceeds addressable size
    InvalidShape,
    /// Coordinate outside the grid
    NodeOutOfBounds,
    /// Node refused a partition image
    TileRejected,
    /// Query could not be encoded or decoded
    MalformedRequest,
}

impl MeshErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            MeshErrorCode::InvalidShape => "TESS_MESH_INVALID_SHAPE",
            MeshErrorCode::NodeOutOfBounds => "TESS_NODE_OUT_OF_BOUNDS",
            MeshErrorCode::TileRejected => "TESS_TILE_REJECTED",
            MeshErrorCode::MalformedRequest => "TESS_MALFORMED_REQUEST",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            MeshErrorCode::InvalidShape => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for MeshErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct MeshError {
    code: MeshErrorCode,
    message: String,
}

impl MeshError {
    fn new(code: MeshErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_shape(reason: impl Into<String>) -> Self {
        Self::new(MeshErrorCode::InvalidShape, reason)
    }

    pub fn out_of_bounds(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self::new(
            MeshErrorCode::NodeOutOfBounds,
            format!("Node ({}, {}) outside {}x{} grid", x, y, width, height),
        )
    }

    pub fn tile_rejected(err: PartitionError) -> Self {
        Self::new(MeshErrorCode::TileRejected, err.to_string())
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::new(MeshErrorCode::MalformedRequest, reason)
    }

    pub fn code(&self) -> MeshErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for MeshError {
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

impl std::error::Error for MeshError {}

pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeshError::out_of_bounds(5, 0, 4, 4);
        let display = err.to_string();
        assert!(display.starts_with("[ERROR] TESS_NODE_OUT_OF_BOUNDS"));
        assert!(display.contains("(5, 0)"));
        assert!(MeshError::invalid_shape("0x0").is_fatal());
    }
}
