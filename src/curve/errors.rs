//! Curve codec error types
//!
//! Error codes:
//! - TESS_ENCODING_OUT_OF_RANGE (ERROR)
//! - TESS_DIMENSION_MISMATCH (ERROR)
//! - TESS_INVALID_CURVE (FATAL)

use std::fmt;

/// Severity levels for curve errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The offending input is rejected, the engine continues
    Error,
    /// The curve cannot be constructed; the engine must not start
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

/// Curve-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveErrorCode {
    /// A coordinate (or key) does not fit the declared bit width
    EncodingOutOfRange,
    /// Coordinate vector length differs from the curve dimensionality
    DimensionMismatch,
    /// Dimensionality / bit width combination is not representable
    InvalidCurve,
}

impl CurveErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            CurveErrorCode::EncodingOutOfRange => "TESS_ENCODING_OUT_OF_RANGE",
            CurveErrorCode::DimensionMismatch => "TESS_DIMENSION_MISMATCH",
            CurveErrorCode::InvalidCurve => "TESS_INVALID_CURVE",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            CurveErrorCode::InvalidCurve => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for CurveErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Curve error with context
#[derive(Debug)]
pub struct CurveError {
    code: CurveErrorCode,
    message: String,
}

impl CurveError {
    /// Coordinate `value` on axis `dim` exceeds `max`
    pub fn out_of_range(dim: usize, value: u32, max: u32) -> Self {
        Self {
            code: CurveErrorCode::EncodingOutOfRange,
            message: format!(
                "Coordinate {} on dimension {} exceeds maximum {}",
                value, dim, max
            ),
        }
    }

    /// Key does not fit the curve's key width
    pub fn key_out_of_range(key: u128, key_bits: u32) -> Self {
        Self {
            code: CurveErrorCode::EncodingOutOfRange,
            message: format!("Key {:#x} does not fit in {} bits", key, key_bits),
        }
    }

    /// Coordinate vector has the wrong number of dimensions
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self {
            code: CurveErrorCode::DimensionMismatch,
            message: format!("Expected {} dimensions, got {}", expected, actual),
        }
    }

    /// Curve parameters are invalid
    pub fn invalid_curve(reason: impl Into<String>) -> Self {
        Self {
            code: CurveErrorCode::InvalidCurve,
            message: reason.into(),
        }
    }

    /// Returns the error code
    pub fn code(&self) -> CurveErrorCode {
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

impl fmt::Display for CurveError {
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

impl std::error::Error for CurveError {}

/// Result type for curve operations
pub type CurveResult<T> = Result<T, CurveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CurveErrorCode::EncodingOutOfRange.code(),
            "TESS_ENCODING_OUT_OF_RANGE"
        );
        assert_eq!(
            CurveErrorCode::DimensionMismatch.code(),
            "TESS_DIMENSION_MISMATCH"
        );
        assert_eq!(CurveErrorCode::InvalidCurve.code(), "TESS_INVALID_CURVE");
    }

    #[test]
    fn test_only_invalid_curve_is_fatal() {
        assert!(CurveError::invalid_curve("too wide").is_fatal());
        assert!(!CurveError::out_of_range(0, 40, 31).is_fatal());
        assert!(!CurveError::dimension_mismatch(3, 2).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = CurveError::out_of_range(2, 40, 31);
        let display = format!("{}", err);
        assert!(display.contains("TESS_ENCODING_OUT_OF_RANGE"));
        assert!(display.contains("ERROR"));
        assert!(display.contains("dimension 2"));
    }
}
