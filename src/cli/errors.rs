//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero status.

use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::coordinator::CoordinatorError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdin/stdout or an input file)
    IoError,
    /// A line of input is not a valid record or request
    InvalidInput,
    /// Engine failed to start
    BootFailed,
    /// Engine rejected a request
    EngineError,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "TESS_CLI_CONFIG_ERROR",
            Self::IoError => "TESS_CLI_IO_ERROR",
            Self::InvalidInput => "TESS_CLI_INVALID_INPUT",
            Self::BootFailed => "TESS_CLI_BOOT_FAILED",
            Self::EngineError => "TESS_CLI_ENGINE_ERROR",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// Line `line` (1-based) of an input could not be parsed
    pub fn invalid_input(line: usize, msg: impl Into<String>) -> Self {
        Self::new(
            CliErrorCode::InvalidInput,
            format!("line {}: {}", line, msg.into()),
        )
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::config_error(e.to_string())
    }
}

impl From<CoordinatorError> for CliError {
    fn from(e: CoordinatorError) -> Self {
        Self::new(CliErrorCode::EngineError, e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = CliError::invalid_input(3, "missing coords");
        assert_eq!(err.to_string(), "TESS_CLI_INVALID_INPUT: line 3: missing coords");
    }

    #[test]
    fn test_engine_errors_keep_their_code() {
        let err: CliError = CoordinatorError::malformed_plan("k is zero").into();
        assert_eq!(err.code(), &CliErrorCode::EngineError);
        assert!(err.message().contains("TESS_MALFORMED_PLAN"));
    }
}
