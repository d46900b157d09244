//! CLI module for tessdb
//!
//! Provides command-line interface for:
//! - check: Validate a configuration and print the capacity plan
//! - ingest: Load JSON-lines records
//! - query: One-shot query execution
//! - serve: Line-by-line request loop over the async service

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{check, ingest, query, run, run_command, serve, RecordInput, Request};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{parse_lines, read_lines_from, read_request, write_error, write_response};
