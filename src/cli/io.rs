//! JSON I/O handling for CLI
//!
//! - Requests: one JSON value on stdin, or JSON lines for `serve`
//! - Records: JSON lines, blank lines ignored
//! - Output: one JSON object per line on stdout, UTF-8 only

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::errors::{CliError, CliResult};

/// Read one JSON request from stdin (may span lines)
pub fn read_request<T: DeserializeOwned>() -> CliResult<T> {
    let mut text = String::new();
    io::stdin().lock().read_to_string(&mut text)?;
    if text.trim().is_empty() {
        return Err(CliError::io_error("Empty input"));
    }
    serde_json::from_str(&text).map_err(|e| CliError::invalid_input(1, e.to_string()))
}

/// Parses JSON lines, skipping blank ones. Errors name the 1-based line.
pub fn parse_lines<T: DeserializeOwned, R: BufRead>(reader: R) -> CliResult<Vec<T>> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line).map_err(|e| CliError::invalid_input(i + 1, e.to_string()))?;
        out.push(value);
    }
    Ok(out)
}

/// JSON lines from `path`, or from stdin when no path is given
pub fn read_lines_from<T: DeserializeOwned>(path: Option<&Path>) -> CliResult<Vec<T>> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .map_err(|e| CliError::io_error(format!("Failed to open {}: {}", path.display(), e)))?;
            parse_lines(BufReader::new(file))
        }
        None => parse_lines(io::stdin().lock()),
    }
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });
    write_value(&response)
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    });
    write_value(&response)
}

fn write_value(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}
