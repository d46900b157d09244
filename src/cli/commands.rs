//! CLI command implementations
//!
//! Every command loads and validates the configuration first. Commands
//! that touch data boot a coordinator, which replays the record log when
//! `storage.data_dir` is set.

use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::coordinator::{CoordinatorResult, IngestReceipt, QueryCoordinator, QueryService, QuerySpec};
use crate::curve::CoordinateVector;
use crate::observability::{log_event, Event};
use crate::partition::{quantize_embedding, LocalId, Record, RecordRef};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{parse_lines, read_lines_from, read_request, write_error, write_response};

/// One record as written in a JSON-lines input file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordInput {
    /// Assigned by the engine when absent
    #[serde(default)]
    pub id: Option<LocalId>,
    pub coords: Vec<u32>,
    #[serde(default)]
    pub fields: Vec<i64>,
    /// Unit-range floats, quantized on ingest
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub edges: Vec<RecordRef>,
}

/// One line of `serve` input
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    Ingest { record: RecordInput },
    Delete { id: LocalId },
    Query { query: QuerySpec },
    Batch { queries: Vec<QuerySpec> },
    Metrics,
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Check { config } => check(&config),
        Command::Ingest { config, records } => ingest(&config, records.as_deref()),
        Command::Query { config, records } => query(&config, records.as_deref()),
        Command::Serve { config, records } => serve(&config, records.as_deref()),
    }
}

fn load_config(path: &Path) -> CliResult<EngineConfig> {
    let config = EngineConfig::load(path)?;
    log_event(Event::ConfigLoaded, &[("path", &path.display().to_string())]);
    Ok(config)
}

fn boot(config: EngineConfig) -> CliResult<QueryCoordinator> {
    QueryCoordinator::open(config).map_err(|e| CliError::boot_failed(e.to_string()))
}

/// Builds and ingests one input record.
fn ingest_record(coordinator: &mut QueryCoordinator, input: RecordInput) -> CoordinatorResult<IngestReceipt> {
    match input.id {
        Some(id) => {
            let key = coordinator.codec().encode(&CoordinateVector::new(input.coords))?;
            let record = Record::new(key, id, input.fields, quantize_embedding(&input.embedding), input.edges);
            coordinator.ingest(record)
        }
        None => coordinator.ingest_at(&input.coords, input.fields, &input.embedding, input.edges),
    }
}

fn ingest_inputs(coordinator: &mut QueryCoordinator, inputs: Vec<RecordInput>) -> CliResult<usize> {
    let count = inputs.len();
    for (i, input) in inputs.into_iter().enumerate() {
        ingest_record(coordinator, input).map_err(|e| CliError::invalid_input(i + 1, e.to_string()))?;
    }
    Ok(count)
}

fn receipt_json(receipt: &IngestReceipt) -> Value {
    json!({
        "record": receipt.record,
        "offset": receipt.offset,
        "split": receipt.split,
    })
}

/// Validate a configuration and print its capacity plan
pub fn check(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let plan = config.capacity_plan()?;
    let codec = config.codec()?;
    let shape = config.mesh.shape();
    write_response(json!({
        "capacity": plan.report(),
        "grid": {
            "width": shape.width,
            "height": shape.height,
            "nodes": shape.len(),
        },
        "curve": {
            "dims": codec.dims(),
            "bits_per_dim": codec.bits_per_dim(),
            "key_bits": codec.key_bits(),
        },
    }))
}

/// Ingest JSON-lines records from a file or stdin
pub fn ingest(config_path: &Path, records: Option<&Path>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let mut coordinator = boot(config)?;
    let count = ingest_inputs(&mut coordinator, read_lines_from(records)?)?;
    write_response(json!({
        "ingested": count,
        "partitions": coordinator.store().assignment().len(),
        "records": coordinator.store().record_count(),
    }))
}

/// Execute one query read from stdin
pub fn query(config_path: &Path, records: Option<&Path>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let mut coordinator = boot(config)?;
    if let Some(path) = records {
        ingest_inputs(&mut coordinator, read_lines_from(Some(path))?)?;
    }
    let spec: QuerySpec = read_request()?;
    match coordinator.execute(spec) {
        Ok(response) => write_response(serde_json::to_value(&response)?),
        Err(err) => write_error(err.code().code(), err.message()),
    }
}

/// Answer JSON requests from stdin, one per line
///
/// Each request runs through the async query service. A request that
/// fails is answered with an error line; the loop keeps going.
pub fn serve(config_path: &Path, records: Option<&Path>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let mut coordinator = boot(config)?;
    if let Some(path) = records {
        ingest_inputs(&mut coordinator, read_lines_from(Some(path))?)?;
    }
    let requests: Vec<Request> = parse_lines(std::io::stdin().lock())?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;
    let service = QueryService::new(coordinator);

    rt.block_on(async {
        for request in requests {
            let outcome = handle(&service, request).await;
            match outcome {
                Ok(data) => write_response(data)?,
                Err(err) => write_error(err.code().code(), err.message())?,
            }
        }
        Ok::<(), CliError>(())
    })
}

async fn handle(service: &QueryService, request: Request) -> CoordinatorResult<Value> {
    let value = match request {
        Request::Ingest { record } => {
            let receipt = service.with_coordinator(move |c| ingest_record(c, record)).await?;
            receipt_json(&receipt)
        }
        Request::Delete { id } => {
            let removed = service.delete(id).await?;
            json!({ "deleted": removed.is_some() })
        }
        Request::Query { query } => to_json(&service.execute(query).await?),
        Request::Batch { queries } => {
            let results = service.execute_batch(queries).await?;
            let items: Vec<Value> = results
                .into_iter()
                .map(|r| match r {
                    Ok(response) => to_json(&response),
                    Err(err) => json!({ "error": err.code().code(), "message": err.message() }),
                })
                .collect();
            Value::Array(items)
        }
        Request::Metrics => to_json(&service.metrics().await?),
    };
    Ok(value)
}

/// Serializes an answer; values JSON cannot carry become an error object.
fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": "TESS_CLI_IO_ERROR", "message": e.to_string() }))
}
