//! Async front end for the coordinator
//!
//! The mesh is stepped synchronously, so every call runs on the blocking
//! pool behind a mutex. Reads carry an outer deadline that also covers the
//! wait for the lock. Writes always run to completion, so the result a
//! caller sees is the one that was committed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::{self, JoinHandle};
use tokio::time;

use super::coordinator::{IngestReceipt, QueryCoordinator};
use super::errors::{CoordinatorError, CoordinatorResult};
use super::result::{QueryResponse, QuerySpec};
use crate::observability::MetricsSnapshot;
use crate::partition::Record;

/// Slack on top of the query budget before a reader gives up
const BUDGET_SLACK: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct QueryService {
    inner: Arc<Mutex<QueryCoordinator>>,
    deadline: Duration,
}

impl QueryService {
    pub fn new(coordinator: QueryCoordinator) -> Self {
        let deadline = Duration::from_millis(coordinator.config().query.budget_ms) + BUDGET_SLACK;
        Self::with_deadline(coordinator, deadline)
    }

    /// Uses `deadline` for reads instead of the query budget plus slack.
    pub fn with_deadline(coordinator: QueryCoordinator, deadline: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(coordinator)),
            deadline,
        }
    }

    /// Runs `f` against the coordinator on the blocking pool and waits for
    /// it to finish, however long the lock is held by others.
    pub async fn with_coordinator<T, F>(&self, f: F) -> CoordinatorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut QueryCoordinator) -> CoordinatorResult<T> + Send + 'static,
    {
        joined(self.spawn(f).await)
    }

    /// Like `with_coordinator`, but gives up after the read deadline. The
    /// abandoned job may still run; `f` must not change stored records.
    async fn read<T, F>(&self, f: F) -> CoordinatorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut QueryCoordinator) -> CoordinatorResult<T> + Send + 'static,
    {
        match time::timeout(self.deadline, self.spawn(f)).await {
            Ok(result) => joined(result),
            Err(_) => Err(CoordinatorError::wait_timeout(self.deadline.as_millis())),
        }
    }

    fn spawn<T, F>(&self, f: F) -> JoinHandle<CoordinatorResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut QueryCoordinator) -> CoordinatorResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        task::spawn_blocking(move || {
            let mut coordinator = inner
                .lock()
                .map_err(|_| CoordinatorError::deployment_failed("coordinator lock poisoned"))?;
            f(&mut coordinator)
        })
    }

    pub async fn execute(&self, spec: QuerySpec) -> CoordinatorResult<QueryResponse> {
        self.read(move |c| c.execute(spec)).await
    }

    /// Runs `specs` concurrently on the mesh; one result per spec.
    pub async fn execute_batch(&self, specs: Vec<QuerySpec>) -> CoordinatorResult<Vec<CoordinatorResult<QueryResponse>>> {
        self.read(move |c| Ok(c.execute_batch(specs))).await
    }

    pub async fn ingest(&self, record: Record) -> CoordinatorResult<IngestReceipt> {
        self.with_coordinator(move |c| c.ingest(record)).await
    }

    pub async fn delete(&self, id: u32) -> CoordinatorResult<Option<Record>> {
        self.with_coordinator(move |c| c.delete(id)).await
    }

    pub async fn metrics(&self) -> CoordinatorResult<MetricsSnapshot> {
        self.read(|c| Ok(c.metrics().snapshot())).await
    }

    pub async fn record_count(&self) -> CoordinatorResult<usize> {
        self.with_coordinator(|c| Ok(c.store().record_count())).await
    }
}

fn joined<T>(result: Result<CoordinatorResult<T>, task::JoinError>) -> CoordinatorResult<T> {
    result.unwrap_or_else(|join| Err(CoordinatorError::node_failure(format!("coordinator task failed: {}", join))))
}
