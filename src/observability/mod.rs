//! Observability
//!
//! Structured JSON logging, typed lifecycle events, counters and scoped
//! begin/complete tracing. Observability is read-only: nothing here changes
//! what the engine computes, and a failed write never fails the caller.

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::ObservationScope;

/// Logs a lifecycle event at its own severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_uses_event_severity() {
        let line = Logger::render(Event::MeshFull.severity(), Event::MeshFull.as_str(), &[]);
        assert!(line.contains("\"severity\":\"WARN\""));
        log_event(Event::TileDeployed, &[("partition", "3")]);
    }
}
