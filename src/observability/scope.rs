//! Begin/complete logging around one operation
//!
//! `{NAME}_BEGIN` on creation, then exactly one of `{NAME}_COMPLETE`,
//! `{NAME}_FAILED`, or `{NAME}_INCOMPLETE` when dropped unresolved.

use std::time::Instant;

use super::logger::{Logger, Severity};

pub struct ObservationScope {
    name: &'static str,
    fields: Vec<(&'static str, String)>,
    started: Instant,
    resolved: bool,
}

impl ObservationScope {
    pub fn new(name: &'static str) -> Self {
        Self::with_fields(name, Vec::new())
    }

    /// Fields are repeated on every line the scope emits.
    pub fn with_fields(name: &'static str, fields: Vec<(&'static str, String)>) -> Self {
        let scope = Self {
            name,
            fields,
            started: Instant::now(),
            resolved: false,
        };
        scope.emit(Severity::Trace, "BEGIN", &[]);
        scope
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    fn emit(&self, severity: Severity, suffix: &str, extra: &[(&str, &str)]) {
        let event = format!("{}_{}", self.name, suffix);
        let mut fields: Vec<(&str, &str)> = self
            .fields
            .iter()
            .map(|(k, v)| (*k, v.as_str()))
            .collect();
        fields.extend_from_slice(extra);
        Logger::log(severity, &event, &fields);
    }

    pub fn complete(self) {
        self.complete_with(&[]);
    }

    pub fn complete_with(mut self, extra: &[(&str, &str)]) {
        self.resolved = true;
        let elapsed = self.elapsed_ms().to_string();
        let mut fields = vec![("elapsed_ms", elapsed.as_str())];
        fields.extend_from_slice(extra);
        self.emit(Severity::Info, "COMPLETE", &fields);
    }

    pub fn fail(mut self, reason: &str) {
        self.resolved = true;
        self.emit(Severity::Error, "FAILED", &[("reason", reason)]);
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.resolved {
            self.emit(Severity::Warn, "INCOMPLETE", &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_resolves() {
        let scope = ObservationScope::with_fields("QUERY", vec![("query", "7".to_string())]);
        assert!(!scope.is_resolved());
        scope.complete_with(&[("status", "complete")]);
    }

    #[test]
    fn test_fail_and_drop_do_not_panic() {
        ObservationScope::new("INGEST").fail("capacity exceeded");
        drop(ObservationScope::new("INGEST"));
    }
}
