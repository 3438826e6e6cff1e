use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        })
    }
}

/// Destination for findings and pass summaries.
pub trait ReportSink: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

impl<S: ReportSink + ?Sized> ReportSink for Arc<S> {
    fn report(&self, severity: Severity, message: &str) {
        (**self).report(severity, message)
    }
}

/// Forwards reports to `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(target: "integra::report", "{message}"),
            Severity::Warning => tracing::warn!(target: "integra::report", "{message}"),
            Severity::Error => tracing::error!(target: "integra::report", "{message}"),
        }
    }
}

/// Collects reports in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(Severity, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries.lock().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries.lock().iter().filter(|(s, _)| *s == severity).count()
    }

    /// Number of reports at `Warning` or above.
    pub fn problems(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(s, _)| *s >= Severity::Warning)
            .count()
    }
}

impl ReportSink for MemorySink {
    fn report(&self, severity: Severity, message: &str) {
        self.entries.lock().push((severity, message.to_string()));
    }
}

/// Sends every report to each inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ReportSink for FanoutSink {
    fn report(&self, severity: Severity, message: &str) {
        for sink in &self.sinks {
            sink.report(severity, message);
        }
    }
}
