// crates/gpu-triage-mcp/src/logging.rs
// ============================================================================
// Module: Structured Logging
// Description: JSON-line log events routed through a sink trait.
// Purpose: Keyed, correlation-aware logs that never touch stdout.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Log output is structured: one JSON object per line, carrying level,
//! component, message, and the request's correlation ID when one is in
//! scope. Sinks are a trait so tests capture events in memory. The
//! default sink writes to **stderr** only; stdout belongs to the protocol
//! when the process runs a stdio transport.

use std::io::Write;

use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Events
// ============================================================================

/// Log severity.
///
/// # Invariants
/// - Variants are stable for log consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Fine-grained diagnostics.
    Debug,
    /// Normal operation.
    Info,
    /// Degraded but progressing.
    Warn,
    /// Failed operation.
    Error,
}

/// One structured log event.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    /// Severity.
    pub level: LogLevel,
    /// Component emitting the event.
    pub component: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Correlation ID of the request in scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Structured detail payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl LogEvent {
    /// Builds an event at the given level.
    #[must_use]
    pub fn new(level: LogLevel, component: &'static str, message: impl Into<String>) -> Self {
        Self {
            level,
            component,
            message: message.into(),
            correlation_id: None,
            detail: None,
        }
    }

    /// Builds an info event.
    #[must_use]
    pub fn info(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, component, message)
    }

    /// Builds a warning event.
    #[must_use]
    pub fn warn(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, component, message)
    }

    /// Builds an error event.
    #[must_use]
    pub fn error(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, component, message)
    }

    /// Attaches the request's correlation ID.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Attaches a structured detail payload.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for structured log events.
pub trait LogSink: Send + Sync {
    /// Records one event.
    fn log(&self, event: &LogEvent);
}

/// Sink writing one JSON line per event to stderr.
///
/// # Invariants
/// - Never writes to stdout; stdio transports own that stream.
pub struct StderrLogSink;

impl LogSink for StderrLogSink {
    fn log(&self, event: &LogEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{line}");
        }
    }
}

/// Sink that discards every event.
pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn log(&self, _event: &LogEvent) {}
}

// ============================================================================
// SECTION: Tests
// ============================================================================
