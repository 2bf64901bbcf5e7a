// crates/gpu-triage-mcp/src/telemetry.rs
// ============================================================================
// Module: Telemetry
// Description: Prometheus metrics for tool calls, router legs, and nodes.
// Purpose: Process-wide registry with an isolated-constructor escape hatch
//          for tests.
// Dependencies: prometheus, gpu-triage-gateway
// ============================================================================

//! ## Overview
//! Metrics are a value constructed over a [`prometheus::Registry`]; a
//! process-default instance backs the running servers while tests build
//! isolated registries. Counters cover per-tool invocations, histograms
//! cover end-to-end tool latency and per-leg gateway latency (custom
//! buckets from 5 ms to 60 s), and gauges track node health, circuit
//! state, and in-flight requests. The leg-observer and breaker-observer
//! hooks of the gateway crate are implemented here so routing feeds the
//! registry without knowing about Prometheus.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;

use gpu_triage_gateway::CircuitState;
use gpu_triage_gateway::LegObserver;
use gpu_triage_gateway::StateObserver;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Custom buckets for per-leg gateway latency, in seconds.
pub const GATEWAY_LATENCY_BUCKETS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

// ============================================================================
// SECTION: Metrics
// ============================================================================

/// Process metrics over one Prometheus registry.
pub struct Metrics {
    /// Backing registry, exposed for the `/metrics` endpoint.
    registry: Registry,
    /// Tool invocations by tool and status.
    requests_total: IntCounterVec,
    /// End-to-end tool latency by tool.
    request_duration_seconds: HistogramVec,
    /// Per-leg latency by node, transport, and status.
    gateway_request_duration_seconds: HistogramVec,
    /// Last observed health per node (0 or 1).
    node_health: IntGaugeVec,
    /// Circuit state per node (0 closed, 1 open, 2 half-open).
    circuit_breaker_state: IntGaugeVec,
    /// In-flight tool calls.
    active_requests: IntGauge,
}

impl Metrics {
    /// Builds and registers the metric families on `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`prometheus::Error`] when registration fails (duplicate
    /// names on a shared registry).
    pub fn new(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Tool invocations by tool and status"),
            &["tool", "status"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "End-to-end tool latency"),
            &["tool"],
        )?;
        let gateway_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Per-leg gateway latency by node, transport, and status",
            )
            .buckets(GATEWAY_LATENCY_BUCKETS.to_vec()),
            &["node", "transport", "status"],
        )?;
        let node_health =
            IntGaugeVec::new(Opts::new("node_health", "Last observed node health"), &["node"])?;
        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new("circuit_breaker_state", "Circuit state per node"),
            &["node"],
        )?;
        let active_requests = IntGauge::new("active_requests", "In-flight tool calls")?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(gateway_request_duration_seconds.clone()))?;
        registry.register(Box::new(node_health.clone()))?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;
        registry.register(Box::new(active_requests.clone()))?;
        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            gateway_request_duration_seconds,
            node_health,
            circuit_breaker_state,
            active_requests,
        })
    }

    /// Returns the process-default instance.
    #[allow(clippy::expect_used, reason = "Metric names are compile-time constants.")]
    pub fn default_instance() -> &'static Arc<Self> {
        static DEFAULT: OnceLock<Arc<Metrics>> = OnceLock::new();
        DEFAULT.get_or_init(|| {
            Arc::new(Metrics::new(Registry::new()).expect("default metrics registry"))
        })
    }

    /// Counts one tool invocation.
    pub fn record_request(&self, tool: &str, status: &str) {
        self.requests_total.with_label_values(&[tool, status]).inc();
    }

    /// Observes one end-to-end tool latency.
    pub fn observe_request_duration(&self, tool: &str, elapsed: Duration) {
        self.request_duration_seconds
            .with_label_values(&[tool])
            .observe(elapsed.as_secs_f64());
    }

    /// Marks one tool call in flight.
    pub fn inc_active(&self) {
        self.active_requests.inc();
    }

    /// Marks one tool call finished.
    pub fn dec_active(&self) {
        self.active_requests.dec();
    }

    /// Sets the health gauge for a node.
    pub fn set_node_health(&self, node: &str, healthy: bool) {
        self.node_health.with_label_values(&[node]).set(i64::from(healthy));
    }

    /// Sets the circuit gauge for a node.
    pub fn set_circuit_state(&self, node: &str, state: CircuitState) {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "Gauge encodings are the small integers 0, 1, and 2."
        )]
        self.circuit_breaker_state.with_label_values(&[node]).set(state.gauge_value() as i64);
    }

    /// Breaker observer keeping the circuit gauge current.
    #[must_use]
    pub fn breaker_observer(self: &Arc<Self>) -> StateObserver {
        let metrics = Arc::clone(self);
        Arc::new(move |node: &str, state, healthy| {
            metrics.set_circuit_state(node, state);
            metrics.set_node_health(node, healthy);
        })
    }

    /// Renders the registry in Prometheus exposition format.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl LegObserver for Metrics {
    fn observe_leg(&self, node: &str, transport: &str, status: &str, elapsed: Duration) {
        self.gateway_request_duration_seconds
            .with_label_values(&[node, transport, status])
            .observe(elapsed.as_secs_f64());
        self.set_node_health(node, status == "success");
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        reason = "Test-only assertions use unwrap/expect for clarity."
    )]

    use std::time::Duration;

    use prometheus::Registry;

    use gpu_triage_gateway::CircuitState;
    use gpu_triage_gateway::LegObserver;

    use super::Metrics;

    #[test]
    fn isolated_registry_records_and_encodes() {
        let metrics = Metrics::new(Registry::new()).expect("metrics");
        metrics.record_request("gpu_inventory", "success");
        metrics.observe_request_duration("gpu_inventory", Duration::from_millis(12));
        metrics.observe_leg("worker-1", "http", "success", Duration::from_millis(7));
        metrics.set_circuit_state("worker-1", CircuitState::Open);
        metrics.inc_active();
        let exposition = metrics.encode();
        assert!(exposition.contains("requests_total"));
        assert!(exposition.contains("gateway_request_duration_seconds"));
        assert!(exposition.contains("circuit_breaker_state"));
        assert!(exposition.contains("active_requests 1"));
        metrics.dec_active();
        assert!(metrics.encode().contains("active_requests 0"));
    }

    #[test]
    fn leg_observation_drives_node_health() {
        let metrics = Metrics::new(Registry::new()).expect("metrics");
        metrics.observe_leg("worker-1", "http", "error", Duration::from_millis(3));
        let exposition = metrics.encode();
        assert!(exposition.contains("node_health{node=\"worker-1\"} 0"));
        metrics.observe_leg("worker-1", "http", "success", Duration::from_millis(3));
        assert!(metrics.encode().contains("node_health{node=\"worker-1\"} 1"));
    }

    #[test]
    fn duplicate_registration_on_shared_registry_fails() {
        let registry = Registry::new();
        let _first = Metrics::new(registry.clone()).expect("metrics");
        assert!(Metrics::new(registry).is_err());
    }
}
