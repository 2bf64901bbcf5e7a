// crates/gpu-triage-gateway/src/router.rs
// ============================================================================
// Module: Fan-Out Router
// Description: Dispatch of one prepared payload to all (or one) agents.
// Purpose: Guard every leg with readiness and the circuit breaker, time
//          it, and collect every result.
// Dependencies: gpu-triage-core, gpu-triage-cluster, futures, tokio
// ============================================================================

//! ## Overview
//! The router performs exactly one attempt per eligible agent. Readiness
//! precedes circuit logic: an unready pod yields a synthetic `not ready`
//! result without touching the breaker, and an open circuit yields
//! `circuit open` without a transport call. Legs run concurrently and all
//! results are collected; one slow node never blocks the others and a
//! failed leg never cancels its peers. Result ordering is unspecified.
//! In HTTP mode a leg whose pod has no IP yet falls back to the exec
//! transport for that leg alone. The prepared payload carries both wire
//! framings, because the agent-side consumer differs: HTTP legs send the
//! bare `tools/call` object, while exec legs launch a oneshot-2 agent
//! that expects the two-message init+tool frame, and a fallback leg must
//! switch framing along with its transport.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use gpu_triage_cluster::DirectoryError;
use gpu_triage_cluster::ExecChannel;
use gpu_triage_cluster::ExecError;
use gpu_triage_cluster::NodeDirectory;
use gpu_triage_core::NodeDescriptor;
use gpu_triage_core::NodeResult;

use crate::breaker::CircuitBreaker;
use crate::client::AgentHttpClient;
use crate::client::ClientError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Synthetic leg error for unready pods.
pub const NOT_READY_ERROR: &str = "not ready";
/// Synthetic leg error for blocked circuits.
pub const CIRCUIT_OPEN_ERROR: &str = "circuit open";

// ============================================================================
// SECTION: Transport Contracts
// ============================================================================

/// Transport-agnostic leg failure carried into `NodeResult.error_text`.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// One prepared request in both wire framings.
///
/// # Invariants
/// - `http` is the single `tools/call` object.
/// - `exec` is the newline-terminated init+tool frame a oneshot-2 agent
///   consumes; every exec leg, including HTTP-mode fallbacks, sends it.
#[derive(Debug, Clone)]
pub struct LegPayload {
    /// Payload for HTTP legs.
    pub http: Vec<u8>,
    /// Payload for exec legs.
    pub exec: Vec<u8>,
}

/// HTTP dispatch to one agent endpoint.
#[async_trait]
pub trait HttpDispatch: Send + Sync {
    /// Delivers the payload and returns the raw reply bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on any delivery failure.
    async fn dispatch_http(
        &self,
        endpoint: &str,
        payload: &[u8],
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError>;
}

/// Exec dispatch into one agent pod.
#[async_trait]
pub trait ExecDispatch: Send + Sync {
    /// Streams the payload into the pod and returns its stdout bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on any stream failure.
    async fn dispatch_exec(
        &self,
        pod_name: &str,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError>;
}

#[async_trait]
impl HttpDispatch for AgentHttpClient {
    async fn dispatch_http(
        &self,
        endpoint: &str,
        payload: &[u8],
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        self.post(endpoint, payload, correlation_id, cancel).await.map_err(|err| match err {
            ClientError::Cancelled => TransportError("cancelled".to_string()),
            other => TransportError(other.to_string()),
        })
    }
}

#[async_trait]
impl ExecDispatch for ExecChannel {
    async fn dispatch_exec(
        &self,
        pod_name: &str,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        self.invoke(pod_name, payload, cancel)
            .await
            .map(|output| output.stdout)
            .map_err(|err| match err {
                ExecError::Cancelled => TransportError("cancelled".to_string()),
                other => TransportError(other.to_string()),
            })
    }
}

// ============================================================================
// SECTION: Leg Observation
// ============================================================================

/// Observability hook invoked once per leg and on routing decisions.
pub trait LegObserver: Send + Sync {
    /// Records one leg's elapsed time with its transport and status.
    fn observe_leg(&self, node: &str, transport: &str, status: &str, elapsed: Duration);
    /// A leg fell back from HTTP to exec because the pod had no IP.
    fn on_exec_fallback(&self, _node: &str) {}
    /// A node was skipped before dispatch because its pod was unready.
    fn on_unready(&self, _node: &str) {}
}

/// Observer that discards every event.
pub struct NoopLegObserver;

impl LegObserver for NoopLegObserver {
    fn observe_leg(&self, _node: &str, _transport: &str, _status: &str, _elapsed: Duration) {}
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Routing transport selected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// POST to each agent's HTTP listener (default).
    #[default]
    Http,
    /// Stream into a oneshot agent via pod exec.
    Exec,
}

impl RoutingMode {
    /// Returns a stable label for the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Exec => "exec",
        }
    }
}

/// Construction inputs for a router.
pub struct RouterConfig {
    /// Agent directory used for enumeration and lookup.
    pub directory: Arc<dyn NodeDirectory>,
    /// Per-node circuit breaker.
    pub breaker: Arc<CircuitBreaker>,
    /// HTTP transport.
    pub http: Arc<dyn HttpDispatch>,
    /// Exec transport.
    pub exec: Arc<dyn ExecDispatch>,
    /// Leg observer for metrics and warnings.
    pub observer: Arc<dyn LegObserver>,
    /// Routing mode fixed for the router's lifetime.
    pub mode: RoutingMode,
    /// Port agents listen on for HTTP legs.
    pub agent_port: u16,
}

/// Fan-out router over the cluster's agents.
pub struct Router {
    /// Agent directory used for enumeration and lookup.
    directory: Arc<dyn NodeDirectory>,
    /// Per-node circuit breaker.
    breaker: Arc<CircuitBreaker>,
    /// HTTP transport.
    http: Arc<dyn HttpDispatch>,
    /// Exec transport.
    exec: Arc<dyn ExecDispatch>,
    /// Leg observer for metrics and warnings.
    observer: Arc<dyn LegObserver>,
    /// Routing mode fixed for the router's lifetime.
    mode: RoutingMode,
    /// Port agents listen on for HTTP legs.
    agent_port: u16,
}

impl Router {
    /// Creates a router from its configuration.
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self {
            directory: config.directory,
            breaker: config.breaker,
            http: config.http,
            exec: config.exec,
            observer: config.observer,
            mode: config.mode,
            agent_port: config.agent_port,
        }
    }

    /// Fans the prepared payload out to every agent in the cluster.
    ///
    /// Every enumerated node appears exactly once in the result; ordering
    /// is unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] only when enumeration itself fails;
    /// per-leg failures surface inside the results.
    pub async fn route_to_all(
        &self,
        payload: &LegPayload,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<NodeResult>, DirectoryError> {
        let agents = self.directory.list_agents().await?;
        let legs = agents.iter().map(|descriptor| self.leg(descriptor, payload, correlation_id, cancel));
        Ok(join_all(legs).await)
    }

    /// Routes the prepared payload to the agent on one node.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NodeNotFound`] when no agent runs on the
    /// node; leg failures surface inside the result.
    pub async fn route_to_node(
        &self,
        node: &str,
        payload: &LegPayload,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<NodeResult, DirectoryError> {
        let descriptor = self.directory.agent_on_node(node).await?;
        Ok(self.leg(&descriptor, payload, correlation_id, cancel).await)
    }

    /// Runs one guarded, timed leg against one agent.
    async fn leg(
        &self,
        descriptor: &NodeDescriptor,
        payload: &LegPayload,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> NodeResult {
        let node = descriptor.name.as_str();
        // Readiness precedes circuit logic.
        if !descriptor.ready {
            self.observer.on_unready(node);
            return NodeResult::err(node, &descriptor.pod_name, NOT_READY_ERROR);
        }
        if !self.breaker.allow(node) {
            return NodeResult::err(node, &descriptor.pod_name, CIRCUIT_OPEN_ERROR);
        }
        let started = Instant::now();
        let (transport, outcome) = self.dispatch(descriptor, payload, correlation_id, cancel).await;
        match outcome {
            Ok(bytes) => {
                self.breaker.record_success(node);
                self.observer.observe_leg(node, transport, "success", started.elapsed());
                NodeResult::ok(node, &descriptor.pod_name, bytes)
            }
            Err(err) => {
                self.breaker.record_failure(node);
                self.observer.observe_leg(node, transport, "error", started.elapsed());
                NodeResult::err(node, &descriptor.pod_name, err.to_string())
            }
        }
    }

    /// Picks the transport for one leg and dispatches.
    ///
    /// The payload framing follows the transport actually used: an exec
    /// leg always sends the init+tool frame, a fallback included.
    async fn dispatch(
        &self,
        descriptor: &NodeDescriptor,
        payload: &LegPayload,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> (&'static str, Result<Vec<u8>, TransportError>) {
        match self.mode {
            RoutingMode::Exec => (
                RoutingMode::Exec.as_str(),
                self.exec.dispatch_exec(&descriptor.pod_name, &payload.exec, cancel).await,
            ),
            RoutingMode::Http => {
                let endpoint = descriptor.http_endpoint(self.agent_port);
                if endpoint.is_empty() {
                    // No pod IP yet; this leg alone rides the exec path,
                    // re-framed for the oneshot-2 agent it launches.
                    self.observer.on_exec_fallback(&descriptor.name);
                    (
                        RoutingMode::Exec.as_str(),
                        self.exec.dispatch_exec(&descriptor.pod_name, &payload.exec, cancel).await,
                    )
                } else {
                    (
                        RoutingMode::Http.as_str(),
                        self.http
                            .dispatch_http(&endpoint, &payload.http, correlation_id, cancel)
                            .await,
                    )
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
