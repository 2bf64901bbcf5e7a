// crates/gpu-triage-gateway/src/router/tests.rs
// ============================================================================
// Module: Router Tests
// Description: Fan-out tests with in-memory directory and transports.
// Purpose: Validate guard ordering, concurrency, fallback, and breaker
//          interaction without a cluster.
// Dependencies: gpu-triage-gateway, tokio
// ============================================================================

//! ## Overview
//! The directory and both transports are in-memory fakes scripted per
//! node, and every dispatch records the payload it received so tests can
//! assert which framing a leg sent. Covers partial success,
//! readiness-before-breaker ordering, the circuit opening after repeated
//! failures, the per-leg exec fallback (including its switch to the
//! init+tool frame), concurrent leg execution, and single-node routing.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use gpu_triage_cluster::DirectoryError;
use gpu_triage_cluster::NodeDirectory;
use gpu_triage_core::NodeDescriptor;

use super::CIRCUIT_OPEN_ERROR;
use super::ExecDispatch;
use super::HttpDispatch;
use super::LegObserver;
use super::LegPayload;
use super::NOT_READY_ERROR;
use super::Router;
use super::RouterConfig;
use super::RoutingMode;
use super::TransportError;
use crate::breaker::CircuitBreaker;

// ============================================================================
// SECTION: Fakes
// ============================================================================

/// Scripted behavior for one node's transport.
#[derive(Clone)]
enum Behavior {
    /// Reply with the given bytes.
    Ok(Vec<u8>),
    /// Fail with a transport error.
    Fail,
    /// Sleep, then reply.
    Slow(Duration),
}

/// In-memory directory over a fixed descriptor set.
struct StaticDirectory {
    /// Descriptors returned by enumeration.
    nodes: Vec<NodeDescriptor>,
}

#[async_trait]
impl NodeDirectory for StaticDirectory {
    async fn list_agents(&self) -> Result<Vec<NodeDescriptor>, DirectoryError> {
        Ok(self.nodes.clone())
    }

    async fn agent_on_node(&self, node: &str) -> Result<NodeDescriptor, DirectoryError> {
        self.nodes
            .iter()
            .find(|descriptor| descriptor.name == node)
            .cloned()
            .ok_or_else(|| DirectoryError::NodeNotFound {
                node: node.to_string(),
            })
    }
}

/// Scripted transport recording every call and its payload.
struct ScriptedTransport {
    /// Behavior keyed by endpoint (HTTP) or pod name (exec).
    behaviors: BTreeMap<String, Behavior>,
    /// `(key, payload)` of every dispatch, in call order.
    calls: Mutex<Vec<(String, Vec<u8>)>>,
}

impl ScriptedTransport {
    /// Creates a transport with the given behaviors.
    fn new(behaviors: BTreeMap<String, Behavior>) -> Arc<Self> {
        Arc::new(Self {
            behaviors,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Number of dispatches recorded so far.
    fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    /// Recorded `(key, payload)` pairs.
    fn recorded(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Runs the scripted behavior for one key.
    async fn run(
        &self,
        key: &str,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        self.calls.lock().expect("calls lock").push((key.to_string(), payload.to_vec()));
        match self.behaviors.get(key).cloned() {
            Some(Behavior::Ok(bytes)) => Ok(bytes),
            Some(Behavior::Slow(delay)) => {
                tokio::select! {
                    () = cancel.cancelled() => Err(TransportError("cancelled".to_string())),
                    () = tokio::time::sleep(delay) => Ok(b"{}".to_vec()),
                }
            }
            Some(Behavior::Fail) | None => Err(TransportError("connection refused".to_string())),
        }
    }
}

#[async_trait]
impl HttpDispatch for ScriptedTransport {
    async fn dispatch_http(
        &self,
        endpoint: &str,
        payload: &[u8],
        _correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        self.run(endpoint, payload, cancel).await
    }
}

#[async_trait]
impl ExecDispatch for ScriptedTransport {
    async fn dispatch_exec(
        &self,
        pod_name: &str,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        self.run(pod_name, payload, cancel).await
    }
}

/// Observer recording leg observations and fallback events.
#[derive(Default)]
struct RecordingObserver {
    /// `(node, transport, status)` per observed leg.
    legs: Mutex<Vec<(String, String, String)>>,
    /// Nodes that fell back to exec.
    fallbacks: Mutex<Vec<String>>,
    /// Nodes skipped as unready.
    unready: Mutex<Vec<String>>,
}

impl LegObserver for RecordingObserver {
    fn observe_leg(&self, node: &str, transport: &str, status: &str, _elapsed: Duration) {
        self.legs.lock().expect("legs lock").push((
            node.to_string(),
            transport.to_string(),
            status.to_string(),
        ));
    }

    fn on_exec_fallback(&self, node: &str) {
        self.fallbacks.lock().expect("fallback lock").push(node.to_string());
    }

    fn on_unready(&self, node: &str) {
        self.unready.lock().expect("unready lock").push(node.to_string());
    }
}

/// Builds a ready descriptor with the given name and IP.
fn descriptor(name: &str, ip: &str, ready: bool) -> NodeDescriptor {
    NodeDescriptor {
        name: name.to_string(),
        pod_name: format!("agent-{name}"),
        pod_ip: ip.to_string(),
        ready,
        namespace: "gpu-system".to_string(),
        service_name: "gpu-triage-agent".to_string(),
    }
}

/// Endpoint the router derives for a descriptor in these tests.
fn endpoint(ip: &str) -> String {
    format!("http://{ip}:8080")
}

/// Prepared payload with distinct per-framing bytes.
fn payload() -> LegPayload {
    LegPayload {
        http: b"{\"call\":true}".to_vec(),
        exec: b"{\"init\":true}\n{\"call\":true}\n".to_vec(),
    }
}

/// Assembles a router over the given fakes.
fn router(
    nodes: Vec<NodeDescriptor>,
    http: Arc<ScriptedTransport>,
    exec: Arc<ScriptedTransport>,
    breaker: Arc<CircuitBreaker>,
    observer: Arc<RecordingObserver>,
    mode: RoutingMode,
) -> Router {
    Router::new(RouterConfig {
        directory: Arc::new(StaticDirectory {
            nodes,
        }),
        breaker,
        http,
        exec,
        observer,
        mode,
        agent_port: 8080,
    })
}

// ============================================================================
// SECTION: Fan-Out Tests
// ============================================================================

#[tokio::test]
async fn partial_failure_collects_every_node_once() {
    let mut behaviors = BTreeMap::new();
    behaviors.insert(endpoint("10.0.0.1"), Behavior::Ok(b"{\"a\":1}".to_vec()));
    behaviors.insert(endpoint("10.0.0.2"), Behavior::Fail);
    let http = ScriptedTransport::new(behaviors);
    let exec = ScriptedTransport::new(BTreeMap::new());
    let observer = Arc::new(RecordingObserver::default());
    let router = router(
        vec![descriptor("worker-1", "10.0.0.1", true), descriptor("worker-2", "10.0.0.2", true)],
        Arc::clone(&http),
        exec,
        Arc::new(CircuitBreaker::default()),
        Arc::clone(&observer),
        RoutingMode::Http,
    );
    let results = router
        .route_to_all(&payload(), "cid", &CancellationToken::new())
        .await
        .expect("fan-out");
    assert_eq!(results.len(), 2);
    let ok: Vec<_> = results.iter().filter(|result| result.is_ok()).collect();
    let failed: Vec<_> = results.iter().filter(|result| !result.is_ok()).collect();
    assert_eq!(ok.len(), 1);
    assert_eq!(failed.len(), 1);
    assert_eq!(ok[0].node_name, "worker-1");
    assert!(failed[0].error_text.as_deref().is_some_and(|text| text.contains("connection refused")));
    let legs = observer.legs.lock().expect("legs lock").clone();
    assert!(legs.contains(&("worker-1".to_string(), "http".to_string(), "success".to_string())));
    assert!(legs.contains(&("worker-2".to_string(), "http".to_string(), "error".to_string())));
    assert!(http.recorded().iter().all(|(_, bytes)| bytes == &payload().http));
}

#[tokio::test]
async fn unready_node_skips_breaker_and_transport() {
    let http = ScriptedTransport::new(BTreeMap::new());
    let exec = ScriptedTransport::new(BTreeMap::new());
    let breaker = Arc::new(CircuitBreaker::default());
    let observer = Arc::new(RecordingObserver::default());
    let router = router(
        vec![descriptor("worker-1", "10.0.0.1", false)],
        Arc::clone(&http),
        Arc::clone(&exec),
        Arc::clone(&breaker),
        Arc::clone(&observer),
        RoutingMode::Http,
    );
    let results = router
        .route_to_all(&payload(), "cid", &CancellationToken::new())
        .await
        .expect("fan-out");
    assert_eq!(results[0].error_text.as_deref(), Some(NOT_READY_ERROR));
    assert_eq!(breaker.failure_count("worker-1"), 0);
    assert_eq!(http.call_count() + exec.call_count(), 0);
    assert_eq!(observer.unready.lock().expect("unready lock").as_slice(), ["worker-1"]);
}

#[tokio::test]
async fn open_circuit_blocks_without_transport_call() {
    let mut behaviors = BTreeMap::new();
    behaviors.insert(endpoint("10.0.0.1"), Behavior::Fail);
    let http = ScriptedTransport::new(behaviors);
    let exec = ScriptedTransport::new(BTreeMap::new());
    let breaker = Arc::new(CircuitBreaker::new(3, Duration::from_millis(80)));
    let observer = Arc::new(RecordingObserver::default());
    let router = router(
        vec![descriptor("worker-1", "10.0.0.1", true)],
        Arc::clone(&http),
        exec,
        Arc::clone(&breaker),
        observer,
        RoutingMode::Http,
    );
    let cancel = CancellationToken::new();
    for _ in 0..3 {
        let results = router.route_to_all(&payload(), "cid", &cancel).await.expect("fan-out");
        assert!(results[0].error_text.as_deref().is_some_and(|text| text.contains("refused")));
    }
    assert_eq!(http.call_count(), 3);

    // Fourth request: circuit is open, no transport call is made.
    let results = router.route_to_all(&payload(), "cid", &cancel).await.expect("fan-out");
    assert_eq!(results[0].error_text.as_deref(), Some(CIRCUIT_OPEN_ERROR));
    assert_eq!(http.call_count(), 3);

    // After the reset timeout a probe is allowed through.
    tokio::time::sleep(Duration::from_millis(120)).await;
    let _ = router.route_to_all(&payload(), "cid", &cancel).await.expect("fan-out");
    assert_eq!(http.call_count(), 4);
}

#[tokio::test]
async fn http_mode_falls_back_to_exec_without_pod_ip() {
    let http = ScriptedTransport::new(BTreeMap::new());
    let mut behaviors = BTreeMap::new();
    behaviors.insert("agent-worker-1".to_string(), Behavior::Ok(b"{}".to_vec()));
    let exec = ScriptedTransport::new(behaviors);
    let observer = Arc::new(RecordingObserver::default());
    let router = router(
        vec![descriptor("worker-1", "", true)],
        Arc::clone(&http),
        Arc::clone(&exec),
        Arc::new(CircuitBreaker::default()),
        Arc::clone(&observer),
        RoutingMode::Http,
    );
    let results = router
        .route_to_all(&payload(), "cid", &CancellationToken::new())
        .await
        .expect("fan-out");
    assert!(results[0].is_ok());
    assert_eq!(http.call_count(), 0);
    assert_eq!(exec.call_count(), 1);
    assert_eq!(observer.fallbacks.lock().expect("fallback lock").as_slice(), ["worker-1"]);
    let legs = observer.legs.lock().expect("legs lock").clone();
    assert_eq!(legs[0].1, "exec");
    // The fallback leg switched framing along with its transport: the
    // oneshot-2 agent received the init+tool frame, not the HTTP object.
    let recorded = exec.recorded();
    assert_eq!(recorded[0].0, "agent-worker-1");
    assert_eq!(recorded[0].1, payload().exec);
}

#[tokio::test]
async fn slow_leg_does_not_serialize_the_fan_out() {
    let mut behaviors = BTreeMap::new();
    behaviors.insert(endpoint("10.0.0.1"), Behavior::Slow(Duration::from_millis(150)));
    behaviors.insert(endpoint("10.0.0.2"), Behavior::Slow(Duration::from_millis(150)));
    let http = ScriptedTransport::new(behaviors);
    let exec = ScriptedTransport::new(BTreeMap::new());
    let router = router(
        vec![descriptor("worker-1", "10.0.0.1", true), descriptor("worker-2", "10.0.0.2", true)],
        http,
        exec,
        Arc::new(CircuitBreaker::default()),
        Arc::new(RecordingObserver::default()),
        RoutingMode::Http,
    );
    let started = Instant::now();
    let results = router
        .route_to_all(&payload(), "cid", &CancellationToken::new())
        .await
        .expect("fan-out");
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(gpu_triage_core::NodeResult::is_ok));
    assert!(started.elapsed() < Duration::from_millis(280));
}

#[tokio::test]
async fn exec_mode_targets_pods_directly() {
    let http = ScriptedTransport::new(BTreeMap::new());
    let mut behaviors = BTreeMap::new();
    behaviors.insert("agent-worker-1".to_string(), Behavior::Ok(b"{}".to_vec()));
    let exec = ScriptedTransport::new(behaviors);
    let router = router(
        vec![descriptor("worker-1", "10.0.0.1", true)],
        Arc::clone(&http),
        Arc::clone(&exec),
        Arc::new(CircuitBreaker::default()),
        Arc::new(RecordingObserver::default()),
        RoutingMode::Exec,
    );
    let results = router
        .route_to_all(&payload(), "cid", &CancellationToken::new())
        .await
        .expect("fan-out");
    assert!(results[0].is_ok());
    assert_eq!(http.call_count(), 0);
    assert_eq!(exec.call_count(), 1);
    assert_eq!(exec.recorded()[0].1, payload().exec);
}

// ============================================================================
// SECTION: Single-Node Tests
// ============================================================================

#[tokio::test]
async fn route_to_node_surfaces_node_not_found() {
    let router = router(
        vec![descriptor("worker-1", "10.0.0.1", true)],
        ScriptedTransport::new(BTreeMap::new()),
        ScriptedTransport::new(BTreeMap::new()),
        Arc::new(CircuitBreaker::default()),
        Arc::new(RecordingObserver::default()),
        RoutingMode::Http,
    );
    let err = router
        .route_to_node("worker-9", &payload(), "cid", &CancellationToken::new())
        .await
        .expect_err("expected lookup failure");
    assert!(matches!(err, DirectoryError::NodeNotFound { .. }));
}

#[tokio::test]
async fn route_to_node_runs_one_leg() {
    let mut behaviors = BTreeMap::new();
    behaviors.insert(endpoint("10.0.0.1"), Behavior::Ok(b"{\"ok\":true}".to_vec()));
    let http = ScriptedTransport::new(behaviors);
    let router = router(
        vec![descriptor("worker-1", "10.0.0.1", true)],
        Arc::clone(&http),
        ScriptedTransport::new(BTreeMap::new()),
        Arc::new(CircuitBreaker::default()),
        Arc::new(RecordingObserver::default()),
        RoutingMode::Http,
    );
    let result = router
        .route_to_node("worker-1", &payload(), "cid", &CancellationToken::new())
        .await
        .expect("leg result");
    assert!(result.is_ok());
    assert_eq!(http.call_count(), 1);
}
