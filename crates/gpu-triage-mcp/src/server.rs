// crates/gpu-triage-mcp/src/server.rs
// ============================================================================
// Module: Server Shell
// Description: HTTP listener and stdio loop hosting a tool dispatcher.
// Purpose: One shell for both roles; agents and the gateway differ only
//          in the dispatcher they mount.
// Dependencies: axum, tokio, gpu-triage-core
// ============================================================================

//! ## Overview
//! The HTTP listener serves `/mcp` (stateless JSON-RPC), `/healthz`,
//! `/readyz`, `/version`, and `/metrics`; non-GET methods on the fixed
//! endpoints answer 405. Startup is race-free: the socket is bound
//! synchronously and the readiness signal is published only after a
//! successful bind, so a bind failure returns the error without ever
//! signalling readiness. On cancellation the listener shuts down
//! gracefully with a bounded deadline. The stdio listener is the oneshot
//! loop; it returns on end of input or cancellation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use gpu_triage_core::CORRELATION_HEADER;
use gpu_triage_core::rpc;
use gpu_triage_core::rpc::JsonRpcRequest;
use gpu_triage_core::rpc::JsonRpcResponse;
use gpu_triage_core::sanitize_correlation_id;

use crate::config::TransportKind;
use crate::logging::LogEvent;
use crate::logging::LogSink;
use crate::oneshot::OneshotError;
use crate::oneshot::OneshotStats;
use crate::oneshot::OneshotTransport;
use crate::telemetry::Metrics;
use crate::tools::RequestContext;
use crate::tools::SERVER_NAME;
use crate::tools::ToolDispatcher;
use crate::tools::dispatch_request;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Grace period for in-flight requests after shutdown begins.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);
/// Upper bound on one dispatch, below the HTTP write deadline.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(90);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server shell errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen socket could not be bound.
    #[error("bind failed on {addr}: {detail}")]
    Bind {
        /// Address that failed to bind.
        addr: String,
        /// Underlying failure description.
        detail: String,
    },
    /// Dispatcher or transport initialization failed.
    #[error("server init failed: {0}")]
    Init(String),
    /// The running server failed.
    #[error("server failed: {0}")]
    Serve(String),
}

// ============================================================================
// SECTION: HTTP Listener
// ============================================================================

/// Shared state behind the HTTP handlers.
struct HttpState {
    /// Mounted tool dispatcher.
    dispatcher: Arc<dyn ToolDispatcher>,
    /// Process metrics.
    metrics: Arc<Metrics>,
    /// Structured log sink.
    log: Arc<dyn LogSink>,
    /// Server-wide cancellation parented onto every request.
    cancel: CancellationToken,
}

/// Serves the HTTP listener until cancellation.
///
/// The readiness sender receives the bound address only after a
/// successful bind; on bind failure it is dropped unfired and the error
/// is returned.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] when the socket cannot be bound and
/// [`ServerError::Serve`] when the listener fails.
pub async fn serve_http(
    bind: &str,
    dispatcher: Arc<dyn ToolDispatcher>,
    metrics: Arc<Metrics>,
    log: Arc<dyn LogSink>,
    ready: oneshot::Sender<SocketAddr>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let addr: SocketAddr = bind.parse().map_err(|_| ServerError::Bind {
        addr: bind.to_string(),
        detail: "invalid listen address".to_string(),
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|err| ServerError::Bind {
        addr: bind.to_string(),
        detail: err.to_string(),
    })?;
    let local = listener.local_addr().map_err(|err| ServerError::Bind {
        addr: bind.to_string(),
        detail: err.to_string(),
    })?;
    // Bound successfully; only now may readiness be published.
    let _ = ready.send(local);
    log.log(&LogEvent::info("server", format!("listening on {local}")));

    let state = Arc::new(HttpState {
        dispatcher,
        metrics,
        log,
        cancel: cancel.clone(),
    });
    let app = Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/version", get(version_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let shutdown = cancel.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    let server = async move { server.await };
    tokio::select! {
        result = server => result.map_err(|err| ServerError::Serve(err.to_string())),
        () = async {
            cancel.cancelled().await;
            tokio::time::sleep(SHUTDOWN_DEADLINE).await;
        } => Ok(()),
    }
}

/// Handles `POST /mcp`.
async fn mcp_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let correlation_id = sanitize_correlation_id(
        headers.get(CORRELATION_HEADER).and_then(|value| value.to_str().ok()),
    );
    let context = RequestContext::new(TransportKind::Http, correlation_id)
        .with_cancel(state.cancel.child_token());
    state.metrics.inc_active();
    let started = Instant::now();
    let (status, response, tool) = handle_mcp_bytes(&state, &context, &body).await;
    let outcome = if response.error.is_some() { "error" } else { "success" };
    state.metrics.record_request(&tool, outcome);
    state.metrics.observe_request_duration(&tool, started.elapsed());
    state.metrics.dec_active();
    state.log.log(
        &LogEvent::info("server", format!("{tool} -> {outcome}"))
            .with_correlation(context.correlation_id.clone()),
    );
    (
        status,
        [(CORRELATION_HEADER, context.correlation_id)],
        Json(response),
    )
}

/// Parses and dispatches one `/mcp` body.
///
/// Returns the HTTP status, the JSON-RPC reply, and the tool label used
/// for metrics.
async fn handle_mcp_bytes(
    state: &HttpState,
    context: &RequestContext,
    body: &[u8],
) -> (StatusCode, JsonRpcResponse, String) {
    let request: JsonRpcRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::error(Value::Null, rpc::PARSE_ERROR, "parse error"),
                "invalid".to_string(),
            );
        }
    };
    let tool = metric_tool_label(&request);
    let id = request.id.clone().unwrap_or(Value::Null);
    match tokio::time::timeout(
        DISPATCH_TIMEOUT,
        dispatch_request(state.dispatcher.as_ref(), context, request),
    )
    .await
    {
        Ok(response) => (StatusCode::OK, response, tool),
        Err(_) => (
            StatusCode::OK,
            JsonRpcResponse::error(id, rpc::INTERNAL_ERROR, "dispatch timed out"),
            tool,
        ),
    }
}

/// Metric label for one request: the tool name, or the method.
fn metric_tool_label(request: &JsonRpcRequest) -> String {
    if request.method == "tools/call" {
        request
            .params
            .as_ref()
            .and_then(|params| params.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("invalid")
            .to_string()
    } else {
        request.method.clone()
    }
}

/// Handles `GET /healthz`.
async fn healthz_handler() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

/// Handles `GET /readyz`.
async fn readyz_handler() -> Json<Value> {
    // A future revision checks hardware-interface initialization here.
    Json(json!({"status": "ready"}))
}

/// Handles `GET /version`.
async fn version_handler() -> Json<Value> {
    Json(json!({"server": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")}))
}

/// Handles `GET /metrics`.
async fn metrics_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

// ============================================================================
// SECTION: Stdio Listener
// ============================================================================

/// Serves the stdio transport until its budget, end of input, or
/// cancellation.
///
/// A `oneshot_count` of zero serves until end of input. All log output
/// goes to stderr; stdout carries protocol bytes only.
///
/// # Errors
///
/// Returns [`ServerError`] when the transport is misconfigured or a
/// stream fails; cancellation is a normal return with partial stats.
pub async fn serve_stdio(
    dispatcher: Arc<dyn ToolDispatcher>,
    oneshot_count: u32,
    log: Arc<dyn LogSink>,
    cancel: CancellationToken,
) -> Result<OneshotStats, ServerError> {
    let transport = if oneshot_count >= 1 {
        OneshotTransport::new(dispatcher, oneshot_count)
            .map_err(|err| ServerError::Init(err.to_string()))?
    } else {
        OneshotTransport::unbounded(dispatcher)
    };
    let context = RequestContext::new(TransportKind::Stdio, None).with_cancel(cancel);
    let mut input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();
    let stats = match transport.run(&mut input, &mut output, &context).await {
        Ok(stats)
        | Err(OneshotError::Cancelled {
            stats,
        }) => stats,
        Err(err @ (OneshotError::Config(_) | OneshotError::Io { .. })) => {
            return Err(ServerError::Serve(err.to_string()));
        }
    };
    log.log(&LogEvent::info(
        "server",
        format!(
            "stdio session ended: processed={} errors={} skipped={}",
            stats.processed, stats.errors, stats.skipped
        ),
    ));
    Ok(stats)
}
