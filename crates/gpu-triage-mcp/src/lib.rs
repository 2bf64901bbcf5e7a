// crates/gpu-triage-mcp/src/lib.rs
// ============================================================================
// Module: gpu-triage MCP Library
// Description: MCP servers, tool routing, and observability for gpu-triage.
// Purpose: Host the diagnostic tool surface in agent pods (HTTP or oneshot
//          stdio) and in the gateway (proxy fan-out).
// Dependencies: axum, tokio, prometheus, gpu-triage-core/kmsg/cluster/gateway
// ============================================================================

//! ## Overview
//! `gpu-triage-mcp` exposes the gpu-triage tools over JSON-RPC 2.0. The
//! same server shell hosts two dispatchers: the agent's tool router (GPU
//! inventory, health, kernel-log errors) and the gateway's proxy router
//! (fan-out + aggregation). Transports are a stateless HTTP listener and
//! a line-delimited oneshot stdio loop. Observability is Prometheus
//! metrics plus structured JSON logs on stderr.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod device;
pub mod logging;
pub mod oneshot;
pub mod proxy;
pub mod server;
pub mod telemetry;
pub mod tools;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::OperationMode;
pub use config::TransportKind;
pub use config::TriageConfig;
pub use device::DeviceInfo;
pub use device::DeviceInterface;
pub use device::DeviceInventory;
pub use device::StaticDeviceInterface;
pub use logging::LogEvent;
pub use logging::LogLevel;
pub use logging::LogSink;
pub use logging::NoopLogSink;
pub use logging::StderrLogSink;
pub use oneshot::OneshotError;
pub use oneshot::OneshotStats;
pub use oneshot::OneshotTransport;
pub use proxy::ProxyRouter;
pub use server::ServerError;
pub use server::serve_http;
pub use server::serve_stdio;
pub use telemetry::Metrics;
pub use tools::AgentToolRouter;
pub use tools::RequestContext;
pub use tools::ToolDefinition;
pub use tools::ToolDispatcher;
pub use tools::ToolError;
pub use tools::dispatch_request;
