// crates/gpu-triage-core/src/lib.rs
// ============================================================================
// Module: gpu-triage Core Library
// Description: Wire model shared by the gateway, agents, and clients.
// Purpose: Single source of truth for JSON-RPC envelopes, oneshot framing,
//          node descriptors, and correlation identifiers.
// Dependencies: serde, serde_json, thiserror, rand
// ============================================================================

//! ## Overview
//! `gpu-triage-core` defines the request-plane vocabulary of gpu-triage:
//! JSON-RPC 2.0 envelopes, the two-message oneshot framing spoken by stdio
//! agents, node descriptors with endpoint derivation, per-leg results, and
//! correlation identifiers. Everything here is transport-agnostic; the
//! gateway and agent crates layer routing and serving on top.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod correlation;
pub mod model;
pub mod rpc;
pub mod wire;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use correlation::CORRELATION_HEADER;
pub use correlation::generate_correlation_id;
pub use correlation::sanitize_correlation_id;
pub use model::DEFAULT_AGENT_PORT;
pub use model::NodeDescriptor;
pub use model::NodeResult;
pub use model::ToolRequest;
pub use model::ToolResponse;
pub use rpc::JsonRpcError;
pub use rpc::JsonRpcRequest;
pub use rpc::JsonRpcResponse;
pub use rpc::ToolCallParams;
pub use rpc::ToolCallResult;
pub use rpc::ToolContent;
pub use wire::FramingError;
pub use wire::build_http_request;
pub use wire::build_stdio_request;
pub use wire::parse_http_response;
pub use wire::parse_stdio_response;
pub use wire::split_top_level_objects;
pub use wire::validate_request_bytes;
