// crates/gpu-triage-core/src/rpc.rs
// ============================================================================
// Module: JSON-RPC Envelope
// Description: JSON-RPC 2.0 request/response types for the MCP wire.
// Purpose: Shared envelope model for servers, clients, and framing.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! JSON-RPC 2.0 envelope types used on both sides of the MCP wire. The
//! request id is kept as a raw [`Value`] so replies preserve numeric and
//! string ids verbatim. Error codes follow JSON-RPC conventions; tool-level
//! failures are represented as successful results carrying `isError=true`.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// JSON-RPC protocol version emitted in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";
/// MCP protocol revision sent during `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
/// JSON-RPC parse error code for non-JSON input.
pub const PARSE_ERROR: i64 = -32700;
/// JSON-RPC invalid request code.
pub const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC method-not-found code.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC invalid params code.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC internal error code for dispatcher/marshal failures.
pub const INTERNAL_ERROR: i64 = -32603;

// ============================================================================
// SECTION: Envelopes
// ============================================================================

/// Incoming or outgoing JSON-RPC request payload.
///
/// # Invariants
/// - `id` is carried as raw JSON so replies can echo it verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC protocol version.
    pub jsonrpc: String,
    /// Request identifier; absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Optional parameters payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Builds a request with the given id, method, and params.
    #[must_use]
    pub fn new(id: Value, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.to_string(),
            params: Some(params),
        }
    }
}

/// JSON-RPC response envelope.
///
/// # Invariants
/// - Exactly one of `result` or `error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    pub jsonrpc: String,
    /// Request identifier echoed from the request.
    pub id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload when the request fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Builds a successful response carrying `result`.
    #[must_use]
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response with the given code and message.
    #[must_use]
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Structured error metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// SECTION: Tool Call Payloads
// ============================================================================

/// Tool call parameters for `tools/call` requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Tool name.
    pub name: String,
    /// Raw JSON arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// Tool call result payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Tool output content items.
    pub content: Vec<ToolContent>,
    /// Set when the tool itself failed; the content carries the message.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResult {
    /// Builds a successful result carrying one text item.
    #[must_use]
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: payload.into(),
            }],
            is_error: None,
        }
    }

    /// Builds a tool-level failure carrying a human message.
    #[must_use]
    pub fn tool_error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: Some(true),
        }
    }
}

/// Tool output content item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Text tool output; the payload is JSON-serialized or opaque text.
    Text {
        /// Text payload.
        text: String,
    },
}

