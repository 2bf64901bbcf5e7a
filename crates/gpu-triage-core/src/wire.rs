// crates/gpu-triage-core/src/wire.rs
// ============================================================================
// Module: Oneshot Wire Framing
// Description: Builders and parsers for the stdio/HTTP MCP exchanges.
// Purpose: Frame tool calls for oneshot agents and decode their replies.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! A stdio agent speaks exactly two messages: an `initialize` call (id 0)
//! followed by a `tools/call` (id 1), newline-separated and newline-
//! terminated. Its reply stream is a sequence of top-level JSON objects;
//! the last one is the tool reply. The HTTP variant is a single
//! `tools/call` object with a single-object reply. Splitting is done by
//! string-aware brace-depth counting so braces inside string literals never
//! confuse the framer.

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::rpc::JSONRPC_VERSION;
use crate::rpc::JsonRpcRequest;
use crate::rpc::MCP_PROTOCOL_VERSION;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Framing errors for oneshot request building and reply parsing.
///
/// # Invariants
/// - Variants are stable for programmatic handling by the router.
#[derive(Debug, Error)]
pub enum FramingError {
    /// Tool name was empty at build time.
    #[error("tool name must not be empty")]
    EmptyToolName,
    /// Request or reply serialization failed.
    #[error("framing serialization failed: {0}")]
    Serialization(String),
    /// Reply payload contained no top-level JSON objects.
    #[error("reply contains no json objects")]
    NoObjects,
    /// Reply payload did not satisfy the envelope contract.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    /// Remote returned a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the remote.
        message: String,
    },
    /// Remote returned a tool-level failure (`isError=true`).
    #[error("tool error: {0}")]
    Tool(String),
}

// ============================================================================
// SECTION: Request Builders
// ============================================================================

/// Builds the two-message init+tool exchange for a stdio agent.
///
/// The output is two independent JSON objects separated by a single `\n`
/// and terminated by `\n`.
///
/// # Errors
///
/// Returns [`FramingError::EmptyToolName`] for an empty tool name and
/// [`FramingError::Serialization`] when encoding fails.
pub fn build_stdio_request(tool_name: &str, arguments: &Value) -> Result<Vec<u8>, FramingError> {
    if tool_name.is_empty() {
        return Err(FramingError::EmptyToolName);
    }
    let init = JsonRpcRequest::new(
        json!(0),
        "initialize",
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "gpu-triage-gateway",
                "version": env!("CARGO_PKG_VERSION"),
            },
        }),
    );
    let call = tools_call_request(tool_name, arguments);
    let mut bytes = encode(&init)?;
    bytes.push(b'\n');
    bytes.extend_from_slice(&encode(&call)?);
    bytes.push(b'\n');
    Ok(bytes)
}

/// Builds a single `tools/call` object for the HTTP transport.
///
/// No `initialize` is sent and no trailing newline is appended; the HTTP
/// request plane is stateless.
///
/// # Errors
///
/// Returns [`FramingError::EmptyToolName`] for an empty tool name and
/// [`FramingError::Serialization`] when encoding fails.
pub fn build_http_request(tool_name: &str, arguments: &Value) -> Result<Vec<u8>, FramingError> {
    if tool_name.is_empty() {
        return Err(FramingError::EmptyToolName);
    }
    encode(&tools_call_request(tool_name, arguments))
}

/// Builds the `tools/call` envelope shared by both transports.
fn tools_call_request(tool_name: &str, arguments: &Value) -> JsonRpcRequest {
    JsonRpcRequest::new(
        json!(1),
        "tools/call",
        json!({
            "name": tool_name,
            "arguments": arguments,
        }),
    )
}

/// Encodes an envelope to bytes.
fn encode(request: &JsonRpcRequest) -> Result<Vec<u8>, FramingError> {
    serde_json::to_vec(request).map_err(|err| FramingError::Serialization(err.to_string()))
}

// ============================================================================
// SECTION: Object Splitter
// ============================================================================

/// Splits a payload into its top-level JSON objects.
///
/// Scanning is string-aware: a `"` toggles string state, `\` escapes the
/// next character, and braces inside strings do not count. Newlines are
/// permitted but not required between objects. Candidates that fail to
/// parse as JSON are discarded, so non-JSON input yields an empty vector.
#[must_use]
pub fn split_top_level_objects(payload: &str) -> Vec<Value> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start: Option<usize> = None;
    for (index, ch) in payload.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(index);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(from) = start.take()
                    && let Ok(value) = serde_json::from_str::<Value>(&payload[from..=index])
                {
                    objects.push(value);
                }
            }
            _ => {}
        }
    }
    objects
}

// ============================================================================
// SECTION: Reply Parsers
// ============================================================================

/// Parses a stdio agent reply stream and extracts the tool payload.
///
/// The last top-level object is the tool-call reply. An `error` field is
/// surfaced as [`FramingError::Rpc`]; a result with `isError=true` is
/// surfaced as [`FramingError::Tool`]. Otherwise the first content item's
/// text is decoded as JSON when possible and returned raw when not; empty
/// content yields `None`.
///
/// # Errors
///
/// Returns [`FramingError`] when the payload has no objects or violates
/// the reply contract.
pub fn parse_stdio_response(payload: &[u8]) -> Result<Option<Value>, FramingError> {
    let text = String::from_utf8_lossy(payload);
    let objects = split_top_level_objects(&text);
    let last = objects.last().ok_or(FramingError::NoObjects)?;
    extract_tool_payload(last)
}

/// Parses a single-object HTTP reply and extracts the tool payload.
///
/// # Errors
///
/// Returns [`FramingError`] when the payload is not a JSON object or
/// violates the reply contract.
pub fn parse_http_response(payload: &[u8]) -> Result<Option<Value>, FramingError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|err| FramingError::InvalidEnvelope(err.to_string()))?;
    if !value.is_object() {
        return Err(FramingError::InvalidEnvelope("reply is not an object".to_string()));
    }
    extract_tool_payload(&value)
}

/// Extracts the tool payload from one reply envelope.
fn extract_tool_payload(reply: &Value) -> Result<Option<Value>, FramingError> {
    if let Some(error) = reply.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown rpc error")
            .to_string();
        return Err(FramingError::Rpc {
            code,
            message,
        });
    }
    let Some(result) = reply.get("result") else {
        return Ok(None);
    };
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|content| content.first())
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str);
    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(FramingError::Tool(text.unwrap_or("tool reported an error").to_string()));
    }
    let Some(text) = text else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(text) {
        Ok(decoded) => Ok(Some(decoded)),
        Err(_) => Ok(Some(Value::String(text.to_string()))),
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates framed request bytes before they are handed to a transport.
///
/// The byte slice must end in `\n`, split into at least one object, and
/// every object must carry `jsonrpc == "2.0"` and a non-empty method.
///
/// # Errors
///
/// Returns [`FramingError`] describing the first violated rule.
pub fn validate_request_bytes(payload: &[u8]) -> Result<(), FramingError> {
    if payload.last() != Some(&b'\n') {
        return Err(FramingError::InvalidEnvelope(
            "request bytes must end with a newline".to_string(),
        ));
    }
    let text = String::from_utf8_lossy(payload);
    let objects = split_top_level_objects(&text);
    if objects.is_empty() {
        return Err(FramingError::NoObjects);
    }
    for object in &objects {
        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(FramingError::InvalidEnvelope("missing jsonrpc version".to_string()));
        }
        let method = object.get("method").and_then(Value::as_str).unwrap_or_default();
        if method.is_empty() {
            return Err(FramingError::InvalidEnvelope("missing method".to_string()));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
