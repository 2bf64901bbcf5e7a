// crates/gpu-triage-core/src/wire/tests.rs
// ============================================================================
// Module: Wire Framing Tests
// Description: Unit tests for oneshot framing and the object splitter.
// Purpose: Validate build/parse round trips and splitter string handling.
// Dependencies: gpu-triage-core, serde_json, proptest
// ============================================================================

//! ## Overview
//! Covers the two-message stdio framing, the single-object HTTP framing,
//! the string-aware brace splitter, and the reply parsing rules including
//! `error` envelopes and `isError=true` tool failures.

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

use proptest::prelude::proptest;
use serde_json::Value;
use serde_json::json;

use super::FramingError;
use super::build_http_request;
use super::build_stdio_request;
use super::parse_http_response;
use super::parse_stdio_response;
use super::split_top_level_objects;
use super::validate_request_bytes;

// ============================================================================
// SECTION: Builder Tests
// ============================================================================

#[test]
fn stdio_request_is_two_objects_newline_terminated() {
    let bytes = build_stdio_request("gpu_inventory", &json!({"verbose": true})).expect("framed");
    assert_eq!(bytes.last(), Some(&b'\n'));
    let text = String::from_utf8(bytes.clone()).expect("utf8");
    let objects = split_top_level_objects(&text);
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0]["method"], "initialize");
    assert_eq!(objects[0]["id"], 0);
    assert_eq!(objects[1]["method"], "tools/call");
    assert_eq!(objects[1]["id"], 1);
    assert_eq!(objects[1]["params"]["name"], "gpu_inventory");
    assert_eq!(objects[1]["params"]["arguments"]["verbose"], true);
    validate_request_bytes(&bytes).expect("valid frame");
}

#[test]
fn stdio_request_rejects_empty_tool_name() {
    let err = build_stdio_request("", &json!({})).expect_err("expected rejection");
    assert!(matches!(err, FramingError::EmptyToolName));
}

#[test]
fn http_request_is_single_object_without_newline() {
    let bytes = build_http_request("gpu_health", &json!({})).expect("framed");
    assert_ne!(bytes.last(), Some(&b'\n'));
    let value: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(value["method"], "tools/call");
    assert_eq!(value["params"]["name"], "gpu_health");
}

// ============================================================================
// SECTION: Splitter Tests
// ============================================================================

#[test]
fn splitter_handles_braces_inside_strings() {
    let payload = r#"{"a":"{not a brace}"}{"b":"\"}{"}"#;
    let objects = split_top_level_objects(payload);
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0]["a"], "{not a brace}");
    assert_eq!(objects[1]["b"], "\"}{");
}

#[test]
fn splitter_ignores_non_json_input() {
    assert!(split_top_level_objects("no objects here").is_empty());
    assert!(split_top_level_objects("").is_empty());
}

#[test]
fn splitter_accepts_objects_without_separators() {
    let objects = split_top_level_objects(r#"{"a":1}{"b":2}{"c":3}"#);
    assert_eq!(objects.len(), 3);
}

#[test]
fn splitter_skips_unbalanced_tail() {
    let objects = split_top_level_objects(r#"{"a":1}{"b":"#);
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0]["a"], 1);
}

proptest! {
    #[test]
    fn splitter_round_trips_object_sequences(values in proptest::collection::vec(
        proptest::collection::btree_map("[a-z{}\"\\\\]{0,8}", "[ -~]{0,12}", 0..4),
        1..5,
    )) {
        let mut payload = String::new();
        let mut expected = Vec::new();
        for map in &values {
            let object = serde_json::to_value(map).expect("object");
            payload.push_str(&serde_json::to_string(&object).expect("encode"));
            payload.push('\n');
            expected.push(object);
        }
        let objects = split_top_level_objects(&payload);
        assert_eq!(objects, expected);
    }
}

// ============================================================================
// SECTION: Reply Parsing Tests
// ============================================================================

/// Builds an MCP reply whose content text is the given string.
fn reply_with_text(text: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {"content": [{"type": "text", "text": text}]},
    }))
    .expect("reply bytes")
}

#[test]
fn parse_stdio_takes_last_object_and_decodes_json_text() {
    let init = json!({"jsonrpc": "2.0", "id": 0, "result": {}});
    let mut payload = serde_json::to_vec(&init).expect("init bytes");
    payload.push(b'\n');
    payload.extend_from_slice(&reply_with_text(r#"{"device_count":2}"#));
    let value = parse_stdio_response(&payload).expect("payload").expect("value");
    assert_eq!(value["device_count"], 2);
}

#[test]
fn parse_stdio_returns_raw_string_for_opaque_text() {
    let value = parse_stdio_response(&reply_with_text("plain text")).expect("payload");
    assert_eq!(value, Some(Value::String("plain text".to_string())));
}

#[test]
fn parse_stdio_surfaces_rpc_error() {
    let reply = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": {"code": -32603, "message": "boom"},
    });
    let payload = serde_json::to_vec(&reply).expect("bytes");
    let err = parse_stdio_response(&payload).expect_err("expected rpc error");
    assert!(matches!(err, FramingError::Rpc { code: -32603, .. }));
}

#[test]
fn parse_stdio_surfaces_tool_error() {
    let reply = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {"isError": true, "content": [{"type": "text", "text": "no devices"}]},
    });
    let payload = serde_json::to_vec(&reply).expect("bytes");
    let err = parse_stdio_response(&payload).expect_err("expected tool error");
    assert!(matches!(err, FramingError::Tool(message) if message == "no devices"));
}

#[test]
fn parse_stdio_empty_content_yields_none() {
    let reply = json!({"jsonrpc": "2.0", "id": 1, "result": {"content": []}});
    let payload = serde_json::to_vec(&reply).expect("bytes");
    assert_eq!(parse_stdio_response(&payload).expect("payload"), None);
}

#[test]
fn parse_stdio_rejects_empty_payload() {
    let err = parse_stdio_response(b"").expect_err("expected failure");
    assert!(matches!(err, FramingError::NoObjects));
}

#[test]
fn parse_http_requires_single_object() {
    let err = parse_http_response(b"[1,2,3]").expect_err("expected failure");
    assert!(matches!(err, FramingError::InvalidEnvelope(_)));
    let value = parse_http_response(&reply_with_text("42")).expect("payload");
    assert_eq!(value, Some(json!(42)));
}

// ============================================================================
// SECTION: Validation Tests
// ============================================================================

#[test]
fn validate_rejects_missing_trailing_newline() {
    let frame = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call"}"#;
    assert!(validate_request_bytes(frame).is_err());
}

#[test]
fn validate_rejects_wrong_version_and_empty_method() {
    let wrong = b"{\"jsonrpc\":\"1.0\",\"id\":1,\"method\":\"x\"}\n";
    assert!(validate_request_bytes(wrong).is_err());
    let empty = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"\"}\n";
    assert!(validate_request_bytes(empty).is_err());
}

#[test]
fn validate_accepts_framed_stdio_request() {
    let bytes = build_stdio_request("xid_errors", &json!({"since": "boot"})).expect("framed");
    validate_request_bytes(&bytes).expect("valid");
}
