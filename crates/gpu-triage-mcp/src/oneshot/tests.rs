// crates/gpu-triage-mcp/src/oneshot/tests.rs
// ============================================================================
// Module: Oneshot Transport Tests
// Description: Unit tests for the line-delimited stdio loop.
// Purpose: Validate exact termination, tallies, id preservation, and
//          cancellation liveness.
// Dependencies: gpu-triage-mcp, tokio
// ============================================================================

//! ## Overview
//! Feeds byte-slice inputs through the transport and inspects the reply
//! stream: exactly-N termination that leaves trailing input unconsumed,
//! empty-line skipping, parse-error tallies with id extraction, verbatim
//! id echo for numeric and string ids, and prompt return when cancelled
//! while blocked on input.

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

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tokio::io::BufReader;

use super::OneshotError;
use super::OneshotStats;
use super::OneshotTransport;
use crate::config::TransportKind;
use crate::tools::RequestContext;
use crate::tools::ToolDefinition;
use crate::tools::ToolDispatcher;
use crate::tools::ToolError;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Dispatcher echoing its arguments back as the tool payload.
struct EchoDispatcher;

#[async_trait]
impl ToolDispatcher for EchoDispatcher {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "echo",
            description: "Echo arguments",
            input_schema: json!({"type": "object"}),
            mutating: false,
        }]
    }

    async fn call_tool(
        &self,
        _context: &RequestContext,
        _name: &str,
        arguments: Value,
    ) -> Result<Value, ToolError> {
        Ok(arguments)
    }
}

/// Builds a bounded transport over the echo dispatcher.
fn transport(max_requests: u32) -> OneshotTransport {
    OneshotTransport::new(Arc::new(EchoDispatcher), max_requests).expect("transport")
}

/// Stdio-style context.
fn context() -> RequestContext {
    RequestContext::new(TransportKind::Stdio, Some("cid-oneshot".to_string()))
}

/// One `tools/call` line with the given id.
fn call_line(id: &Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": "echo", "arguments": {"n": 1}},
    })
    .to_string()
}

/// Splits the output buffer into parsed reply lines.
fn replies(output: &[u8]) -> Vec<Value> {
    let text = String::from_utf8(output.to_vec()).expect("utf8 output");
    assert!(text.is_empty() || text.ends_with('\n'));
    text.lines().map(|line| serde_json::from_str(line).expect("reply json")).collect()
}

// ============================================================================
// SECTION: Termination Tests
// ============================================================================

#[tokio::test]
async fn exits_after_exactly_max_requests_leaving_input_unconsumed() {
    let init = json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}}).to_string();
    let third = call_line(&json!(2));
    let text = format!("{init}\n{}\n{third}\n", call_line(&json!(1)));
    let mut input = text.as_bytes();
    let mut output = Vec::new();
    let stats = transport(2)
        .run(&mut input, &mut output, &context())
        .await
        .expect("stats");
    assert_eq!(
        stats,
        OneshotStats {
            processed: 2,
            errors: 0,
            skipped: 0,
        }
    );
    assert_eq!(replies(&output).len(), 2);
    // The third line is still sitting in the input.
    assert_eq!(String::from_utf8_lossy(input), format!("{third}\n"));
}

#[tokio::test]
async fn clean_eof_returns_partial_stats() {
    let text = format!("{}\n", call_line(&json!(1)));
    let mut input = text.as_bytes();
    let mut output = Vec::new();
    let stats = transport(5)
        .run(&mut input, &mut output, &context())
        .await
        .expect("stats");
    assert_eq!(stats.processed, 1);
    assert_eq!(replies(&output).len(), 1);
}

#[tokio::test]
async fn construction_rejects_zero_budget() {
    let err = OneshotTransport::new(Arc::new(EchoDispatcher), 0).expect_err("expected rejection");
    assert!(matches!(err, OneshotError::Config(_)));
}

#[tokio::test]
async fn unbounded_transport_serves_until_eof() {
    let text = format!("{}\n{}\n{}\n", call_line(&json!(1)), call_line(&json!(2)), call_line(&json!(3)));
    let mut input = text.as_bytes();
    let mut output = Vec::new();
    let stats = OneshotTransport::unbounded(Arc::new(EchoDispatcher))
        .run(&mut input, &mut output, &context())
        .await
        .expect("stats");
    assert_eq!(stats.processed, 3);
}

#[tokio::test]
async fn framed_request_round_trips_through_echo_dispatcher() {
    // The gateway's exec-path frame, fed through an echoing agent, comes
    // back as the original arguments.
    let arguments = json!({"verbose": true, "filter": "t4"});
    let frame = gpu_triage_core::build_stdio_request("echo", &arguments).expect("framed request");
    let mut input = frame.as_slice();
    let mut output = Vec::new();
    let stats = transport(2)
        .run(&mut input, &mut output, &context())
        .await
        .expect("stats");
    assert_eq!(stats.processed, 2);
    assert_eq!(output.last(), Some(&b'\n'));
    let payload = gpu_triage_core::parse_stdio_response(&output)
        .expect("parsed reply")
        .expect("payload");
    assert_eq!(payload, arguments);
}

// ============================================================================
// SECTION: Tally Tests
// ============================================================================

#[tokio::test]
async fn empty_lines_are_skipped_without_replies() {
    let text = format!("\n\n{}\n\n", call_line(&json!(1)));
    let mut input = text.as_bytes();
    let mut output = Vec::new();
    let stats = transport(1)
        .run(&mut input, &mut output, &context())
        .await
        .expect("stats");
    assert_eq!(
        stats,
        OneshotStats {
            processed: 1,
            errors: 0,
            skipped: 2,
        }
    );
    assert_eq!(replies(&output).len(), 1);
}

#[tokio::test]
async fn invalid_lines_reply_with_parse_error_and_count_as_errors() {
    let text = format!("this is not json\n{}\n", call_line(&json!(1)));
    let mut input = text.as_bytes();
    let mut output = Vec::new();
    let stats = transport(1)
        .run(&mut input, &mut output, &context())
        .await
        .expect("stats");
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.errors, 1);
    let replies = replies(&output);
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["error"]["code"], -32700);
    assert_eq!(replies[0]["id"], Value::Null);
}

#[tokio::test]
async fn parse_error_preserves_extractable_id() {
    // Valid JSON, but not a JSON-RPC request: the id is still echoed.
    let text = "{\"id\": 42}\n";
    let mut input = text.as_bytes();
    let mut output = Vec::new();
    let stats = OneshotTransport::unbounded(Arc::new(EchoDispatcher))
        .run(&mut input, &mut output, &context())
        .await
        .expect("stats");
    assert_eq!(stats.errors, 1);
    let replies = replies(&output);
    assert_eq!(replies[0]["error"]["code"], -32700);
    assert_eq!(replies[0]["id"], 42);
}

#[tokio::test]
async fn reply_ids_echo_numeric_and_string_ids_verbatim() {
    let text = format!("{}\n{}\n", call_line(&json!(7)), call_line(&json!("req-a")));
    let mut input = text.as_bytes();
    let mut output = Vec::new();
    let _ = transport(2)
        .run(&mut input, &mut output, &context())
        .await
        .expect("stats");
    let replies = replies(&output);
    assert_eq!(replies[0]["id"], 7);
    assert_eq!(replies[1]["id"], "req-a");
}

// ============================================================================
// SECTION: Cancellation Tests
// ============================================================================

#[tokio::test]
async fn cancellation_while_blocked_on_input_returns_promptly() {
    // A duplex stream with a live writer blocks the reader indefinitely.
    let (reader, _writer) = tokio::io::duplex(64);
    let mut input = BufReader::new(reader);
    let mut output = Vec::new();
    let context = context();
    let cancel = context.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });
    let started = Instant::now();
    let err = transport(2)
        .run(&mut input, &mut output, &context)
        .await
        .expect_err("expected cancellation");
    assert!(started.elapsed() < Duration::from_secs(1));
    let OneshotError::Cancelled {
        stats,
    } = err
    else {
        panic!("expected cancelled variant");
    };
    assert_eq!(stats.processed, 0);
    // The input handle is back in our hands; nothing else holds it.
    drop(input);
}

#[tokio::test]
async fn cancellation_carries_partial_stats() {
    let (reader, mut writer) = tokio::io::duplex(256);
    let mut input = BufReader::new(reader);
    let mut output = Vec::new();
    let context = context();
    let cancel = context.cancel.clone();
    tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        let line = format!("{}\n", call_line(&json!(1)));
        writer.write_all(line.as_bytes()).await.expect("feed line");
        writer.flush().await.expect("feed flush");
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        // Keep the writer alive so the reader stays blocked until cancel.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });
    let err = transport(5)
        .run(&mut input, &mut output, &context)
        .await
        .expect_err("expected cancellation");
    let OneshotError::Cancelled {
        stats,
    } = err
    else {
        panic!("expected cancelled variant");
    };
    assert_eq!(stats.processed, 1);
    assert_eq!(replies(&output).len(), 1);
}
