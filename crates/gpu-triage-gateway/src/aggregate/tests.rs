// crates/gpu-triage-gateway/src/aggregate/tests.rs
// ============================================================================
// Module: Aggregation Tests
// Description: Unit tests for partial-failure folding and summaries.
// Purpose: Validate status derivation, decode fallback, and the
//          cluster-summary shape.
// Dependencies: gpu-triage-gateway, serde_json, tokio
// ============================================================================

//! ## Overview
//! Builds agent reply bytes in both wire shapes and folds them through
//! the aggregator: the default shape with success/partial/error status,
//! the inventory cluster summary with sorted GPU types, input-order
//! determinism, and degradation of undecodable replies to error leaves.

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

use serde_json::Value;
use serde_json::json;

use gpu_triage_core::NodeResult;

use super::Aggregator;
use super::INVENTORY_TOOL;

/// Builds single-object HTTP reply bytes whose text payload is `payload`.
fn http_reply(payload: &Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {"content": [{"type": "text", "text": payload.to_string()}]},
    }))
    .expect("reply bytes")
}

/// Builds two-object stdio reply bytes whose text payload is `payload`.
fn stdio_reply(payload: &Value) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(&json!({
        "jsonrpc": "2.0",
        "id": 0,
        "result": {"protocolVersion": "2025-03-26"},
    }))
    .expect("init bytes");
    bytes.push(b'\n');
    bytes.extend_from_slice(&http_reply(payload));
    bytes.push(b'\n');
    bytes
}

/// One-device inventory payload with the given GPU name.
fn inventory(names: &[&str]) -> Value {
    let devices: Vec<Value> = names
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "memory_mib": 40_960,
                "temperature_c": 41,
                "utilization_pct": 87,
            })
        })
        .collect();
    json!({"device_count": names.len(), "devices": devices})
}

// ============================================================================
// SECTION: Default Shape Tests
// ============================================================================

#[tokio::test]
async fn all_success_yields_success_status() {
    let results = vec![
        NodeResult::ok("worker-1", "agent-1", http_reply(&json!({"ok": 1}))),
        NodeResult::ok("worker-2", "agent-2", stdio_reply(&json!({"ok": 2}))),
    ];
    let value = Aggregator::new().aggregate("gpu_health", &results).await;
    assert_eq!(value["status"], "success");
    assert_eq!(value["node_count"], 2);
    assert_eq!(value["success_count"], 2);
    assert_eq!(value["error_count"], 0);
    let nodes = value["nodes"].as_array().expect("nodes array");
    assert!(nodes.iter().all(|node| node.get("data").is_some()));
}

#[tokio::test]
async fn mixed_results_yield_partial_status() {
    let results = vec![
        NodeResult::ok("worker-1", "agent-1", http_reply(&json!({"ok": 1}))),
        NodeResult::err("worker-2", "agent-2", "circuit open"),
    ];
    let value = Aggregator::new().aggregate("gpu_health", &results).await;
    assert_eq!(value["status"], "partial");
    assert_eq!(value["success_count"], 1);
    assert_eq!(value["error_count"], 1);
    let nodes = value["nodes"].as_array().expect("nodes array");
    let failed = nodes.iter().find(|node| node["node_name"] == "worker-2").expect("failed node");
    assert_eq!(failed["error"], "circuit open");
}

#[tokio::test]
async fn all_failures_yield_error_status() {
    let results = vec![
        NodeResult::err("worker-1", "agent-1", "not ready"),
        NodeResult::err("worker-2", "agent-2", "exec timed out"),
    ];
    let value = Aggregator::new().aggregate("gpu_health", &results).await;
    assert_eq!(value["status"], "error");
    assert_eq!(value["success_count"], 0);
}

#[tokio::test]
async fn empty_fan_out_is_success_with_zero_counts() {
    let value = Aggregator::new().aggregate("gpu_health", &[]).await;
    assert_eq!(value["status"], "success");
    assert_eq!(value["node_count"], 0);
    assert_eq!(value["success_count"], 0);
    assert_eq!(value["error_count"], 0);
}

#[tokio::test]
async fn undecodable_reply_degrades_to_error_leaf() {
    let results = vec![NodeResult::ok("worker-1", "agent-1", b"not json at all".to_vec())];
    let value = Aggregator::new().aggregate("gpu_health", &results).await;
    assert_eq!(value["status"], "error");
    let nodes = value["nodes"].as_array().expect("nodes array");
    assert!(
        nodes[0]["error"]
            .as_str()
            .is_some_and(|text| text.contains("undecodable reply"))
    );
}

#[tokio::test]
async fn tool_level_error_reply_counts_as_node_error() {
    let reply = serde_json::to_vec(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {"isError": true, "content": [{"type": "text", "text": "no devices"}]},
    }))
    .expect("reply bytes");
    let results = vec![NodeResult::ok("worker-1", "agent-1", reply)];
    let value = Aggregator::new().aggregate("gpu_health", &results).await;
    assert_eq!(value["status"], "error");
}

// ============================================================================
// SECTION: Cluster Summary Tests
// ============================================================================

#[tokio::test]
async fn happy_fan_out_builds_cluster_summary() {
    let results = vec![
        NodeResult::ok("worker-1", "agent-1", http_reply(&inventory(&["Tesla T4"]))),
        NodeResult::ok("worker-2", "agent-2", stdio_reply(&inventory(&["Tesla T4"]))),
    ];
    let value = Aggregator::new().aggregate(INVENTORY_TOOL, &results).await;
    assert_eq!(value["status"], "success");
    let summary = &value["cluster_summary"];
    assert_eq!(summary["total_nodes"], 2);
    assert_eq!(summary["ready_nodes"], 2);
    assert_eq!(summary["total_gpus"], 2);
    assert_eq!(summary["gpu_types"], json!(["Tesla T4"]));
}

#[tokio::test]
async fn unready_node_appears_as_error_entry() {
    let results = vec![
        NodeResult::ok("worker-1", "agent-1", http_reply(&inventory(&["A100", "Tesla T4"]))),
        NodeResult::err("worker-2", "agent-2", "not ready"),
    ];
    let value = Aggregator::new().aggregate(INVENTORY_TOOL, &results).await;
    assert_eq!(value["status"], "partial");
    let summary = &value["cluster_summary"];
    assert_eq!(summary["total_nodes"], 2);
    assert_eq!(summary["ready_nodes"], 1);
    assert_eq!(summary["total_gpus"], 2);
    assert_eq!(summary["gpu_types"], json!(["A100", "Tesla T4"]));
    let nodes = value["nodes"].as_array().expect("nodes array");
    let failed = nodes.iter().find(|node| node["node_name"] == "worker-2").expect("failed node");
    assert_eq!(failed["status"], "error");
    assert_eq!(failed["error"], "not ready");
}

#[tokio::test]
async fn flattened_view_converts_units_and_omits_missing_fields() {
    let payload = json!({
        "device_count": 2,
        "devices": [
            {"name": "A100", "memory_mib": 81_920, "temperature_c": 55, "utilization_pct": 12},
            {"name": "A100"},
        ],
    });
    let results = vec![NodeResult::ok("worker-1", "agent-1", http_reply(&payload))];
    let value = Aggregator::new().aggregate(INVENTORY_TOOL, &results).await;
    let nodes = value["nodes"].as_array().expect("nodes array");
    let gpus = nodes[0]["gpus"].as_array().expect("gpus array");
    assert_eq!(gpus[0]["memory_gib"], json!(80.0));
    assert_eq!(gpus[0]["temperature_c"], json!(55));
    assert_eq!(gpus[0]["utilization_pct"], json!(12));
    assert!(gpus[1].get("memory_gib").is_none());
    assert!(gpus[1].get("temperature_c").is_none());
    assert_eq!(gpus[1]["name"], "A100");
}

#[tokio::test]
async fn summary_counts_are_input_order_invariant() {
    let forward = vec![
        NodeResult::ok("worker-1", "agent-1", http_reply(&inventory(&["Tesla T4"]))),
        NodeResult::ok("worker-2", "agent-2", http_reply(&inventory(&["A100"]))),
        NodeResult::err("worker-3", "agent-3", "not ready"),
    ];
    let mut reversed = forward.clone();
    reversed.reverse();
    let aggregator = Aggregator::new();
    let first = aggregator.aggregate(INVENTORY_TOOL, &forward).await;
    let second = aggregator.aggregate(INVENTORY_TOOL, &reversed).await;
    assert_eq!(first["cluster_summary"], second["cluster_summary"]);
    assert_eq!(first["status"], second["status"]);
    assert_eq!(
        first["cluster_summary"]["gpu_types"],
        json!(["A100", "Tesla T4"])
    );
}
