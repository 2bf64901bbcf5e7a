// crates/gpu-triage-gateway/src/aggregate.rs
// ============================================================================
// Module: Result Aggregation
// Description: Fold per-node results into one partial-failure response.
// Purpose: Default shape for every tool plus the cluster-summary shape
//          for the inventory tool.
// Dependencies: gpu-triage-core, gpu-triage-cluster, serde_json
// ============================================================================

//! ## Overview
//! The aggregator consumes one fan-out's `NodeResult`s. Each per-node
//! reply is decoded by first attempting the single-object HTTP shape and
//! then the multi-object stdio shape; when both fail the node surfaces a
//! verbatim `{error}` leaf instead of poisoning the rest. Status is
//! `success` when every node decoded, `error` when none did, `partial`
//! otherwise; an empty fan-out is `success` with zero counts because
//! nothing erred. For the designated inventory tool the result is
//! reshaped into a cluster summary with deterministically sorted GPU
//! types and a flattened per-node device view, optionally enriched with
//! node metadata from the platform.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use gpu_triage_cluster::NodeMetadataClient;
use gpu_triage_core::NodeResult;
use gpu_triage_core::wire::parse_http_response;
use gpu_triage_core::wire::parse_stdio_response;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// The designated inventory tool that receives the cluster-summary shape.
pub const INVENTORY_TOOL: &str = "gpu_inventory";
/// Mebibytes per gibibyte, for the flattened memory view.
const MIB_PER_GIB: f64 = 1024.0;

// ============================================================================
// SECTION: Aggregator
// ============================================================================

/// Folds per-node results into one structured response.
pub struct Aggregator {
    /// Platform metadata client for enriched summaries.
    metadata: Option<Arc<NodeMetadataClient>>,
    /// Whether summaries attach per-node Kubernetes metadata.
    include_k8s_metadata: bool,
}

impl Aggregator {
    /// Creates an aggregator without metadata enrichment.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            metadata: None,
            include_k8s_metadata: false,
        }
    }

    /// Creates an aggregator that enriches summaries when `include` is set.
    #[must_use]
    pub fn with_metadata(client: Arc<NodeMetadataClient>, include: bool) -> Self {
        Self {
            metadata: Some(client),
            include_k8s_metadata: include,
        }
    }

    /// Aggregates one fan-out's results for the named tool.
    pub async fn aggregate(&self, tool_name: &str, results: &[NodeResult]) -> Value {
        let decoded: Vec<DecodedNode> = results.iter().map(DecodedNode::from_result).collect();
        let success_count = decoded.iter().filter(|node| node.data.is_some()).count();
        let error_count = decoded.len() - success_count;
        let status = overall_status(decoded.len(), success_count);
        if tool_name == INVENTORY_TOOL {
            self.cluster_summary(status, &decoded, success_count, error_count).await
        } else {
            default_shape(status, &decoded, success_count, error_count)
        }
    }

    /// Builds the cluster-summary shape for the inventory tool.
    async fn cluster_summary(
        &self,
        status: &'static str,
        decoded: &[DecodedNode],
        success_count: usize,
        error_count: usize,
    ) -> Value {
        let mut total_gpus: u64 = 0;
        let mut gpu_types: BTreeSet<String> = BTreeSet::new();
        let mut nodes = Vec::with_capacity(decoded.len());
        for node in decoded {
            match &node.data {
                Some(data) => {
                    let devices = data.get("devices").and_then(Value::as_array);
                    let count = data
                        .get("device_count")
                        .and_then(Value::as_u64)
                        .or_else(|| devices.map(|devices| u64::try_from(devices.len()).unwrap_or(0)))
                        .unwrap_or(0);
                    total_gpus += count;
                    for device in devices.into_iter().flatten() {
                        if let Some(name) = device.get("name").and_then(Value::as_str) {
                            gpu_types.insert(name.to_string());
                        }
                    }
                    let mut entry = Map::new();
                    entry.insert("node_name".to_string(), json!(node.node_name));
                    entry.insert("pod_name".to_string(), json!(node.pod_name));
                    entry.insert("status".to_string(), json!("success"));
                    entry.insert("gpu_count".to_string(), json!(count));
                    if let Some(devices) = devices {
                        let flattened: Vec<Value> = devices.iter().map(flatten_device).collect();
                        entry.insert("gpus".to_string(), Value::Array(flattened));
                    }
                    if self.include_k8s_metadata
                        && let Some(metadata) = &self.metadata
                        && let Ok(view) = metadata.node_metadata(&node.node_name).await
                        && let Ok(value) = serde_json::to_value(view)
                    {
                        entry.insert("k8s_metadata".to_string(), value);
                    }
                    nodes.push(Value::Object(entry));
                }
                None => nodes.push(json!({
                    "node_name": node.node_name,
                    "pod_name": node.pod_name,
                    "status": "error",
                    "error": node.error,
                })),
            }
        }
        json!({
            "status": status,
            "cluster_summary": {
                "total_nodes": decoded.len(),
                "ready_nodes": success_count,
                "total_gpus": total_gpus,
                "gpu_types": gpu_types.into_iter().collect::<Vec<_>>(),
            },
            "node_count": decoded.len(),
            "success_count": success_count,
            "error_count": error_count,
            "nodes": nodes,
        })
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Decoding
// ============================================================================

/// One node's decoded reply or error text.
struct DecodedNode {
    /// Node the leg targeted.
    node_name: String,
    /// Agent pod the leg targeted.
    pod_name: String,
    /// Decoded payload when the leg and decode both succeeded.
    data: Option<Value>,
    /// Error text when either failed.
    error: Option<String>,
}

impl DecodedNode {
    /// Decodes one leg result, degrading failures to an error leaf.
    fn from_result(result: &NodeResult) -> Self {
        let (data, error) = match (&result.response, &result.error_text) {
            (Some(bytes), _) => match decode_reply(bytes) {
                Ok(payload) => (Some(payload.unwrap_or(Value::Null)), None),
                Err(detail) => (None, Some(detail)),
            },
            (None, Some(text)) => (None, Some(text.clone())),
            (None, None) => (None, Some("empty node result".to_string())),
        };
        Self {
            node_name: result.node_name.clone(),
            pod_name: result.pod_name.clone(),
            data,
            error,
        }
    }
}

/// Decodes reply bytes: HTTP shape first, then the stdio shape.
fn decode_reply(bytes: &[u8]) -> Result<Option<Value>, String> {
    match parse_http_response(bytes) {
        Ok(payload) => Ok(payload),
        Err(http_err) => match parse_stdio_response(bytes) {
            Ok(payload) => Ok(payload),
            Err(stdio_err) => Err(format!("undecodable reply: {http_err}; {stdio_err}")),
        },
    }
}

// ============================================================================
// SECTION: Shapes
// ============================================================================

/// Overall status from node and success counts.
const fn overall_status(total: usize, successes: usize) -> &'static str {
    if successes == total {
        // An empty fan-out is a success: there is nothing to have erred.
        "success"
    } else if successes == 0 {
        "error"
    } else {
        "partial"
    }
}

/// Builds the default aggregation shape shared by every tool.
fn default_shape(
    status: &'static str,
    decoded: &[DecodedNode],
    success_count: usize,
    error_count: usize,
) -> Value {
    let nodes: Vec<Value> = decoded
        .iter()
        .map(|node| match &node.data {
            Some(data) => json!({
                "node_name": node.node_name,
                "pod_name": node.pod_name,
                "data": data,
            }),
            None => json!({
                "node_name": node.node_name,
                "pod_name": node.pod_name,
                "error": node.error,
            }),
        })
        .collect();
    json!({
        "status": status,
        "node_count": decoded.len(),
        "success_count": success_count,
        "error_count": error_count,
        "nodes": nodes,
    })
}

/// Flattens one device into the documented summary subset.
///
/// Memory converts to GiB, temperature and utilization stay integral;
/// missing fields are omitted rather than zero-filled.
fn flatten_device(device: &Value) -> Value {
    let mut entry = Map::new();
    if let Some(name) = device.get("name").and_then(Value::as_str) {
        entry.insert("name".to_string(), json!(name));
    }
    if let Some(mib) = device.get("memory_mib").and_then(Value::as_u64) {
        #[allow(
            clippy::cast_precision_loss,
            reason = "Device memory sizes are far below the f64 mantissa limit."
        )]
        entry.insert("memory_gib".to_string(), json!(mib as f64 / MIB_PER_GIB));
    }
    if let Some(temperature) = device.get("temperature_c").and_then(Value::as_i64) {
        entry.insert("temperature_c".to_string(), json!(temperature));
    }
    if let Some(utilization) = device.get("utilization_pct").and_then(Value::as_u64) {
        entry.insert("utilization_pct".to_string(), json!(utilization));
    }
    Value::Object(entry)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
