// crates/gpu-triage-core/src/model.rs
// ============================================================================
// Module: Request-Plane Model
// Description: Tool requests, node descriptors, endpoints, and leg results.
// Purpose: Value types exchanged between the directory, router, and
//          aggregator during one fan-out.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! These types live only for the duration of one tool invocation: the
//! directory produces fresh [`NodeDescriptor`]s on every enumeration, the
//! router turns each into a [`NodeResult`], and the aggregator consumes
//! the results. Endpoint derivation is pure so it can be tested without a
//! cluster.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::correlation::generate_correlation_id;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default port an agent's HTTP listener binds to inside its pod.
pub const DEFAULT_AGENT_PORT: u16 = 8080;
/// Cluster-internal DNS suffix used for fallback routing.
const CLUSTER_DNS_SUFFIX: &str = "svc.cluster.local";

// ============================================================================
// SECTION: Tool Request/Response
// ============================================================================

/// One tool invocation as accepted at the gateway boundary.
///
/// # Invariants
/// - Immutable once created; `correlation_id` is always populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Declared tool name.
    pub tool_name: String,
    /// Free-form nested arguments; schemas are tool-specific.
    pub arguments: Map<String, Value>,
    /// Opaque correlation token propagated to every downstream call.
    pub correlation_id: String,
}

impl ToolRequest {
    /// Builds a request, generating a correlation ID when none is given.
    #[must_use]
    pub fn new(
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            correlation_id: correlation_id.unwrap_or_else(generate_correlation_id),
        }
    }
}

/// Outcome of one tool invocation.
///
/// Tool-level failures reported with `isError=true` are not transport
/// errors; they surface as [`ToolResponse::Ok`] text at the MCP layer and
/// are distinguished by the caller attempting a structured decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolResponse {
    /// Successful invocation; the payload is JSON text or an opaque string.
    Ok {
        /// Serialized payload handed back as the tool's text content.
        text_payload: String,
    },
    /// Failed invocation with a JSON-RPC convention error code.
    Err {
        /// JSON-RPC error code (`-32700` parse, `-32603` internal).
        code: i64,
        /// Human-readable error message.
        message: String,
    },
}

// ============================================================================
// SECTION: Node Descriptors
// ============================================================================

/// One agent pod as seen by the cluster directory.
///
/// # Invariants
/// - Created fresh on each enumeration; never cached across calls.
/// - The router must not dispatch to a descriptor with `ready == false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Kubernetes node name the agent pod is scheduled on.
    pub name: String,
    /// Agent pod name.
    pub pod_name: String,
    /// Agent pod IP; empty when the pod has no address yet.
    pub pod_ip: String,
    /// True when the pod reports the `Ready` condition.
    pub ready: bool,
    /// Namespace the agent pod lives in.
    pub namespace: String,
    /// Headless service name stamped by the directory.
    pub service_name: String,
}

impl NodeDescriptor {
    /// Derives the pod-IP HTTP endpoint, bracketing IPv6 addresses.
    ///
    /// Returns an empty string when the pod has no IP.
    #[must_use]
    pub fn http_endpoint(&self, port: u16) -> String {
        if self.pod_ip.is_empty() {
            return String::new();
        }
        if self.pod_ip.contains(':') {
            format!("http://[{}]:{port}", self.pod_ip)
        } else {
            format!("http://{}:{port}", self.pod_ip)
        }
    }

    /// Derives the DNS fallback endpoint through the headless service.
    ///
    /// Returns an empty string when any name component is empty.
    #[must_use]
    pub fn dns_endpoint(&self, port: u16) -> String {
        if self.pod_name.is_empty() || self.service_name.is_empty() || self.namespace.is_empty() {
            return String::new();
        }
        format!(
            "http://{}.{}.{}.{CLUSTER_DNS_SUFFIX}:{port}",
            self.pod_name, self.service_name, self.namespace
        )
    }
}

// ============================================================================
// SECTION: Leg Results
// ============================================================================

/// Result of one router leg against one node.
///
/// # Invariants
/// - Exactly one of `response` and `error_text` is populated.
/// - Ordering within a fan-out result sequence is unspecified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResult {
    /// Node the leg targeted.
    pub node_name: String,
    /// Agent pod the leg targeted.
    pub pod_name: String,
    /// Raw reply bytes on success.
    pub response: Option<Vec<u8>>,
    /// Leg failure description on error.
    pub error_text: Option<String>,
}

impl NodeResult {
    /// Builds a successful leg result.
    #[must_use]
    pub fn ok(node_name: impl Into<String>, pod_name: impl Into<String>, response: Vec<u8>) -> Self {
        Self {
            node_name: node_name.into(),
            pod_name: pod_name.into(),
            response: Some(response),
            error_text: None,
        }
    }

    /// Builds a failed leg result.
    #[must_use]
    pub fn err(
        node_name: impl Into<String>,
        pod_name: impl Into<String>,
        error_text: impl Into<String>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            pod_name: pod_name.into(),
            response: None,
            error_text: Some(error_text.into()),
        }
    }

    /// True when the leg succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.response.is_some()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        reason = "Test-only assertions use unwrap/expect for clarity."
    )]

    use serde_json::Map;

    use super::NodeDescriptor;
    use super::NodeResult;
    use super::ToolRequest;

    /// Builds a descriptor with every component populated.
    fn descriptor() -> NodeDescriptor {
        NodeDescriptor {
            name: "worker-1".to_string(),
            pod_name: "agent-abc".to_string(),
            pod_ip: "10.0.0.5".to_string(),
            ready: true,
            namespace: "gpu-system".to_string(),
            service_name: "gpu-triage-agent".to_string(),
        }
    }

    #[test]
    fn http_endpoint_uses_pod_ip() {
        assert_eq!(descriptor().http_endpoint(8080), "http://10.0.0.5:8080");
    }

    #[test]
    fn http_endpoint_brackets_ipv6() {
        let mut desc = descriptor();
        desc.pod_ip = "fd00::5".to_string();
        assert_eq!(desc.http_endpoint(8080), "http://[fd00::5]:8080");
    }

    #[test]
    fn http_endpoint_empty_without_ip() {
        let mut desc = descriptor();
        desc.pod_ip = String::new();
        assert_eq!(desc.http_endpoint(8080), "");
    }

    #[test]
    fn dns_endpoint_joins_components() {
        assert_eq!(
            descriptor().dns_endpoint(8080),
            "http://agent-abc.gpu-triage-agent.gpu-system.svc.cluster.local:8080"
        );
    }

    #[test]
    fn dns_endpoint_empty_when_component_missing() {
        let mut desc = descriptor();
        desc.service_name = String::new();
        assert_eq!(desc.dns_endpoint(8080), "");
    }

    #[test]
    fn tool_request_generates_correlation_when_absent() {
        let request = ToolRequest::new("gpu_inventory", Map::new(), None);
        assert_eq!(request.correlation_id.len(), 16);
        let pinned = ToolRequest::new("gpu_inventory", Map::new(), Some("abc123".to_string()));
        assert_eq!(pinned.correlation_id, "abc123");
    }

    #[test]
    fn node_result_populates_exactly_one_side() {
        let ok = NodeResult::ok("worker-1", "agent-abc", b"{}".to_vec());
        assert!(ok.is_ok());
        assert!(ok.error_text.is_none());
        let err = NodeResult::err("worker-1", "agent-abc", "circuit open");
        assert!(!err.is_ok());
        assert!(err.response.is_none());
    }
}
