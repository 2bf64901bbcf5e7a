// crates/gpu-triage-cluster/src/metadata.rs
// ============================================================================
// Module: Node Metadata Enrichment
// Description: Labels, conditions, and GPU capacity accounting per node.
// Purpose: Optional cluster-summary enrichment behind the
//          `include_k8s_metadata` flag.
// Dependencies: kube, k8s-openapi, serde
// ============================================================================

//! ## Overview
//! When a cluster summary is requested with `include_k8s_metadata`, the
//! aggregator asks this module for a per-node view: a filtered label set,
//! node conditions, and the GPU resource ledger. Allocated GPUs are the
//! sum of GPU resource requests across non-terminal pods on the node; if
//! that query fails the ledger falls back to `capacity - allocatable`.
//! Missing quantities stay at zero rather than failing the summary.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::Api;
use kube::Client;
use kube::api::ListParams;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Extended resource name the device plugin advertises.
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";
/// Label prefixes preserved in the filtered label view.
const LABEL_PREFIXES: &[&str] = &["nvidia.com/", "kubernetes.io/", "node.kubernetes.io/"];
/// Pod phases that no longer hold their resource requests.
const TERMINAL_PHASES: &[&str] = &["Succeeded", "Failed"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while gathering node metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The node object could not be fetched.
    #[error("node lookup failed for {node}: {detail}")]
    NodeLookup {
        /// Node name that was queried.
        node: String,
        /// Underlying failure description.
        detail: String,
    },
}

// ============================================================================
// SECTION: Metadata View
// ============================================================================

/// Per-node metadata attached to enriched cluster summaries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeMetadata {
    /// Filtered node labels (hardware and topology prefixes only).
    pub labels: BTreeMap<String, String>,
    /// Node conditions as `type -> status`.
    pub conditions: BTreeMap<String, String>,
    /// GPUs the node advertises in capacity.
    pub gpu_capacity: i64,
    /// GPUs currently allocatable.
    pub gpu_allocatable: i64,
    /// GPUs requested by non-terminal pods.
    pub gpu_allocated: i64,
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Metadata client over the platform's node and pod APIs.
#[derive(Clone)]
pub struct NodeMetadataClient {
    /// Cluster-scoped node API.
    nodes: Api<Node>,
    /// Cluster-scoped pod API for allocation accounting.
    pods: Api<Pod>,
}

impl NodeMetadataClient {
    /// Creates a metadata client over the given cluster client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client.clone()),
            pods: Api::all(client),
        }
    }

    /// Gathers the metadata view for one node.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::NodeLookup`] when the node object cannot
    /// be fetched; allocation-query failures degrade to the
    /// `capacity - allocatable` fallback instead of erroring.
    pub async fn node_metadata(&self, node_name: &str) -> Result<NodeMetadata, MetadataError> {
        let node = self.nodes.get(node_name).await.map_err(|err| MetadataError::NodeLookup {
            node: node_name.to_string(),
            detail: err.to_string(),
        })?;
        let gpu_capacity = status_quantity(&node, |status| status.capacity.as_ref());
        let gpu_allocatable = status_quantity(&node, |status| status.allocatable.as_ref());
        let gpu_allocated = match self.allocated_on_node(node_name).await {
            Some(allocated) => allocated,
            None => (gpu_capacity - gpu_allocatable).max(0),
        };
        Ok(NodeMetadata {
            labels: filter_labels(node.metadata.labels.as_ref()),
            conditions: node_conditions(&node),
            gpu_capacity,
            gpu_allocatable,
            gpu_allocated,
        })
    }

    /// Sums GPU requests across non-terminal pods on the node.
    async fn allocated_on_node(&self, node_name: &str) -> Option<i64> {
        let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        let pods = self.pods.list(&params).await.ok()?;
        Some(sum_gpu_requests(&pods.items))
    }
}

// ============================================================================
// SECTION: Derivations
// ============================================================================

/// Reads the GPU quantity from a node status map.
fn status_quantity(
    node: &Node,
    select: impl Fn(&k8s_openapi::api::core::v1::NodeStatus) -> Option<&BTreeMap<String, Quantity>>,
) -> i64 {
    node.status
        .as_ref()
        .and_then(|status| select(status))
        .and_then(|resources| resources.get(GPU_RESOURCE))
        .map_or(0, quantity_to_i64)
}

/// Parses an integer resource quantity; non-integer forms count as zero.
fn quantity_to_i64(quantity: &Quantity) -> i64 {
    quantity.0.trim().parse::<i64>().unwrap_or(0)
}

/// Keeps only labels under the hardware and topology prefixes.
fn filter_labels(labels: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    labels
        .map(|labels| {
            labels
                .iter()
                .filter(|(key, _)| LABEL_PREFIXES.iter().any(|prefix| key.starts_with(prefix)))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Flattens node conditions into a `type -> status` map.
fn node_conditions(node: &Node) -> BTreeMap<String, String> {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .map(|condition| (condition.type_.clone(), condition.status.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Sums GPU requests across the non-terminal pods in a listing.
#[must_use]
pub fn sum_gpu_requests(pods: &[Pod]) -> i64 {
    pods.iter()
        .filter(|pod| {
            let phase = pod
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref())
                .unwrap_or_default();
            !TERMINAL_PHASES.contains(&phase)
        })
        .flat_map(|pod| pod.spec.iter())
        .flat_map(|spec| spec.containers.iter())
        .filter_map(|container| container.resources.as_ref())
        .filter_map(|resources| resources.requests.as_ref())
        .filter_map(|requests| requests.get(GPU_RESOURCE))
        .map(quantity_to_i64)
        .sum()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
