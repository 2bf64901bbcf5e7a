// crates/gpu-triage-cluster/src/directory.rs
// ============================================================================
// Module: Cluster Directory
// Description: Agent pod enumeration and per-node lookup.
// Purpose: Produce fresh node descriptors from the platform's pod listing.
// Dependencies: kube, k8s-openapi, gpu-triage-core
// ============================================================================

//! ## Overview
//! Agents are discovered with the label selector
//! `app=<agent-app>,component!=gateway` so the gateway pod never routes to
//! itself. A pod is ready iff it carries a `Ready` condition with status
//! `True`. Per-node lookup uses a server-side `spec.nodeName` field
//! selector rather than a client-side scan; more than one match resolves
//! to the first, zero matches is an error. Descriptors are never cached
//! across calls, and each one is stamped with the resolved headless
//! service name so DNS fallback endpoints are uniform.

use async_trait::async_trait;
use gpu_triage_core::NodeDescriptor;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::Client;
use kube::api::ListParams;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment key overriding the headless service name.
pub const SERVICE_NAME_ENV: &str = "GPU_TRIAGE_SERVICE_NAME";
/// Compiled-in headless service name used when no override is set.
pub const DEFAULT_SERVICE_NAME: &str = "gpu-triage-agent";
/// Default value of the agent app label.
pub const DEFAULT_AGENT_APP: &str = "gpu-triage-agent";
/// Component label value carried by the gateway pod.
const GATEWAY_COMPONENT: &str = "gateway";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the cluster directory.
///
/// # Invariants
/// - Variants are stable for programmatic handling by the router.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No agent pod is scheduled on the requested node.
    #[error("no agent pod found on node {node}")]
    NodeNotFound {
        /// Node name that was looked up.
        node: String,
    },
    /// The platform's pod listing API failed.
    #[error("pod listing failed: {0}")]
    Api(String),
}

impl From<kube::Error> for DirectoryError {
    fn from(err: kube::Error) -> Self {
        Self::Api(err.to_string())
    }
}

// ============================================================================
// SECTION: Directory Contract
// ============================================================================

/// Enumerates agents and looks them up by node identifier.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Lists every agent pod currently scheduled in the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Api`] when the pod listing fails.
    async fn list_agents(&self) -> Result<Vec<NodeDescriptor>, DirectoryError>;

    /// Looks up the agent pod scheduled on one node.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NodeNotFound`] when no agent runs there
    /// and [`DirectoryError::Api`] when the listing fails.
    async fn agent_on_node(&self, node: &str) -> Result<NodeDescriptor, DirectoryError>;
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Directory configuration resolved at startup.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Namespace the agent pods live in.
    pub namespace: String,
    /// Value of the `app` label selecting agent pods.
    pub agent_app: String,
    /// Headless service name stamped on every descriptor.
    pub service_name: String,
}

impl DirectoryConfig {
    /// Builds a config with compiled-in defaults for the given namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            agent_app: DEFAULT_AGENT_APP.to_string(),
            service_name: resolve_service_name(std::env::var(SERVICE_NAME_ENV).ok()),
        }
    }

    /// Label selector matching agent pods and excluding the gateway.
    #[must_use]
    pub fn label_selector(&self) -> String {
        format!("app={},component!={GATEWAY_COMPONENT}", self.agent_app)
    }
}

/// Resolves the headless service name from an optional override.
#[must_use]
pub fn resolve_service_name(override_value: Option<String>) -> String {
    match override_value {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => DEFAULT_SERVICE_NAME.to_string(),
    }
}

// ============================================================================
// SECTION: Kubernetes Directory
// ============================================================================

/// Directory backed by the platform's pod listing API.
#[derive(Clone)]
pub struct KubeDirectory {
    /// Namespaced pod API.
    pods: Api<Pod>,
    /// Resolved configuration.
    config: DirectoryConfig,
}

impl KubeDirectory {
    /// Creates a directory over the given client and configuration.
    #[must_use]
    pub fn new(client: Client, config: DirectoryConfig) -> Self {
        let pods = Api::namespaced(client, &config.namespace);
        Self {
            pods,
            config,
        }
    }
}

#[async_trait]
impl NodeDirectory for KubeDirectory {
    async fn list_agents(&self) -> Result<Vec<NodeDescriptor>, DirectoryError> {
        let params = ListParams::default().labels(&self.config.label_selector());
        let pods = self.pods.list(&params).await?;
        Ok(pods
            .items
            .iter()
            .filter_map(|pod| descriptor_from_pod(pod, &self.config.service_name))
            .collect())
    }

    async fn agent_on_node(&self, node: &str) -> Result<NodeDescriptor, DirectoryError> {
        let params = ListParams::default()
            .labels(&self.config.label_selector())
            .fields(&format!("spec.nodeName={node}"));
        let pods = self.pods.list(&params).await?;
        pods.items
            .iter()
            .find_map(|pod| descriptor_from_pod(pod, &self.config.service_name))
            .ok_or_else(|| DirectoryError::NodeNotFound {
                node: node.to_string(),
            })
    }
}

// ============================================================================
// SECTION: Descriptor Derivation
// ============================================================================

/// Derives a descriptor from one pod; skips pods without a node or name.
fn descriptor_from_pod(pod: &Pod, service_name: &str) -> Option<NodeDescriptor> {
    let pod_name = pod.metadata.name.clone()?;
    let node_name = pod.spec.as_ref().and_then(|spec| spec.node_name.clone())?;
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let pod_ip = pod
        .status
        .as_ref()
        .and_then(|status| status.pod_ip.clone())
        .unwrap_or_default();
    Some(NodeDescriptor {
        name: node_name,
        pod_name,
        pod_ip,
        ready: pod_is_ready(pod),
        namespace,
        service_name: service_name.to_string(),
    })
}

/// A pod is ready iff it has a `Ready` condition with status `True`.
fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
