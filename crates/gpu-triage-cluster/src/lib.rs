// crates/gpu-triage-cluster/src/lib.rs
// ============================================================================
// Module: gpu-triage Cluster Library
// Description: Kubernetes-facing directory, exec channel, and node metadata.
// Purpose: Everything the gateway needs from the platform: who the agents
//          are, how to exec into them, and what the node looks like.
// Dependencies: kube, k8s-openapi, tokio, thiserror
// ============================================================================

//! ## Overview
//! `gpu-triage-cluster` wraps the platform's pod listing and pod-exec APIs.
//! The directory enumerates agent pods by label selector and looks them up
//! by node name with a server-side field selector; the exec channel streams
//! a framed request into a short-lived oneshot agent; the metadata module
//! enriches cluster summaries with labels, conditions, and GPU capacity
//! accounting. The directory is a trait so the router can be tested with an
//! in-memory implementation.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod directory;
pub mod exec;
pub mod metadata;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use directory::DEFAULT_SERVICE_NAME;
pub use directory::DirectoryConfig;
pub use directory::DirectoryError;
pub use directory::KubeDirectory;
pub use directory::NodeDirectory;
pub use directory::SERVICE_NAME_ENV;
pub use directory::resolve_service_name;
pub use exec::DEFAULT_EXEC_TIMEOUT;
pub use exec::EXEC_TIMEOUT_ENV;
pub use exec::ExecChannel;
pub use exec::ExecError;
pub use exec::ExecOutput;
pub use exec::resolve_exec_timeout;
pub use metadata::MetadataError;
pub use metadata::NodeMetadata;
pub use metadata::NodeMetadataClient;
