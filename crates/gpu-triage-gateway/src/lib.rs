// crates/gpu-triage-gateway/src/lib.rs
// ============================================================================
// Module: gpu-triage Gateway Library
// Description: Fan-out routing with circuit breaking and aggregation.
// Purpose: Turn one tool invocation into N guarded agent legs and one
//          combined response.
// Dependencies: gpu-triage-core, gpu-triage-cluster, reqwest, tokio
// ============================================================================

//! ## Overview
//! `gpu-triage-gateway` owns the request plane between the gateway server
//! and the node agents: a per-node circuit breaker, a retrying HTTP
//! client, a router that fans one prepared payload out to every eligible
//! agent, and an aggregator that folds the per-node results into a single
//! partial-failure-aware response. Transports are traits so the router is
//! testable without a cluster.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod aggregate;
pub mod breaker;
pub mod client;
pub mod router;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use aggregate::Aggregator;
pub use aggregate::INVENTORY_TOOL;
pub use breaker::CircuitBreaker;
pub use breaker::CircuitState;
pub use breaker::DEFAULT_FAILURE_THRESHOLD;
pub use breaker::DEFAULT_RESET_TIMEOUT;
pub use breaker::StateObserver;
pub use client::AgentHttpClient;
pub use client::ClientError;
pub use router::ExecDispatch;
pub use router::HttpDispatch;
pub use router::LegObserver;
pub use router::LegPayload;
pub use router::NoopLegObserver;
pub use router::Router;
pub use router::RouterConfig;
pub use router::RoutingMode;
pub use router::TransportError;
