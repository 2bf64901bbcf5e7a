// crates/gpu-triage-mcp/src/proxy.rs
// ============================================================================
// Module: Gateway Proxy Dispatcher
// Description: Tool dispatcher that fans every call out to the agents.
// Purpose: Make the gateway a thin shell: same catalogue, proxied
//          execution, aggregated replies.
// Dependencies: gpu-triage-core, gpu-triage-cluster, gpu-triage-gateway
// ============================================================================

//! ## Overview
//! The gateway mounts this dispatcher instead of the agent tool router.
//! Each call prepares the request in both wire framings (a bare
//! `tools/call` for HTTP legs; the validated init+tool frame for exec
//! legs), because the router picks per leg: a pod without an IP falls
//! back to the exec transport and must get the exec framing. The payload
//! then fans out under the caller's correlation ID and cancellation, and
//! the per-node results fold through the aggregator. An optional `node`
//! argument narrows the fan-out to a single agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use gpu_triage_cluster::DirectoryConfig;
use gpu_triage_cluster::DirectoryError;
use gpu_triage_cluster::ExecChannel;
use gpu_triage_cluster::KubeDirectory;
use gpu_triage_cluster::NodeMetadataClient;
use gpu_triage_core::NodeResult;
use gpu_triage_core::wire::FramingError;
use gpu_triage_core::wire::build_http_request;
use gpu_triage_core::wire::build_stdio_request;
use gpu_triage_core::wire::validate_request_bytes;
use gpu_triage_gateway::AgentHttpClient;
use gpu_triage_gateway::Aggregator;
use gpu_triage_gateway::CircuitBreaker;
use gpu_triage_gateway::LegObserver;
use gpu_triage_gateway::LegPayload;
use gpu_triage_gateway::Router;
use gpu_triage_gateway::RouterConfig;

use crate::config::TriageConfig;
use crate::logging::LogEvent;
use crate::logging::LogSink;
use crate::server::ServerError;
use crate::telemetry::Metrics;
use crate::tools::RequestContext;
use crate::tools::ToolDefinition;
use crate::tools::ToolDispatcher;
use crate::tools::ToolError;
use crate::tools::tool_definitions;

// ============================================================================
// SECTION: Proxy Dispatcher
// ============================================================================

/// Gateway dispatcher proxying every tool through the fan-out router.
pub struct ProxyRouter {
    /// Fan-out router over the cluster's agents.
    router: Arc<Router>,
    /// Result aggregator.
    aggregator: Aggregator,
    /// Structured log sink.
    log: Arc<dyn LogSink>,
}

impl ProxyRouter {
    /// Creates a proxy over the given router and aggregator.
    #[must_use]
    pub fn new(router: Arc<Router>, aggregator: Aggregator, log: Arc<dyn LogSink>) -> Self {
        Self {
            router,
            aggregator,
            log,
        }
    }

    /// Builds the full gateway dispatcher from configuration.
    ///
    /// Wires the cluster directory, circuit breaker (observed by the
    /// metrics gauges), HTTP client, and exec channel behind a router.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Init`] when the platform client or HTTP
    /// client cannot be constructed.
    pub async fn from_config(
        config: &TriageConfig,
        metrics: Arc<Metrics>,
        log: Arc<dyn LogSink>,
    ) -> Result<Self, ServerError> {
        let client = kube::Client::try_default()
            .await
            .map_err(|err| ServerError::Init(format!("cluster client: {err}")))?;
        let directory_config = DirectoryConfig {
            namespace: config.namespace.clone(),
            agent_app: gpu_triage_cluster::directory::DEFAULT_AGENT_APP.to_string(),
            service_name: config.service_name.clone(),
        };
        let directory = Arc::new(KubeDirectory::new(client.clone(), directory_config));
        let breaker = Arc::new(CircuitBreaker::default().with_observer(metrics.breaker_observer()));
        let http = Arc::new(
            AgentHttpClient::new().map_err(|err| ServerError::Init(err.to_string()))?,
        );
        let exec = Arc::new(ExecChannel::new(
            client.clone(),
            &config.namespace,
            config.exec_timeout,
        ));
        let router = Arc::new(Router::new(RouterConfig {
            directory,
            breaker,
            http,
            exec,
            observer: Arc::clone(&metrics) as Arc<dyn LegObserver>,
            mode: config.routing.into(),
            agent_port: config.agent_port,
        }));
        let aggregator = if config.include_k8s_metadata {
            Aggregator::with_metadata(Arc::new(NodeMetadataClient::new(client)), true)
        } else {
            Aggregator::new()
        };
        Ok(Self::new(router, aggregator, log))
    }

    /// Frames the request in both wire forms for the router's legs.
    ///
    /// HTTP legs send the bare `tools/call`; exec legs, per-leg fallbacks
    /// included, send the validated init+tool frame their oneshot-2 agent
    /// expects.
    fn frame_payload(name: &str, arguments: &Value) -> Result<LegPayload, ToolError> {
        let http = build_http_request(name, arguments)?;
        let exec = build_stdio_request(name, arguments)?;
        validate_request_bytes(&exec)?;
        Ok(LegPayload {
            http,
            exec,
        })
    }
}

impl From<FramingError> for ToolError {
    fn from(err: FramingError) -> Self {
        match err {
            FramingError::EmptyToolName => Self::InvalidParams(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[async_trait]
impl ToolDispatcher for ProxyRouter {
    fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    async fn call_tool(
        &self,
        context: &RequestContext,
        name: &str,
        arguments: Value,
    ) -> Result<Value, ToolError> {
        let target = arguments.get("node").and_then(Value::as_str).map(str::to_string);
        let payload = Self::frame_payload(name, &arguments)?;
        let results: Vec<NodeResult> = match &target {
            Some(node) => {
                match self.router.route_to_node(node, &payload, &context.correlation_id, &context.cancel).await {
                    Ok(result) => vec![result],
                    Err(err @ DirectoryError::NodeNotFound { .. }) => {
                        return Err(ToolError::Tool(err.to_string()));
                    }
                    Err(err @ DirectoryError::Api(_)) => {
                        return Err(ToolError::Internal(err.to_string()));
                    }
                }
            }
            None => self
                .router
                .route_to_all(&payload, &context.correlation_id, &context.cancel)
                .await
                .map_err(|err| ToolError::Internal(err.to_string()))?,
        };
        let success_count = results.iter().filter(|result| result.is_ok()).count();
        self.log.log(
            &LogEvent::info(
                "proxy",
                format!("{name}: {success_count}/{} legs succeeded", results.len()),
            )
            .with_correlation(context.correlation_id.clone()),
        );
        Ok(self.aggregator.aggregate(name, &results).await)
    }
}
