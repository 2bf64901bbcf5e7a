// crates/gpu-triage-mcp/src/tools.rs
// ============================================================================
// Module: Tool Router
// Description: MCP tool dispatch over the device and kernel-log interfaces.
// Purpose: Serve the diagnostic tool catalogue inside an agent pod.
// Dependencies: gpu-triage-core, gpu-triage-kmsg, serde_json
// ============================================================================

//! ## Overview
//! The tool router owns the agent's diagnostic surface: GPU inventory,
//! device health, and kernel-log Xid errors, plus a small identity tool.
//! Every handler is a thin wrapper over the device interface or the
//! record source. Tool-level failures surface as MCP results with
//! `isError=true`; only protocol violations become JSON-RPC errors.
//! [`dispatch_request`] maps one JSON-RPC envelope to one reply and is
//! shared by the HTTP listener and the oneshot stdio transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use gpu_triage_core::ToolResponse;
use gpu_triage_core::correlation::generate_correlation_id;
use gpu_triage_core::rpc;
use gpu_triage_core::rpc::JsonRpcRequest;
use gpu_triage_core::rpc::JsonRpcResponse;
use gpu_triage_core::rpc::ToolCallParams;
use gpu_triage_core::rpc::ToolCallResult;
use gpu_triage_kmsg::KmsgError;
use gpu_triage_kmsg::RecordSource;
use gpu_triage_kmsg::SourceConfig;
use gpu_triage_kmsg::XidEvent;
use gpu_triage_kmsg::events_from_records;
use gpu_triage_kmsg::lookup_xid;
use gpu_triage_kmsg::xid::resolve_gpu_indexes;

use crate::config::OperationMode;
use crate::config::TransportKind;
use crate::device::DeviceInterface;
use crate::device::DeviceInventory;
use crate::logging::LogEvent;
use crate::logging::LogSink;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Designated inventory tool.
pub const TOOL_GPU_INVENTORY: &str = "gpu_inventory";
/// Per-device health summary tool.
pub const TOOL_GPU_HEALTH: &str = "gpu_health";
/// Kernel-log Xid error tool.
pub const TOOL_XID_ERRORS: &str = "xid_errors";
/// Agent identity tool.
pub const TOOL_AGENT_INFO: &str = "agent_info";
/// Product name reported by `initialize` and `agent_info`.
pub const SERVER_NAME: &str = "gpu-triage";
/// Core temperature above which a device counts as degraded.
const HEALTH_TEMPERATURE_LIMIT_C: i64 = 90;

// ============================================================================
// SECTION: Request Context
// ============================================================================

/// Per-request context carried through every tool call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation ID generated or propagated at the server boundary.
    pub correlation_id: String,
    /// Transport the request arrived on.
    pub transport: TransportKind,
    /// Ambient cancellation propagated to blocking tool work.
    pub cancel: CancellationToken,
}

impl RequestContext {
    /// Builds a context, generating a correlation ID when none is given.
    #[must_use]
    pub fn new(transport: TransportKind, correlation_id: Option<String>) -> Self {
        Self {
            correlation_id: correlation_id.unwrap_or_else(generate_correlation_id),
            transport,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the ambient cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

// ============================================================================
// SECTION: Tool Catalogue
// ============================================================================

/// One declared tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// JSON schema for the tool's arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// True when the tool mutates node state.
    #[serde(skip)]
    pub mutating: bool,
}

/// Returns the declared tool catalogue.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: TOOL_GPU_INVENTORY,
            description: "Enumerate GPUs with inventory and telemetry fields",
            input_schema: json!({"type": "object", "properties": {}}),
            mutating: false,
        },
        ToolDefinition {
            name: TOOL_GPU_HEALTH,
            description: "Summarize per-device health from telemetry and ECC counters",
            input_schema: json!({"type": "object", "properties": {}}),
            mutating: false,
        },
        ToolDefinition {
            name: TOOL_XID_ERRORS,
            description: "Extract driver Xid error events from the kernel log",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "max_records": {"type": "integer", "minimum": 1},
                    "deadline_ms": {"type": "integer", "minimum": 100},
                },
            }),
            mutating: false,
        },
        ToolDefinition {
            name: TOOL_AGENT_INFO,
            description: "Report agent identity, version, and operation mode",
            input_schema: json!({"type": "object", "properties": {}}),
            mutating: false,
        },
    ]
}

/// Whether the operation mode admits a tool.
#[must_use]
pub const fn tool_allowed(mode: OperationMode, mutating: bool) -> bool {
    !mutating || matches!(mode, OperationMode::Operator)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Tool dispatch errors.
///
/// # Invariants
/// - [`ToolError::Tool`] and [`ToolError::ReadOnly`] surface as MCP
///   results with `isError=true`; the rest map to JSON-RPC error codes.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool name is not in the catalogue.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// The arguments failed to parse for the tool's schema.
    #[error("invalid tool params: {0}")]
    InvalidParams(String),
    /// The tool itself failed; the message is operator-facing.
    #[error("{0}")]
    Tool(String),
    /// The tool mutates state and the server is read-only.
    #[error("tool {0} requires operator mode")]
    ReadOnly(String),
    /// An internal failure outside the tool's control.
    #[error("internal error: {0}")]
    Internal(String),
}

// ============================================================================
// SECTION: Dispatcher Contract
// ============================================================================

/// Tool surface hosted by a server shell.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Lists the declared tools.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Invokes one tool and returns its JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] per the mapping documented on the enum.
    async fn call_tool(
        &self,
        context: &RequestContext,
        name: &str,
        arguments: Value,
    ) -> Result<Value, ToolError>;
}

// ============================================================================
// SECTION: JSON-RPC Dispatch
// ============================================================================

/// Maps one JSON-RPC request to one reply via the dispatcher.
///
/// Shared by the HTTP listener and the oneshot stdio transport so both
/// transports speak identical semantics.
pub async fn dispatch_request(
    dispatcher: &dyn ToolDispatcher,
    context: &RequestContext,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id.unwrap_or(Value::Null);
    if request.jsonrpc != rpc::JSONRPC_VERSION {
        return JsonRpcResponse::error(id, rpc::INVALID_REQUEST, "invalid json-rpc version");
    }
    match request.method.as_str() {
        "initialize" => JsonRpcResponse::result(
            id,
            json!({
                "protocolVersion": rpc::MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
            }),
        ),
        "tools/list" => match serde_json::to_value(dispatcher.definitions()) {
            Ok(tools) => JsonRpcResponse::result(id, json!({"tools": tools})),
            Err(_) => JsonRpcResponse::error(id, rpc::INTERNAL_ERROR, "serialization failed"),
        },
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            match serde_json::from_value::<ToolCallParams>(params) {
                Ok(call) => {
                    tool_call_response(dispatcher, context, id, &call.name, call.arguments).await
                }
                Err(err) => JsonRpcResponse::error(
                    id,
                    rpc::INVALID_PARAMS,
                    format!("invalid tool params: {err}"),
                ),
            }
        }
        _ => JsonRpcResponse::error(id, rpc::METHOD_NOT_FOUND, "method not found"),
    }
}

/// Runs one tool call and shapes the MCP reply.
///
/// Tool-level failures become `isError=true` results; the remaining
/// [`ToolError`] variants fold into a [`ToolResponse::Err`] with its
/// JSON-RPC code.
async fn tool_call_response(
    dispatcher: &dyn ToolDispatcher,
    context: &RequestContext,
    id: Value,
    name: &str,
    arguments: Value,
) -> JsonRpcResponse {
    let result = match dispatcher.call_tool(context, name, arguments).await {
        Ok(payload) => ToolResponse::Ok {
            text_payload: payload.to_string(),
        },
        Err(ToolError::Tool(message)) => {
            return encode_result(id, ToolCallResult::tool_error(message));
        }
        Err(err @ ToolError::ReadOnly(_)) => {
            return encode_result(id, ToolCallResult::tool_error(err.to_string()));
        }
        Err(ToolError::UnknownTool(name)) => ToolResponse::Err {
            code: rpc::METHOD_NOT_FOUND,
            message: format!("unknown tool: {name}"),
        },
        Err(ToolError::InvalidParams(message)) => ToolResponse::Err {
            code: rpc::INVALID_PARAMS,
            message,
        },
        Err(ToolError::Internal(message)) => ToolResponse::Err {
            code: rpc::INTERNAL_ERROR,
            message,
        },
    };
    match result {
        ToolResponse::Ok {
            text_payload,
        } => encode_result(id, ToolCallResult::text(text_payload)),
        ToolResponse::Err {
            code,
            message,
        } => JsonRpcResponse::error(id, code, message),
    }
}

/// Encodes one MCP result, degrading marshal failures to `-32603`.
fn encode_result(id: Value, result: ToolCallResult) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::result(id, value),
        Err(_) => JsonRpcResponse::error(id, rpc::INTERNAL_ERROR, "serialization failed"),
    }
}

// ============================================================================
// SECTION: Agent Tool Router
// ============================================================================

/// Tool router hosted inside an agent pod.
pub struct AgentToolRouter {
    /// Hardware interface.
    device: Arc<dyn DeviceInterface>,
    /// Kernel log record source.
    source: Arc<dyn RecordSource>,
    /// Mutating-tool gate.
    mode: OperationMode,
    /// Structured log sink.
    log: Arc<dyn LogSink>,
}

impl AgentToolRouter {
    /// Creates a router over the given interfaces.
    #[must_use]
    pub fn new(
        device: Arc<dyn DeviceInterface>,
        source: Arc<dyn RecordSource>,
        mode: OperationMode,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            device,
            source,
            mode,
            log,
        }
    }

    /// Handles `gpu_inventory`.
    fn gpu_inventory(&self) -> Result<Value, ToolError> {
        let inventory = self.inventory()?;
        serde_json::to_value(inventory)
            .map_err(|err| ToolError::Internal(format!("inventory serialization failed: {err}")))
    }

    /// Handles `gpu_health`.
    fn gpu_health(&self) -> Result<Value, ToolError> {
        let inventory = self.inventory()?;
        if inventory.devices.is_empty() {
            return Ok(json!({"status": "no_devices", "devices": []}));
        }
        let mut degraded = 0usize;
        let devices: Vec<Value> = inventory
            .devices
            .iter()
            .map(|device| {
                let hot = device
                    .temperature_c
                    .is_some_and(|temperature| temperature >= HEALTH_TEMPERATURE_LIMIT_C);
                let ecc = device.ecc_uncorrected.is_some_and(|count| count > 0);
                let healthy = !hot && !ecc;
                if !healthy {
                    degraded += 1;
                }
                let mut entry = json!({
                    "index": device.index,
                    "name": device.name,
                    "healthy": healthy,
                });
                if let Some(object) = entry.as_object_mut() {
                    if let Some(temperature) = device.temperature_c {
                        object.insert("temperature_c".to_string(), json!(temperature));
                    }
                    if let Some(count) = device.ecc_uncorrected {
                        object.insert("ecc_uncorrected".to_string(), json!(count));
                    }
                }
                entry
            })
            .collect();
        Ok(json!({
            "status": if degraded == 0 { "healthy" } else { "degraded" },
            "degraded_count": degraded,
            "devices": devices,
        }))
    }

    /// Handles `xid_errors`.
    async fn xid_errors(
        &self,
        context: &RequestContext,
        arguments: &Value,
    ) -> Result<Value, ToolError> {
        let config = xid_source_config(arguments)?;
        let (records, cancelled) = match self.source.read_records(&config, &context.cancel).await {
            Ok(records) => (records, false),
            Err(KmsgError::Cancelled {
                records,
            }) => (records, true),
            Err(err @ (KmsgError::Permission { .. } | KmsgError::SourceUnavailable { .. })) => {
                self.log.log(
                    &LogEvent::error("xid_errors", err.to_string())
                        .with_correlation(context.correlation_id.clone()),
                );
                return Err(ToolError::Tool(err.to_string()));
            }
        };
        let mut events = events_from_records(&records);
        if let Ok(inventory) = self.device.inventory() {
            resolve_gpu_indexes(&mut events, &inventory.bus_id_index());
        }
        let events: Vec<Value> = events.iter().map(xid_event_payload).collect();
        let mut payload = json!({
            "event_count": events.len(),
            "records_scanned": records.len(),
            "events": events,
        });
        if cancelled
            && let Some(object) = payload.as_object_mut()
        {
            object.insert("cancelled".to_string(), json!(true));
        }
        Ok(payload)
    }

    /// Handles `agent_info`.
    fn agent_info(&self) -> Result<Value, ToolError> {
        let inventory = self.inventory()?;
        Ok(json!({
            "server": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "mode": self.mode.as_str(),
            "device_count": inventory.device_count,
        }))
    }

    /// Queries the device interface, mapping failures to tool errors.
    fn inventory(&self) -> Result<DeviceInventory, ToolError> {
        self.device.inventory().map_err(|err| ToolError::Tool(err.to_string()))
    }
}

#[async_trait]
impl ToolDispatcher for AgentToolRouter {
    fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions()
            .into_iter()
            .filter(|definition| tool_allowed(self.mode, definition.mutating))
            .collect()
    }

    async fn call_tool(
        &self,
        context: &RequestContext,
        name: &str,
        arguments: Value,
    ) -> Result<Value, ToolError> {
        let definition = tool_definitions()
            .into_iter()
            .find(|definition| definition.name == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        if !tool_allowed(self.mode, definition.mutating) {
            return Err(ToolError::ReadOnly(name.to_string()));
        }
        match name {
            TOOL_GPU_INVENTORY => self.gpu_inventory(),
            TOOL_GPU_HEALTH => self.gpu_health(),
            TOOL_XID_ERRORS => self.xid_errors(context, &arguments).await,
            TOOL_AGENT_INFO => self.agent_info(),
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the record-source bounds from tool arguments.
fn xid_source_config(arguments: &Value) -> Result<SourceConfig, ToolError> {
    let mut config = SourceConfig::default();
    if let Some(max_records) = arguments.get("max_records") {
        let value = max_records
            .as_u64()
            .filter(|value| *value >= 1)
            .ok_or_else(|| ToolError::InvalidParams("max_records must be a positive integer".to_string()))?;
        config.max_records = usize::try_from(value)
            .map_err(|_| ToolError::InvalidParams("max_records exceeds platform limits".to_string()))?;
    }
    if let Some(deadline_ms) = arguments.get("deadline_ms") {
        let value = deadline_ms
            .as_u64()
            .filter(|value| *value >= 100)
            .ok_or_else(|| ToolError::InvalidParams("deadline_ms must be at least 100".to_string()))?;
        config.deadline = Duration::from_millis(value);
    }
    Ok(config)
}

/// Shapes one Xid event with its catalog entry for the tool payload.
fn xid_event_payload(event: &XidEvent) -> Value {
    let entry = lookup_xid(event.code);
    let mut payload = json!({
        "code": event.code,
        "pci_bus_id": event.pci_bus_id,
        "gpu_index": event.gpu_index,
        "raw_message": event.raw_message,
        "name": entry.name,
        "severity": entry.severity.as_str(),
        "category": entry.category,
        "action": entry.action,
        "description": entry.description,
    });
    if let Some(object) = payload.as_object_mut() {
        if let Some(timestamp) = event.timestamp_since_boot {
            let millis = u64::try_from(timestamp.as_millis()).unwrap_or(u64::MAX);
            object.insert("timestamp_since_boot_ms".to_string(), json!(millis));
        }
        if let Some(pid) = event.pid {
            object.insert("pid".to_string(), json!(pid));
        }
        if let Some(name) = &event.process_name {
            object.insert("process_name".to_string(), json!(name));
        }
    }
    payload
}

// ============================================================================
// SECTION: Tests
// ============================================================================
