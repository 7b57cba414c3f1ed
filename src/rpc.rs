//! JSON-RPC tool surface
//!
//! Exposes the tool registry over a JSON-RPC 2.0 channel so other systems
//! can list and call the financial tools cross-process. Every request and
//! response round-trips losslessly through JSON.

use crate::error::OrchestrationError;
use crate::tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

pub const METHOD_LIST: &str = "tools/list";
pub const METHOD_CALL: &str = "tools/call";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const TOOL_ERROR: i64 = -32000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Dispatch one JSON-RPC request against the registry.
pub async fn handle_request(registry: &ToolRegistry, request: RpcRequest) -> RpcResponse {
    debug!(method = %request.method, "RPC request");

    match request.method.as_str() {
        METHOD_LIST => {
            let names: Vec<String> = registry.list().iter().map(|s| s.to_string()).collect();
            let tools = registry.schemas(&names);
            RpcResponse::result(request.id, json!({ "tools": tools }))
        }
        METHOD_CALL => {
            let Some(name) = request.params.get("name").and_then(Value::as_str) else {
                return RpcResponse::error(
                    request.id,
                    INVALID_PARAMS,
                    "params must include a 'name' string",
                );
            };
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            match registry.invoke(name, &arguments).await {
                Ok(output) => RpcResponse::result(
                    request.id,
                    json!({
                        "tool": name,
                        "data": output.data,
                    }),
                ),
                Err(e @ OrchestrationError::Validation(_)) => {
                    RpcResponse::error(request.id, INVALID_PARAMS, e.to_string())
                }
                Err(e) => RpcResponse::error(request.id, TOOL_ERROR, e.to_string()),
            }
        }
        other => RpcResponse::error(
            request.id,
            METHOD_NOT_FOUND,
            format!("unknown method '{}'", other),
        ),
    }
}

/// Parse a raw JSON line and dispatch it; parse failures become
/// well-formed JSON-RPC errors rather than transport errors.
pub async fn handle_raw(registry: &ToolRegistry, raw: &str) -> RpcResponse {
    match serde_json::from_str::<RpcRequest>(raw) {
        Ok(request) => handle_request(registry, request).await,
        Err(e) => RpcResponse::error(Value::Null, PARSE_ERROR, format!("parse error: {}", e)),
    }
}
