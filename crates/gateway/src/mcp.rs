//! Tool execution against a Model Context Protocol server over HTTP.
//!
//! Each admitted call becomes one JSON-RPC 2.0 `tools/call` request. The
//! tenant id travels in the `x-tenant-id` header so the server can select the
//! property's credentials.

use async_trait::async_trait;
use concierge_core::TenantContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::tool::{ToolError, ToolExecutor};

pub const TENANT_HEADER: &str = "x-tenant-id";

// ── JSON-RPC 2.0 ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RpcId, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RpcId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC request ID. Either a number or a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

// ── MCP tools/call ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
    #[serde(other)]
    Unsupported,
}

impl CallToolResult {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Unsupported => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// A single JSON text block is returned as parsed JSON; anything else as a string.
    pub fn into_value(self) -> Result<Value, ToolError> {
        let text = self.text();
        if self.is_error {
            return Err(ToolError::ExecutionFailed(text));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// Decode a JSON-RPC reply to `tools/call`.
pub fn decode_call_response(response: JsonRpcResponse) -> Result<Value, ToolError> {
    if let Some(err) = response.error {
        return Err(ToolError::ExecutionFailed(format!(
            "MCP error {}: {}",
            err.code, err.message
        )));
    }
    let result = response
        .result
        .ok_or_else(|| ToolError::ExecutionFailed("MCP response has no result".to_string()))?;
    let result: CallToolResult = serde_json::from_value(result)
        .map_err(|e| ToolError::ExecutionFailed(format!("malformed tools/call result: {e}")))?;
    result.into_value()
}

// ── Executor ────────────────────────────────────────────────────────

pub struct McpToolExecutor {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: AtomicI64,
}

impl McpToolExecutor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::NotAvailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
            next_id: AtomicI64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_transport(&self, e: reqwest::Error) -> ToolError {
        if e.is_timeout() {
            ToolError::Timeout(self.timeout)
        } else {
            ToolError::ExecutionFailed(format!("MCP transport error: {e}"))
        }
    }
}

#[async_trait]
impl ToolExecutor for McpToolExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &Value,
        tenant: &TenantContext,
    ) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = CallToolParams {
            name: tool_name.to_string(),
            arguments: arguments.clone(),
        };
        let params = serde_json::to_value(params).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let request = JsonRpcRequest::new(RpcId::Number(id), "tools/call", Some(params));

        debug!(tool = %tool_name, id, "sending tools/call");

        let response = self
            .client
            .post(&self.url)
            .header(TENANT_HEADER, &tenant.tenant_id)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::ExecutionFailed(format!(
                "MCP server returned {status}: {body}"
            )));
        }

        let rpc: JsonRpcResponse = response.json().await.map_err(|e| self.map_transport(e))?;
        decode_call_response(rpc)
    }
}
