use async_trait::async_trait;
use concierge_core::TenantContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Describes a tool's interface for backend consumption.
/// Maps to Claude's tool format and OpenAI's function format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name (e.g., "get_availability", "make_call")
    pub name: String,
    /// Human-readable description for the backend
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

/// Represents the backend requesting execution of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-assigned request id (used to match results)
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// JSON input arguments
    pub input: Value,
}

/// Result of one tool call, sent back to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Must match the ToolCall id
    pub tool_call_id: String,
    /// Result content (serialized JSON)
    pub content: String,
    /// Whether this result represents an error (denial or failure)
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, value: &Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: value.to_string(),
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, message: &str) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: serde_json::json!({ "error": message }).to_string(),
            is_error: true,
        }
    }
}

/// A locally implemented domain action.
///
/// Tools are object-safe, Send + Sync, and async.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Catalog name this implementation answers to.
    fn name(&self) -> &str;

    /// Perform the action. Arguments have already passed the admission gate.
    async fn call(&self, arguments: &Value, tenant: &TenantContext) -> Result<Value, ToolError>;
}

/// The collaborator that performs admitted tool calls.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &Value,
        tenant: &TenantContext,
    ) -> Result<Value, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Tool not available: {0}")]
    NotAvailable(String),
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    /// Stable reason code recorded in telemetry.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::Timeout(_) => "tool_timeout",
            _ => "tool_execution_failed",
        }
    }
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Scripted executor for exercising the loop without a tool server.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Simple echo tool for testing purposes.
    pub struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        async fn call(&self, arguments: &Value, _tenant: &TenantContext) -> Result<Value, ToolError> {
            let message = arguments
                .get("message")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidInput("missing 'message' field".to_string()))?;

            Ok(serde_json::json!({ "echo": message }))
        }
    }

    pub struct MockToolExecutor {
        responses: HashMap<String, Result<Value, String>>,
        delay: Option<Duration>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl MockToolExecutor {
        pub fn new() -> Self {
            Self {
                responses: HashMap::new(),
                delay: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_response(mut self, tool_name: &str, value: Value) -> Self {
            self.responses.insert(tool_name.to_string(), Ok(value));
            self
        }

        pub fn with_failure(mut self, tool_name: &str, message: &str) -> Self {
            self.responses
                .insert(tool_name.to_string(), Err(message.to_string()));
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Every `(tool_name, arguments)` pair that reached the executor.
        pub fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Default for MockToolExecutor {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ToolExecutor for MockToolExecutor {
        async fn execute(
            &self,
            tool_name: &str,
            arguments: &Value,
            _tenant: &TenantContext,
        ) -> Result<Value, ToolError> {
            self.calls
                .lock()
                .unwrap()
                .push((tool_name.to_string(), arguments.clone()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.responses.get(tool_name) {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(message)) => Err(ToolError::ExecutionFailed(message.clone())),
                None => Ok(serde_json::json!({ "ok": true, "tool": tool_name })),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::EchoTool;
    use super::*;

    #[test]
    fn test_error_result_wraps_message_as_json() {
        let result = ToolResult::error("call_001", "Rate limit exceeded for tool: make_call");
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed["error"], "Rate limit exceeded for tool: make_call");
    }

    #[test]
    fn test_success_result_serializes_value() {
        let result = ToolResult::success("call_002", &serde_json::json!({"rooms": 3}));
        assert!(!result.is_error);
        assert_eq!(result.content, r#"{"rooms":3}"#);
    }

    #[test]
    fn test_tool_error_codes() {
        let timeout = ToolError::Timeout(std::time::Duration::from_secs(30));
        assert_eq!(timeout.code(), "tool_timeout");
        assert_eq!(
            ToolError::ExecutionFailed("502".to_string()).code(),
            "tool_execution_failed"
        );
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let tenant = TenantContext::standard("hotel-1");
        let result = EchoTool
            .call(&serde_json::json!({"message": "hello world"}), &tenant)
            .await
            .unwrap();
        assert_eq!(result["echo"], "hello world");
    }
}
