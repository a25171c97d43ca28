use crate::conversation::ConversationMessage;
use crate::tool::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One request to the reasoning backend: the full history plus the tools on offer.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub messages: Vec<ConversationMessage>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Normal end of response
    EndTurn,
    /// Model wants to use tools
    ToolUse,
    /// Hit max tokens limit
    MaxTokens,
    /// Stopped by stop sequence
    StopSequence,
}

/// A complete (non-streamed) backend reply.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
}

impl BackendResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls: calls,
            stop_reason: StopReason::ToolUse,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// The external reasoning service that drives a turn.
///
/// This trait lives in the gateway (not in crates/llm) because it's
/// defined by the consumer (the agent loop), not the provider.
/// Implementations live in crates/llm.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError>;

    /// Provider name for logging (e.g., "anthropic", "mock")
    fn provider_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Authentication failed")]
    AuthError,
    #[error("Backend timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Backend not configured: {0}")]
    NotConfigured(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Mock backend for testing the agent loop without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns queued responses in FIFO order, then the fallback (if any).
    pub struct MockBackend {
        responses: Mutex<VecDeque<Result<BackendResponse, BackendError>>>,
        fallback: Option<BackendResponse>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        requests: Mutex<Vec<BackendRequest>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                fallback: None,
                delay: None,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Response returned once the queue is empty.
        pub fn with_fallback(mut self, response: BackendResponse) -> Self {
            self.fallback = Some(response);
            self
        }

        /// Sleep before every reply (for timeout tests).
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn queue(&self, response: BackendResponse) {
            self.responses.lock().unwrap().push_back(Ok(response));
        }

        pub fn queue_text(&self, text: &str) {
            self.queue(BackendResponse::text(text));
        }

        pub fn queue_tool_calls(&self, calls: Vec<ToolCall>) {
            self.queue(BackendResponse::tool_calls(calls));
        }

        pub fn queue_error(&self, error: BackendError) {
            self.responses.lock().unwrap().push_back(Err(error));
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<BackendRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Default for MockBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Shorthand for building a tool call in tests.
    pub fn call(id: &str, name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    #[async_trait]
    impl ReasoningBackend for MockBackend {
        async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => Ok(self
                    .fallback
                    .clone()
                    .unwrap_or_else(|| BackendResponse::text(""))),
            }
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }
}
