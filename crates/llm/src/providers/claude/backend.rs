use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use concierge_gateway::provider::{BackendError, BackendRequest, BackendResponse, ReasoningBackend};

use super::translate::{error_for_status, messages_to_claude, parse_response, tool_definition_to_claude};

const API_VERSION: &str = "2023-06-01";

pub struct ClaudeBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl ClaudeBackend {
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `model` - Model name (e.g. `"claude-sonnet-4-5-20250929"`)
    /// * `base_url` - API base URL (e.g. `"https://api.anthropic.com"`)
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Per-request HTTP timeout. The agent loop applies its own timeout on top.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub(super) fn request_body(&self, request: &BackendRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages_to_claude(&request.messages),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(tool_definition_to_claude).collect();
            body["tools"] = json!(tools);
        }

        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }
        body
    }

    fn map_transport(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::NetworkError(e.to_string())
        }
    }
}

#[async_trait]
impl ReasoningBackend for ClaudeBackend {
    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(&request);

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending Claude request"
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body_text = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, retry_after, body_text));
        }

        let parsed: Value = response.json().await.map_err(|e| self.map_transport(e))?;
        let reply = parse_response(&parsed)?;
        debug!(
            stop_reason = ?reply.stop_reason,
            tool_calls = reply.tool_calls.len(),
            "Claude reply received"
        );
        Ok(reply)
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }
}
