pub mod claude;

use std::sync::Arc;
use std::time::Duration;

use concierge_core::config::LlmConfig;
use concierge_gateway::provider::{BackendError, ReasoningBackend};

/// Create the reasoning backend selected by config.
pub fn create_backend(llm_config: &LlmConfig) -> Result<Arc<dyn ReasoningBackend>, BackendError> {
    match llm_config.provider.as_str() {
        "anthropic" | "claude" => {
            let api_key = llm_config
                .anthropic_api_key
                .as_ref()
                .ok_or_else(|| BackendError::NotConfigured("ANTHROPIC_API_KEY not set".into()))?;
            Ok(Arc::new(
                claude::ClaudeBackend::new(
                    api_key.clone(),
                    llm_config.anthropic_model.clone(),
                    llm_config.anthropic_base_url.clone(),
                )
                .with_timeout(Duration::from_secs(llm_config.timeout_secs)),
            ))
        }
        other => Err(BackendError::NotConfigured(format!(
            "unknown LLM provider: '{}'",
            other
        ))),
    }
}
