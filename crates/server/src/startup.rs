//! Wiring: turn a [`Config`] into a ready [`Gateway`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use concierge_core::Config;
use concierge_gateway::filter::FilterPolicy;
use concierge_gateway::provider::ReasoningBackend;
use concierge_gateway::tool::ToolExecutor;
use concierge_gateway::{Gateway, McpToolExecutor, PromptTemplate, ToolCatalog, ToolRegistry};

/// Tool catalog from `TOOL_CATALOG_PATH`, or the built-in hospitality set.
pub fn load_catalog(config: &Config) -> anyhow::Result<ToolCatalog> {
    let catalog = match &config.tools.catalog_path {
        Some(path) => ToolCatalog::load(path)
            .with_context(|| format!("failed to load tool catalog {}", path.display()))?,
        None => ToolCatalog::hospitality(),
    };
    Ok(catalog.with_disabled(&config.tools.disabled_tools))
}

/// MCP executor when a server URL is configured; otherwise an empty local
/// registry, so every admitted call fails as unavailable.
pub fn build_executor(config: &Config) -> anyhow::Result<Arc<dyn ToolExecutor>> {
    let timeout = Duration::from_secs(config.tools.timeout_secs);
    match &config.tools.mcp_server_url {
        Some(url) => {
            let executor = McpToolExecutor::new(url.clone(), timeout)
                .context("failed to create MCP tool executor")?;
            info!(url = %url, "dispatching tools to MCP server");
            Ok(Arc::new(executor))
        }
        None => {
            warn!("MCP_SERVER_URL not set; tool calls will fail as unavailable");
            Ok(Arc::new(ToolRegistry::new()))
        }
    }
}

pub fn build_gateway(
    config: &Config,
    backend: Arc<dyn ReasoningBackend>,
    executor: Arc<dyn ToolExecutor>,
) -> anyhow::Result<Gateway> {
    let catalog = load_catalog(config)?;

    let filter_policy = match &config.gateway.filter_policy_path {
        Some(path) => FilterPolicy::load(path).context("failed to load filter policy")?,
        None => FilterPolicy::default(),
    };
    let prompt = match &config.gateway.system_prompt_path {
        Some(path) => PromptTemplate::load(path).context("failed to load system prompt")?,
        None => PromptTemplate::hospitality(),
    };

    let gateway = Gateway::builder(backend, executor)
        .with_catalog(Arc::new(catalog))
        .with_filter_policy(filter_policy)
        .with_prompt(prompt)
        .with_limits(config.gateway.clone())
        .with_backend_timeout(Duration::from_secs(config.llm.timeout_secs))
        .with_tool_timeout(Duration::from_secs(config.tools.timeout_secs))
        .with_sampling(config.llm.temperature, config.llm.max_tokens)
        .build()
        .context("failed to build gateway")?;
    Ok(gateway)
}
