use std::env;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read and deserialize a TOML file (catalogs, filter policies).
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub tools: ToolsConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CONCIERGE_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CONCIERGE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            llm: LlmConfig::from_env_profiled(p),
            tools: ToolsConfig::from_env_profiled(p),
            gateway: GatewayConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:   {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  llm:      provider={}, model={}, configured={}",
            self.llm.provider,
            self.llm.anthropic_model,
            self.llm.is_configured()
        );
        tracing::info!(
            "  tools:    mcp={}, timeout={}s, disabled={:?}",
            self.tools.mcp_server_url.as_deref().unwrap_or("(none)"),
            self.tools.timeout_secs,
            self.tools.disabled_tools
        );
        tracing::info!(
            "  gateway:  max_rounds={}, history_tail={}, conversation_limit={}/min",
            self.gateway.max_rounds,
            self.gateway.history_tail,
            self.gateway.conversation_max_per_minute
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "llm": {
                "provider": self.llm.provider,
                "model": self.llm.anthropic_model,
                "base_url": self.llm.anthropic_base_url,
                "configured": self.llm.is_configured(),
                "timeout_secs": self.llm.timeout_secs,
            },
            "tools": {
                "mcp_server_url": self.tools.mcp_server_url,
                "timeout_secs": self.tools.timeout_secs,
                "catalog_path": self.tools.catalog_path,
                "disabled": self.tools.disabled_tools,
            },
            "gateway": {
                "max_rounds": self.gateway.max_rounds,
                "history_tail": self.gateway.history_tail,
                "conversation_max_per_minute": self.gateway.conversation_max_per_minute,
                "caller_max_per_minute": self.gateway.caller_max_per_minute,
                "telemetry_capacity": self.gateway.telemetry_capacity,
                "conversation_idle_secs": self.gateway.conversation_idle_secs,
            },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 3001),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── Reasoning backend (Anthropic) ─────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "anthropic" (alias "claude")
    pub provider: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub anthropic_base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl LlmConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "LLM_PROVIDER", "anthropic"),
            anthropic_api_key: profiled_env_opt(p, "ANTHROPIC_API_KEY"),
            anthropic_model: profiled_env_or(p, "ANTHROPIC_MODEL", "claude-sonnet-4-5-20250929"),
            anthropic_base_url: profiled_env_or(p, "ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
            temperature: profiled_env_or(p, "LLM_TEMPERATURE", "0.1")
                .parse()
                .unwrap_or(0.1),
            max_tokens: profiled_env_u32(p, "LLM_MAX_TOKENS", 4096),
            timeout_secs: profiled_env_u64(p, "BACKEND_TIMEOUT_SECS", 60),
        }
    }

    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "anthropic" | "claude" => self.anthropic_api_key.is_some(),
            _ => false,
        }
    }
}

// ── Tool dispatch ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// JSON-RPC endpoint of the MCP server that owns the domain tools.
    pub mcp_server_url: Option<String>,
    pub timeout_secs: u64,
    /// Optional TOML file replacing the built-in tool catalog.
    pub catalog_path: Option<PathBuf>,
    pub disabled_tools: Vec<String>,
}

impl ToolsConfig {
    fn from_env_profiled(p: &str) -> Self {
        let disabled_tools = profiled_env_opt(p, "DISABLED_TOOLS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            mcp_server_url: profiled_env_opt(p, "MCP_SERVER_URL"),
            timeout_secs: profiled_env_u64(p, "TOOL_TIMEOUT_SECS", 30),
            catalog_path: profiled_env_opt(p, "TOOL_CATALOG_PATH").map(PathBuf::from),
            disabled_tools,
        }
    }
}

// ── Gateway limits ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub max_rounds: usize,
    /// Number of history entries kept after each turn.
    pub history_tail: usize,
    pub conversation_max_per_minute: u32,
    pub caller_max_per_minute: u32,
    pub telemetry_capacity: usize,
    pub rate_limit_sweep_secs: u64,
    /// Conversations untouched for this long are evicted.
    pub conversation_idle_secs: u64,
    pub filter_policy_path: Option<PathBuf>,
    pub system_prompt_path: Option<PathBuf>,
}

impl GatewayConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_rounds: profiled_env_usize(p, "MAX_ROUNDS", 10),
            history_tail: profiled_env_usize(p, "HISTORY_TAIL", 20),
            conversation_max_per_minute: profiled_env_u32(p, "CONVERSATION_MAX_PER_MINUTE", 20),
            caller_max_per_minute: profiled_env_u32(p, "CALLER_MAX_PER_MINUTE", 60),
            telemetry_capacity: profiled_env_usize(p, "TELEMETRY_CAPACITY", 1000),
            rate_limit_sweep_secs: profiled_env_u64(p, "RATE_LIMIT_SWEEP_SECS", 300),
            conversation_idle_secs: profiled_env_u64(p, "CONVERSATION_IDLE_SECS", 3600),
            filter_policy_path: profiled_env_opt(p, "FILTER_POLICY_PATH").map(PathBuf::from),
            system_prompt_path: profiled_env_opt(p, "SYSTEM_PROMPT_PATH").map(PathBuf::from),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            history_tail: 20,
            conversation_max_per_minute: 20,
            caller_max_per_minute: 60,
            telemetry_capacity: 1000,
            rate_limit_sweep_secs: 300,
            conversation_idle_secs: 3600,
            filter_policy_path: None,
            system_prompt_path: None,
        }
    }
}
