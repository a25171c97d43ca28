//! Security telemetry: a bounded event ring, rolling counters, and per-conversation
//! threat scoring derived from recent events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Maximum characters kept from any free-text context or argument string.
pub const CONTEXT_MAX_CHARS: usize = 100;

const SECRET_KEYS: &[&str] = &["api_key", "apikey", "password", "secret", "token", "authorization"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InputBlocked,
    ToolBlocked,
    ToolExecuted,
    OutputFiltered,
    DataRedacted,
    RateLimited,
    RequestSuccess,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::InputBlocked => "input_blocked",
            EventKind::ToolBlocked => "tool_blocked",
            EventKind::ToolExecuted => "tool_executed",
            EventKind::OutputFiltered => "output_filtered",
            EventKind::DataRedacted => "data_redacted",
            EventKind::RateLimited => "rate_limited",
            EventKind::RequestSuccess => "request_success",
        }
    }

    /// Kinds that stopped an action outright. Filtered output is replaced, not blocked.
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            EventKind::InputBlocked | EventKind::ToolBlocked | EventKind::RateLimited
        )
    }

    fn default_severity(&self) -> Severity {
        match self {
            EventKind::ToolExecuted | EventKind::DataRedacted | EventKind::RequestSuccess => {
                Severity::Info
            }
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input_blocked" => Ok(EventKind::InputBlocked),
            "tool_blocked" => Ok(EventKind::ToolBlocked),
            "tool_executed" => Ok(EventKind::ToolExecuted),
            "output_filtered" => Ok(EventKind::OutputFiltered),
            "data_redacted" => Ok(EventKind::DataRedacted),
            "rate_limited" => Ok(EventKind::RateLimited),
            "request_success" => Ok(EventKind::RequestSuccess),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: String,
    pub kind: EventKind,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Stable reason code (`prompt_injection`, `rate_limited`, `tool_timeout`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl SecurityEvent {
    pub fn new(kind: EventKind, conversation_id: impl Into<String>) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            timestamp: Utc::now(),
            conversation_id: conversation_id.into(),
            kind,
            severity: kind.default_severity(),
            tool_name: None,
            reason: None,
            context: None,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Attach free text (an utterance or answer), truncated.
    pub fn with_text(mut self, text: &str) -> Self {
        self.context = Some(Value::String(truncate(text, CONTEXT_MAX_CHARS)));
        self
    }

    /// Attach tool arguments after sanitising them.
    pub fn with_arguments(self, args: &Value) -> Self {
        self.with_context(sanitize_arguments(args))
    }

    /// Attach a structured context. Anything whose JSON form exceeds
    /// [`CONTEXT_MAX_CHARS`] is stored as its truncated JSON text.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(cap_context(context));
        self
    }
}

/// Cut `s` to `max` characters, appending `...` when anything was dropped.
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn cap_context(context: Value) -> Value {
    let serialized = context.to_string();
    if serialized.chars().count() > CONTEXT_MAX_CHARS {
        Value::String(truncate(&serialized, CONTEXT_MAX_CHARS))
    } else {
        context
    }
}

/// Replace secret-named values with `[REDACTED]` and truncate long strings.
pub fn sanitize_arguments(args: &Value) -> Value {
    match args {
        Value::Object(map) => {
            let sanitized: Map<String, Value> = map
                .iter()
                .map(|(key, value)| {
                    let lowered = key.to_lowercase();
                    let value = if SECRET_KEYS.iter().any(|s| lowered.contains(s)) {
                        Value::String("[REDACTED]".to_string())
                    } else {
                        sanitize_arguments(value)
                    };
                    (key.clone(), value)
                })
                .collect();
            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_arguments).collect()),
        Value::String(s) => Value::String(truncate(s, CONTEXT_MAX_CHARS)),
        other => other.clone(),
    }
}

// ── Counters ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityCounters {
    pub input_blocked: u64,
    pub output_filtered: u64,
    pub tool_blocked: u64,
    pub tool_executed: u64,
    pub rate_limited: u64,
    pub data_redacted: u64,
    pub total_requests: u64,
    pub total_blocked: u64,
    /// Percentage of requests with a block, 0 when no requests were seen.
    pub block_rate: f64,
    pub total_events: usize,
}

#[derive(Debug, Default)]
struct AtomicCounters {
    input_blocked: AtomicU64,
    output_filtered: AtomicU64,
    tool_blocked: AtomicU64,
    tool_executed: AtomicU64,
    rate_limited: AtomicU64,
    data_redacted: AtomicU64,
    total_requests: AtomicU64,
}

impl AtomicCounters {
    fn slot(&self, kind: EventKind) -> &AtomicU64 {
        match kind {
            EventKind::InputBlocked => &self.input_blocked,
            EventKind::OutputFiltered => &self.output_filtered,
            EventKind::ToolBlocked => &self.tool_blocked,
            EventKind::ToolExecuted => &self.tool_executed,
            EventKind::RateLimited => &self.rate_limited,
            EventKind::DataRedacted => &self.data_redacted,
            EventKind::RequestSuccess => &self.total_requests,
        }
    }

    fn reset(&self) {
        for kind in [
            EventKind::InputBlocked,
            EventKind::OutputFiltered,
            EventKind::ToolBlocked,
            EventKind::ToolExecuted,
            EventKind::RateLimited,
            EventKind::DataRedacted,
            EventKind::RequestSuccess,
        ] {
            self.slot(kind).store(0, Ordering::Relaxed);
        }
    }
}

// ── Sink ──────────────────────────────────────────────────────

/// Destination for security events. Recording never fails the caller.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: SecurityEvent);

    /// Newest-first events, optionally of one kind.
    fn recent(&self, limit: usize, kind: Option<EventKind>) -> Vec<SecurityEvent>;

    /// Newest-first events for one conversation.
    fn recent_for_conversation(&self, conversation_id: &str, limit: usize) -> Vec<SecurityEvent>;

    fn counters(&self) -> SecurityCounters;
}

/// In-memory sink keeping the most recent `capacity` events.
pub struct SecurityMonitor {
    events: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
    counters: AtomicCounters,
}

impl SecurityMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            counters: AtomicCounters::default(),
        }
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<SecurityEvent>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drop every event and zero the counters.
    pub fn reset(&self) {
        self.events().clear();
        self.counters.reset();
    }
}

impl Default for SecurityMonitor {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl TelemetrySink for SecurityMonitor {
    fn record(&self, event: SecurityEvent) {
        let reason = event.reason.as_deref().unwrap_or("-");
        let tool = event.tool_name.as_deref().unwrap_or("-");
        match event.severity {
            Severity::Warning => warn!(
                kind = %event.kind,
                conversation_id = %event.conversation_id,
                tool,
                reason,
                "security event"
            ),
            Severity::Info => info!(
                kind = %event.kind,
                conversation_id = %event.conversation_id,
                tool,
                reason,
                "security event"
            ),
        }

        self.counters.slot(event.kind).fetch_add(1, Ordering::Relaxed);

        let mut events = self.events();
        events.push_front(event);
        while events.len() > self.capacity {
            events.pop_back();
        }
    }

    fn recent(&self, limit: usize, kind: Option<EventKind>) -> Vec<SecurityEvent> {
        self.events()
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .take(limit)
            .cloned()
            .collect()
    }

    fn recent_for_conversation(&self, conversation_id: &str, limit: usize) -> Vec<SecurityEvent> {
        self.events()
            .iter()
            .filter(|e| e.conversation_id == conversation_id)
            .take(limit)
            .cloned()
            .collect()
    }

    fn counters(&self) -> SecurityCounters {
        let load = |slot: &AtomicU64| slot.load(Ordering::Relaxed);
        let c = &self.counters;
        let total_requests = load(&c.total_requests);
        let total_blocked = load(&c.input_blocked) + load(&c.output_filtered) + load(&c.tool_blocked);
        let block_rate = if total_requests > 0 {
            total_blocked as f64 / total_requests as f64 * 100.0
        } else {
            0.0
        };

        SecurityCounters {
            input_blocked: load(&c.input_blocked),
            output_filtered: load(&c.output_filtered),
            tool_blocked: load(&c.tool_blocked),
            tool_executed: load(&c.tool_executed),
            rate_limited: load(&c.rate_limited),
            data_redacted: load(&c.data_redacted),
            total_requests,
            total_blocked,
            block_rate,
            total_events: self.events().len(),
        }
    }
}

// ── Threat scoring ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub conversation_id: String,
    pub total_blocked: usize,
    pub injection_attempts: usize,
    pub recent_blocks: usize,
    pub systematic_probing: bool,
    pub level: ThreatLevel,
}

impl ThreatAssessment {
    /// Events considered per conversation.
    pub const WINDOW: usize = 20;
    /// Newest events counted as "recent".
    pub const RECENT: usize = 5;

    pub fn assess(sink: &dyn TelemetrySink, conversation_id: &str) -> Self {
        let events = sink.recent_for_conversation(conversation_id, Self::WINDOW);

        let total_blocked = events.iter().filter(|e| e.kind.is_block()).count();
        let injection_attempts = events
            .iter()
            .filter(|e| {
                e.kind == EventKind::InputBlocked && e.reason.as_deref() == Some("prompt_injection")
            })
            .count();
        let recent_blocks = events
            .iter()
            .take(Self::RECENT)
            .filter(|e| e.kind.is_block())
            .count();

        let level = if injection_attempts >= 3 || recent_blocks >= 4 {
            ThreatLevel::High
        } else if total_blocked >= 5 || recent_blocks >= 2 {
            ThreatLevel::Medium
        } else if total_blocked > 0 {
            ThreatLevel::Low
        } else {
            ThreatLevel::None
        };

        Self {
            conversation_id: conversation_id.to_string(),
            total_blocked,
            injection_attempts,
            recent_blocks,
            systematic_probing: recent_blocks >= 3,
            level,
        }
    }
}
