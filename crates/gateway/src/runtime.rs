use crate::admission::{AdmissionDecision, AdmissionGate, GateError};
use crate::continuation::{CompletionHeuristic, ContinuationContext, ContinuationPolicy};
use crate::conversation::{AssistantContent, Conversation};
use crate::provider::{BackendError, BackendRequest, ReasoningBackend};
use crate::telemetry::{sanitize_arguments, EventKind, SecurityEvent, Severity, TelemetrySink};
use crate::tool::{ToolCall, ToolError, ToolExecutor, ToolResult};
use concierge_core::TenantContext;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One attempted tool call, executed or denied.
#[derive(Debug, Clone, Serialize)]
pub struct ToolUsage {
    pub name: String,
    /// Arguments with secrets redacted
    pub arguments: Value,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The backend produced a final answer
    Completed,
    /// The round ceiling was reached
    RoundLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub final_text: String,
    pub tools_used: Vec<ToolUsage>,
    pub rounds: usize,
    pub termination: Termination,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentLoopError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Admission gate failure: {0}")]
    Gate(#[from] GateError),
}

/// The bounded loop that orchestrates backend ↔ tool execution for one turn.
///
/// Flow: User → Backend → ToolCalls → Gate → Execute → Results → Backend → ... → Final Text
pub struct AgentLoop {
    backend: Arc<dyn ReasoningBackend>,
    gate: Arc<AdmissionGate>,
    executor: Arc<dyn ToolExecutor>,
    telemetry: Arc<dyn TelemetrySink>,
    continuation: Arc<dyn ContinuationPolicy>,
    max_rounds: usize,
    backend_timeout: Duration,
    tool_timeout: Duration,
    temperature: f32,
    max_tokens: u32,
}

impl AgentLoop {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        gate: Arc<AdmissionGate>,
        executor: Arc<dyn ToolExecutor>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            backend,
            gate,
            executor,
            telemetry,
            continuation: Arc::new(CompletionHeuristic::default()),
            max_rounds: 10,
            backend_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }

    pub fn with_max_rounds(mut self, max: usize) -> Self {
        self.max_rounds = max;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_continuation(mut self, policy: Arc<dyn ContinuationPolicy>) -> Self {
        self.continuation = policy;
        self
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Run one user turn. The conversation is mutated in place; the caller
    /// decides whether to persist it.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        utterance: String,
        conversation_id: &str,
        tenant: &TenantContext,
    ) -> Result<TurnOutcome, AgentLoopError> {
        conversation.add_user_message(utterance);
        let tools = self.gate.catalog().definitions();

        let mut rounds = 0;
        let mut continuations = 0;
        let mut tools_used: Vec<ToolUsage> = Vec::new();
        let mut final_text = String::new();

        loop {
            if rounds == self.max_rounds {
                warn!(
                    conversation_id,
                    rounds,
                    tools = tools_used.len(),
                    "round ceiling reached, stopping turn"
                );
                return Ok(TurnOutcome {
                    final_text,
                    tools_used,
                    rounds,
                    termination: Termination::RoundLimit,
                });
            }
            rounds += 1;
            debug!(conversation_id, round = rounds, "requesting backend completion");

            let request = BackendRequest {
                messages: conversation.messages().to_vec(),
                system_prompt: conversation.system_prompt().map(String::from),
                tools: tools.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };
            let response = tokio::time::timeout(self.backend_timeout, self.backend.complete(request))
                .await
                .map_err(|_| BackendError::Timeout(self.backend_timeout))??;

            final_text = response.text.clone().unwrap_or_default();
            let tool_calls = response.tool_calls;
            conversation.add_assistant_response(AssistantContent {
                text: response.text,
                tool_calls: tool_calls.clone(),
            });

            if tool_calls.is_empty() {
                let ctx = ContinuationContext {
                    text: &final_text,
                    round: rounds,
                    tools_used: tools_used.len(),
                    continuations,
                };
                if self.continuation.should_continue(&ctx) {
                    continuations += 1;
                    debug!(conversation_id, round = rounds, "reply looks unfinished, continuing");
                    conversation.add_user_message(self.continuation.instruction().to_string());
                    continue;
                }
                info!(conversation_id, rounds, tools = tools_used.len(), "turn complete");
                return Ok(TurnOutcome {
                    final_text,
                    tools_used,
                    rounds,
                    termination: Termination::Completed,
                });
            }

            info!(conversation_id, round = rounds, count = tool_calls.len(), "executing tool calls");
            let mut results = Vec::with_capacity(tool_calls.len());
            for call in &tool_calls {
                let (result, usage) = self.handle_call(call, conversation_id, tenant).await?;
                results.push(result);
                tools_used.push(usage);
            }
            conversation.add_tool_results(results);
        }
    }

    /// Gate one call, dispatch it when admitted, and record telemetry.
    async fn handle_call(
        &self,
        call: &ToolCall,
        conversation_id: &str,
        tenant: &TenantContext,
    ) -> Result<(ToolResult, ToolUsage), AgentLoopError> {
        let started = Instant::now();
        let arguments = sanitize_arguments(&call.input);

        let decision = self.gate.validate(&call.name, &call.input, tenant.is_elevated)?;
        if let AdmissionDecision::Deny(reason) = decision {
            let kind = if reason.is_rate_limited() {
                EventKind::RateLimited
            } else {
                EventKind::ToolBlocked
            };
            self.telemetry.record(
                SecurityEvent::new(kind, conversation_id)
                    .with_tool(call.name.as_str())
                    .with_reason(reason.code())
                    .with_arguments(&call.input),
            );
            let message = reason.to_string();
            return Ok((
                ToolResult::error(call.id.as_str(), &message),
                ToolUsage {
                    name: call.name.clone(),
                    arguments,
                    duration_ms: 0,
                    success: false,
                    result: None,
                    error: Some(message),
                },
            ));
        }

        let outcome = tokio::time::timeout(
            self.tool_timeout,
            self.executor.execute(&call.name, &call.input, tenant),
        )
        .await
        .unwrap_or(Err(ToolError::Timeout(self.tool_timeout)));
        let duration_ms = started.elapsed().as_millis() as u64;

        let event = SecurityEvent::new(EventKind::ToolExecuted, conversation_id)
            .with_tool(call.name.as_str())
            .with_arguments(&call.input);

        match outcome {
            Ok(value) => {
                debug!(tool = %call.name, duration_ms, "tool succeeded");
                self.telemetry.record(event);
                Ok((
                    ToolResult::success(call.id.as_str(), &value),
                    ToolUsage {
                        name: call.name.clone(),
                        arguments,
                        duration_ms,
                        success: true,
                        result: Some(value),
                        error: None,
                    },
                ))
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool failed");
                self.telemetry
                    .record(event.with_severity(Severity::Warning).with_reason(e.code()));
                let message = e.to_string();
                Ok((
                    ToolResult::error(call.id.as_str(), &message),
                    ToolUsage {
                        name: call.name.clone(),
                        arguments,
                        duration_ms,
                        success: false,
                        result: None,
                        error: Some(message),
                    },
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolCatalog;
    use crate::continuation::NeverContinue;
    use crate::conversation::ConversationMessage;
    use crate::provider::mock::{call, MockBackend};
    use crate::provider::BackendResponse;
    use crate::rate_limit::{InMemoryRateLimitStore, ManualClock};
    use crate::telemetry::SecurityMonitor;
    use crate::tool::mock::MockToolExecutor;
    use serde_json::json;

    struct Harness {
        agent: AgentLoop,
        backend: Arc<MockBackend>,
        executor: Arc<MockToolExecutor>,
        telemetry: Arc<SecurityMonitor>,
    }

    fn harness(backend: MockBackend, executor: MockToolExecutor) -> Harness {
        let backend = Arc::new(backend);
        let executor = Arc::new(executor);
        let telemetry = Arc::new(SecurityMonitor::default());
        let store = Arc::new(InMemoryRateLimitStore::with_clock(Arc::new(ManualClock::default())));
        let gate = Arc::new(AdmissionGate::new(Arc::new(ToolCatalog::hospitality()), store));
        let agent = AgentLoop::new(
            backend.clone() as Arc<dyn ReasoningBackend>,
            gate,
            executor.clone() as Arc<dyn ToolExecutor>,
            telemetry.clone() as Arc<dyn TelemetrySink>,
        );
        Harness {
            agent,
            backend,
            executor,
            telemetry,
        }
    }

    fn tenant() -> TenantContext {
        TenantContext::standard("hotel-1")
    }

    /// Captures formatted log output for assertions.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_simple_text_response() {
        let h = harness(MockBackend::new(), MockToolExecutor::new());
        let agent = h.agent.with_continuation(Arc::new(NeverContinue));
        h.backend.queue_text("Hello, how can I help with your stay?");

        let mut conv = Conversation::new();
        let outcome = agent
            .run_turn(&mut conv, "Hello".to_string(), "c1", &tenant())
            .await
            .unwrap();

        assert_eq!(outcome.final_text, "Hello, how can I help with your stay?");
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(conv.len(), 2);
    }

    #[tokio::test]
    async fn test_tool_call_and_response() {
        let h = harness(
            MockBackend::new(),
            MockToolExecutor::new().with_response("get_bookings", json!({"bookings": [{"id": 7}]})),
        );
        h.backend.queue_tool_calls(vec![call("call_1", "get_bookings", json!({}))]);
        h.backend.queue_text("Here are your bookings: #7.");

        let mut conv = Conversation::new();
        let outcome = h
            .agent
            .run_turn(&mut conv, "List bookings".to_string(), "c1", &tenant())
            .await
            .unwrap();

        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.tools_used.len(), 1);
        assert!(outcome.tools_used[0].success);
        assert_eq!(outcome.tools_used[0].result, Some(json!({"bookings": [{"id": 7}]})));
        // user, assistant (tool call), tool results, assistant (text)
        assert_eq!(conv.len(), 4);
        assert_eq!(h.telemetry.counters().tool_executed, 1);

        // The second backend request carries the tool result
        let second = &h.backend.requests()[1];
        assert!(matches!(
            second.messages.last(),
            Some(ConversationMessage::ToolResults(r)) if r[0].tool_call_id == "call_1" && !r[0].is_error
        ));
        assert_eq!(second.tools.len(), 14);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_denied_without_dispatch() {
        let h = harness(MockBackend::new(), MockToolExecutor::new());
        h.backend.queue_tool_calls(vec![call("call_1", "drop_database", json!({}))]);
        h.backend.queue_text("That action is not available, let me know what else you need.");

        let mut conv = Conversation::new();
        let outcome = h
            .agent
            .run_turn(&mut conv, "Wipe everything".to_string(), "c1", &tenant())
            .await
            .unwrap();

        assert_eq!(h.executor.call_count(), 0);
        assert!(!outcome.tools_used[0].success);
        let counters = h.telemetry.counters();
        assert_eq!(counters.tool_executed, 0);
        assert_eq!(counters.tool_blocked, 1);
        let blocked = h.telemetry.recent(1, Some(EventKind::ToolBlocked));
        assert_eq!(blocked[0].reason.as_deref(), Some("unknown_tool"));

        match &conv.messages()[2] {
            ConversationMessage::ToolResults(results) => {
                assert!(results[0].is_error);
                assert!(results[0].content.contains("not in approved tool list"));
            }
            other => panic!("expected tool results, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_round_ceiling_stops_loop() {
        let backend = MockBackend::new().with_fallback(
            BackendResponse::tool_calls(vec![call("call_n", "get_bookings", json!({}))])
                .with_text("Still checking"),
        );
        let h = harness(backend, MockToolExecutor::new());
        let agent = h.agent.with_max_rounds(3);

        let mut conv = Conversation::new();
        let outcome = agent
            .run_turn(&mut conv, "Check bookings".to_string(), "c1", &tenant())
            .await
            .unwrap();

        assert_eq!(outcome.rounds, 3);
        assert_eq!(outcome.termination, Termination::RoundLimit);
        assert_eq!(outcome.final_text, "Still checking");
        assert_eq!(h.backend.call_count(), 3);
        assert_eq!(h.executor.call_count(), 3);
    }

    #[tokio::test]
    async fn test_round_ceiling_logs_warning() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let backend = MockBackend::new().with_fallback(BackendResponse::tool_calls(vec![call(
            "call_n",
            "get_bookings",
            json!({}),
        )]));
        let h = harness(backend, MockToolExecutor::new());
        let agent = h.agent.with_max_rounds(2);

        let mut conv = Conversation::new();
        let outcome = agent
            .run_turn(&mut conv, "Check bookings".to_string(), "c-limit", &tenant())
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::RoundLimit);
        let output = logs.contents();
        let line = output
            .lines()
            .find(|l| l.contains("round ceiling reached"))
            .expect("ceiling warning logged");
        assert!(line.contains("WARN"));
        assert!(line.contains("c-limit"));
    }

    #[tokio::test]
    async fn test_large_tool_arguments_are_capped_in_telemetry() {
        let h = harness(MockBackend::new(), MockToolExecutor::new());
        let values: Vec<Value> = (0..2000)
            .map(|i| json!({"date": "2025-06-01", "room_id": i, "avail": 2, "qty": 2, "is_opened": 1}))
            .collect();
        h.backend
            .queue_tool_calls(vec![call("call_1", "update_availability", json!({ "values": values }))]);
        h.backend.queue_text("Availability has been updated for the property.");

        let mut conv = Conversation::new();
        h.agent
            .run_turn(
                &mut conv,
                "Open all rooms for June".to_string(),
                "c1",
                &TenantContext::elevated("hotel-1"),
            )
            .await
            .unwrap();

        let executed = h.telemetry.recent(1, Some(EventKind::ToolExecuted));
        let context = executed[0].context.as_ref().and_then(Value::as_str).unwrap();
        assert_eq!(context.chars().count(), crate::telemetry::CONTEXT_MAX_CHARS + 3);
        assert!(context.ends_with("..."));
    }

    #[tokio::test]
    async fn test_round_results_are_one_entry_in_request_order() {
        let h = harness(MockBackend::new(), MockToolExecutor::new());
        h.backend.queue_tool_calls(vec![
            call("a", "get_rooms_details", json!({})),
            call("b", "make_call", json!({"phone": "+359 2 123 4567", "message": "hi"})),
            call("c", "get_property_settings", json!({})),
        ]);
        h.backend.queue_text("Here is the summary.");

        let mut conv = Conversation::new();
        let outcome = h
            .agent
            .run_turn(&mut conv, "Details please".to_string(), "c1", &tenant())
            .await
            .unwrap();

        let names: Vec<_> = outcome.tools_used.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["get_rooms_details", "make_call", "get_property_settings"]);
        match &conv.messages()[2] {
            ConversationMessage::ToolResults(results) => {
                let ids: Vec<_> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b", "c"]);
                // make_call is elevated; the standard tenant is refused
                assert!(results[1].is_error);
                assert!(!results[0].is_error && !results[2].is_error);
            }
            other => panic!("expected tool results, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout_becomes_error_result() {
        let h = harness(
            MockBackend::new(),
            MockToolExecutor::new().with_delay(Duration::from_secs(120)),
        );
        let agent = h.agent.with_tool_timeout(Duration::from_secs(5));
        h.backend.queue_tool_calls(vec![call("call_1", "get_bookings", json!({}))]);
        h.backend.queue_text("The booking service is slow right now, let me know if I should retry.");

        let mut conv = Conversation::new();
        let outcome = agent
            .run_turn(&mut conv, "Bookings?".to_string(), "c1", &tenant())
            .await
            .unwrap();

        assert!(!outcome.tools_used[0].success);
        let executed = h.telemetry.recent(10, Some(EventKind::ToolExecuted));
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].severity, Severity::Warning);
        assert_eq!(executed[0].reason.as_deref(), Some("tool_timeout"));
    }

    #[tokio::test]
    async fn test_tool_failure_is_recorded() {
        let h = harness(
            MockBackend::new(),
            MockToolExecutor::new().with_failure("get_bookings", "upstream 502"),
        );
        h.backend.queue_tool_calls(vec![call("call_1", "get_bookings", json!({}))]);
        h.backend.queue_text("Sorry, let me know if I should try again.");

        let mut conv = Conversation::new();
        let outcome = h
            .agent
            .run_turn(&mut conv, "Bookings?".to_string(), "c1", &tenant())
            .await
            .unwrap();

        assert_eq!(outcome.tools_used[0].error.as_deref(), Some("Execution failed: upstream 502"));
        let executed = h.telemetry.recent(1, Some(EventKind::ToolExecuted));
        assert_eq!(executed[0].reason.as_deref(), Some("tool_execution_failed"));
    }

    #[tokio::test]
    async fn test_continuation_nudges_once() {
        let h = harness(MockBackend::new(), MockToolExecutor::new());
        h.backend.queue_text("I will look into that.");
        h.backend.queue_text("Room 12 is free.");

        let mut conv = Conversation::new();
        let outcome = h
            .agent
            .run_turn(&mut conv, "Is room 12 free?".to_string(), "c1", &tenant())
            .await
            .unwrap();

        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.final_text, "Room 12 is free.");
        // user, assistant, continuation, assistant
        assert_eq!(conv.len(), 4);
        assert!(matches!(&conv.messages()[2], ConversationMessage::User(t) if t.starts_with("Continue")));
    }

    #[tokio::test]
    async fn test_backend_error_is_fatal() {
        let h = harness(MockBackend::new(), MockToolExecutor::new());
        h.backend.queue_error(BackendError::AuthError);

        let mut conv = Conversation::new();
        let result = h
            .agent
            .run_turn(&mut conv, "Hello".to_string(), "c1", &tenant())
            .await;
        assert!(matches!(result, Err(AgentLoopError::Backend(BackendError::AuthError))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_timeout_is_fatal() {
        let h = harness(
            MockBackend::new().with_delay(Duration::from_secs(300)),
            MockToolExecutor::new(),
        );
        let agent = h.agent.with_backend_timeout(Duration::from_secs(10));

        let mut conv = Conversation::new();
        let result = agent
            .run_turn(&mut conv, "Hello".to_string(), "c1", &tenant())
            .await;
        assert!(matches!(result, Err(AgentLoopError::Backend(BackendError::Timeout(_)))));
    }

    #[tokio::test]
    async fn test_rate_limited_denial_emits_rate_limited_event() {
        let elevated = TenantContext::elevated("hotel-1");
        let h = harness(MockBackend::new(), MockToolExecutor::new());
        let calls = (0..4)
            .map(|i| call(&format!("call_{i}"), "cleanup_quendoo_api_key", json!({})))
            .collect::<Vec<_>>();
        // cleanup_quendoo_api_key allows 5 per minute
        h.backend.queue_tool_calls(calls.clone());
        h.backend.queue_tool_calls(calls);
        h.backend.queue_text("Here is the result.");

        let mut conv = Conversation::new();
        let outcome = h
            .agent
            .run_turn(&mut conv, "Clean up".to_string(), "c1", &elevated)
            .await
            .unwrap();

        assert_eq!(outcome.tools_used.len(), 8);
        assert_eq!(outcome.tools_used.iter().filter(|u| u.success).count(), 5);
        let counters = h.telemetry.counters();
        assert_eq!(counters.rate_limited, 3);
        assert_eq!(counters.tool_executed, 5);
        assert_eq!(counters.tool_blocked, 0);
    }
}
