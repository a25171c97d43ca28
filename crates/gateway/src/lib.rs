pub mod admission;
pub mod catalog;
pub mod continuation;
pub mod conversation;
pub mod filter;
pub mod gateway;
pub mod input;
pub mod mcp;
pub mod prompt;
pub mod provider;
pub mod rate_limit;
pub mod registry;
pub mod runtime;
pub mod telemetry;
pub mod tool;

pub use admission::{AdmissionDecision, AdmissionGate, DenyReason, GateError};
pub use catalog::{ParamKind, ParamSpec, PrivilegeTier, ToolCatalog, ToolDescriptor};
pub use continuation::{CompletionHeuristic, ContinuationPolicy, NeverContinue};
pub use conversation::{Conversation, ConversationMessage, ConversationStore, InMemoryConversationStore};
pub use filter::{FilterOutcome, FilterPolicy, OutputFilter};
pub use gateway::{Gateway, GatewayBuildError, GatewayBuilder, GatewayError, TurnReply};
pub use input::{InputPolicy, InputRejection, InputValidator};
pub use mcp::McpToolExecutor;
pub use prompt::PromptTemplate;
pub use provider::{BackendError, BackendRequest, BackendResponse, ReasoningBackend, StopReason};
pub use rate_limit::{InMemoryRateLimitStore, RateDecision, RateLimitStore};
pub use registry::ToolRegistry;
pub use runtime::{AgentLoop, AgentLoopError, Termination, ToolUsage, TurnOutcome};
pub use telemetry::{EventKind, SecurityEvent, SecurityMonitor, TelemetrySink, ThreatAssessment, ThreatLevel};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolError, ToolExecutor, ToolResult};
