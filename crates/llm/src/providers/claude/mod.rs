//! Claude (Anthropic API) implementation of [`ReasoningBackend`].
//!
//! Uses the non-streaming Messages API: one request per round, translating
//! between the gateway's [`ConversationMessage`] history and Anthropic content
//! blocks.
//!
//! [`ReasoningBackend`]: concierge_gateway::provider::ReasoningBackend
//! [`ConversationMessage`]: concierge_gateway::conversation::ConversationMessage

mod backend;
mod translate;

pub use self::backend::ClaudeBackend;
