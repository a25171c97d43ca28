use crate::rate_limit::{Clock, SystemClock};
use crate::tool::{ToolCall, ToolResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// A message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConversationMessage {
    /// User's text input (or a continuation instruction)
    User(String),
    /// Assistant's response (may contain text and/or tool calls)
    Assistant(AssistantContent),
    /// Results for every tool call of the preceding assistant entry, in request order
    ToolResults(Vec<ToolResult>),
}

/// Content from the assistant that can contain mixed text and tool calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantContent {
    /// Text blocks in the response
    pub text: Option<String>,
    /// Tool calls requested by the assistant
    pub tool_calls: Vec<ToolCall>,
}

/// History of one conversation plus its system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
    /// System prompt (always retained)
    system_prompt: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn add_user_message(&mut self, text: String) {
        self.messages.push(ConversationMessage::User(text));
    }

    pub fn add_assistant_response(&mut self, content: AssistantContent) {
        self.messages.push(ConversationMessage::Assistant(content));
    }

    pub fn add_tool_results(&mut self, results: Vec<ToolResult>) {
        self.messages.push(ConversationMessage::ToolResults(results));
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Overwrite the text of the latest assistant entry (the delivered answer
    /// after output filtering). No-op when there is none.
    pub fn replace_last_assistant_text(&mut self, text: String) {
        let last = self.messages.iter_mut().rev().find_map(|m| match m {
            ConversationMessage::Assistant(content) => Some(content),
            _ => None,
        });
        if let Some(content) = last {
            content.text = Some(text);
        }
    }

    /// Keep only the most recent `max_messages` entries. Call between turns,
    /// never mid-turn. Leading entries that are not user text are dropped too,
    /// so the history never opens with an orphaned tool result.
    pub fn truncate_tail(&mut self, max_messages: usize) {
        if self.messages.len() > max_messages {
            let excess = self.messages.len() - max_messages;
            self.messages.drain(..excess);
        }
        let leading = self
            .messages
            .iter()
            .take_while(|m| !matches!(m, ConversationMessage::User(_)))
            .count();
        self.messages.drain(..leading);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conversation store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for conversations between turns.
///
/// Conversations are owned by a tenant: the same conversation id under two
/// tenants names two unrelated histories.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, tenant_id: &str, conversation_id: &str) -> Result<Option<Conversation>, StoreError>;

    async fn save(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        conversation: Conversation,
    ) -> Result<(), StoreError>;

    async fn remove(&self, tenant_id: &str, conversation_id: &str) -> Result<(), StoreError>;

    /// Drop conversations idle past the store's TTL. Returns how many were removed.
    fn sweep(&self) -> usize {
        0
    }
}

/// Default idle TTL for in-memory conversations.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(3600);

struct StoredConversation {
    conversation: Conversation,
    last_active: DateTime<Utc>,
}

/// Process-local store. Conversations are lost on restart and evicted once
/// idle longer than the TTL.
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<(String, String), StoredConversation>>,
    clock: Arc<dyn Clock>,
    idle_ttl: Duration,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            clock,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    fn conversations(&self) -> MutexGuard<'_, HashMap<(String, String), StoredConversation>> {
        match self.conversations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn idle_cutoff(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.idle_ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        self.clock.now() - ttl
    }

    pub fn len(&self) -> usize {
        self.conversations().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn store_key(tenant_id: &str, conversation_id: &str) -> (String, String) {
    (tenant_id.to_string(), conversation_id.to_string())
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, tenant_id: &str, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
        let cutoff = self.idle_cutoff();
        Ok(self
            .conversations()
            .get(&store_key(tenant_id, conversation_id))
            .filter(|stored| stored.last_active > cutoff)
            .map(|stored| stored.conversation.clone()))
    }

    async fn save(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        conversation: Conversation,
    ) -> Result<(), StoreError> {
        let last_active = self.clock.now();
        self.conversations().insert(
            store_key(tenant_id, conversation_id),
            StoredConversation {
                conversation,
                last_active,
            },
        );
        Ok(())
    }

    async fn remove(&self, tenant_id: &str, conversation_id: &str) -> Result<(), StoreError> {
        self.conversations()
            .remove(&store_key(tenant_id, conversation_id));
        Ok(())
    }

    fn sweep(&self) -> usize {
        let cutoff = self.idle_cutoff();
        let mut conversations = self.conversations();
        let before = conversations.len();
        conversations.retain(|_, stored| stored.last_active > cutoff);
        before - conversations.len()
    }
}

/// Periodically evict idle conversations until the task is aborted.
pub fn spawn_idle_sweeper(store: Arc<dyn ConversationStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = store.sweep();
            if removed > 0 {
                debug!(removed, "evicted idle conversations");
            }
        }
    })
}
