//! Translation between gateway conversation types and the Claude API format.

use serde_json::{json, Value};

use concierge_gateway::conversation::ConversationMessage;
use concierge_gateway::provider::{BackendError, BackendResponse, StopReason};
use concierge_gateway::tool::{ToolCall, ToolDefinition};

/// Translate a [`ToolDefinition`] into the Claude API tool format.
pub(super) fn tool_definition_to_claude(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

/// Translate one history entry into a Claude API message.
///
/// Returns `None` for an assistant entry with neither text nor tool calls;
/// the API rejects empty content arrays.
pub(super) fn message_to_claude(msg: &ConversationMessage) -> Option<Value> {
    match msg {
        ConversationMessage::User(text) => Some(json!({
            "role": "user",
            "content": text,
        })),
        ConversationMessage::Assistant(content) => {
            let mut blocks: Vec<Value> = Vec::new();
            if let Some(text) = content.text.as_deref().filter(|t| !t.trim().is_empty()) {
                blocks.push(json!({"type": "text", "text": text}));
            }
            for tc in &content.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": tc.id,
                    "name": tc.name,
                    "input": tc.input,
                }));
            }
            if blocks.is_empty() {
                return None;
            }
            Some(json!({
                "role": "assistant",
                "content": blocks,
            }))
        }
        ConversationMessage::ToolResults(results) => {
            let blocks: Vec<Value> = results
                .iter()
                .map(|r| {
                    json!({
                        "type": "tool_result",
                        "tool_use_id": r.tool_call_id,
                        "content": r.content,
                        "is_error": r.is_error,
                    })
                })
                .collect();
            Some(json!({
                "role": "user",
                "content": blocks,
            }))
        }
    }
}

pub(super) fn messages_to_claude(messages: &[ConversationMessage]) -> Vec<Value> {
    messages.iter().filter_map(message_to_claude).collect()
}

fn parse_stop_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

/// Parse a Messages API response body. Text blocks are joined with newlines.
pub(super) fn parse_response(body: &Value) -> Result<BackendResponse, BackendError> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| BackendError::InvalidResponse("missing content array".into()))?;

    let mut texts: Vec<&str> = Vec::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str() {
                    texts.push(text);
                }
            }
            Some("tool_use") => {
                let id = block["id"]
                    .as_str()
                    .ok_or_else(|| BackendError::InvalidResponse("tool_use block without id".into()))?;
                let name = block["name"]
                    .as_str()
                    .ok_or_else(|| BackendError::InvalidResponse("tool_use block without name".into()))?;
                tool_calls.push(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: block.get("input").cloned().unwrap_or_else(|| json!({})),
                });
            }
            _ => {}
        }
    }

    let text = if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    };

    Ok(BackendResponse {
        text,
        tool_calls,
        stop_reason: parse_stop_reason(body["stop_reason"].as_str()),
    })
}

/// Map a non-200 status to a backend error.
pub(super) fn error_for_status(status: u16, retry_after: Option<u64>, body: String) -> BackendError {
    match status {
        401 => BackendError::AuthError,
        429 => {
            let from_body = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"]["retry_after_secs"].as_u64());
            BackendError::RateLimited {
                retry_after_secs: retry_after.or(from_body).unwrap_or(30),
            }
        }
        _ => {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or(body);
            BackendError::ApiError { status, message }
        }
    }
}
