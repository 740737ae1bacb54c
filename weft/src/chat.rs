//! Chat types shared by providers and the chain engine.
//!
//! A [`ChatMessage`] carries a role, text content, and (for assistant turns)
//! structured tool calls; a tool-role message answers one call via
//! `tool_call_id`. [`ChatHistory`] is the ordered conversation the
//! `chat_completion` and `execute_tool_calls` handlers operate on.

use serde::{Deserialize, Serialize};

/// Message role in a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    /// Wire name of the role, e.g. `"assistant"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

/// A structured tool invocation emitted by a model.
///
/// `arguments` is the raw JSON string exactly as the model produced it; the
/// hook layer parses it when executing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id; echoed back in the tool-role reply via `tool_call_id`.
    pub id: String,
    /// Function name to invoke.
    pub name: String,
    /// JSON-string arguments.
    pub arguments: String,
}

/// One message in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// For tool-role messages: id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For assistant messages: tool calls requested this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    /// Creates a tool-role message answering `call_id`.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: Vec::new(),
        }
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    /// Attaches tool calls (assistant messages).
    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// Why a completion stopped. `Length` and empty content are fatal to the
/// request; the engine converts them into their error kinds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    /// Provider-specific reason passed through verbatim.
    Other(String),
}

impl FinishReason {
    /// Parses a provider finish-reason string.
    pub fn parse(s: &str) -> Self {
        match s {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "tool_calls" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }

    /// Wire name of the reason.
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Other(s) => s.as_str(),
        }
    }
}

/// Ordered conversation flowing through chat handlers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
    /// Model that produced the latest assistant turn, when known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
}

impl ChatHistory {
    /// Single-user-message history, the conversion target for `String`.
    pub fn from_user(content: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(content)],
            model: String::new(),
        }
    }

    /// Last message, if any.
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Last assistant message, if any.
    pub fn last_assistant(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::Assistant)
    }

    /// Tool calls pending on the last assistant message.
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        match self.last() {
            Some(m) if m.role == ChatRole::Assistant => &m.tool_calls,
            _ => &[],
        }
    }

    /// Rough token estimate (chars / 4), used against a chain's declared
    /// token limit before dispatching a completion.
    pub fn estimate_tokens(&self) -> i64 {
        let chars: usize = self
            .messages
            .iter()
            .map(|m| m.content.len() + m.tool_calls.iter().map(|c| c.arguments.len()).sum::<usize>())
            .sum();
        (chars / 4) as i64
    }
}
