//! OpenAI-shaped request/response values flowing through chains.
//!
//! Chains can carry a whole chat-completion request or response as their
//! current value (data types `OpenAIChatRequest` / `OpenAIChatResponse`), so
//! an embedding server can feed a request straight into a chain and hand the
//! converted response back. Field names match the OpenAI Chat Completions
//! API.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::chat::{ChatHistory, ChatMessage, ChatRole, FinishReason, ToolCall};
use crate::error::WeftError;

/// Chat-completion request body.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiChatRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// One message in request/response shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: OpenAiFunctionCall,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Chat-completion response body.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAiChoice>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiChoice {
    pub index: u32,
    pub message: OpenAiMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

fn parse_role(role: &str) -> ChatRole {
    match role {
        "system" => ChatRole::System,
        "assistant" => ChatRole::Assistant,
        "tool" => ChatRole::Tool,
        _ => ChatRole::User,
    }
}

fn to_openai_message(msg: &ChatMessage) -> OpenAiMessage {
    OpenAiMessage {
        role: msg.role.as_str().to_string(),
        content: Some(msg.content.clone()),
        tool_call_id: msg.tool_call_id.clone(),
        tool_calls: if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|c| OpenAiToolCall {
                        id: c.id.clone(),
                        call_type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect(),
            )
        },
    }
}

fn from_openai_message(msg: &OpenAiMessage) -> ChatMessage {
    ChatMessage {
        role: parse_role(&msg.role),
        content: msg.content.clone().unwrap_or_default(),
        tool_call_id: msg.tool_call_id.clone(),
        tool_calls: msg
            .tool_calls
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect(),
    }
}

/// Converts a request into the chat history the engine operates on.
pub fn history_from_request(request: &OpenAiChatRequest) -> ChatHistory {
    ChatHistory {
        messages: request.messages.iter().map(from_openai_message).collect(),
        model: request.model.clone(),
    }
}

/// Converts a chat history into a request body.
pub fn request_from_history(history: &ChatHistory) -> OpenAiChatRequest {
    OpenAiChatRequest {
        model: history.model.clone(),
        messages: history.messages.iter().map(to_openai_message).collect(),
        temperature: None,
        top_p: None,
        max_tokens: None,
    }
}

/// Converts a chat history into a response around its last assistant message.
/// Fails when the history has no assistant turn yet.
pub fn response_from_history(history: &ChatHistory) -> Result<OpenAiChatResponse, WeftError> {
    let assistant = history.last_assistant().ok_or_else(|| {
        WeftError::Unprocessable("chat history has no assistant message".into())
    })?;
    let finish = if assistant.tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolCalls
    };
    Ok(OpenAiChatResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: history.model.clone(),
        choices: vec![OpenAiChoice {
            index: 0,
            message: to_openai_message(assistant),
            finish_reason: Some(finish.as_str().to_string()),
        }],
    })
}
