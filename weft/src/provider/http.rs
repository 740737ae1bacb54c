//! OpenAI-compatible HTTP provider.
//!
//! One [`HttpProvider`] represents a model installed on one or more backends
//! that speak the OpenAI chat-completions surface (OpenAI, vLLM, Ollama's
//! compatibility endpoint). Field names on the DTOs match that API; only the
//! common subset the core needs is modeled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatMessage, ChatRole, FinishReason, ToolCall};
use crate::error::WeftError;

use super::{
    capability_unsupported, Capability, ChatArgs, ChatClient, ChatResult, ChunkStream,
    EmbedClient, PromptClient, Provider, StreamClient, ToolDef,
};

/// One backend a model is reachable on.
#[derive(Clone, Debug)]
pub struct BackendRef {
    pub id: String,
    pub base_url: String,
    /// Bearer token, when the backend requires one.
    pub api_key: Option<String>,
}

/// Declared capabilities for one model.
#[derive(Clone, Copy, Debug, Default)]
pub struct CapabilityFlags {
    pub chat: bool,
    pub prompt: bool,
    pub embed: bool,
    pub stream: bool,
}

/// OpenAI-compatible provider for one model.
pub struct HttpProvider {
    model: String,
    provider_type: String,
    context_length: i64,
    caps: CapabilityFlags,
    backends: Vec<BackendRef>,
    http: reqwest::Client,
}

impl HttpProvider {
    pub fn new(
        model: impl Into<String>,
        provider_type: impl Into<String>,
        context_length: i64,
        caps: CapabilityFlags,
        backends: Vec<BackendRef>,
    ) -> Self {
        Self {
            model: model.into(),
            provider_type: provider_type.into(),
            context_length,
            caps,
            backends,
            http: reqwest::Client::new(),
        }
    }

    fn backend(&self, backend_id: &str) -> Result<BackendRef, WeftError> {
        self.backends
            .iter()
            .find(|b| b.id == backend_id)
            .cloned()
            .ok_or_else(|| WeftError::NotFound(format!("backend {backend_id}")))
    }

    fn client_for(&self, backend_id: &str) -> Result<WireClient, WeftError> {
        let backend = self.backend(backend_id)?;
        Ok(WireClient {
            http: self.http.clone(),
            backend,
            model: self.model.clone(),
        })
    }
}

impl Provider for HttpProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_type(&self) -> &str {
        &self.provider_type
    }

    fn backend_ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.id.clone()).collect()
    }

    fn context_length(&self) -> i64 {
        self.context_length
    }

    fn can_chat(&self) -> bool {
        self.caps.chat
    }

    fn can_prompt(&self) -> bool {
        self.caps.prompt
    }

    fn can_embed(&self) -> bool {
        self.caps.embed
    }

    fn can_stream(&self) -> bool {
        self.caps.stream
    }

    fn chat_client(&self, backend_id: &str) -> Result<Box<dyn ChatClient>, WeftError> {
        if !self.caps.chat {
            return Err(capability_unsupported(self, Capability::Chat));
        }
        Ok(Box::new(self.client_for(backend_id)?))
    }

    fn prompt_client(&self, backend_id: &str) -> Result<Box<dyn PromptClient>, WeftError> {
        if !self.caps.prompt {
            return Err(capability_unsupported(self, Capability::Prompt));
        }
        Ok(Box::new(self.client_for(backend_id)?))
    }

    fn embed_client(&self, backend_id: &str) -> Result<Box<dyn EmbedClient>, WeftError> {
        if !self.caps.embed {
            return Err(capability_unsupported(self, Capability::Embed));
        }
        Ok(Box::new(self.client_for(backend_id)?))
    }

    fn stream_client(&self, backend_id: &str) -> Result<Box<dyn StreamClient>, WeftError> {
        if !self.caps.stream {
            return Err(capability_unsupported(self, Capability::Stream));
        }
        Ok(Box::new(self.client_for(backend_id)?))
    }
}

// ---- wire DTOs -------------------------------------------------------------

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireToolFunction,
}

#[derive(Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireEmbeddingResponse {
    data: Vec<WireEmbedding>,
}

#[derive(Deserialize)]
struct WireEmbedding {
    embedding: Vec<f64>,
}

#[derive(Deserialize)]
struct WireChunk {
    choices: Vec<WireChunkChoice>,
}

#[derive(Deserialize)]
struct WireChunkChoice {
    delta: WireDelta,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

fn to_wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: m.role.as_str().to_string(),
            content: Some(m.content.clone()),
            tool_call_id: m.tool_call_id.clone(),
            tool_calls: if m.tool_calls.is_empty() {
                None
            } else {
                Some(
                    m.tool_calls
                        .iter()
                        .map(|c| WireToolCall {
                            id: c.id.clone(),
                            call_type: "function".to_string(),
                            function: WireFunctionCall {
                                name: c.name.clone(),
                                arguments: c.arguments.clone(),
                            },
                        })
                        .collect(),
                )
            },
        })
        .collect()
}

fn to_wire_tools(tools: &[ToolDef]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            tool_type: "function",
            function: WireToolFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

/// Converts a wire choice into the core chat result, surfacing terminal
/// finish reasons as their error kinds.
fn from_wire_choice(choice: WireChoice) -> Result<ChatResult, WeftError> {
    let finish = FinishReason::parse(choice.finish_reason.as_deref().unwrap_or("stop"));
    match finish {
        FinishReason::Length => {
            return Err(WeftError::TokenLimit("completion hit token limit".into()))
        }
        FinishReason::ContentFilter => return Err(WeftError::ContentFiltered),
        _ => {}
    }

    let content = choice.message.content.unwrap_or_default();
    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall {
            id: c.id,
            name: c.function.name,
            arguments: c.function.arguments,
        })
        .collect();

    if content.is_empty() && tool_calls.is_empty() {
        return Err(WeftError::EmptyContent);
    }

    let message = ChatMessage {
        role: ChatRole::Assistant,
        content,
        tool_call_id: None,
        tool_calls,
    };
    Ok(ChatResult {
        message,
        finish_reason: finish,
    })
}

// ---- wire client -----------------------------------------------------------

struct WireClient {
    http: reqwest::Client,
    backend: BackendRef,
    model: String,
}

impl WireClient {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.backend.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.post(self.url(path));
        if let Some(key) = &self.backend.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn post_chat(
        &self,
        ctx: &CancellationToken,
        body: &WireRequest<'_>,
    ) -> Result<WireResponse, WeftError> {
        let fut = async {
            let resp = self
                .request("/v1/chat/completions")
                .json(body)
                .send()
                .await?
                .error_for_status()?;
            let parsed: WireResponse = resp
                .json()
                .await
                .map_err(|e| WeftError::Protocol(e.to_string()))?;
            Ok::<WireResponse, WeftError>(parsed)
        };
        tokio::select! {
            _ = ctx.cancelled() => Err(WeftError::Canceled),
            out = fut => out,
        }
    }
}

#[async_trait]
impl ChatClient for WireClient {
    async fn chat(
        &self,
        ctx: &CancellationToken,
        messages: &[ChatMessage],
        args: &ChatArgs,
    ) -> Result<ChatResult, WeftError> {
        let body = WireRequest {
            model: &self.model,
            messages: to_wire_messages(messages),
            temperature: args.temperature,
            top_p: args.top_p,
            max_tokens: args.max_tokens,
            seed: args.seed,
            tools: to_wire_tools(&args.tools),
            stream: false,
        };
        let mut resp = self.post_chat(ctx, &body).await?;
        if resp.choices.is_empty() {
            return Err(WeftError::Protocol("response carried no choices".into()));
        }
        from_wire_choice(resp.choices.remove(0))
    }
}

#[async_trait]
impl PromptClient for WireClient {
    async fn prompt(
        &self,
        ctx: &CancellationToken,
        system_instruction: &str,
        temperature: f32,
        prompt: &str,
    ) -> Result<String, WeftError> {
        let mut messages = Vec::new();
        if !system_instruction.is_empty() {
            messages.push(ChatMessage::system(system_instruction));
        }
        messages.push(ChatMessage::user(prompt));
        let body = WireRequest {
            model: &self.model,
            messages: to_wire_messages(&messages),
            temperature: Some(temperature),
            top_p: None,
            max_tokens: None,
            seed: None,
            tools: Vec::new(),
            stream: false,
        };
        let mut resp = self.post_chat(ctx, &body).await?;
        if resp.choices.is_empty() {
            return Err(WeftError::Protocol("response carried no choices".into()));
        }
        let result = from_wire_choice(resp.choices.remove(0))?;
        Ok(result.message.content)
    }
}

#[async_trait]
impl EmbedClient for WireClient {
    async fn embed(&self, ctx: &CancellationToken, prompt: &str) -> Result<Vec<f64>, WeftError> {
        let body = serde_json::json!({ "model": self.model, "input": prompt });
        let fut = async {
            let resp = self
                .request("/v1/embeddings")
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            let parsed: WireEmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| WeftError::Protocol(e.to_string()))?;
            parsed
                .data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| WeftError::Protocol("embedding response carried no data".into()))
        };
        tokio::select! {
            _ = ctx.cancelled() => Err(WeftError::Canceled),
            out = fut => out,
        }
    }
}

#[async_trait]
impl StreamClient for WireClient {
    async fn stream(
        &self,
        ctx: &CancellationToken,
        prompt: &str,
        args: &ChatArgs,
    ) -> Result<ChunkStream, WeftError> {
        let messages = vec![ChatMessage::user(prompt)];
        let body = WireRequest {
            model: &self.model,
            messages: to_wire_messages(&messages),
            temperature: args.temperature,
            top_p: args.top_p,
            max_tokens: args.max_tokens,
            seed: args.seed,
            tools: Vec::new(),
            stream: true,
        };
        let resp = self
            .request("/v1/chat/completions")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, WeftError>>(16);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            use futures_util::StreamExt;
            let mut bytes = resp.bytes_stream();
            let mut buf = String::new();
            loop {
                let next = tokio::select! {
                    _ = ctx.cancelled() => {
                        let _ = tx.send(Err(WeftError::Canceled)).await;
                        return;
                    }
                    n = bytes.next() => n,
                };
                let chunk = match next {
                    Some(Ok(c)) => c,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(WeftError::Transport(e.to_string()))).await;
                        return;
                    }
                    None => return,
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<WireChunk>(payload) {
                        Ok(parsed) => {
                            if let Some(text) = parsed
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content)
                            {
                                if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(WeftError::Protocol(e.to_string()))).await;
                            return;
                        }
                    }
                }
            }
        });

        use tokio_stream::wrappers::ReceiverStream;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice(content: Option<&str>, calls: Vec<(&str, &str)>, finish: &str) -> WireChoice {
        WireChoice {
            message: WireMessage {
                role: "assistant".into(),
                content: content.map(str::to_string),
                tool_call_id: None,
                tool_calls: if calls.is_empty() {
                    None
                } else {
                    Some(
                        calls
                            .into_iter()
                            .map(|(name, args)| WireToolCall {
                                id: "c1".into(),
                                call_type: "function".into(),
                                function: WireFunctionCall {
                                    name: name.into(),
                                    arguments: args.into(),
                                },
                            })
                            .collect(),
                    )
                },
            },
            finish_reason: Some(finish.to_string()),
        }
    }

    /// **Scenario**: `length` finish reason surfaces as TokenLimit.
    #[test]
    fn length_is_token_limit() {
        let err = from_wire_choice(choice(Some("partial"), vec![], "length")).unwrap_err();
        assert!(matches!(err, WeftError::TokenLimit(_)));
    }

    /// **Scenario**: `content_filter` surfaces as ContentFiltered.
    #[test]
    fn content_filter_surfaces() {
        let err = from_wire_choice(choice(Some("x"), vec![], "content_filter")).unwrap_err();
        assert!(matches!(err, WeftError::ContentFiltered));
    }

    /// **Scenario**: no text and no tool calls is EmptyContent.
    #[test]
    fn empty_completion_is_error() {
        let err = from_wire_choice(choice(Some(""), vec![], "stop")).unwrap_err();
        assert!(matches!(err, WeftError::EmptyContent));
    }

    /// **Scenario**: tool calls with empty content are a valid result.
    #[test]
    fn tool_calls_without_text_ok() {
        let out =
            from_wire_choice(choice(Some(""), vec![("get_weather", "{}")], "tool_calls")).unwrap();
        assert_eq!(out.finish_reason, FinishReason::ToolCalls);
        assert_eq!(out.message.tool_calls[0].name, "get_weather");
    }

    /// **Scenario**: tool-role messages serialize with tool_call_id.
    #[test]
    fn wire_message_round_trip() {
        let msgs = to_wire_messages(&[ChatMessage::tool("c9", "42")]);
        let json = serde_json::to_value(&msgs).unwrap();
        assert_eq!(json[0]["role"], "tool");
        assert_eq!(json[0]["tool_call_id"], "c9");
    }
}
