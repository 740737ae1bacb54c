//! Scripted provider for tests and offline wiring.
//!
//! Responses are queued per capability; when a queue runs dry the client
//! falls back to echoing its input, so chains keep flowing in tests that do
//! not care about content.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatMessage, FinishReason, ToolCall};
use crate::error::WeftError;

use super::{
    capability_unsupported, Capability, ChatArgs, ChatClient, ChatResult, ChunkStream,
    EmbedClient, PromptClient, Provider, StreamClient,
};

#[derive(Default)]
struct Scripts {
    chat: VecDeque<ChatResult>,
    prompt: VecDeque<String>,
    embed: VecDeque<Vec<f64>>,
    stream: VecDeque<Vec<String>>,
}

/// Provider whose clients replay scripted responses.
pub struct MockProvider {
    model: String,
    provider_type: String,
    context_length: i64,
    backends: Vec<String>,
    caps: [bool; 4],
    scripts: Arc<Mutex<Scripts>>,
}

impl MockProvider {
    /// All four capabilities enabled, one backend `"b0"`.
    pub fn new(model: impl Into<String>, context_length: i64) -> Self {
        Self {
            model: model.into(),
            provider_type: "mock".to_string(),
            context_length,
            backends: vec!["b0".to_string()],
            caps: [true; 4],
            scripts: Arc::new(Mutex::new(Scripts::default())),
        }
    }

    pub fn with_provider_type(mut self, t: impl Into<String>) -> Self {
        self.provider_type = t.into();
        self
    }

    pub fn with_backends(mut self, ids: Vec<String>) -> Self {
        self.backends = ids;
        self
    }

    pub fn with_capabilities(mut self, chat: bool, prompt: bool, embed: bool, stream: bool) -> Self {
        self.caps = [chat, prompt, embed, stream];
        self
    }

    /// Queues a plain-text prompt response.
    pub fn with_prompt_response(self, text: impl Into<String>) -> Self {
        self.scripts.lock().unwrap().prompt.push_back(text.into());
        self
    }

    /// Queues an assistant reply for the next chat turn.
    pub fn with_chat_reply(self, content: impl Into<String>) -> Self {
        self.push_chat(ChatResult {
            message: ChatMessage::assistant(content),
            finish_reason: FinishReason::Stop,
        });
        self
    }

    /// Queues an assistant turn that requests the given tool calls.
    pub fn with_tool_call_reply(self, calls: Vec<ToolCall>) -> Self {
        self.push_chat(ChatResult {
            message: ChatMessage::assistant("").with_tool_calls(calls),
            finish_reason: FinishReason::ToolCalls,
        });
        self
    }

    /// Queues an embedding response.
    pub fn with_embedding(self, vector: Vec<f64>) -> Self {
        self.scripts.lock().unwrap().embed.push_back(vector);
        self
    }

    /// Queues a stream of chunks.
    pub fn with_stream(self, chunks: Vec<String>) -> Self {
        self.scripts.lock().unwrap().stream.push_back(chunks);
        self
    }

    fn push_chat(&self, result: ChatResult) {
        self.scripts.lock().unwrap().chat.push_back(result);
    }
}

struct MockChat(Arc<Mutex<Scripts>>);
struct MockPrompt(Arc<Mutex<Scripts>>);
struct MockEmbed(Arc<Mutex<Scripts>>);
struct MockStream(Arc<Mutex<Scripts>>);

#[async_trait]
impl ChatClient for MockChat {
    async fn chat(
        &self,
        ctx: &CancellationToken,
        messages: &[ChatMessage],
        _args: &ChatArgs,
    ) -> Result<ChatResult, WeftError> {
        if ctx.is_cancelled() {
            return Err(WeftError::Canceled);
        }
        if let Some(scripted) = self.0.lock().unwrap().chat.pop_front() {
            return Ok(scripted);
        }
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(ChatResult {
            message: ChatMessage::assistant(format!("echo: {last}")),
            finish_reason: FinishReason::Stop,
        })
    }
}

#[async_trait]
impl PromptClient for MockPrompt {
    async fn prompt(
        &self,
        ctx: &CancellationToken,
        _system_instruction: &str,
        _temperature: f32,
        prompt: &str,
    ) -> Result<String, WeftError> {
        if ctx.is_cancelled() {
            return Err(WeftError::Canceled);
        }
        if let Some(scripted) = self.0.lock().unwrap().prompt.pop_front() {
            return Ok(scripted);
        }
        Ok(format!("echo: {prompt}"))
    }
}

#[async_trait]
impl EmbedClient for MockEmbed {
    async fn embed(&self, ctx: &CancellationToken, prompt: &str) -> Result<Vec<f64>, WeftError> {
        if ctx.is_cancelled() {
            return Err(WeftError::Canceled);
        }
        if let Some(scripted) = self.0.lock().unwrap().embed.pop_front() {
            return Ok(scripted);
        }
        // Deterministic placeholder: one dimension per word.
        Ok(prompt.split_whitespace().map(|w| w.len() as f64).collect())
    }
}

#[async_trait]
impl StreamClient for MockStream {
    async fn stream(
        &self,
        ctx: &CancellationToken,
        prompt: &str,
        _args: &ChatArgs,
    ) -> Result<ChunkStream, WeftError> {
        if ctx.is_cancelled() {
            return Err(WeftError::Canceled);
        }
        let chunks = self
            .0
            .lock()
            .unwrap()
            .stream
            .pop_front()
            .unwrap_or_else(|| vec![format!("echo: {prompt}")]);
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }
}

impl Provider for MockProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_type(&self) -> &str {
        &self.provider_type
    }

    fn backend_ids(&self) -> Vec<String> {
        self.backends.clone()
    }

    fn context_length(&self) -> i64 {
        self.context_length
    }

    fn can_chat(&self) -> bool {
        self.caps[0]
    }

    fn can_prompt(&self) -> bool {
        self.caps[1]
    }

    fn can_embed(&self) -> bool {
        self.caps[2]
    }

    fn can_stream(&self) -> bool {
        self.caps[3]
    }

    fn chat_client(&self, _backend_id: &str) -> Result<Box<dyn ChatClient>, WeftError> {
        if !self.can_chat() {
            return Err(capability_unsupported(self, Capability::Chat));
        }
        Ok(Box::new(MockChat(Arc::clone(&self.scripts))))
    }

    fn prompt_client(&self, _backend_id: &str) -> Result<Box<dyn PromptClient>, WeftError> {
        if !self.can_prompt() {
            return Err(capability_unsupported(self, Capability::Prompt));
        }
        Ok(Box::new(MockPrompt(Arc::clone(&self.scripts))))
    }

    fn embed_client(&self, _backend_id: &str) -> Result<Box<dyn EmbedClient>, WeftError> {
        if !self.can_embed() {
            return Err(capability_unsupported(self, Capability::Embed));
        }
        Ok(Box::new(MockEmbed(Arc::clone(&self.scripts))))
    }

    fn stream_client(&self, _backend_id: &str) -> Result<Box<dyn StreamClient>, WeftError> {
        if !self.can_stream() {
            return Err(capability_unsupported(self, Capability::Stream));
        }
        Ok(Box::new(MockStream(Arc::clone(&self.scripts))))
    }
}
