//! Provider abstraction: one model on one backend, behind capability-typed
//! clients.
//!
//! A [`Provider`] claims each capability {chat, prompt, embed, stream}
//! independently and hands out a single-method client per capability. Factory
//! methods fail with `CapabilityUnsupported` when the flag is false. Clients
//! are created per request and owned by the caller.
//!
//! Implementations: [`MockProvider`] (scripted, for tests and wiring) and
//! [`HttpProvider`] (OpenAI-compatible HTTP backends). Provider wire formats
//! beyond the common subset are out of scope; anything OpenAI-shaped
//! (Ollama, vLLM, OpenAI itself) goes through [`HttpProvider`].

mod admin;
mod http;
mod mock;

pub use admin::{
    admin_for_backend, BackendAdmin, DownloadProgress, HttpAdmin, InstalledModelInfo, OllamaAdmin,
    ProgressFn,
};
pub use http::{BackendRef, CapabilityFlags, HttpProvider};
pub use mock::MockProvider;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatMessage, FinishReason};
use crate::error::WeftError;

/// One of the four provider capabilities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    #[default]
    Chat,
    Prompt,
    Embed,
    Stream,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Prompt => "prompt",
            Capability::Embed => "embed",
            Capability::Stream => "stream",
        }
    }
}

/// A tool made available to the model for a chat turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameters: serde_json::Value,
}

/// Optional arguments for a chat or stream call.
#[derive(Clone, Debug, Default)]
pub struct ChatArgs {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub seed: Option<i64>,
    pub tools: Vec<ToolDef>,
}

/// Result of one chat turn: the assistant message (tool calls embedded) and
/// the finish reason. Terminal conditions (`length`, content filter, empty
/// content) surface as errors instead.
#[derive(Clone, Debug)]
pub struct ChatResult {
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

/// Chat capability: ordered messages in, assistant message + finish reason out.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        ctx: &CancellationToken,
        messages: &[ChatMessage],
        args: &ChatArgs,
    ) -> Result<ChatResult, WeftError>;
}

/// Prompt capability: (system instruction, temperature, prompt) → content.
#[async_trait]
pub trait PromptClient: Send + Sync {
    async fn prompt(
        &self,
        ctx: &CancellationToken,
        system_instruction: &str,
        temperature: f32,
        prompt: &str,
    ) -> Result<String, WeftError>;
}

/// Embed capability: prompt → vector of 64-bit floats.
#[async_trait]
pub trait EmbedClient: Send + Sync {
    async fn embed(&self, ctx: &CancellationToken, prompt: &str) -> Result<Vec<f64>, WeftError>;
}

/// A lazy, finite, non-restartable sequence of text chunks.
pub type ChunkStream = BoxStream<'static, Result<String, WeftError>>;

/// Stream capability: prompt → chunk stream.
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn stream(
        &self,
        ctx: &CancellationToken,
        prompt: &str,
        args: &ChatArgs,
    ) -> Result<ChunkStream, WeftError>;
}

/// One model on one or more backends.
///
/// **Interaction**: produced by the runtime state (installed models joined
/// with declarations), consumed by the resolver, which asks for a capability
/// client against the backend its policy picked.
pub trait Provider: Send + Sync {
    /// Canonical model name, e.g. `"llama2:7b"`.
    fn model_name(&self) -> &str;

    /// Provider-type tag, e.g. `"ollama"` or `"vllm"`.
    fn provider_type(&self) -> &str;

    /// Stable identity for dedup: `{provider_type}/{model_name}`.
    fn id(&self) -> String {
        format!("{}/{}", self.provider_type(), self.model_name())
    }

    /// Backends this model is installed on.
    fn backend_ids(&self) -> Vec<String>;

    /// Declared context length in tokens.
    fn context_length(&self) -> i64;

    fn can_chat(&self) -> bool;
    fn can_prompt(&self) -> bool;
    fn can_embed(&self) -> bool;
    fn can_stream(&self) -> bool;

    /// Whether the given capability predicate holds.
    fn has_capability(&self, capability: Capability) -> bool {
        match capability {
            Capability::Chat => self.can_chat(),
            Capability::Prompt => self.can_prompt(),
            Capability::Embed => self.can_embed(),
            Capability::Stream => self.can_stream(),
        }
    }

    fn chat_client(&self, backend_id: &str) -> Result<Box<dyn ChatClient>, WeftError>;
    fn prompt_client(&self, backend_id: &str) -> Result<Box<dyn PromptClient>, WeftError>;
    fn embed_client(&self, backend_id: &str) -> Result<Box<dyn EmbedClient>, WeftError>;
    fn stream_client(&self, backend_id: &str) -> Result<Box<dyn StreamClient>, WeftError>;
}

/// Helper for factories: the standard `CapabilityUnsupported` error.
pub(crate) fn capability_unsupported(provider: &dyn Provider, capability: Capability) -> WeftError {
    WeftError::CapabilityUnsupported {
        provider: provider.id(),
        capability: capability.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: capability predicate dispatch matches the four flags.
    #[test]
    fn has_capability_maps_flags() {
        let p = MockProvider::new("m", 4096).with_capabilities(true, false, true, false);
        assert!(p.has_capability(Capability::Chat));
        assert!(!p.has_capability(Capability::Prompt));
        assert!(p.has_capability(Capability::Embed));
        assert!(!p.has_capability(Capability::Stream));
    }

    /// **Scenario**: factory for a disabled capability fails with
    /// CapabilityUnsupported naming the provider.
    #[test]
    fn factory_rejects_missing_capability() {
        let p = MockProvider::new("m", 4096).with_capabilities(true, true, true, false);
        match p.stream_client("b0") {
            Err(WeftError::CapabilityUnsupported {
                provider,
                capability,
            }) => {
                assert_eq!(provider, "mock/m");
                assert_eq!(capability, "stream");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected error"),
        }
    }
}
