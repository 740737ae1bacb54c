//! Handler dispatch: one typed strategy per task kind.
//!
//! The runner resolves a provider for model-backed handlers, talks to the
//! hook registry for tool handlers, and returns the typed output plus the
//! transition string the engine evaluates branches against. For most
//! handlers the transition string is the output's rendering; chat
//! completions report `"tool-call"` or the finish reason instead.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatHistory, ChatMessage};
use crate::error::WeftError;
use crate::hooks::{HookCall, HookRegistry};
use crate::provider::{ChatArgs, Provider};
use crate::resolver::{
    resolve_chat, resolve_embed, resolve_prompt, ResolveRequest, SelectionPolicy,
};
use crate::runtime::RuntimeState;

use super::definition::{ExecuteConfig, HandlerKind, TaskDefinition};
use super::value::{DataType, DataValue};

/// Transition value reported when a completion requests tool calls.
pub const TRANSITION_TOOL_CALL: &str = "tool-call";

/// Supplies the current provider list. The runtime state implements this;
/// tests inject a static list.
pub trait ProviderSource: Send + Sync {
    fn providers(&self) -> Vec<Arc<dyn Provider>>;
}

impl ProviderSource for RuntimeState {
    fn providers(&self) -> Vec<Arc<dyn Provider>> {
        RuntimeState::providers(self)
    }
}

/// Fixed provider list, for tests and embedded use.
pub struct StaticProviders(pub Vec<Arc<dyn Provider>>);

impl ProviderSource for StaticProviders {
    fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.0.clone()
    }
}

/// Output of one handler dispatch.
#[derive(Clone, Debug)]
pub struct HandlerOutput {
    pub value: DataValue,
    /// String the transition branches are evaluated against.
    pub transition: String,
}

impl HandlerOutput {
    fn rendered(value: DataValue) -> Self {
        let transition = value.render();
        Self { value, transition }
    }
}

/// Dispatches task handlers.
pub struct TaskRunner {
    providers: Arc<dyn ProviderSource>,
    hooks: Arc<dyn HookRegistry>,
    policy: SelectionPolicy,
}

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number regex"));
static RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(-?\d+)\s*(?:-|to)\s*(-?\d+)").expect("range regex"));

impl TaskRunner {
    pub fn new(
        providers: Arc<dyn ProviderSource>,
        hooks: Arc<dyn HookRegistry>,
        policy: SelectionPolicy,
    ) -> Self {
        Self {
            providers,
            hooks,
            policy,
        }
    }

    pub fn hooks(&self) -> &Arc<dyn HookRegistry> {
        &self.hooks
    }

    fn request_for(config: Option<&ExecuteConfig>) -> ResolveRequest {
        let mut request = ResolveRequest::default();
        if let Some(cfg) = config {
            if !cfg.model.is_empty() {
                request.model_names = vec![cfg.model.clone()];
            }
            if !cfg.provider.is_empty() {
                request.provider_types = vec![cfg.provider.clone()];
            }
        }
        request
    }

    fn temperature(config: Option<&ExecuteConfig>) -> f32 {
        config.and_then(|c| c.temperature).unwrap_or(0.0)
    }

    /// The prompt a model-backed handler sees: the expanded template, with
    /// the input appended after a blank line when both are non-empty.
    fn build_prompt(template: &str, input: &DataValue) -> String {
        let rendered = input.render();
        match (template.is_empty(), rendered.is_empty()) {
            (true, _) => rendered,
            (_, true) => template.to_string(),
            _ => format!("{template}\n\n{rendered}"),
        }
    }

    async fn run_prompt(
        &self,
        ctx: &CancellationToken,
        task: &TaskDefinition,
        prompt: &str,
        system: &str,
    ) -> Result<String, WeftError> {
        let providers = self.providers.providers();
        let request = Self::request_for(task.execute_config.as_ref());
        let (client, _, _) = resolve_prompt(&providers, &request, self.policy)?;
        client
            .prompt(
                ctx,
                system,
                Self::temperature(task.execute_config.as_ref()),
                prompt,
            )
            .await
    }

    /// Runs one handler. `prompt` and `system` are already macro-expanded.
    pub async fn dispatch(
        &self,
        ctx: &CancellationToken,
        task: &TaskDefinition,
        input: &DataValue,
        prompt: &str,
        system: &str,
    ) -> Result<HandlerOutput, WeftError> {
        match task.handler {
            HandlerKind::RawString => {
                let full = Self::build_prompt(prompt, input);
                let out = self.run_prompt(ctx, task, &full, system).await?;
                Ok(HandlerOutput::rendered(DataValue::String(out)))
            }
            HandlerKind::PromptToCondition => {
                let conditions = task.valid_conditions.as_ref().ok_or_else(|| {
                    WeftError::Unprocessable(format!(
                        "task {} has no valid_conditions",
                        task.id
                    ))
                })?;
                let full = Self::build_prompt(prompt, input);
                let out = self.run_prompt(ctx, task, &full, system).await?;
                let needle = out.trim().to_lowercase();
                let hit = conditions
                    .iter()
                    .find(|(text, _)| text.trim().to_lowercase() == needle)
                    .map(|(_, v)| *v);
                match hit {
                    Some(b) => Ok(HandlerOutput::rendered(DataValue::Bool(b))),
                    None => Err(WeftError::Unprocessable(format!(
                        "output {needle:?} matched no valid condition"
                    ))),
                }
            }
            HandlerKind::ParseNumber => {
                let full = Self::build_prompt(prompt, input);
                let out = self.run_prompt(ctx, task, &full, system).await?;
                parse_number(&out).map(HandlerOutput::rendered)
            }
            HandlerKind::ParseRange => {
                let full = Self::build_prompt(prompt, input);
                let out = self.run_prompt(ctx, task, &full, system).await?;
                parse_range(&out).map(HandlerOutput::rendered)
            }
            HandlerKind::Embedding => {
                let full = Self::build_prompt(prompt, input);
                let providers = self.providers.providers();
                let request = Self::request_for(task.execute_config.as_ref());
                let (client, _, _) = resolve_embed(&providers, &request, self.policy)?;
                let vector = client.embed(ctx, &full).await?;
                let len = vector.len();
                Ok(HandlerOutput {
                    value: DataValue::Json(serde_json::json!(vector)),
                    transition: len.to_string(),
                })
            }
            HandlerKind::ChatCompletion => self.chat_completion(ctx, task, input, system).await,
            HandlerKind::ExecuteToolCalls => self.execute_tool_calls(ctx, task, input).await,
            HandlerKind::Hook => self.run_hook(ctx, task, input).await,
            HandlerKind::ConvertToOpenaiChatResponse => {
                let value = input.convert_to(DataType::OpenAiChatResponse)?;
                Ok(HandlerOutput {
                    transition: "ok".to_string(),
                    value,
                })
            }
            HandlerKind::PromptToJs => {
                let full = Self::build_prompt(prompt, input);
                let out = self.run_prompt(ctx, task, &full, system).await?;
                Ok(HandlerOutput {
                    value: DataValue::Json(serde_json::json!({ "code": out })),
                    transition: "ok".to_string(),
                })
            }
        }
    }

    async fn chat_completion(
        &self,
        ctx: &CancellationToken,
        task: &TaskDefinition,
        input: &DataValue,
        system: &str,
    ) -> Result<HandlerOutput, WeftError> {
        let DataValue::ChatHistory(history) = input else {
            return Err(WeftError::TypeMismatch {
                from: input.data_type().to_string(),
                to: DataType::ChatHistory.to_string(),
            });
        };

        let providers = self.providers.providers();
        let mut request = Self::request_for(task.execute_config.as_ref());
        if request.model_names.is_empty() && !history.model.is_empty() {
            request.model_names = vec![history.model.clone()];
        }
        let (client, provider, _) = resolve_chat(&providers, &request, self.policy)?;

        let mut messages = history.messages.clone();
        if !system.is_empty() && !messages.iter().any(|m| m.role == crate::chat::ChatRole::System)
        {
            messages.insert(0, ChatMessage::system(system));
        }

        let args = ChatArgs {
            temperature: Some(Self::temperature(task.execute_config.as_ref())),
            tools: self.hooks.all_tool_defs().await,
            ..Default::default()
        };
        let result = client.chat(ctx, &messages, &args).await?;

        let transition = if result.message.tool_calls.is_empty() {
            result.finish_reason.as_str().to_string()
        } else {
            TRANSITION_TOOL_CALL.to_string()
        };

        messages.push(result.message);
        Ok(HandlerOutput {
            value: DataValue::ChatHistory(ChatHistory {
                messages,
                model: provider.model_name().to_string(),
            }),
            transition,
        })
    }

    async fn execute_tool_calls(
        &self,
        ctx: &CancellationToken,
        task: &TaskDefinition,
        input: &DataValue,
    ) -> Result<HandlerOutput, WeftError> {
        let DataValue::ChatHistory(history) = input else {
            return Err(WeftError::TypeMismatch {
                from: input.data_type().to_string(),
                to: DataType::ChatHistory.to_string(),
            });
        };
        let pending = history.pending_tool_calls().to_vec();
        if pending.is_empty() {
            return Err(WeftError::Unprocessable(format!(
                "task {}: no pending tool calls",
                task.id
            )));
        }

        let mut messages = history.messages.clone();
        // Results append in the order the model emitted the calls.
        for call in pending {
            let args = parse_call_arguments(&call.arguments);
            let content = match self.hooks.hook_for_tool(&call.name).await {
                Ok(hook) => {
                    let hook_call = HookCall {
                        hook,
                        tool: call.name.clone(),
                        args,
                    };
                    match self
                        .hooks
                        .exec(ctx, Utc::now(), input, false, &hook_call)
                        .await
                    {
                        Ok((value, _)) => value.render(),
                        Err(e) => format!("error: {e}"),
                    }
                }
                Err(e) => format!("error: {e}"),
            };
            messages.push(ChatMessage::tool(call.id.clone(), content));
        }

        Ok(HandlerOutput {
            value: DataValue::ChatHistory(ChatHistory {
                messages,
                model: history.model.clone(),
            }),
            transition: "ok".to_string(),
        })
    }

    async fn run_hook(
        &self,
        ctx: &CancellationToken,
        task: &TaskDefinition,
        input: &DataValue,
    ) -> Result<HandlerOutput, WeftError> {
        let spec = task.hook.as_ref().ok_or_else(|| {
            WeftError::BadInput(format!("task {} has no hook config", task.id))
        })?;
        let tool = match &spec.tool {
            Some(tool) => tool.clone(),
            None => {
                // Single-tool hooks can omit the tool name.
                let tools = self.hooks.tools_for_hook(&spec.name).await?;
                tools
                    .first()
                    .map(|t| t.name.clone())
                    .ok_or_else(|| WeftError::NotFound(format!("hook {} tools", spec.name)))?
            }
        };
        let call = HookCall {
            hook: spec.name.clone(),
            tool,
            args: spec.args.clone(),
        };
        let (value, _) = self.hooks.exec(ctx, Utc::now(), input, false, &call).await?;
        Ok(HandlerOutput::rendered(value))
    }
}

/// Parses a model-emitted JSON argument string into the string map hooks
/// take. Non-string values are rendered compactly.
fn parse_call_arguments(raw: &str) -> HashMap<String, String> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let rendered = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, rendered)
            })
            .collect(),
        _ => HashMap::new(),
    }
}

fn parse_number(text: &str) -> Result<DataValue, WeftError> {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(DataValue::Int(i));
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Ok(DataValue::Float(f));
    }
    let found = NUMBER_RE
        .find(trimmed)
        .ok_or_else(|| WeftError::BadInput(format!("no number in {trimmed:?}")))?;
    let token = found.as_str();
    if let Ok(i) = token.parse::<i64>() {
        Ok(DataValue::Int(i))
    } else {
        token
            .parse::<f64>()
            .map(DataValue::Float)
            .map_err(|_| WeftError::BadInput(format!("no number in {trimmed:?}")))
    }
}

fn parse_range(text: &str) -> Result<DataValue, WeftError> {
    let caps = RANGE_RE
        .captures(text)
        .ok_or_else(|| WeftError::BadInput(format!("no range in {text:?}")))?;
    let low: i64 = caps[1].parse().map_err(|_| {
        WeftError::BadInput(format!("bad range low in {text:?}"))
    })?;
    let high: i64 = caps[2].parse().map_err(|_| {
        WeftError::BadInput(format!("bad range high in {text:?}"))
    })?;
    if low > high {
        return Err(WeftError::BadInput(format!(
            "range low {low} above high {high}"
        )));
    }
    Ok(DataValue::Json(serde_json::json!({ "low": low, "high": high })))
}
