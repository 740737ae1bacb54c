//! Hook registry: named external tools exposed to chains and the sandbox.
//!
//! A [`ToolProvider`] serves one or more hooks; each hook carries a set of
//! tool descriptors discoverable by the model. The registry resolves hook
//! names to providers — [`SimpleRegistry`] in memory, [`PersistentRegistry`]
//! from stored remote-hook configurations with OpenAPI tool discovery.

mod command;
mod openapi;

pub use command::{CommandPolicy, CommandToolProvider, TOOL_RUN_COMMAND};
pub use openapi::{OpenApiToolProvider, PersistentRegistry};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chain::{DataType, DataValue};
use crate::error::WeftError;
use crate::provider::ToolDef;

/// Descriptor of one tool behind a hook.
///
/// Fields are aligned with what chat models consume as a function tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments object.
    pub input_schema: serde_json::Value,
}

impl ToolSpec {
    /// Converts to the provider-layer tool definition for a chat turn.
    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef {
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// One concrete tool invocation: hook, tool, string arguments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookCall {
    pub hook: String,
    pub tool: String,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

/// Serves tools for one or more hooks.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Hook names this provider serves.
    fn supports(&self) -> Vec<String>;

    /// Tool descriptors for one hook.
    async fn tools_for_hook(&self, name: &str) -> Result<Vec<ToolSpec>, WeftError>;

    /// Executes one call. Returns the result value with its data type.
    async fn exec(
        &self,
        ctx: &CancellationToken,
        now: DateTime<Utc>,
        input: &DataValue,
        debug: bool,
        call: &HookCall,
    ) -> Result<(DataValue, DataType), WeftError>;
}

/// Resolves hook names to providers.
#[async_trait]
pub trait HookRegistry: Send + Sync {
    /// All hook names currently resolvable.
    async fn supports(&self) -> Vec<String>;

    /// Provider for one hook, or NotFound.
    async fn provider_for(&self, hook: &str) -> Result<Arc<dyn ToolProvider>, WeftError>;

    async fn tools_for_hook(&self, hook: &str) -> Result<Vec<ToolSpec>, WeftError> {
        self.provider_for(hook).await?.tools_for_hook(hook).await
    }

    async fn exec(
        &self,
        ctx: &CancellationToken,
        now: DateTime<Utc>,
        input: &DataValue,
        debug: bool,
        call: &HookCall,
    ) -> Result<(DataValue, DataType), WeftError> {
        let provider = self.provider_for(&call.hook).await?;
        provider.exec(ctx, now, input, debug, call).await
    }

    /// Finds the hook serving `tool_name`, for tool calls that only carry a
    /// function name.
    async fn hook_for_tool(&self, tool_name: &str) -> Result<String, WeftError> {
        for hook in self.supports().await {
            let tools = self.tools_for_hook(&hook).await?;
            if tools.iter().any(|t| t.name == tool_name) {
                return Ok(hook);
            }
        }
        Err(WeftError::NotFound(format!("tool {tool_name}")))
    }

    /// Human-readable description block for the `{{hookservice:list}}` macro.
    async fn tools_block(&self) -> String {
        let mut out = String::new();
        let mut hooks = self.supports().await;
        hooks.sort();
        for hook in hooks {
            let Ok(tools) = self.tools_for_hook(&hook).await else {
                continue;
            };
            for tool in tools {
                out.push_str(&format!(
                    "- {}/{}: {}\n",
                    hook,
                    tool.name,
                    tool.description.as_deref().unwrap_or("")
                ));
            }
        }
        out
    }

    /// All tool definitions, for handing to a chat model.
    async fn all_tool_defs(&self) -> Vec<ToolDef> {
        let mut defs = Vec::new();
        let mut hooks = self.supports().await;
        hooks.sort();
        for hook in hooks {
            if let Ok(tools) = self.tools_for_hook(&hook).await {
                defs.extend(tools.iter().map(ToolSpec::to_tool_def));
            }
        }
        defs
    }
}

/// In-memory registry: hook name → provider.
#[derive(Default)]
pub struct SimpleRegistry {
    providers: DashMap<String, Arc<dyn ToolProvider>>,
}

impl SimpleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under every hook name it supports. A later
    /// registration for the same hook replaces the earlier one.
    pub fn register(&self, provider: Arc<dyn ToolProvider>) {
        for hook in provider.supports() {
            self.providers.insert(hook, Arc::clone(&provider));
        }
    }
}

#[async_trait]
impl HookRegistry for SimpleRegistry {
    async fn supports(&self) -> Vec<String> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }

    async fn provider_for(&self, hook: &str) -> Result<Arc<dyn ToolProvider>, WeftError> {
        self.providers
            .get(hook)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| WeftError::NotFound(format!("hook {hook}")))
    }
}

/// Handler signature for [`StaticToolProvider`] tools.
pub type StaticToolFn =
    Arc<dyn Fn(&HookCall) -> Result<(DataValue, DataType), WeftError> + Send + Sync>;

/// Provider serving one hook with closure-backed tools. Useful for built-in
/// hooks and tests.
pub struct StaticToolProvider {
    hook: String,
    tools: Vec<(ToolSpec, StaticToolFn)>,
}

impl StaticToolProvider {
    pub fn new(hook: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(
        mut self,
        spec: ToolSpec,
        handler: impl Fn(&HookCall) -> Result<(DataValue, DataType), WeftError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.tools.push((spec, Arc::new(handler)));
        self
    }
}

#[async_trait]
impl ToolProvider for StaticToolProvider {
    fn supports(&self) -> Vec<String> {
        vec![self.hook.clone()]
    }

    async fn tools_for_hook(&self, name: &str) -> Result<Vec<ToolSpec>, WeftError> {
        if name != self.hook {
            return Err(WeftError::NotFound(format!("hook {name}")));
        }
        Ok(self.tools.iter().map(|(spec, _)| spec.clone()).collect())
    }

    async fn exec(
        &self,
        ctx: &CancellationToken,
        _now: DateTime<Utc>,
        _input: &DataValue,
        _debug: bool,
        call: &HookCall,
    ) -> Result<(DataValue, DataType), WeftError> {
        if ctx.is_cancelled() {
            return Err(WeftError::Canceled);
        }
        let handler = self
            .tools
            .iter()
            .find(|(spec, _)| spec.name == call.tool)
            .map(|(_, f)| Arc::clone(f))
            .ok_or_else(|| WeftError::NotFound(format!("tool {}", call.tool)))?;
        handler(call)
    }
}
