//! Sandbox bridge: the fixed capability set injected into scripted
//! functions.
//!
//! The script interpreter itself is opaque (see [`ScriptExecutor`]); the
//! bridge is what its scripts can reach: logging, event append, one-shot
//! model calls, chain resolution/execution, hook execution, and allow-listed
//! HTTP fetch. Every call is wrapped with a timeout, panic recovery, and
//! activity tracking; failures become `{success: false, error}` values
//! rather than exceptions inside the sandbox.
//!
//! The engine ↔ bridge ↔ hook-registry cycle is broken by [`EngineCell`], a
//! write-once holder set after every party is constructed: readers see
//! either nothing (pre-init) or the final engine.

mod chains;

pub use chains::{ChainStore, InMemoryChains};

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chain_event::Event;
use chrono::Utc;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainContext, ChainEngine, DataValue, ProviderSource};
use crate::error::WeftError;
use crate::events::FunctionExecutor;
use crate::hooks::{HookCall, HookRegistry};
use crate::resolver::{resolve_prompt, ResolveRequest, SelectionPolicy};
use crate::store::SqliteStore;

/// Cap on sandbox re-entry: a chain started from a script that triggers a
/// function that starts a chain again, and so on.
pub const MAX_REENTRY_DEPTH: u32 = 8;
/// Timeout applied to every bridge call.
pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Error string for an unknown hook name, enumerating the valid set.
pub const ERR_INVALID_HOOK_NAME: &str = "INVALID_HOOK_NAME";
/// Error string for an unknown tool within a known hook.
pub const ERR_INVALID_HOOK_TOOL: &str = "INVALID_HOOK_TOOL";

/// Write-once holder for the chain engine (late binding, set on startup).
#[derive(Default)]
pub struct EngineCell {
    cell: OnceCell<Arc<ChainEngine>>,
}

impl EngineCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the engine. Written exactly once; a second write is refused.
    pub fn set(&self, engine: Arc<ChainEngine>) -> Result<(), WeftError> {
        self.cell
            .set(engine)
            .map_err(|_| WeftError::Unprocessable("engine already bound".into()))
    }

    pub fn get(&self) -> Option<Arc<ChainEngine>> {
        self.cell.get().cloned()
    }
}

/// Opaque sandboxed interpreter: runs one scripted function with the bridge
/// injected as its host API.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn run(
        &self,
        bridge: Arc<SandboxBridge>,
        script: &str,
        function_name: &str,
        event: &Event,
    ) -> Result<(), WeftError>;
}

/// One tracked bridge call.
#[derive(Clone, Debug)]
pub struct Activity {
    pub name: String,
    pub duration_ms: u64,
    pub success: bool,
}

/// The capability set handed to scripts. One bridge per function execution.
pub struct SandboxBridge {
    store: SqliteStore,
    chains: Arc<dyn ChainStore>,
    engine: Arc<EngineCell>,
    providers: Arc<dyn ProviderSource>,
    hooks: Arc<dyn HookRegistry>,
    policy: SelectionPolicy,
    fetch_allow_hosts: Vec<String>,
    timeout: Duration,
    depth: u32,
    http: reqwest::Client,
    log: Mutex<Vec<String>>,
    activities: Mutex<Vec<Activity>>,
}

impl SandboxBridge {
    pub fn new(
        store: SqliteStore,
        chains: Arc<dyn ChainStore>,
        engine: Arc<EngineCell>,
        providers: Arc<dyn ProviderSource>,
        hooks: Arc<dyn HookRegistry>,
    ) -> Self {
        Self {
            store,
            chains,
            engine,
            providers,
            hooks,
            policy: SelectionPolicy::Random,
            fetch_allow_hosts: Vec::new(),
            timeout: DEFAULT_BRIDGE_TIMEOUT,
            depth: 0,
            http: reqwest::Client::new(),
            log: Mutex::new(Vec::new()),
            activities: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fetch_allow_hosts(mut self, hosts: Vec<String>) -> Self {
        self.fetch_allow_hosts = hosts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Re-entry depth of the execution this bridge serves.
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Collected `console.log` lines, drained.
    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock().expect("log lock"))
    }

    /// Tracked bridge calls so far.
    pub fn activities(&self) -> Vec<Activity> {
        self.activities.lock().expect("activities lock").clone()
    }

    /// Guard: spawn (panic isolation), race against the timeout, track the
    /// activity, convert failures to `{success: false, error}`.
    async fn guarded<F>(&self, name: &str, fut: F) -> Value
    where
        F: Future<Output = Result<Value, WeftError>> + Send + 'static,
    {
        let started = Instant::now();
        let mut handle = tokio::spawn(fut);
        let result = tokio::select! {
            _ = tokio::time::sleep(self.timeout) => {
                handle.abort();
                Err(WeftError::Timeout(self.timeout))
            }
            joined = &mut handle => match joined {
                Ok(inner) => inner,
                Err(e) if e.is_panic() => Err(WeftError::ChainFailed(format!(
                    "panic in bridge call {name}"
                ))),
                Err(_) => Err(WeftError::Canceled),
            },
        };

        let success = result.is_ok();
        self.activities.lock().expect("activities lock").push(Activity {
            name: name.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            success,
        });
        tracing::debug!(call = name, success, "bridge call finished");

        match result {
            Ok(value) => value,
            Err(e) => json!({ "success": false, "error": e.to_string() }),
        }
    }

    /// `console.log(...)`: append one line to the execution log collector.
    pub fn console_log(&self, parts: &[Value]) {
        let line = parts
            .iter()
            .map(|p| match p {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        self.log.lock().expect("log lock").push(line);
    }

    /// `sendEvent(type, data)`: validate, stamp id + timestamp, append.
    pub async fn send_event(&self, event_type: &str, data: Value) -> Value {
        let store = self.store.clone();
        let event_type = event_type.to_string();
        self.guarded("sendEvent", async move {
            // Marshalability check before the event is built.
            serde_json::to_string(&data).map_err(|e| WeftError::BadInput(e.to_string()))?;
            let id = uuid::Uuid::new_v4().to_string();
            let event = Event {
                id: id.clone(),
                event_type,
                event_source: "function".to_string(),
                aggregate_id: 0,
                aggregate_type: "function".to_string(),
                version: 1,
                data,
                metadata: None,
                created_at: Utc::now(),
            };
            store.append_event(event).await?;
            Ok(json!({ "success": true, "id": id }))
        })
        .await
    }

    /// `executeTask(prompt, modelName, provider)`: one-shot chain-less call.
    pub async fn execute_task(&self, prompt: &str, model_name: &str, provider: &str) -> Value {
        let providers = Arc::clone(&self.providers);
        let policy = self.policy;
        let (prompt, model_name, provider) = (
            prompt.to_string(),
            model_name.to_string(),
            provider.to_string(),
        );
        self.guarded("executeTask", async move {
            let mut request = ResolveRequest::prompt(vec![model_name]);
            if !provider.is_empty() {
                request.provider_types = vec![provider];
            }
            let list = providers.providers();
            let (client, _, _) = resolve_prompt(&list, &request, policy)?;
            let response = client
                .prompt(&CancellationToken::new(), "", 0.0, &prompt)
                .await?;
            Ok(json!({ "success": true, "response": response }))
        })
        .await
    }

    /// `callTaskChain(chainID)`: resolve only — reports success after
    /// resolution; callers wanting execution use `executeTaskChain`.
    pub async fn call_task_chain(&self, chain_id: &str) -> Value {
        let chains = Arc::clone(&self.chains);
        let chain_id = chain_id.to_string();
        self.guarded("callTaskChain", async move {
            let chain = chains.get_chain(&chain_id).await?;
            Ok(json!({
                "success": true,
                "chain_id": chain.id,
                "task_count": chain.tasks.len(),
            }))
        })
        .await
    }

    /// `executeTaskChain(chainID, input)`: resolve and execute; the result is
    /// serialized per its output data type.
    pub async fn execute_task_chain(&self, chain_id: &str, input: Value) -> Value {
        if self.depth >= MAX_REENTRY_DEPTH {
            return json!({
                "success": false,
                "error": format!("sandbox re-entry depth {} exceeded", MAX_REENTRY_DEPTH),
            });
        }
        let chains = Arc::clone(&self.chains);
        let engine_cell = Arc::clone(&self.engine);
        let chain_id = chain_id.to_string();
        let depth = self.depth;
        self.guarded("executeTaskChain", async move {
            let engine = engine_cell
                .get()
                .ok_or_else(|| WeftError::Unprocessable("engine not bound yet".into()))?;
            let chain = chains.get_chain(&chain_id).await?;
            let mut ctx = ChainContext::new();
            ctx.depth = depth + 1;
            let outcome = engine
                .execute(&ctx, &chain, DataValue::from_plain_json(input))
                .await?;
            Ok(json!({
                "success": true,
                "output": outcome.value.to_plain_json(),
                "output_type": outcome.data_type.to_string(),
            }))
        })
        .await
    }

    /// `executeHook(hookName, toolName, args)`: validate both names against
    /// the registry, then call through.
    pub async fn execute_hook(
        &self,
        hook: &str,
        tool: &str,
        args: HashMap<String, String>,
    ) -> Value {
        let hooks = Arc::clone(&self.hooks);
        let (hook, tool) = (hook.to_string(), tool.to_string());
        self.guarded("executeHook", async move {
            let mut supported = hooks.supports().await;
            supported.sort();
            if !supported.iter().any(|h| h == &hook) {
                return Ok(json!({
                    "success": false,
                    "error": format!(
                        "{ERR_INVALID_HOOK_NAME}: hook {hook:?} unknown, valid hooks: {supported:?}"
                    ),
                }));
            }
            let tools: Vec<String> = hooks
                .tools_for_hook(&hook)
                .await?
                .into_iter()
                .map(|t| t.name)
                .collect();
            if !tools.iter().any(|t| t == &tool) {
                return Ok(json!({
                    "success": false,
                    "error": format!(
                        "{ERR_INVALID_HOOK_TOOL}: tool {tool:?} unknown for hook {hook:?}, valid tools: {tools:?}"
                    ),
                }));
            }
            let call = HookCall { hook, tool, args };
            let (value, data_type) = hooks
                .exec(
                    &CancellationToken::new(),
                    Utc::now(),
                    &DataValue::String(String::new()),
                    false,
                    &call,
                )
                .await?;
            Ok(json!({
                "success": true,
                "result": value.to_plain_json(),
                "result_type": data_type.to_string(),
            }))
        })
        .await
    }

    /// `fetch(url, init)`: HTTP with a host allow-list; an empty allow-list
    /// denies everything.
    pub async fn fetch(&self, url: &str, init: Value) -> Value {
        let allow = self.fetch_allow_hosts.clone();
        let http = self.http.clone();
        let url = url.to_string();
        self.guarded("fetch", async move {
            let parsed = url::Url::parse(&url)
                .map_err(|e| WeftError::BadInput(format!("invalid url: {e}")))?;
            let host = parsed.host_str().unwrap_or_default().to_string();
            if !allow.iter().any(|h| h == &host) {
                return Err(WeftError::Unprocessable(format!(
                    "host {host:?} is not allow-listed for fetch"
                )));
            }

            let method = init
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or("GET")
                .to_uppercase();
            let mut request = match method.as_str() {
                "POST" => http.post(parsed.clone()),
                "PUT" => http.put(parsed.clone()),
                "DELETE" => http.delete(parsed.clone()),
                _ => http.get(parsed.clone()),
            };
            if let Some(headers) = init.get("headers").and_then(Value::as_object) {
                for (key, value) in headers {
                    if let Some(v) = value.as_str() {
                        request = request.header(key.as_str(), v);
                    }
                }
            }
            if let Some(body) = init.get("body").and_then(Value::as_str) {
                request = request.body(body.to_string());
            }

            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| WeftError::Transport(e.to_string()))?;
            Ok(json!({ "success": true, "status": status, "body": body }))
        })
        .await
    }
}

/// Glue for the dispatcher: build a fresh bridge per function execution and
/// hand it to the sandbox.
pub struct SandboxFunctionExecutor {
    sandbox: Arc<dyn ScriptExecutor>,
    bridge_factory: Arc<dyn Fn() -> Arc<SandboxBridge> + Send + Sync>,
}

impl SandboxFunctionExecutor {
    pub fn new(
        sandbox: Arc<dyn ScriptExecutor>,
        bridge_factory: Arc<dyn Fn() -> Arc<SandboxBridge> + Send + Sync>,
    ) -> Self {
        Self {
            sandbox,
            bridge_factory,
        }
    }
}

#[async_trait]
impl FunctionExecutor for SandboxFunctionExecutor {
    async fn exec(
        &self,
        script: &str,
        function_name: &str,
        event: &Event,
    ) -> Result<(), WeftError> {
        let bridge = (self.bridge_factory)();
        self.sandbox.run(bridge, script, function_name, event).await
    }
}
