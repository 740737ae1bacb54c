//! Remote hooks with automatic tool discovery from an OpenAPI document.
//!
//! A stored [`RemoteHookConfig`] names a base URL; the provider fetches the
//! service's OpenAPI JSON once, turns every operation with an `operationId`
//! into a tool descriptor, and executes calls as HTTP requests against the
//! operation's path. The [`PersistentRegistry`] resolves hooks from the
//! store and caches discovered providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::chain::{DataType, DataValue};
use crate::error::WeftError;
use crate::store::{RemoteHookConfig, SqliteStore};

use super::{HookCall, HookRegistry, ToolProvider, ToolSpec};

#[derive(Clone, Debug)]
struct Operation {
    method: String,
    path: String,
}

/// One remote hook with OpenAPI-discovered tools.
pub struct OpenApiToolProvider {
    config: RemoteHookConfig,
    http: reqwest::Client,
    discovered: RwLock<Option<(Vec<ToolSpec>, HashMap<String, Operation>)>>,
}

impl OpenApiToolProvider {
    pub fn new(config: RemoteHookConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            discovered: RwLock::new(None),
        }
    }

    fn openapi_url(&self) -> String {
        self.config.openapi_url.clone().unwrap_or_else(|| {
            format!("{}/openapi.json", self.config.base_url.trim_end_matches('/'))
        })
    }

    async fn ensure_discovered(
        &self,
    ) -> Result<(Vec<ToolSpec>, HashMap<String, Operation>), WeftError> {
        if let Some(found) = self.discovered.read().await.as_ref() {
            return Ok(found.clone());
        }
        let doc: Value = self
            .http
            .get(self.openapi_url())
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| WeftError::Protocol(e.to_string()))?;

        let parsed = parse_openapi(&doc)?;
        *self.discovered.write().await = Some(parsed.clone());
        Ok(parsed)
    }

    fn request_for(
        &self,
        op: &Operation,
        args: &HashMap<String, String>,
    ) -> reqwest::RequestBuilder {
        // Path templates like /cities/{name} are filled from args.
        let mut path = op.path.clone();
        for (key, value) in args {
            path = path.replace(&format!("{{{key}}}"), value);
        }
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let mut req = match op.method.as_str() {
            "get" => self.http.get(&url).query(
                &args
                    .iter()
                    .filter(|(k, _)| !op.path.contains(&format!("{{{}}}", k)))
                    .collect::<Vec<_>>(),
            ),
            "put" => self.http.put(&url).json(args),
            "delete" => self.http.delete(&url).json(args),
            _ => self.http.post(&url).json(args),
        };
        for (key, value) in &self.config.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        req.timeout(Duration::from_secs(self.config.timeout_secs))
    }
}

/// Extracts (tool specs, operation index) from an OpenAPI document.
fn parse_openapi(doc: &Value) -> Result<(Vec<ToolSpec>, HashMap<String, Operation>), WeftError> {
    let paths = doc
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| WeftError::Protocol("openapi document has no paths".into()))?;

    let mut specs = Vec::new();
    let mut ops = HashMap::new();
    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };
        for (method, op) in item {
            let Some(op_id) = op.get("operationId").and_then(Value::as_str) else {
                continue;
            };
            let description = op
                .get("summary")
                .or_else(|| op.get("description"))
                .and_then(Value::as_str)
                .map(str::to_string);
            // Parameter schema: query/path parameters flattened into one
            // object schema; request bodies are passed through when present.
            let schema = op
                .pointer("/requestBody/content/application~1json/schema")
                .cloned()
                .unwrap_or_else(|| parameters_schema(op));
            specs.push(ToolSpec {
                name: op_id.to_string(),
                description,
                input_schema: schema,
            });
            ops.insert(
                op_id.to_string(),
                Operation {
                    method: method.to_lowercase(),
                    path: path.clone(),
                },
            );
        }
    }
    Ok((specs, ops))
}

fn parameters_schema(op: &Value) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    if let Some(params) = op.get("parameters").and_then(Value::as_array) {
        for p in params {
            let Some(name) = p.get("name").and_then(Value::as_str) else {
                continue;
            };
            properties.insert(
                name.to_string(),
                p.get("schema")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({"type": "string"})),
            );
            if p.get("required").and_then(Value::as_bool).unwrap_or(false) {
                required.push(Value::String(name.to_string()));
            }
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

#[async_trait]
impl ToolProvider for OpenApiToolProvider {
    fn supports(&self) -> Vec<String> {
        vec![self.config.name.clone()]
    }

    async fn tools_for_hook(&self, name: &str) -> Result<Vec<ToolSpec>, WeftError> {
        if name != self.config.name {
            return Err(WeftError::NotFound(format!("hook {name}")));
        }
        Ok(self.ensure_discovered().await?.0)
    }

    async fn exec(
        &self,
        ctx: &CancellationToken,
        _now: DateTime<Utc>,
        _input: &DataValue,
        debug: bool,
        call: &HookCall,
    ) -> Result<(DataValue, DataType), WeftError> {
        let (_, ops) = self.ensure_discovered().await?;
        let op = ops
            .get(&call.tool)
            .ok_or_else(|| WeftError::NotFound(format!("tool {}", call.tool)))?;

        if debug {
            tracing::debug!(hook = %self.config.name, tool = %call.tool, method = %op.method, "remote hook call");
        }

        let fut = async {
            let resp = self.request_for(op, &call.args).send().await?;
            let status = resp.status();
            let body = resp.text().await.map_err(|e| WeftError::Transport(e.to_string()))?;
            if !status.is_success() {
                return Err(WeftError::Transport(format!(
                    "remote hook answered {status}: {body}"
                )));
            }
            Ok::<_, WeftError>(body)
        };
        let body = tokio::select! {
            _ = ctx.cancelled() => return Err(WeftError::Canceled),
            out = fut => out?,
        };

        match serde_json::from_str::<Value>(&body) {
            Ok(json) => Ok((DataValue::Json(json), DataType::Json)),
            Err(_) => Ok((DataValue::String(body), DataType::String)),
        }
    }
}

/// Registry backed by stored remote-hook configurations.
pub struct PersistentRegistry {
    store: SqliteStore,
    cache: DashMap<String, Arc<OpenApiToolProvider>>,
}

impl PersistentRegistry {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Drops a cached provider, forcing re-discovery on next use.
    pub fn invalidate(&self, hook: &str) {
        self.cache.remove(hook);
    }
}

#[async_trait]
impl HookRegistry for PersistentRegistry {
    async fn supports(&self) -> Vec<String> {
        match self.store.list_remote_hooks().await {
            Ok(configs) => configs.into_iter().map(|c| c.name).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "listing remote hooks failed");
                Vec::new()
            }
        }
    }

    async fn provider_for(&self, hook: &str) -> Result<Arc<dyn ToolProvider>, WeftError> {
        if let Some(cached) = self.cache.get(hook) {
            return Ok(Arc::clone(cached.value()) as Arc<dyn ToolProvider>);
        }
        let config = self.store.get_remote_hook(hook).await?;
        let provider = Arc::new(OpenApiToolProvider::new(config));
        self.cache.insert(hook.to_string(), Arc::clone(&provider));
        Ok(provider as Arc<dyn ToolProvider>)
    }
}
