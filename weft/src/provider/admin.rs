//! Backend administration: probe reachability, list installed models, pull
//! missing ones.
//!
//! The sync cycle drives these against every declared backend. Two wire
//! flavors are enough in practice: Ollama's native API (which can pull) and
//! the OpenAI-compatible `/v1/models` listing (which cannot).

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::WeftError;

/// What a backend reports about one installed model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstalledModelInfo {
    pub name: String,
    pub digest: String,
    pub size: i64,
}

/// Progress of one model pull, fanned out over the download-progress topic.
#[derive(Clone, Debug, serde::Serialize)]
pub struct DownloadProgress {
    pub backend_url: String,
    pub model: String,
    pub status: String,
    pub total: u64,
    pub completed: u64,
}

/// Callback invoked for each progress update during a pull.
pub type ProgressFn = Box<dyn Fn(DownloadProgress) + Send + Sync>;

/// Admin surface of one backend.
#[async_trait]
pub trait BackendAdmin: Send + Sync {
    /// Cheap reachability check.
    async fn probe(&self, ctx: &CancellationToken) -> Result<(), WeftError>;

    /// Models currently installed on the backend.
    async fn list_models(&self, ctx: &CancellationToken)
        -> Result<Vec<InstalledModelInfo>, WeftError>;

    /// Pulls `model` onto the backend, reporting progress. Cancelling `ctx`
    /// aborts the in-flight pull.
    async fn pull_model(
        &self,
        ctx: &CancellationToken,
        model: &str,
        progress: ProgressFn,
    ) -> Result<(), WeftError>;
}

/// Picks the admin flavor for a backend by its provider-type tag.
pub fn admin_for_backend(
    provider_type: &str,
    base_url: &str,
    api_key: Option<String>,
) -> Box<dyn BackendAdmin> {
    match provider_type {
        "ollama" => Box::new(OllamaAdmin::new(base_url)),
        _ => Box::new(HttpAdmin::new(base_url, api_key)),
    }
}

// ---- OpenAI-compatible listing --------------------------------------------

/// Admin for OpenAI-compatible backends: list via `/v1/models`, no pull.
pub struct HttpAdmin {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl HttpAdmin {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            http: reqwest::Client::new(),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut req = self.http.get(url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }
}

#[async_trait]
impl BackendAdmin for HttpAdmin {
    async fn probe(&self, ctx: &CancellationToken) -> Result<(), WeftError> {
        self.list_models(ctx).await.map(|_| ())
    }

    async fn list_models(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Vec<InstalledModelInfo>, WeftError> {
        let fut = async {
            let resp = self.get("/v1/models").send().await?.error_for_status()?;
            let parsed: ModelsResponse = resp
                .json()
                .await
                .map_err(|e| WeftError::Protocol(e.to_string()))?;
            Ok::<_, WeftError>(
                parsed
                    .data
                    .into_iter()
                    .map(|m| InstalledModelInfo {
                        name: m.id,
                        digest: String::new(),
                        size: 0,
                    })
                    .collect(),
            )
        };
        tokio::select! {
            _ = ctx.cancelled() => Err(WeftError::Canceled),
            out = fut => out,
        }
    }

    async fn pull_model(
        &self,
        _ctx: &CancellationToken,
        model: &str,
        _progress: ProgressFn,
    ) -> Result<(), WeftError> {
        Err(WeftError::CapabilityUnsupported {
            provider: format!("openai-compatible backend {}", self.base_url),
            capability: format!("pull ({model})"),
        })
    }
}

// ---- Ollama native --------------------------------------------------------

/// Admin for Ollama backends: `/api/tags` listing, `/api/pull` with
/// newline-delimited progress.
pub struct OllamaAdmin {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    size: i64,
}

#[derive(Deserialize)]
struct PullLine {
    #[serde(default)]
    status: String,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    completed: u64,
}

impl OllamaAdmin {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl BackendAdmin for OllamaAdmin {
    async fn probe(&self, ctx: &CancellationToken) -> Result<(), WeftError> {
        self.list_models(ctx).await.map(|_| ())
    }

    async fn list_models(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Vec<InstalledModelInfo>, WeftError> {
        let fut = async {
            let resp = self
                .http
                .get(self.url("/api/tags"))
                .send()
                .await?
                .error_for_status()?;
            let parsed: TagsResponse = resp
                .json()
                .await
                .map_err(|e| WeftError::Protocol(e.to_string()))?;
            Ok::<_, WeftError>(
                parsed
                    .models
                    .into_iter()
                    .map(|m| InstalledModelInfo {
                        name: m.name,
                        digest: m.digest,
                        size: m.size,
                    })
                    .collect(),
            )
        };
        tokio::select! {
            _ = ctx.cancelled() => Err(WeftError::Canceled),
            out = fut => out,
        }
    }

    async fn pull_model(
        &self,
        ctx: &CancellationToken,
        model: &str,
        progress: ProgressFn,
    ) -> Result<(), WeftError> {
        use futures_util::StreamExt;

        let resp = self
            .http
            .post(self.url("/api/pull"))
            .json(&serde_json::json!({ "name": model, "stream": true }))
            .send()
            .await?
            .error_for_status()?;

        let mut bytes = resp.bytes_stream();
        let mut buf = String::new();
        loop {
            let next = tokio::select! {
                _ = ctx.cancelled() => return Err(WeftError::Canceled),
                n = bytes.next() => n,
            };
            let chunk = match next {
                Some(Ok(c)) => c,
                Some(Err(e)) => return Err(WeftError::Transport(e.to_string())),
                None => return Ok(()),
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim().to_string();
                buf.drain(..=pos);
                if line.is_empty() {
                    continue;
                }
                let parsed: PullLine = serde_json::from_str(&line)
                    .map_err(|e| WeftError::Protocol(e.to_string()))?;
                progress(DownloadProgress {
                    backend_url: self.base_url.clone(),
                    model: model.to_string(),
                    status: parsed.status,
                    total: parsed.total,
                    completed: parsed.completed,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: provider-type tag selects the admin flavor.
    #[test]
    fn admin_flavor_by_provider_type() {
        // Only checking that construction succeeds for both flavors; wire
        // behavior is covered by the sync-cycle tests with a mock admin.
        let _ = admin_for_backend("ollama", "http://localhost:11434", None);
        let _ = admin_for_backend("vllm", "http://localhost:8000", Some("key".into()));
    }

    /// **Scenario**: pull against an OpenAI-compatible backend is refused.
    #[tokio::test]
    async fn openai_admin_cannot_pull() {
        let admin = HttpAdmin::new("http://localhost:9", None);
        let err = admin
            .pull_model(&CancellationToken::new(), "m", Box::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::CapabilityUnsupported { .. }));
    }
}
