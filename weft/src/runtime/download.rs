//! Download cycle: drain the persistent queue one pull at a time.
//!
//! Each pass pops at most one job, runs the provider-specific pull with a
//! progress callback fanned out over the download-progress topic, and lets
//! the breaker record the outcome. Because the queue key is the backend URL,
//! at most one pull runs against any backend at a time — the popped job is
//! the only one for its URL and this cycle runs pulls sequentially.
//!
//! Cancellation targets the in-flight pull by backend URL or model name;
//! queued jobs stay queued unless removed through the store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitBreaker;
use crate::bus::{PubSub, TOPIC_DOWNLOAD_PROGRESS, TOPIC_TRIGGER_CYCLE};
use crate::error::WeftError;
use crate::store::SqliteStore;

use super::sync::AdminFactory;

/// Breaker key for the download loop.
pub const BREAKER_DOWNLOAD_CYCLE: &str = "downloadCycle";

struct InFlight {
    backend_url: String,
    model: String,
    token: CancellationToken,
}

/// Consumes the download queue.
pub struct DownloadCycle {
    store: SqliteStore,
    factory: Arc<dyn AdminFactory>,
    bus: Arc<PubSub>,
    current: Mutex<Option<InFlight>>,
}

impl DownloadCycle {
    pub fn new(store: SqliteStore, factory: Arc<dyn AdminFactory>, bus: Arc<PubSub>) -> Self {
        Self {
            store,
            factory,
            bus,
            current: Mutex::new(None),
        }
    }

    /// Pops and runs at most one job. An empty queue is a successful pass.
    pub async fn run_once(&self, ctx: &CancellationToken) -> Result<(), WeftError> {
        let Some(job) = self.store.pop_download().await? else {
            return Ok(());
        };

        let backend = self
            .store
            .list_backends()
            .await?
            .into_iter()
            .find(|b| b.base_url == job.backend_url);
        let Some(backend) = backend else {
            // Backend was removed after the job was enqueued; drop the job.
            tracing::debug!(url = %job.backend_url, "dropping job for unknown backend");
            return Ok(());
        };

        let api_key = match &backend.credentials_ref {
            Some(key) => self.store.kv_get(key).await?,
            None => None,
        };
        let admin = self.factory.admin_for(&backend, api_key);

        let pull_token = ctx.child_token();
        {
            let mut current = self.current.lock().expect("download lock");
            *current = Some(InFlight {
                backend_url: job.backend_url.clone(),
                model: job.model.clone(),
                token: pull_token.clone(),
            });
        }

        let bus = Arc::clone(&self.bus);
        let progress = Box::new(move |p: crate::provider::DownloadProgress| {
            if let Ok(value) = serde_json::to_value(&p) {
                bus.publish(TOPIC_DOWNLOAD_PROGRESS, value);
            }
        });

        let result = admin.pull_model(&pull_token, &job.model, progress).await;

        self.current.lock().expect("download lock").take();

        match &result {
            Ok(()) => {
                tracing::info!(url = %job.backend_url, model = %job.model, "model pull complete");
                // Wake the sync cycle so the new model shows up promptly.
                self.bus.signal(TOPIC_TRIGGER_CYCLE);
            }
            Err(e) => {
                tracing::warn!(url = %job.backend_url, model = %job.model, error = %e, "model pull failed");
            }
        }
        result
    }

    /// Cancels the in-flight pull when `target` matches its backend URL or
    /// its model name. Returns whether anything was cancelled.
    pub fn cancel_in_flight(&self, target: &str) -> bool {
        let current = self.current.lock().expect("download lock");
        match current.as_ref() {
            Some(inflight) if inflight.backend_url == target || inflight.model == target => {
                inflight.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Runs the cycle under `breaker` until cancellation.
    pub async fn run(
        self: Arc<Self>,
        ctx: CancellationToken,
        breaker: Arc<CircuitBreaker>,
        interval: Duration,
    ) {
        let trigger = self.bus.subscribe(TOPIC_TRIGGER_CYCLE);
        let cycle = Arc::clone(&self);
        breaker
            .run_loop(
                ctx,
                interval,
                Some(trigger),
                move |token| {
                    let cycle = Arc::clone(&cycle);
                    async move { cycle.run_once(&token).await }
                },
                |e| tracing::warn!(error = %e, "download cycle failed"),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sync::test_support::{MockAdminFactory, MockAdmins};
    use crate::store::test_support::temp_store;
    use crate::store::{Backend, DownloadJob};

    fn backend(id: &str, url: &str) -> Backend {
        Backend {
            id: id.into(),
            name: id.into(),
            base_url: url.into(),
            provider_type: "ollama".into(),
            credentials_ref: None,
        }
    }

    async fn fixture() -> (Arc<DownloadCycle>, SqliteStore, Arc<MockAdmins>, Arc<PubSub>, tempfile::TempDir)
    {
        let (store, dir) = temp_store();
        let admins = Arc::new(MockAdmins::default());
        let bus = Arc::new(PubSub::new());
        let cycle = Arc::new(DownloadCycle::new(
            store.clone(),
            Arc::new(MockAdminFactory(Arc::clone(&admins))),
            Arc::clone(&bus),
        ));
        (cycle, store, admins, bus, dir)
    }

    /// **Scenario**: one pass pulls exactly one job and publishes progress.
    #[tokio::test]
    async fn pulls_one_job_with_progress() {
        let (cycle, store, admins, bus, _dir) = fixture().await;
        store.upsert_backend(backend("b1", "http://a")).await.unwrap();
        store
            .enqueue_download(DownloadJob {
                backend_url: "http://a".into(),
                model: "llama2".into(),
            })
            .await
            .unwrap();

        let mut progress = bus.subscribe(TOPIC_DOWNLOAD_PROGRESS);
        cycle.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            admins.pulled.lock().unwrap().as_slice(),
            &[("http://a".to_string(), "llama2".to_string())]
        );
        let update = progress.recv().await.unwrap();
        assert_eq!(update["model"], "llama2");
        assert!(store.list_downloads().await.unwrap().is_empty());
    }

    /// **Scenario**: empty queue is a successful no-op pass.
    #[tokio::test]
    async fn empty_queue_is_ok() {
        let (cycle, _store, admins, _bus, _dir) = fixture().await;
        cycle.run_once(&CancellationToken::new()).await.unwrap();
        assert!(admins.pulled.lock().unwrap().is_empty());
    }

    /// **Scenario**: cancel matches by URL or model name, only while in flight.
    #[tokio::test]
    async fn cancel_matches_url_or_model() {
        let (cycle, _store, _admins, _bus, _dir) = fixture().await;
        assert!(!cycle.cancel_in_flight("http://a"));

        {
            let mut current = cycle.current.lock().unwrap();
            *current = Some(InFlight {
                backend_url: "http://a".into(),
                model: "llama2".into(),
                token: CancellationToken::new(),
            });
        }
        assert!(cycle.cancel_in_flight("llama2"));
        assert!(cycle.cancel_in_flight("http://a"));
        assert!(!cycle.cancel_in_flight("mistral"));
    }

    /// **Scenario**: a job whose backend disappeared is dropped silently.
    #[tokio::test]
    async fn unknown_backend_drops_job() {
        let (cycle, store, admins, _bus, _dir) = fixture().await;
        store
            .enqueue_download(DownloadJob {
                backend_url: "http://gone".into(),
                model: "llama2".into(),
            })
            .await
            .unwrap();
        cycle.run_once(&CancellationToken::new()).await.unwrap();
        assert!(admins.pulled.lock().unwrap().is_empty());
        assert!(store.list_downloads().await.unwrap().is_empty());
    }
}
