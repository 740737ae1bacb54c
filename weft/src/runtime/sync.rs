//! Backend sync cycle: reconcile declared models against installed ones.
//!
//! For each declared backend the cycle probes the installed model list. On
//! success it updates the runtime state and clears the error, then enqueues a
//! download job for every declared-but-missing model (group constraints
//! applied by the store query). On failure it records the error string and
//! leaves the installed list untouched. One backend failing never aborts the
//! cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitBreaker;
use crate::bus::{PubSub, TOPIC_TRIGGER_CYCLE};
use crate::error::WeftError;
use crate::provider::{admin_for_backend, BackendAdmin};
use crate::resolver::names_match;
use crate::runtime::state::{InstalledModel, RuntimeState};
use crate::store::{Backend, DownloadJob, SqliteStore};

/// Breaker key for the backend sync loop.
pub const BREAKER_BACKEND_CYCLE: &str = "backendCycle";

/// Creates the admin client for one backend. Swappable for tests.
pub trait AdminFactory: Send + Sync {
    fn admin_for(&self, backend: &Backend, api_key: Option<String>) -> Box<dyn BackendAdmin>;
}

/// Production factory: picks the wire flavor from the provider-type tag.
pub struct DefaultAdminFactory;

impl AdminFactory for DefaultAdminFactory {
    fn admin_for(&self, backend: &Backend, api_key: Option<String>) -> Box<dyn BackendAdmin> {
        admin_for_backend(&backend.provider_type, &backend.base_url, api_key)
    }
}

/// The single writer of [`RuntimeState`].
pub struct SyncCycle {
    store: SqliteStore,
    state: Arc<RuntimeState>,
    factory: Arc<dyn AdminFactory>,
    bus: Arc<PubSub>,
}

impl SyncCycle {
    pub fn new(
        store: SqliteStore,
        state: Arc<RuntimeState>,
        factory: Arc<dyn AdminFactory>,
        bus: Arc<PubSub>,
    ) -> Self {
        Self {
            store,
            state,
            factory,
            bus,
        }
    }

    /// One reconciliation pass over every declared backend.
    pub async fn run_once(&self, ctx: &CancellationToken) -> Result<(), WeftError> {
        let backends = self.store.list_backends().await?;
        let ids: Vec<String> = backends.iter().map(|b| b.id.clone()).collect();
        self.state.retain_backends(&ids);

        for backend in backends {
            if ctx.is_cancelled() {
                return Err(WeftError::Canceled);
            }
            self.sync_backend(ctx, backend).await?;
        }
        Ok(())
    }

    async fn sync_backend(
        &self,
        ctx: &CancellationToken,
        backend: Backend,
    ) -> Result<(), WeftError> {
        let declared = self.store.models_for_backend(&backend.id).await?;
        let api_key = match &backend.credentials_ref {
            Some(key) => self.store.kv_get(key).await?,
            None => None,
        };
        let admin = self.factory.admin_for(&backend, api_key);

        match admin.list_models(ctx).await {
            Ok(infos) => {
                let installed: Vec<InstalledModel> = infos
                    .iter()
                    .filter_map(|info| {
                        declared
                            .iter()
                            .find(|d| names_match(&d.model, &info.name))
                            .map(|d| {
                                InstalledModel::from_declaration(
                                    info.name.clone(),
                                    info.digest.clone(),
                                    info.size,
                                    d,
                                )
                            })
                    })
                    .collect();

                for decl in &declared {
                    let present = infos.iter().any(|i| names_match(&decl.model, &i.name));
                    if !present {
                        tracing::debug!(
                            backend = %backend.id,
                            model = %decl.model,
                            "declared model missing, enqueueing download"
                        );
                        self.store
                            .enqueue_download(DownloadJob {
                                backend_url: backend.base_url.clone(),
                                model: decl.model.clone(),
                            })
                            .await?;
                    }
                }

                self.state.set_healthy(backend, installed);
            }
            Err(e) => {
                tracing::warn!(backend = %backend.id, error = %e, "backend probe failed");
                self.state.set_error(backend, e.to_string());
            }
        }
        Ok(())
    }

    /// Runs the cycle under `breaker` until cancellation: immediately, then
    /// on each interval tick or `trigger_cycle` signal.
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
                |e| tracing::warn!(error = %e, "backend sync cycle failed"),
            )
            .await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::provider::{DownloadProgress, InstalledModelInfo, ProgressFn};

    use super::*;

    /// Scripted admin: per-URL installed lists or failures, recorded pulls.
    #[derive(Default)]
    pub struct MockAdmins {
        pub installed: Mutex<HashMap<String, Result<Vec<InstalledModelInfo>, String>>>,
        pub pulled: Mutex<Vec<(String, String)>>,
    }

    impl MockAdmins {
        pub fn set_installed(&self, url: &str, models: Vec<&str>) {
            self.installed.lock().unwrap().insert(
                url.to_string(),
                Ok(models
                    .into_iter()
                    .map(|m| InstalledModelInfo {
                        name: m.to_string(),
                        digest: String::new(),
                        size: 0,
                    })
                    .collect()),
            );
        }

        pub fn set_failure(&self, url: &str, error: &str) {
            self.installed
                .lock()
                .unwrap()
                .insert(url.to_string(), Err(error.to_string()));
        }
    }

    pub struct MockAdminFactory(pub Arc<MockAdmins>);

    struct MockAdmin {
        url: String,
        shared: Arc<MockAdmins>,
    }

    #[async_trait]
    impl BackendAdmin for MockAdmin {
        async fn probe(&self, _ctx: &CancellationToken) -> Result<(), WeftError> {
            Ok(())
        }

        async fn list_models(
            &self,
            _ctx: &CancellationToken,
        ) -> Result<Vec<InstalledModelInfo>, WeftError> {
            match self.shared.installed.lock().unwrap().get(&self.url) {
                Some(Ok(models)) => Ok(models.clone()),
                Some(Err(e)) => Err(WeftError::Transport(e.clone())),
                None => Ok(Vec::new()),
            }
        }

        async fn pull_model(
            &self,
            ctx: &CancellationToken,
            model: &str,
            progress: ProgressFn,
        ) -> Result<(), WeftError> {
            if ctx.is_cancelled() {
                return Err(WeftError::Canceled);
            }
            progress(DownloadProgress {
                backend_url: self.url.clone(),
                model: model.to_string(),
                status: "downloading".into(),
                total: 100,
                completed: 100,
            });
            self.shared
                .pulled
                .lock()
                .unwrap()
                .push((self.url.clone(), model.to_string()));
            self.shared.set_installed(
                &self.url,
                vec![model], // after a pull the model shows as installed
            );
            Ok(())
        }
    }

    impl AdminFactory for MockAdminFactory {
        fn admin_for(&self, backend: &Backend, _api_key: Option<String>) -> Box<dyn BackendAdmin> {
            Box::new(MockAdmin {
                url: backend.base_url.clone(),
                shared: Arc::clone(&self.0),
            })
        }
    }
}
