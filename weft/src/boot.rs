//! Composition root: build a wired runtime from typed settings.
//!
//! Opens the store, creates the runtime state and bus, binds the chain
//! engine into its write-once holder, and exposes helpers to spawn the
//! breaker-guarded cycles and to mint per-execution sandbox bridges and the
//! event dispatcher. An embedding server composes once at startup and keeps
//! the [`WeftRuntime`] for the process lifetime.

use std::sync::Arc;

use env_config::RuntimeSettings;
use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitBreaker;
use crate::bridge::{ChainStore, EngineCell, SandboxBridge};
use crate::bus::PubSub;
use crate::chain::{ChainEngine, TaskRunner};
use crate::error::WeftError;
use crate::events::{ErrorCallback, EventDispatcher, FunctionExecutor};
use crate::hooks::HookRegistry;
use crate::resolver::SelectionPolicy;
use crate::runtime::{
    DefaultAdminFactory, DownloadCycle, RuntimeState, SyncCycle, BREAKER_BACKEND_CYCLE,
    BREAKER_DOWNLOAD_CYCLE,
};
use crate::store::SqliteStore;

/// The wired core: one per process.
pub struct WeftRuntime {
    pub settings: RuntimeSettings,
    pub store: SqliteStore,
    pub state: Arc<RuntimeState>,
    pub bus: Arc<PubSub>,
    pub hooks: Arc<dyn HookRegistry>,
    pub engine: Arc<ChainEngine>,
    pub engine_cell: Arc<EngineCell>,
    sync: Arc<SyncCycle>,
    download: Arc<DownloadCycle>,
}

impl WeftRuntime {
    /// Composes the runtime from settings and a hook registry. The engine is
    /// built last and bound into the holder exactly once.
    pub fn from_settings(
        settings: RuntimeSettings,
        hooks: Arc<dyn HookRegistry>,
    ) -> Result<Self, WeftError> {
        let store = SqliteStore::open(&settings.database_path)?;
        let state = Arc::new(RuntimeState::new());
        let bus = Arc::new(PubSub::new());

        let sync = Arc::new(SyncCycle::new(
            store.clone(),
            Arc::clone(&state),
            Arc::new(DefaultAdminFactory),
            Arc::clone(&bus),
        ));
        let download = Arc::new(DownloadCycle::new(
            store.clone(),
            Arc::new(DefaultAdminFactory),
            Arc::clone(&bus),
        ));

        let engine = Arc::new(ChainEngine::new(TaskRunner::new(
            Arc::clone(&state) as Arc<dyn crate::chain::ProviderSource>,
            Arc::clone(&hooks),
            SelectionPolicy::Random,
        )));
        let engine_cell = Arc::new(EngineCell::new());
        engine_cell.set(Arc::clone(&engine))?;

        Ok(Self {
            settings,
            store,
            state,
            bus,
            hooks,
            engine,
            engine_cell,
            sync,
            download,
        })
    }

    /// Loads `.env` / `config.toml`, reads settings, and composes.
    pub fn from_env(hooks: Arc<dyn HookRegistry>) -> Result<Self, WeftError> {
        env_config::load_and_apply("weft", None)
            .map_err(|e| WeftError::BadInput(e.to_string()))?;
        let settings = RuntimeSettings::from_env()
            .map_err(|e| WeftError::BadInput(e.to_string()))?;
        Self::from_settings(settings, hooks)
    }

    /// Spawns both reconciliation cycles under their breakers. The returned
    /// handles finish when `ctx` is cancelled.
    pub fn spawn_cycles(&self, ctx: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let sync_breaker = Arc::new(CircuitBreaker::new(
            BREAKER_BACKEND_CYCLE,
            self.settings.breaker_failure_threshold,
            self.settings.breaker_reset_timeout,
        ));
        let download_breaker = Arc::new(CircuitBreaker::new(
            BREAKER_DOWNLOAD_CYCLE,
            self.settings.breaker_failure_threshold,
            self.settings.breaker_reset_timeout,
        ));
        vec![
            tokio::spawn(Arc::clone(&self.sync).run(
                ctx.clone(),
                sync_breaker,
                self.settings.sync_interval,
            )),
            tokio::spawn(Arc::clone(&self.download).run(
                ctx,
                download_breaker,
                self.settings.download_interval,
            )),
        ]
    }

    /// Cancels the in-flight model pull matching a backend URL or model name.
    pub fn cancel_download(&self, target: &str) -> bool {
        self.download.cancel_in_flight(target)
    }

    /// Mints a sandbox bridge for one function execution at the given
    /// re-entry depth.
    pub fn bridge(&self, chains: Arc<dyn ChainStore>, depth: u32) -> SandboxBridge {
        SandboxBridge::new(
            self.store.clone(),
            chains,
            Arc::clone(&self.engine_cell),
            Arc::clone(&self.state) as Arc<dyn crate::chain::ProviderSource>,
            Arc::clone(&self.hooks),
        )
        .with_fetch_allow_hosts(self.settings.fetch_allow_hosts.clone())
        .with_timeout(self.settings.sandbox_timeout)
        .with_depth(depth)
    }

    /// Builds the event dispatcher over this runtime's store.
    pub fn dispatcher(
        &self,
        executor: Arc<dyn FunctionExecutor>,
        on_error: ErrorCallback,
    ) -> EventDispatcher {
        EventDispatcher::new(
            self.store.clone(),
            executor,
            on_error,
            self.settings.event_refresh_interval,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::SimpleRegistry;

    /// **Scenario**: composition wires the engine into its holder exactly
    /// once and opens the store at the configured path.
    #[tokio::test]
    async fn compose_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = RuntimeSettings {
            database_path: dir
                .path()
                .join("weft.db")
                .to_string_lossy()
                .into_owned(),
            ..RuntimeSettings::default()
        };
        let runtime =
            WeftRuntime::from_settings(settings, Arc::new(SimpleRegistry::new())).unwrap();

        assert!(runtime.engine_cell.get().is_some());
        assert!(runtime
            .engine_cell
            .set(Arc::clone(&runtime.engine))
            .is_err());
        // The store is usable.
        runtime.store.kv_set("probe", "ok").await.unwrap();
        assert_eq!(
            runtime.store.kv_get("probe").await.unwrap().as_deref(),
            Some("ok")
        );
    }

    /// **Scenario**: spawned cycles exit on cancellation.
    #[tokio::test]
    async fn cycles_exit_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let settings = RuntimeSettings {
            database_path: dir
                .path()
                .join("weft.db")
                .to_string_lossy()
                .into_owned(),
            ..RuntimeSettings::default()
        };
        let runtime =
            WeftRuntime::from_settings(settings, Arc::new(SimpleRegistry::new())).unwrap();
        let ctx = CancellationToken::new();
        let handles = runtime.spawn_cycles(ctx.clone());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        ctx.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
