//! Event dispatcher: match events to triggers, run the target functions.
//!
//! Two atomic-snapshot caches are kept: function-name → function and
//! event-type → triggers (deduplicated by function name). Both refresh from
//! storage on a fixed interval or on the initial-sync flag. Refreshes are
//! guarded by compare-and-swap flags: the caller that wins the flag pays the
//! I/O, concurrent callers keep reading the previous snapshot instead of
//! serializing behind it. Executor errors go to the injected error callback
//! and never propagate into the event pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chain_event::Event;

use crate::error::WeftError;
use crate::store::{Function, SqliteStore, Trigger};

/// Receives every executor error; the pipeline itself never fails.
pub type ErrorCallback = Arc<dyn Fn(&WeftError) + Send + Sync>;

/// Runs one scripted function against one event. The concrete interpreter is
/// opaque to the core; see the sandbox bridge for what scripts can reach.
#[async_trait]
pub trait FunctionExecutor: Send + Sync {
    async fn exec(
        &self,
        script: &str,
        function_name: &str,
        event: &Event,
    ) -> Result<(), WeftError>;
}

type FunctionMap = HashMap<String, Function>;
type TriggerMap = HashMap<String, Vec<Trigger>>;

/// The dispatcher. Shareable behind an `Arc`; `handle_events` may be called
/// concurrently.
pub struct EventDispatcher {
    store: SqliteStore,
    executor: Arc<dyn FunctionExecutor>,
    on_error: ErrorCallback,
    refresh_interval: Duration,

    functions: RwLock<Arc<FunctionMap>>,
    triggers: RwLock<Arc<TriggerMap>>,
    refreshing_functions: AtomicBool,
    refreshing_triggers: AtomicBool,
    initially_synced: AtomicBool,
    last_refresh: Mutex<Option<Instant>>,
}

impl EventDispatcher {
    pub fn new(
        store: SqliteStore,
        executor: Arc<dyn FunctionExecutor>,
        on_error: ErrorCallback,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            on_error,
            refresh_interval,
            functions: RwLock::new(Arc::new(HashMap::new())),
            triggers: RwLock::new(Arc::new(HashMap::new())),
            refreshing_functions: AtomicBool::new(false),
            refreshing_triggers: AtomicBool::new(false),
            initially_synced: AtomicBool::new(false),
            last_refresh: Mutex::new(None),
        }
    }

    fn snapshot_functions(&self) -> Arc<FunctionMap> {
        Arc::clone(&self.functions.read().expect("functions lock"))
    }

    fn snapshot_triggers(&self) -> Arc<TriggerMap> {
        Arc::clone(&self.triggers.read().expect("triggers lock"))
    }

    fn refresh_due(&self) -> bool {
        let last = self.last_refresh.lock().expect("refresh lock");
        match *last {
            Some(at) => at.elapsed() >= self.refresh_interval,
            None => true,
        }
    }

    async fn refresh_functions(&self) -> Result<(), WeftError> {
        let list = self.store.list_functions().await?;
        let map: FunctionMap = list.into_iter().map(|f| (f.name.clone(), f)).collect();
        *self.functions.write().expect("functions lock") = Arc::new(map);
        Ok(())
    }

    async fn refresh_triggers(&self) -> Result<(), WeftError> {
        let list = self.store.list_triggers().await?;
        let mut map: TriggerMap = HashMap::new();
        for trigger in list {
            let entry = map.entry(trigger.listen_type.clone()).or_default();
            // Dedup by function name, first registration wins.
            if !entry.iter().any(|t| t.function_name == trigger.function_name) {
                entry.push(trigger);
            }
        }
        *self.triggers.write().expect("triggers lock") = Arc::new(map);
        Ok(())
    }

    /// Refreshes stale caches. The initial sync is paid inline so the first
    /// dispatch sees storage; afterwards only the CAS winner refreshes and
    /// everyone else reads the previous snapshot.
    async fn maybe_refresh(&self) {
        let initial = !self.initially_synced.load(Ordering::Acquire);
        if !initial && !self.refresh_due() {
            return;
        }

        // Losing a flag means another caller is already refreshing; fall
        // through with the previous (possibly empty) snapshot.
        if self
            .refreshing_functions
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Err(e) = self.refresh_functions().await {
                tracing::warn!(error = %e, "function cache refresh failed");
            }
            self.refreshing_functions.store(false, Ordering::Release);
        }

        if self
            .refreshing_triggers
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Err(e) = self.refresh_triggers().await {
                tracing::warn!(error = %e, "trigger cache refresh failed");
            }
            self.refreshing_triggers.store(false, Ordering::Release);
        }

        self.initially_synced.store(true, Ordering::Release);
        *self.last_refresh.lock().expect("refresh lock") = Some(Instant::now());
    }

    /// Forces the next `handle_events` to refresh from storage.
    pub fn invalidate(&self) {
        self.initially_synced.store(false, Ordering::Release);
    }

    /// Dispatches events to every matching trigger's function. Lookup misses
    /// (unknown event type, orphaned trigger) skip silently; executor errors
    /// go to the error callback.
    pub async fn handle_events(&self, events: &[Event]) {
        self.maybe_refresh().await;
        let functions = self.snapshot_functions();
        let triggers = self.snapshot_triggers();

        for event in events {
            let Some(matched) = triggers.get(&event.event_type) else {
                continue;
            };
            for trigger in matched {
                let Some(function) = functions.get(&trigger.function_name) else {
                    continue; // orphaned trigger: skip silently
                };
                if let Err(e) = self
                    .executor
                    .exec(&function.script, &function.name, event)
                    .await
                {
                    tracing::debug!(
                        function = %function.name,
                        event = %event.id,
                        error = %e,
                        "function execution failed"
                    );
                    (self.on_error)(&e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::store::test_support::temp_store;

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl FunctionExecutor for RecordingExecutor {
        async fn exec(
            &self,
            _script: &str,
            function_name: &str,
            event: &Event,
        ) -> Result<(), WeftError> {
            self.calls
                .lock()
                .unwrap()
                .push((function_name.to_string(), event.id.clone()));
            if self.fail {
                Err(WeftError::ChainFailed("script blew up".into()))
            } else {
                Ok(())
            }
        }
    }

    fn event(id: &str, event_type: &str) -> Event {
        Event {
            id: id.into(),
            event_type: event_type.into(),
            event_source: "test".into(),
            aggregate_id: 1,
            aggregate_type: "session".into(),
            version: 1,
            data: serde_json::json!({}),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    async fn dispatcher_with(
        executor: Arc<RecordingExecutor>,
        errors: Arc<Mutex<Vec<String>>>,
    ) -> (EventDispatcher, SqliteStore, tempfile::TempDir) {
        let (store, dir) = temp_store();
        store
            .upsert_function("greet", "javascript", "function greet(e) {}")
            .await
            .unwrap();
        store
            .create_trigger(Trigger {
                name: "on-chat".into(),
                listen_type: "chat_message".into(),
                function_name: "greet".into(),
            })
            .await
            .unwrap();
        let on_error: ErrorCallback = Arc::new(move |e| {
            errors.lock().unwrap().push(e.to_string());
        });
        let dispatcher = EventDispatcher::new(
            store.clone(),
            executor,
            on_error,
            Duration::from_secs(3600),
        );
        (dispatcher, store, dir)
    }

    /// **Scenario**: matching events reach the function; unmatched types skip
    /// silently.
    #[tokio::test]
    async fn dispatches_matching_events() {
        let executor = Arc::new(RecordingExecutor::default());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, _store, _dir) =
            dispatcher_with(Arc::clone(&executor), Arc::clone(&errors)).await;

        dispatcher
            .handle_events(&[event("e1", "chat_message"), event("e2", "unrelated")])
            .await;

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("greet".to_string(), "e1".to_string())]);
        assert!(errors.lock().unwrap().is_empty());
    }

    /// **Scenario**: executor errors reach the callback, never the caller.
    #[tokio::test]
    async fn executor_errors_go_to_callback() {
        let executor = Arc::new(RecordingExecutor {
            fail: true,
            ..Default::default()
        });
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, _store, _dir) =
            dispatcher_with(Arc::clone(&executor), Arc::clone(&errors)).await;

        dispatcher.handle_events(&[event("e1", "chat_message")]).await;
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    /// **Scenario**: after the target function disappears, arrival skips
    /// silently — no call, no error surfaced.
    #[tokio::test]
    async fn missing_function_skips_silently() {
        let executor = Arc::new(RecordingExecutor::default());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, store, _dir) =
            dispatcher_with(Arc::clone(&executor), Arc::clone(&errors)).await;

        dispatcher.handle_events(&[]).await;
        store.delete_function("greet").await.unwrap();
        dispatcher.invalidate();
        dispatcher.handle_events(&[event("e1", "chat_message")]).await;

        assert!(executor.calls.lock().unwrap().is_empty());
        assert!(errors.lock().unwrap().is_empty());
    }

    /// **Scenario**: new triggers appear after invalidation, without waiting
    /// for the interval.
    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let executor = Arc::new(RecordingExecutor::default());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, store, _dir) =
            dispatcher_with(Arc::clone(&executor), Arc::clone(&errors)).await;
        dispatcher.handle_events(&[]).await;

        store
            .upsert_function("audit", "javascript", "function audit(e) {}")
            .await
            .unwrap();
        store
            .create_trigger(Trigger {
                name: "on-audit".into(),
                listen_type: "audit_event".into(),
                function_name: "audit".into(),
            })
            .await
            .unwrap();

        dispatcher.handle_events(&[event("e9", "audit_event")]).await;
        assert!(executor.calls.lock().unwrap().is_empty(), "cache still warm");

        dispatcher.invalidate();
        dispatcher.handle_events(&[event("e9", "audit_event")]).await;
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
    }
}
