//! Integration test: stored event → trigger → scripted function → bridge.
//!
//! A stub sandbox stands in for the JS interpreter: it logs through the
//! bridge and emits a follow-up event with `sendEvent`, exercising the
//! dispatcher, the bridge guard, and the event store together.

mod init_logging;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chain_event::Event;
use chrono::Utc;
use weft::bridge::{EngineCell, SandboxFunctionExecutor};
use weft::chain::{StaticProviders, TaskRunner};
use weft::events::{ErrorCallback, FunctionExecutor};
use weft::store::Trigger;
use weft::{
    EventDispatcher, InMemoryChains, SandboxBridge, ScriptExecutor, SelectionPolicy,
    SimpleRegistry, SqliteStore, WeftError,
};

/// Stand-in interpreter: every function call logs and emits one follow-up
/// event through the bridge.
struct StubSandbox {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ScriptExecutor for StubSandbox {
    async fn run(
        &self,
        bridge: Arc<SandboxBridge>,
        _script: &str,
        function_name: &str,
        event: &Event,
    ) -> Result<(), WeftError> {
        self.seen.lock().unwrap().push(event.id.clone());
        bridge.console_log(&[serde_json::json!(format!(
            "{function_name} handling {}",
            event.id
        ))]);
        let out = bridge
            .send_event("audit_trail", serde_json::json!({ "source": event.id }))
            .await;
        assert_eq!(out["success"], true);
        Ok(())
    }
}

fn bridge_factory(store: SqliteStore) -> Arc<dyn Fn() -> Arc<SandboxBridge> + Send + Sync> {
    Arc::new(move || {
        Arc::new(SandboxBridge::new(
            store.clone(),
            Arc::new(InMemoryChains::new()),
            Arc::new(EngineCell::new()),
            Arc::new(StaticProviders(Vec::new())),
            Arc::new(SimpleRegistry::new()),
        ))
    })
}

#[tokio::test]
async fn event_reaches_function_which_emits_event() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::open(dir.path().join("events.db")).expect("open");

    store
        .upsert_function("audit", "javascript", "function audit(event) { /* ... */ }")
        .await
        .unwrap();
    store
        .create_trigger(Trigger {
            name: "on-chat".into(),
            listen_type: "chat_message".into(),
            function_name: "audit".into(),
        })
        .await
        .unwrap();

    let sandbox = Arc::new(StubSandbox {
        seen: Mutex::new(Vec::new()),
    });
    let executor: Arc<dyn FunctionExecutor> = Arc::new(SandboxFunctionExecutor::new(
        Arc::clone(&sandbox) as Arc<dyn ScriptExecutor>,
        bridge_factory(store.clone()),
    ));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let errors_sink = Arc::clone(&errors);
    let on_error: ErrorCallback = Arc::new(move |e| {
        errors_sink.lock().unwrap().push(e.to_string());
    });
    let dispatcher = EventDispatcher::new(
        store.clone(),
        executor,
        on_error,
        Duration::from_secs(3600),
    );

    let incoming = Event {
        id: "ev-chat-1".into(),
        event_type: "chat_message".into(),
        event_source: "test".into(),
        aggregate_id: 1,
        aggregate_type: "chat_session".into(),
        version: 1,
        data: serde_json::json!({"text": "hi"}),
        metadata: None,
        created_at: Utc::now(),
    };
    dispatcher.handle_events(std::slice::from_ref(&incoming)).await;

    assert_eq!(sandbox.seen.lock().unwrap().as_slice(), &["ev-chat-1"]);
    assert!(errors.lock().unwrap().is_empty());

    // The follow-up event emitted from inside the sandbox landed in the store.
    let now = Utc::now();
    let emitted = store
        .events_in_range(
            "audit_trail",
            now - chrono::Duration::minutes(1),
            now + chrono::Duration::minutes(1),
            10,
        )
        .await
        .unwrap();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].data["source"], "ev-chat-1");
}
