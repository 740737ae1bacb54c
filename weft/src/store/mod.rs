//! SQLite persistence layer.
//!
//! One [`SqliteStore`] owns the database path; every call opens a connection
//! inside `spawn_blocking` so the async runtime never blocks on disk I/O.
//! The schema is created on open. Identity-level tables cover backends,
//! declared models, affinity groups and their assignments, message indices
//! and messages, functions and triggers, remote hook configurations, a
//! process-wide key-value store, the download job queue, and the event store.

mod backends;
mod events;
mod functions;
mod hooks;
mod kv;
mod messages;
mod queue;

pub use backends::{AffinityGroup, Backend, ModelDeclaration};
pub use functions::{Function, Trigger};
pub use hooks::RemoteHookConfig;
pub use kv::{KV_ACTIVE_PLAN, KV_ACTIVE_SESSION};
pub use messages::{message_id, StoredMessage};
pub use queue::{DownloadJob, TASK_TYPE_MODEL_DOWNLOAD};

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::WeftError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backends (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    base_url        TEXT NOT NULL UNIQUE,
    provider_type   TEXT NOT NULL,
    credentials_ref TEXT
);

CREATE TABLE IF NOT EXISTS model_declarations (
    model          TEXT PRIMARY KEY,
    context_length INTEGER NOT NULL,
    can_chat       INTEGER NOT NULL DEFAULT 0,
    can_prompt     INTEGER NOT NULL DEFAULT 0,
    can_embed      INTEGER NOT NULL DEFAULT 0,
    can_stream     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS affinity_groups (
    id   TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS group_backends (
    group_id   TEXT NOT NULL REFERENCES affinity_groups(id) ON DELETE CASCADE,
    backend_id TEXT NOT NULL REFERENCES backends(id) ON DELETE CASCADE,
    PRIMARY KEY (group_id, backend_id)
);

CREATE TABLE IF NOT EXISTS group_models (
    group_id TEXT NOT NULL REFERENCES affinity_groups(id) ON DELETE CASCADE,
    model    TEXT NOT NULL REFERENCES model_declarations(model) ON DELETE CASCADE,
    PRIMARY KEY (group_id, model)
);

CREATE TABLE IF NOT EXISTS message_indices (
    id         TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id       TEXT PRIMARY KEY,
    index_id TEXT NOT NULL REFERENCES message_indices(id) ON DELETE CASCADE,
    payload  TEXT NOT NULL,
    added_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_index_id ON messages(index_id, added_at);

CREATE TABLE IF NOT EXISTS functions (
    name        TEXT PRIMARY KEY,
    script_type TEXT NOT NULL,
    script      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS event_triggers (
    name          TEXT PRIMARY KEY,
    listen_type   TEXT NOT NULL,
    function_name TEXT NOT NULL REFERENCES functions(name) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_event_triggers_listen ON event_triggers(listen_type);

CREATE TABLE IF NOT EXISTS remote_hooks (
    name         TEXT PRIMARY KEY,
    base_url     TEXT NOT NULL,
    openapi_url  TEXT,
    headers      TEXT NOT NULL DEFAULT '{}',
    timeout_secs INTEGER NOT NULL DEFAULT 30
);

CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id         TEXT NOT NULL,
    task_type  TEXT NOT NULL,
    model      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    seq        INTEGER,
    PRIMARY KEY (id, task_type)
);

CREATE TABLE IF NOT EXISTS events (
    id             TEXT PRIMARY KEY,
    event_type     TEXT NOT NULL,
    event_source   TEXT NOT NULL DEFAULT '',
    aggregate_id   INTEGER NOT NULL,
    aggregate_type TEXT NOT NULL,
    version        INTEGER NOT NULL,
    data           TEXT NOT NULL,
    metadata       TEXT,
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_range ON events(created_at, event_type);
"#;

/// SQLite-backed store for all persisted runtime state.
#[derive(Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and ensures the
    /// schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WeftError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { db_path })
    }

    /// Runs `f` with a fresh connection on the blocking pool.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, WeftError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, WeftError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
            f(&conn)
        })
        .await
        .map_err(|e| WeftError::Store(format!("blocking task: {e}")))?
    }
}
