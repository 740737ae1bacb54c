//! Persistent download queue.
//!
//! Jobs are keyed by `(id, task_type)` where `id` is the backend URL, so a
//! second enqueue for the same backend collides and is silently ignored —
//! the sync cycle is the source of truth and will re-detect anything missed.
//! Pop is FIFO among jobs of a task type and atomic: at most one consumer
//! receives any job.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::WeftError;

use super::SqliteStore;

/// Task type for model pulls.
pub const TASK_TYPE_MODEL_DOWNLOAD: &str = "model_download";

/// One queued model pull.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    /// Backend base URL; doubles as the queue key.
    pub backend_url: String,
    pub model: String,
}

impl SqliteStore {
    /// Enqueues a job. An existing job with the same backend URL wins and the
    /// call silently succeeds.
    pub async fn enqueue_download(&self, job: DownloadJob) -> Result<(), WeftError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO jobs (id, task_type, model, created_at, seq)
                 VALUES (?1, ?2, ?3, ?4,
                         (SELECT COALESCE(MAX(seq), 0) + 1 FROM jobs WHERE task_type = ?2))",
                params![
                    job.backend_url,
                    TASK_TYPE_MODEL_DOWNLOAD,
                    job.model,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Pops the oldest job of the task type. Returns `None` when the queue is
    /// empty. The select+delete runs in one transaction, so concurrent
    /// consumers never receive the same job.
    pub async fn pop_download(&self) -> Result<Option<DownloadJob>, WeftError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let job = tx
                .query_row(
                    "SELECT id, model FROM jobs WHERE task_type = ?1 ORDER BY seq ASC LIMIT 1",
                    params![TASK_TYPE_MODEL_DOWNLOAD],
                    |row| {
                        Ok(DownloadJob {
                            backend_url: row.get(0)?,
                            model: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            if let Some(ref j) = job {
                tx.execute(
                    "DELETE FROM jobs WHERE id = ?1 AND task_type = ?2",
                    params![j.backend_url, TASK_TYPE_MODEL_DOWNLOAD],
                )?;
            }
            tx.commit()?;
            Ok(job)
        })
        .await
    }

    /// Removes every queued pull of `model`, across all backends.
    pub async fn remove_downloads_by_model(&self, model: &str) -> Result<u64, WeftError> {
        let model = model.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM jobs WHERE task_type = ?1 AND model = ?2",
                params![TASK_TYPE_MODEL_DOWNLOAD, model],
            )?;
            Ok(n as u64)
        })
        .await
    }

    /// Removes the queued pull for `backend_url`, if any.
    pub async fn remove_downloads_by_url(&self, backend_url: &str) -> Result<u64, WeftError> {
        let backend_url = backend_url.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM jobs WHERE task_type = ?1 AND id = ?2",
                params![TASK_TYPE_MODEL_DOWNLOAD, backend_url],
            )?;
            Ok(n as u64)
        })
        .await
    }

    /// All queued downloads in FIFO order.
    pub async fn list_downloads(&self) -> Result<Vec<DownloadJob>, WeftError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, model FROM jobs WHERE task_type = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt
                .query_map(params![TASK_TYPE_MODEL_DOWNLOAD], |row| {
                    Ok(DownloadJob {
                        backend_url: row.get(0)?,
                        model: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}
