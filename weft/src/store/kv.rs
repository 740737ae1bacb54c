//! Process-wide key-value store: active plan, active session, provider
//! credentials, and similar toggles.
//!
//! Single-writer semantics per key; readers tolerate a missing key by
//! receiving `None` and substituting their documented zero value.

use rusqlite::{params, OptionalExtension};

use crate::error::WeftError;

use super::SqliteStore;

/// Well-known key: the currently active plan.
pub const KV_ACTIVE_PLAN: &str = "active_plan";
/// Well-known key: the currently active session.
pub const KV_ACTIVE_SESSION: &str = "active_session";

impl SqliteStore {
    pub async fn kv_set(&self, key: &str, value: &str) -> Result<(), WeftError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    /// Returns `None` for a missing key.
    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, WeftError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |r| {
                    r.get(0)
                })
                .optional()?)
        })
        .await
    }

    /// Deleting a missing key is a no-op.
    pub async fn kv_delete(&self, key: &str) -> Result<(), WeftError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;

    /// **Scenario**: set/get/overwrite/delete round-trip; missing key reads None.
    #[tokio::test]
    async fn kv_round_trip() {
        let (store, _dir) = temp_store();
        assert_eq!(store.kv_get(KV_ACTIVE_PLAN).await.unwrap(), None);
        store.kv_set(KV_ACTIVE_PLAN, "plan-1").await.unwrap();
        store.kv_set(KV_ACTIVE_PLAN, "plan-2").await.unwrap();
        assert_eq!(
            store.kv_get(KV_ACTIVE_PLAN).await.unwrap().as_deref(),
            Some("plan-2")
        );
        store.kv_delete(KV_ACTIVE_PLAN).await.unwrap();
        assert_eq!(store.kv_get(KV_ACTIVE_PLAN).await.unwrap(), None);
    }
}
