//! Stored remote-hook configurations for the persistent hook registry.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::WeftError;

use super::SqliteStore;

/// Configuration of one remote hook: where it lives and where its OpenAPI
/// document is, for automatic tool discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHookConfig {
    pub name: String,
    pub base_url: String,
    /// OpenAPI document URL; defaults to `{base_url}/openapi.json` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openapi_url: Option<String>,
    /// Extra headers sent on every call (e.g. auth).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl SqliteStore {
    pub async fn upsert_remote_hook(&self, config: RemoteHookConfig) -> Result<(), WeftError> {
        let headers = serde_json::to_string(&config.headers)
            .map_err(|e| WeftError::Store(e.to_string()))?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO remote_hooks (name, base_url, openapi_url, headers, timeout_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                   base_url = excluded.base_url,
                   openapi_url = excluded.openapi_url,
                   headers = excluded.headers,
                   timeout_secs = excluded.timeout_secs",
                params![
                    config.name,
                    config.base_url,
                    config.openapi_url,
                    headers,
                    config.timeout_secs as i64
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_remote_hook(&self, name: &str) -> Result<RemoteHookConfig, WeftError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT name, base_url, openapi_url, headers, timeout_secs
                 FROM remote_hooks WHERE name = ?1",
                params![name],
                row_to_config,
            )
            .optional()?
            .transpose()?
            .ok_or_else(|| WeftError::NotFound(format!("remote hook {name}")))
        })
        .await
    }

    pub async fn list_remote_hooks(&self) -> Result<Vec<RemoteHookConfig>, WeftError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, base_url, openapi_url, headers, timeout_secs
                 FROM remote_hooks ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], row_to_config)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
        .await
    }

    pub async fn delete_remote_hook(&self, name: &str) -> Result<(), WeftError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM remote_hooks WHERE name = ?1", params![name])?;
            if n == 0 {
                return Err(WeftError::NotFound(format!("remote hook {name}")));
            }
            Ok(())
        })
        .await
    }
}

fn row_to_config(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<Result<RemoteHookConfig, WeftError>> {
    let headers: String = row.get(3)?;
    let timeout: i64 = row.get(4)?;
    Ok((|| {
        Ok(RemoteHookConfig {
            name: row.get(0)?,
            base_url: row.get(1)?,
            openapi_url: row.get(2)?,
            headers: serde_json::from_str(&headers)
                .map_err(|e| WeftError::Store(e.to_string()))?,
            timeout_secs: timeout as u64,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;

    /// **Scenario**: upsert + get round-trip keeps headers.
    #[tokio::test]
    async fn remote_hook_round_trip() {
        let (store, _dir) = temp_store();
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer x".to_string());
        store
            .upsert_remote_hook(RemoteHookConfig {
                name: "weather".into(),
                base_url: "http://hooks.local".into(),
                openapi_url: None,
                headers: headers.clone(),
                timeout_secs: 10,
            })
            .await
            .unwrap();
        let got = store.get_remote_hook("weather").await.unwrap();
        assert_eq!(got.headers, headers);
        assert_eq!(got.timeout_secs, 10);
    }
}
