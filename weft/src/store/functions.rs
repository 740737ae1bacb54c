//! Scripted functions and their event triggers.
//!
//! A trigger references a function by name; the reference is enforced on
//! trigger creation (NotFound otherwise) and by a cascading foreign key, not
//! on event arrival — arrival silently skips orphans.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::WeftError;

use super::SqliteStore;

/// One user-defined scripted function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Script type tag, e.g. `"javascript"`.
    pub script_type: String,
    pub script: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Routes events of one type to a function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    /// Event type this trigger listens for.
    pub listen_type: String,
    pub function_name: String,
}

impl SqliteStore {
    pub async fn upsert_function(
        &self,
        name: &str,
        script_type: &str,
        script: &str,
    ) -> Result<(), WeftError> {
        let (name, script_type, script) =
            (name.to_string(), script_type.to_string(), script.to_string());
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO functions (name, script_type, script, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                   script_type = excluded.script_type,
                   script = excluded.script,
                   updated_at = excluded.updated_at",
                params![name, script_type, script, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_function(&self, name: &str) -> Result<Function, WeftError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT name, script_type, script, created_at, updated_at
                 FROM functions WHERE name = ?1",
                params![name],
                row_to_function,
            )
            .optional()?
            .ok_or_else(|| WeftError::NotFound(format!("function {name}")))
        })
        .await
    }

    pub async fn list_functions(&self) -> Result<Vec<Function>, WeftError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, script_type, script, created_at, updated_at
                 FROM functions ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], row_to_function)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Deletes a function; its triggers cascade away.
    pub async fn delete_function(&self, name: &str) -> Result<(), WeftError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM functions WHERE name = ?1", params![name])?;
            if n == 0 {
                return Err(WeftError::NotFound(format!("function {name}")));
            }
            Ok(())
        })
        .await
    }

    /// Creates a trigger. Fails with NotFound when the referenced function
    /// does not exist.
    pub async fn create_trigger(&self, trigger: Trigger) -> Result<(), WeftError> {
        self.with_conn(move |conn| {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT name FROM functions WHERE name = ?1",
                    params![trigger.function_name],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(WeftError::NotFound(format!(
                    "function {}",
                    trigger.function_name
                )));
            }
            conn.execute(
                "INSERT INTO event_triggers (name, listen_type, function_name)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                   listen_type = excluded.listen_type,
                   function_name = excluded.function_name",
                params![trigger.name, trigger.listen_type, trigger.function_name],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_trigger(&self, name: &str) -> Result<(), WeftError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM event_triggers WHERE name = ?1", params![name])?;
            if n == 0 {
                return Err(WeftError::NotFound(format!("trigger {name}")));
            }
            Ok(())
        })
        .await
    }

    pub async fn list_triggers(&self) -> Result<Vec<Trigger>, WeftError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, listen_type, function_name FROM event_triggers ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Trigger {
                        name: row.get(0)?,
                        listen_type: row.get(1)?,
                        function_name: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

fn row_to_function(row: &rusqlite::Row<'_>) -> rusqlite::Result<Function> {
    let created: String = row.get(3)?;
    let updated: String = row.get(4)?;
    Ok(Function {
        name: row.get(0)?,
        script_type: row.get(1)?,
        script: row.get(2)?,
        created_at: DateTime::parse_from_rfc3339(&created)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
        updated_at: DateTime::parse_from_rfc3339(&updated)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;

    /// **Scenario**: trigger creation against a missing function is NotFound.
    #[tokio::test]
    async fn trigger_requires_existing_function() {
        let (store, _dir) = temp_store();
        let err = store
            .create_trigger(Trigger {
                name: "t1".into(),
                listen_type: "chat_message".into(),
                function_name: "ghost".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::NotFound(_)));
    }

    /// **Scenario**: deleting a function cascades its triggers.
    #[tokio::test]
    async fn function_delete_cascades_triggers() {
        let (store, _dir) = temp_store();
        store
            .upsert_function("f1", "javascript", "function f1() {}")
            .await
            .unwrap();
        store
            .create_trigger(Trigger {
                name: "t1".into(),
                listen_type: "chat_message".into(),
                function_name: "f1".into(),
            })
            .await
            .unwrap();
        store.delete_function("f1").await.unwrap();
        assert!(store.list_triggers().await.unwrap().is_empty());
    }

    /// **Scenario**: upsert updates script and updated_at, keeping the name.
    #[tokio::test]
    async fn function_upsert_round_trip() {
        let (store, _dir) = temp_store();
        store
            .upsert_function("f1", "javascript", "v1")
            .await
            .unwrap();
        store
            .upsert_function("f1", "javascript", "v2")
            .await
            .unwrap();
        let f = store.get_function("f1").await.unwrap();
        assert_eq!(f.script, "v2");
        assert_eq!(store.list_functions().await.unwrap().len(), 1);
    }
}
