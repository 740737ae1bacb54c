//! Declared backends, model declarations, and affinity groups.
//!
//! Backends are created by the operator and mutated only through this
//! declarative list. A model declaration with no capability flags is inert:
//! it never appears in routing joins. When at least one affinity group
//! exists, routing considers only (backend, model) pairs co-present in a
//! group.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::WeftError;

use super::SqliteStore;

/// One declared backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub id: String,
    pub name: String,
    pub base_url: String,
    /// Provider-type tag, e.g. `"ollama"` or `"vllm"`.
    pub provider_type: String,
    /// Key into the process KV store holding this backend's credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<String>,
}

/// One declared model with capability flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDeclaration {
    pub model: String,
    pub context_length: i64,
    pub can_chat: bool,
    pub can_prompt: bool,
    pub can_embed: bool,
    pub can_stream: bool,
}

impl ModelDeclaration {
    /// A declaration with no capability flags is inert and ignored by routing.
    pub fn is_inert(&self) -> bool {
        !(self.can_chat || self.can_prompt || self.can_embed || self.can_stream)
    }
}

/// A named set linking backends to models.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityGroup {
    pub id: String,
    pub name: String,
}

impl SqliteStore {
    pub async fn upsert_backend(&self, backend: Backend) -> Result<(), WeftError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO backends (id, name, base_url, provider_type, credentials_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   base_url = excluded.base_url,
                   provider_type = excluded.provider_type,
                   credentials_ref = excluded.credentials_ref",
                params![
                    backend.id,
                    backend.name,
                    backend.base_url,
                    backend.provider_type,
                    backend.credentials_ref
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_backend(&self, id: &str) -> Result<Backend, WeftError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, base_url, provider_type, credentials_ref
                 FROM backends WHERE id = ?1",
                params![id],
                row_to_backend,
            )
            .optional()?
            .ok_or_else(|| WeftError::NotFound(format!("backend {id}")))
        })
        .await
    }

    pub async fn list_backends(&self) -> Result<Vec<Backend>, WeftError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, base_url, provider_type, credentials_ref
                 FROM backends ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], row_to_backend)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn delete_backend(&self, id: &str) -> Result<(), WeftError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM backends WHERE id = ?1", params![id])?;
            if n == 0 {
                return Err(WeftError::NotFound(format!("backend {id}")));
            }
            Ok(())
        })
        .await
    }

    pub async fn declare_model(&self, decl: ModelDeclaration) -> Result<(), WeftError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO model_declarations
                   (model, context_length, can_chat, can_prompt, can_embed, can_stream)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(model) DO UPDATE SET
                   context_length = excluded.context_length,
                   can_chat = excluded.can_chat,
                   can_prompt = excluded.can_prompt,
                   can_embed = excluded.can_embed,
                   can_stream = excluded.can_stream",
                params![
                    decl.model,
                    decl.context_length,
                    decl.can_chat,
                    decl.can_prompt,
                    decl.can_embed,
                    decl.can_stream
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_declared_models(&self) -> Result<Vec<ModelDeclaration>, WeftError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT model, context_length, can_chat, can_prompt, can_embed, can_stream
                 FROM model_declarations ORDER BY model",
            )?;
            let rows = stmt
                .query_map([], row_to_declaration)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn delete_model_declaration(&self, model: &str) -> Result<(), WeftError> {
        let model = model.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM model_declarations WHERE model = ?1",
                params![model],
            )?;
            if n == 0 {
                return Err(WeftError::NotFound(format!("model declaration {model}")));
            }
            Ok(())
        })
        .await
    }

    pub async fn create_group(&self, group: AffinityGroup) -> Result<(), WeftError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO affinity_groups (id, name) VALUES (?1, ?2)",
                params![group.id, group.name],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_groups(&self) -> Result<Vec<AffinityGroup>, WeftError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM affinity_groups ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(AffinityGroup {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn assign_backend_to_group(
        &self,
        group_id: &str,
        backend_id: &str,
    ) -> Result<(), WeftError> {
        let (group_id, backend_id) = (group_id.to_string(), backend_id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO group_backends (group_id, backend_id) VALUES (?1, ?2)",
                params![group_id, backend_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn assign_model_to_group(
        &self,
        group_id: &str,
        model: &str,
    ) -> Result<(), WeftError> {
        let (group_id, model) = (group_id.to_string(), model.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO group_models (group_id, model) VALUES (?1, ?2)",
                params![group_id, model],
            )?;
            Ok(())
        })
        .await
    }

    /// Whether affinity-group routing is enabled: true once any group exists.
    pub async fn groups_enabled(&self) -> Result<bool, WeftError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM affinity_groups", [], |r| r.get(0))?;
            Ok(n > 0)
        })
        .await
    }

    /// Non-inert model declarations co-present with `backend_id` in at least
    /// one group. With groups disabled, every non-inert declaration is
    /// eligible.
    pub async fn models_for_backend(
        &self,
        backend_id: &str,
    ) -> Result<Vec<ModelDeclaration>, WeftError> {
        let backend_id = backend_id.to_string();
        self.with_conn(move |conn| {
            let groups: i64 =
                conn.query_row("SELECT COUNT(*) FROM affinity_groups", [], |r| r.get(0))?;
            let sql = if groups > 0 {
                "SELECT DISTINCT d.model, d.context_length, d.can_chat, d.can_prompt,
                        d.can_embed, d.can_stream
                 FROM model_declarations d
                 JOIN group_models gm ON gm.model = d.model
                 JOIN group_backends gb ON gb.group_id = gm.group_id
                 WHERE gb.backend_id = ?1
                 ORDER BY d.model"
            } else {
                "SELECT model, context_length, can_chat, can_prompt, can_embed, can_stream
                 FROM model_declarations WHERE ?1 = ?1 ORDER BY model"
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params![backend_id], row_to_declaration)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().filter(|d| !d.is_inert()).collect())
        })
        .await
    }
}

fn row_to_backend(row: &rusqlite::Row<'_>) -> rusqlite::Result<Backend> {
    Ok(Backend {
        id: row.get(0)?,
        name: row.get(1)?,
        base_url: row.get(2)?,
        provider_type: row.get(3)?,
        credentials_ref: row.get(4)?,
    })
}

fn row_to_declaration(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModelDeclaration> {
    Ok(ModelDeclaration {
        model: row.get(0)?,
        context_length: row.get(1)?,
        can_chat: row.get(2)?,
        can_prompt: row.get(3)?,
        can_embed: row.get(4)?,
        can_stream: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;

    fn backend(id: &str, url: &str) -> Backend {
        Backend {
            id: id.into(),
            name: id.into(),
            base_url: url.into(),
            provider_type: "ollama".into(),
            credentials_ref: None,
        }
    }

    fn decl(model: &str, chat: bool) -> ModelDeclaration {
        ModelDeclaration {
            model: model.into(),
            context_length: 4096,
            can_chat: chat,
            can_prompt: chat,
            can_embed: false,
            can_stream: false,
        }
    }

    /// **Scenario**: upsert + get round-trip; delete of a missing id is NotFound.
    #[tokio::test]
    async fn backend_crud() {
        let (store, _dir) = temp_store();
        store
            .upsert_backend(backend("b1", "http://one"))
            .await
            .unwrap();
        assert_eq!(store.get_backend("b1").await.unwrap().base_url, "http://one");
        store.delete_backend("b1").await.unwrap();
        assert!(matches!(
            store.delete_backend("b1").await,
            Err(WeftError::NotFound(_))
        ));
    }

    /// **Scenario**: without groups, every non-inert declaration is eligible;
    /// inert declarations never appear.
    #[tokio::test]
    async fn models_for_backend_without_groups() {
        let (store, _dir) = temp_store();
        store.declare_model(decl("llama2", true)).await.unwrap();
        store.declare_model(decl("inert", false)).await.unwrap();
        let models = store.models_for_backend("whatever").await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model, "llama2");
    }

    /// **Scenario**: with groups enabled, only co-present pairs are eligible.
    #[tokio::test]
    async fn models_for_backend_with_groups() {
        let (store, _dir) = temp_store();
        store
            .upsert_backend(backend("b1", "http://one"))
            .await
            .unwrap();
        store
            .upsert_backend(backend("b2", "http://two"))
            .await
            .unwrap();
        store.declare_model(decl("llama2", true)).await.unwrap();
        store.declare_model(decl("mistral", true)).await.unwrap();
        store
            .create_group(AffinityGroup {
                id: "g1".into(),
                name: "main".into(),
            })
            .await
            .unwrap();
        store.assign_backend_to_group("g1", "b1").await.unwrap();
        store.assign_model_to_group("g1", "llama2").await.unwrap();

        assert!(store.groups_enabled().await.unwrap());
        let b1 = store.models_for_backend("b1").await.unwrap();
        assert_eq!(b1.len(), 1);
        assert_eq!(b1[0].model, "llama2");
        assert!(store.models_for_backend("b2").await.unwrap().is_empty());
    }
}
