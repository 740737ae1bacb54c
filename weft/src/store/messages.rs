//! Chat session message persistence.
//!
//! Message ids are content-addressed: `sha256(session ‖ role ‖ content ‖
//! timestamp)`, so re-persisting the same logical message is a no-op
//! (INSERT OR IGNORE on the primary key). Messages cascade away when their
//! index is deleted.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::WeftError;

use super::SqliteStore;

/// One persisted chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Content-addressed id; see [`message_id`].
    pub id: String,
    /// Session index this message belongs to.
    pub index_id: String,
    /// Serialized message payload.
    pub payload: serde_json::Value,
    pub added_at: DateTime<Utc>,
}

/// Content-addressed message id: a pure function of (session, role, content,
/// timestamp). Identical inputs always yield the identical id.
pub fn message_id(
    session: &str,
    role: &str,
    content: &str,
    timestamp: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session.as_bytes());
    hasher.update([0u8]);
    hasher.update(role.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(timestamp.to_rfc3339().as_bytes());
    format!("{:x}", hasher.finalize())
}

impl SqliteStore {
    /// Creates a message index (chat session container). Creating an existing
    /// index is a no-op.
    pub async fn create_message_index(&self, index_id: &str) -> Result<(), WeftError> {
        let index_id = index_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO message_indices (id, created_at) VALUES (?1, ?2)",
                params![index_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    /// Deletes an index; its messages cascade away.
    pub async fn delete_message_index(&self, index_id: &str) -> Result<(), WeftError> {
        let index_id = index_id.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM message_indices WHERE id = ?1",
                params![index_id],
            )?;
            if n == 0 {
                return Err(WeftError::NotFound(format!("message index {index_id}")));
            }
            Ok(())
        })
        .await
    }

    /// Appends one message. The id is derived from (index, role, content,
    /// timestamp); a duplicate append leaves a single stored row.
    pub async fn append_message(
        &self,
        index_id: &str,
        role: &str,
        content: &str,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Result<String, WeftError> {
        let id = message_id(index_id, role, content, timestamp);
        let (index_id, stored_id) = (index_id.to_string(), id.clone());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO messages (id, index_id, payload, added_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    stored_id,
                    index_id,
                    payload.to_string(),
                    timestamp.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(id)
    }

    /// Messages of one index in append order.
    pub async fn list_messages(&self, index_id: &str) -> Result<Vec<StoredMessage>, WeftError> {
        let index_id = index_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, index_id, payload, added_at FROM messages
                 WHERE index_id = ?1 ORDER BY added_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![index_id], |row| {
                    let payload: String = row.get(2)?;
                    let added_at: String = row.get(3)?;
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, payload, added_at))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(id, index_id, payload, added_at)| {
                    Ok(StoredMessage {
                        id,
                        index_id,
                        payload: serde_json::from_str(&payload)
                            .map_err(|e| WeftError::Store(e.to_string()))?,
                        added_at: DateTime::parse_from_rfc3339(&added_at)
                            .map_err(|e| WeftError::Store(e.to_string()))?
                            .with_timezone(&Utc),
                    })
                })
                .collect()
        })
        .await
    }
}
