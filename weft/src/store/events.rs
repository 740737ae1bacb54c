//! Event store: append-only, partitioned by time range for range queries and
//! bulk deletion.
//!
//! Events are validated against the server clock (±10 minutes, inclusive)
//! before they are appended; see [`chain_event::Event::validate`].

use chrono::{DateTime, Utc};
use chain_event::Event;
use rusqlite::params;

use crate::error::WeftError;

use super::SqliteStore;

impl SqliteStore {
    /// Validates and appends one event.
    pub async fn append_event(&self, event: Event) -> Result<(), WeftError> {
        let event = event.validate(Utc::now())?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO events
                   (id, event_type, event_source, aggregate_id, aggregate_type,
                    version, data, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.id,
                    event.event_type,
                    event.event_source,
                    event.aggregate_id,
                    event.aggregate_type,
                    event.version,
                    event.data.to_string(),
                    event.metadata.as_ref().map(|m| m.to_string()),
                    event.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Events of `event_type` with `from <= created_at <= to`, oldest first,
    /// capped at `limit`. `from > to` is Unprocessable; a non-positive limit
    /// is BadInput.
    pub async fn events_in_range(
        &self,
        event_type: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Event>, WeftError> {
        if from > to {
            return Err(WeftError::Unprocessable("from > to".into()));
        }
        if limit == 0 {
            return Err(WeftError::BadInput("limit must be positive".into()));
        }
        let event_type = event_type.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_type, event_source, aggregate_id, aggregate_type,
                        version, data, metadata, created_at
                 FROM events
                 WHERE event_type = ?1 AND created_at >= ?2 AND created_at <= ?3
                 ORDER BY created_at ASC LIMIT ?4",
            )?;
            let rows = stmt
                .query_map(
                    params![event_type, from.to_rfc3339(), to.to_rfc3339(), limit],
                    row_to_event,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
        .await
    }

    /// Bulk-deletes every event in the inclusive time range, across types.
    pub async fn delete_events_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, WeftError> {
        if from > to {
            return Err(WeftError::Unprocessable("from > to".into()));
        }
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM events WHERE created_at >= ?1 AND created_at <= ?2",
                params![from.to_rfc3339(), to.to_rfc3339()],
            )?;
            Ok(n as u64)
        })
        .await
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Event, WeftError>> {
    let data: String = row.get(6)?;
    let metadata: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok((|| {
        Ok(Event {
            id: row.get(0)?,
            event_type: row.get(1)?,
            event_source: row.get(2)?,
            aggregate_id: row.get(3)?,
            aggregate_type: row.get(4)?,
            version: row.get(5)?,
            data: serde_json::from_str(&data).map_err(|e| WeftError::Store(e.to_string()))?,
            metadata: metadata
                .map(|m| serde_json::from_str(&m))
                .transpose()
                .map_err(|e| WeftError::Store(e.to_string()))?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| WeftError::Store(e.to_string()))?
                .with_timezone(&Utc),
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;
    use chrono::Duration;

    fn event(id: &str, event_type: &str, created_at: DateTime<Utc>) -> Event {
        Event {
            id: id.into(),
            event_type: event_type.into(),
            event_source: "test".into(),
            aggregate_id: 1,
            aggregate_type: "session".into(),
            version: 1,
            data: serde_json::json!({"id": id}),
            metadata: None,
            created_at,
        }
    }

    /// **Scenario**: range query is inclusive and ordered oldest-first.
    #[tokio::test]
    async fn range_query_inclusive_ordered() {
        let (store, _dir) = temp_store();
        let now = Utc::now();
        let a = now - Duration::minutes(5);
        let b = now - Duration::minutes(2);
        store.append_event(event("e1", "chat", a)).await.unwrap();
        store.append_event(event("e2", "chat", b)).await.unwrap();
        store.append_event(event("e3", "other", b)).await.unwrap();

        let got = store.events_in_range("chat", a, b, 10).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].id, "e1");
        assert_eq!(got[1].id, "e2");
    }

    /// **Scenario**: from > to is semantically invalid.
    #[tokio::test]
    async fn inverted_range_rejected() {
        let (store, _dir) = temp_store();
        let now = Utc::now();
        let err = store
            .events_in_range("chat", now, now - Duration::minutes(1), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::Unprocessable(_)));
    }

    /// **Scenario**: an event outside the clock window is rejected on append.
    #[tokio::test]
    async fn stale_event_rejected_on_append() {
        let (store, _dir) = temp_store();
        let stale = Utc::now() - Duration::minutes(11);
        let err = store.append_event(event("e1", "chat", stale)).await.unwrap_err();
        assert!(matches!(err, WeftError::Unprocessable(_)));
    }

    /// **Scenario**: bulk deletion removes everything in the range.
    #[tokio::test]
    async fn bulk_delete_range() {
        let (store, _dir) = temp_store();
        let now = Utc::now();
        store
            .append_event(event("e1", "chat", now - Duration::minutes(5)))
            .await
            .unwrap();
        store
            .append_event(event("e2", "other", now - Duration::minutes(4)))
            .await
            .unwrap();
        let n = store
            .delete_events_in_range(now - Duration::minutes(6), now)
            .await
            .unwrap();
        assert_eq!(n, 2);
    }
}
