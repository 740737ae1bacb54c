//! Event wire shape: id, type, aggregate coordinates, version, payload blobs,
//! and a server-clock `created_at` bounded to ±10 minutes of wall clock.
//!
//! Timestamps serialize as RFC3339 with nanoseconds (chrono's default for
//! `DateTime<Utc>`). The clock window is inclusive at both bounds.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum allowed skew between an event's `created_at` and the server clock,
/// in either direction. Inclusive at both bounds.
pub const CLOCK_WINDOW: chrono::Duration = Duration::minutes(10);

/// Validation errors for incoming events.
#[derive(Error, Debug)]
pub enum EventError {
    /// `event_type` was empty.
    #[error("event type must not be empty")]
    EmptyEventType,
    /// `created_at` fell outside the ±10 minute acceptance window.
    #[error("created_at {created_at} outside ±10m of server time {now}")]
    ClockSkew {
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    /// Event payload could not be serialized to JSON.
    #[error("event data not marshalable: {0}")]
    Unmarshalable(#[from] serde_json::Error),
}

/// One stored/transported runtime event.
///
/// Appended by any component (sync cycles, chain engine, sandbox functions)
/// and pumped through the event dispatcher into scripted functions.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Unique event id. Assigned by the producer (UUID in practice).
    pub id: String,
    /// Event type; drives trigger matching. Must not be empty.
    pub event_type: String,
    /// Origin component tag, e.g. `"chain-engine"` or `"function"`.
    #[serde(default)]
    pub event_source: String,
    /// Aggregate the event belongs to (id within the aggregate type).
    pub aggregate_id: i64,
    /// Aggregate type, e.g. `"chat_session"`.
    pub aggregate_type: String,
    /// Version of the aggregate after this event.
    pub version: i64,
    /// Event payload.
    pub data: Value,
    /// Optional metadata blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Server-clock creation time; accepted within ±10 minutes of wall clock.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Validates the event against the server clock `now`.
    ///
    /// Rejects an empty `event_type` and a `created_at` outside the inclusive
    /// ±10 minute window around `now`. Returns the event unchanged on success
    /// so callers can chain into an append.
    pub fn validate(self, now: DateTime<Utc>) -> Result<Self, EventError> {
        if self.event_type.is_empty() {
            return Err(EventError::EmptyEventType);
        }
        let skew = self.created_at - now;
        if skew > CLOCK_WINDOW || skew < -CLOCK_WINDOW {
            return Err(EventError::ClockSkew {
                created_at: self.created_at,
                now,
            });
        }
        Ok(self)
    }
}
