//! Error taxonomy for the weft core.
//!
//! One enum covers every kind surfaced across subsystems; leaf modules convert
//! their local errors into it at the seam. Handlers surface their kind, the
//! chain engine records it in the captured state unit and follows the task's
//! `on_failure` transition; sync loops swallow and log via the breaker's error
//! callback; the event dispatcher never propagates script errors.

use thiserror::Error;

/// Core error kinds. See [`WeftError::status_code`] for the boundary mapping.
#[derive(Error, Debug)]
pub enum WeftError {
    /// Lookup by id or name missed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request (invalid cursor, invalid limit, negative context length).
    #[error("bad input: {0}")]
    BadInput(String),

    /// Semantically invalid (empty event type, id mismatch, `from > to`).
    #[error("unprocessable: {0}")]
    Unprocessable(String),

    /// Data-type conversion has no defined rule.
    #[error("no conversion from {from} to {to}")]
    TypeMismatch { from: String, to: String },

    /// Chain handler output matched no branch and no default.
    #[error("no transition matched output of task {task}")]
    NoTransition { task: String },

    /// Upstream protected by an open breaker.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// Resolver found no providers of the requested types.
    #[error("no available models")]
    NoAvailableModels,

    /// Resolver filtered every candidate out.
    #[error("no satisfactory model")]
    NoSatisfactoryModel,

    /// Provider lacks the requested capability.
    #[error("provider {provider} does not support {capability}")]
    CapabilityUnsupported {
        provider: String,
        capability: String,
    },

    /// Terminal model response: token limit reached.
    #[error("token limit: {0}")]
    TokenLimit(String),

    /// Terminal model response: content filter.
    #[error("content filtered")]
    ContentFiltered,

    /// Completion carried no text and no tool calls.
    #[error("empty completion content")]
    EmptyContent,

    /// Context was cancelled.
    #[error("canceled")]
    Canceled,

    /// Operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// I/O failure talking to a backend or remote hook.
    #[error("transport: {0}")]
    Transport(String),

    /// Peer answered with something the core could not interpret.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Chain-level failure: routed to the error sentinel, or a handler error
    /// with no `on_failure` target.
    #[error("chain failed: {0}")]
    ChainFailed(String),

    /// Persistence layer failure.
    #[error("store: {0}")]
    Store(String),
}

impl WeftError {
    /// Maps error kinds to HTTP status codes for an embedding API boundary.
    ///
    /// NotFound → 404; BadInput → 400; Unprocessable → 422;
    /// CircuitOpen / Transport → 503; everything else → 500.
    pub fn status_code(&self) -> u16 {
        match self {
            WeftError::NotFound(_) => 404,
            WeftError::BadInput(_) => 400,
            WeftError::Unprocessable(_) => 422,
            WeftError::CircuitOpen(_) | WeftError::Transport(_) => 503,
            _ => 500,
        }
    }

    /// True for errors a per-task retry may recover from. Type mismatches,
    /// missing transitions, and cancellation are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WeftError::Transport(_)
                | WeftError::Timeout(_)
                | WeftError::Protocol(_)
                | WeftError::CircuitOpen(_)
        )
    }
}

impl From<reqwest::Error> for WeftError {
    fn from(e: reqwest::Error) -> Self {
        WeftError::Transport(e.to_string())
    }
}

impl From<rusqlite::Error> for WeftError {
    fn from(e: rusqlite::Error) -> Self {
        WeftError::Store(e.to_string())
    }
}

impl From<chain_event::EventError> for WeftError {
    fn from(e: chain_event::EventError) -> Self {
        match e {
            chain_event::EventError::Unmarshalable(inner) => WeftError::BadInput(inner.to_string()),
            other => WeftError::Unprocessable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: boundary mapping per kind.
    #[test]
    fn status_codes() {
        assert_eq!(WeftError::NotFound("x".into()).status_code(), 404);
        assert_eq!(WeftError::BadInput("x".into()).status_code(), 400);
        assert_eq!(WeftError::Unprocessable("x".into()).status_code(), 422);
        assert_eq!(WeftError::CircuitOpen("c".into()).status_code(), 503);
        assert_eq!(WeftError::Transport("io".into()).status_code(), 503);
        assert_eq!(WeftError::EmptyContent.status_code(), 500);
    }

    /// **Scenario**: retry eligibility excludes type/transition/cancel errors.
    #[test]
    fn transient_classification() {
        assert!(WeftError::Transport("io".into()).is_transient());
        assert!(WeftError::Timeout(std::time::Duration::from_secs(1)).is_transient());
        assert!(!WeftError::TypeMismatch {
            from: "string".into(),
            to: "chat_history".into()
        }
        .is_transient());
        assert!(!WeftError::NoTransition { task: "t".into() }.is_transient());
        assert!(!WeftError::Canceled.is_transient());
    }
}
