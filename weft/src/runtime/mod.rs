//! Runtime state and the reconciliation cycles that keep it fresh.
//!
//! [`RuntimeState`] is the in-memory snapshot of per-backend reachability
//! and installed models; the [`SyncCycle`] is its single writer. The
//! [`DownloadCycle`] drains the persistent download queue one job at a time.
//! Both run under circuit-breaker loops and react to the `trigger_cycle`
//! pub/sub topic.

mod download;
mod state;
mod sync;

pub use download::{DownloadCycle, BREAKER_DOWNLOAD_CYCLE};
pub use state::{BackendState, InstalledModel, RuntimeState};
pub use sync::{AdminFactory, DefaultAdminFactory, SyncCycle, BREAKER_BACKEND_CYCLE};
