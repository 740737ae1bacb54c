//! Chain event wire type: envelope + clock-window validation + SSE framing.
//!
//! This crate defines the persisted/transported shape of a single runtime event
//! and the SSE line framing used when event streams are exposed. It does not
//! depend on weft; weft appends `Event`s through its store and pumps them
//! through the dispatcher.

pub mod event;
pub mod sse;

pub use event::{Event, EventError, CLOCK_WINDOW};
pub use sse::{frame_event, greeting_line};
