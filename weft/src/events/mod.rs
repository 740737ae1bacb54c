//! Event dispatch: stored events → triggers → scripted functions.

mod dispatcher;

pub use dispatcher::{ErrorCallback, EventDispatcher, FunctionExecutor};
