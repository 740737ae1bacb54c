//! # Weft
//!
//! A runtime for generative-AI workflows declared as **task chains**:
//! directed state machines whose nodes call language-model backends or
//! external tools. One typed value flows from task to task; transitions are
//! data, not control flow — the first satisfied branch wins and handler
//! errors route through an ordinary `on_failure` target.
//!
//! ## Design principles
//!
//! - **Chains are declarative**: a [`ChainDefinition`] is plain JSON; the
//!   [`ChainEngine`] interprets it as a finite-state machine with typed
//!   handlers and records a [`CapturedStateUnit`] per step.
//! - **Typed values, explicit conversions**: the current value is a tagged
//!   [`DataValue`]; conversions are pairwise and total where defined, and
//!   `TypeMismatch` where not.
//! - **Providers are capability-typed**: a [`Provider`] claims {chat,
//!   prompt, embed, stream} independently and hands out one client per
//!   capability; the [`resolver`] picks a provider and backend under soft
//!   constraints with name normalization and a selection policy.
//! - **State is reconciled, not assumed**: the [`runtime`] keeps a
//!   single-writer snapshot of per-backend reachability; breaker-guarded
//!   cycles probe backends and drive the persistent download queue.
//! - **Events are the glue**: stored events pump through the
//!   [`EventDispatcher`] into sandboxed scripted functions, which reach the
//!   core only through the [`SandboxBridge`] capability set.
//!
//! ## Main modules
//!
//! - [`chain`]: [`ChainDefinition`], [`ChainEngine`], [`DataValue`],
//!   handlers, macros — build and run task chains.
//! - [`provider`]: [`Provider`], capability clients, [`MockProvider`],
//!   [`HttpProvider`], backend admin (list/pull).
//! - [`resolver`]: [`ResolveRequest`], [`SelectionPolicy`], name
//!   normalization.
//! - [`runtime`]: [`RuntimeState`], [`SyncCycle`], [`DownloadCycle`].
//! - [`breaker`]: [`CircuitBreaker`] with `execute`, `execute_with_retry`,
//!   `run_loop`.
//! - [`store`]: SQLite persistence (backends, models, groups, messages,
//!   functions, triggers, KV, job queue, events, remote hooks).
//! - [`hooks`]: [`HookRegistry`], [`ToolProvider`], command and OpenAPI
//!   providers.
//! - [`events`]: [`EventDispatcher`] with atomic-snapshot caches.
//! - [`bridge`]: [`SandboxBridge`] capabilities for scripted functions.
//! - [`bus`]: in-process pub/sub topics (`trigger_cycle`, download
//!   progress).
//! - [`chat`]: [`ChatMessage`], [`ChatHistory`], [`ToolCall`] shared types.
//! - [`boot`]: [`WeftRuntime`] — compose the whole core from typed settings.
//!
//! Key types are re-exported at the crate root:
//! `use weft::{ChainEngine, ChainDefinition, DataValue, WeftError};`

pub mod boot;
pub mod breaker;
pub mod bridge;
pub mod bus;
pub mod chain;
pub mod chat;
pub mod error;
pub mod events;
pub mod hooks;
pub mod provider;
pub mod resolver;
pub mod runtime;
pub mod store;

pub use boot::WeftRuntime;
pub use breaker::{BreakerState, CircuitBreaker};
pub use bridge::{EngineCell, InMemoryChains, SandboxBridge, ScriptExecutor};
pub use bus::PubSub;
pub use chain::{
    CapturedStateUnit, ChainContext, ChainDefinition, ChainEngine, ChainOutcome, DataType,
    DataValue, HandlerKind, TaskDefinition, TaskRunner,
};
pub use chat::{ChatHistory, ChatMessage, ChatRole, FinishReason, ToolCall};
pub use error::WeftError;
pub use events::EventDispatcher;
pub use hooks::{HookCall, HookRegistry, SimpleRegistry, ToolProvider, ToolSpec};
pub use provider::{Capability, HttpProvider, MockProvider, Provider};
pub use resolver::{ResolveRequest, SelectionPolicy};
pub use runtime::{DownloadCycle, RuntimeState, SyncCycle};
pub use store::SqliteStore;
