//! Task-chain engine: definitions, typed values, macros, handlers, executor.
//!
//! A chain definition (persisted as JSON) is interpreted as a finite-state
//! machine; each task dispatches to a typed handler and the output drives
//! the transition branches. See [`ChainEngine::execute`].

mod definition;
mod engine;
mod macros;
mod openai_compat;
mod runner;
mod value;

pub use definition::{
    BranchOperator, ChainDefinition, ComposeSpec, ComposeStrategy, ExecuteConfig, HandlerKind,
    HookSpec, TaskDefinition, Transition, TransitionBranch, TASK_END, TASK_ERROR,
};
pub use engine::{CapturedStateUnit, ChainContext, ChainEngine, ChainOutcome};
pub use macros::expand_macros;
pub use openai_compat::{
    history_from_request, request_from_history, response_from_history, OpenAiChatRequest,
    OpenAiChatResponse, OpenAiChoice, OpenAiMessage,
};
pub use runner::{
    HandlerOutput, ProviderSource, StaticProviders, TaskRunner, TRANSITION_TOOL_CALL,
};
pub use value::{DataType, DataValue};
