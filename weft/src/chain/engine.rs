//! The task-chain engine: a finite-state machine over task definitions.
//!
//! Per execution the engine keeps an ordered list of captured state units,
//! the current typed value, and the current task id (initially the first
//! task in declaration order). Each step resolves the input (compose rules,
//! type conversion), expands macros, dispatches the handler under retry and
//! timeout, records a unit, and evaluates the transition branches in
//! declaration order. Handler errors follow the task's `on_failure` target;
//! cancellation surfaces `Canceled` without running further tasks or the
//! on-failure branch.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chat::ChatMessage;
use crate::error::WeftError;

use super::definition::{
    ChainDefinition, ComposeStrategy, HandlerKind, TaskDefinition, TASK_END, TASK_ERROR,
};
use super::macros::expand_macros;
use super::runner::{HandlerOutput, TaskRunner};
use super::value::{DataType, DataValue};

/// Upper bound on steps per execution, against cyclic chains that never
/// reach a terminal.
const MAX_STEPS: usize = 1000;

/// Per-execution context: cancellation, template variables, and the sandbox
/// re-entry depth.
#[derive(Clone, Default)]
pub struct ChainContext {
    pub cancel: CancellationToken,
    /// Variables consulted by `{{var:NAME}}` and compose rules.
    pub vars: HashMap<String, DataValue>,
    /// Re-entry depth for executions started from the sandbox bridge.
    pub depth: u32,
}

impl ChainContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: DataValue) -> Self {
        self.vars.insert(name.into(), value);
        self
    }
}

/// Execution record of one task invocation, appended in execution order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapturedStateUnit {
    pub task_id: String,
    pub handler: HandlerKind,
    pub input: DataValue,
    pub input_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<DataValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<DataType>,
    /// Transition target taken after this task ("" when the chain failed).
    pub transition: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Raw prompt after macro expansion; recorded in debug mode only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_prompt: Option<String>,
    /// Transition evaluation trace; recorded in debug mode only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub eval_trace: Vec<String>,
}

/// Final result of one chain execution.
#[derive(Clone, Debug)]
pub struct ChainOutcome {
    pub value: DataValue,
    pub data_type: DataType,
    pub units: Vec<CapturedStateUnit>,
}

/// The engine. Cheap to share behind an `Arc`.
pub struct ChainEngine {
    runner: TaskRunner,
}

impl ChainEngine {
    pub fn new(runner: TaskRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Executes `chain` from its first task until `end`, the error sentinel,
    /// an unhandled error, or cancellation.
    pub async fn execute(
        &self,
        ctx: &ChainContext,
        chain: &ChainDefinition,
        input: DataValue,
    ) -> Result<ChainOutcome, WeftError> {
        chain.validate()?;
        let tools_block = self.runner.hooks().tools_block().await;

        let mut units: Vec<CapturedStateUnit> = Vec::new();
        let mut current = input;
        let mut task_id = chain
            .first_task_id()
            .ok_or_else(|| WeftError::Unprocessable(format!("chain {} is empty", chain.id)))?
            .to_string();

        for _ in 0..MAX_STEPS {
            if ctx.cancel.is_cancelled() {
                return Err(WeftError::Canceled);
            }
            let task = chain
                .task(&task_id)
                .ok_or_else(|| WeftError::NotFound(format!("task {task_id}")))?;

            let prompt = expand_macros(
                task.prompt_template.as_deref().unwrap_or(""),
                &ctx.vars,
                &tools_block,
            );
            let system = expand_macros(
                task.system_instruction.as_deref().unwrap_or(""),
                &ctx.vars,
                &tools_block,
            );

            let started = Instant::now();
            let step = self
                .run_step(ctx, chain, task, &current, &prompt, &system)
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let mut unit = CapturedStateUnit {
                task_id: task.id.clone(),
                handler: task.handler,
                input: current.clone(),
                input_type: current.data_type(),
                output: None,
                output_type: None,
                transition: String::new(),
                duration_ms,
                error: None,
                raw_prompt: chain.debug.then(|| prompt.clone()),
                eval_trace: Vec::new(),
            };

            match step {
                Ok(out) => {
                    let (next, trace) = select_branch(task, &out);
                    unit.output = Some(out.value.clone());
                    unit.output_type = Some(out.value.data_type());
                    if chain.debug {
                        unit.eval_trace = trace;
                    }
                    let Some(next) = next else {
                        unit.error = Some("no transition matched".to_string());
                        units.push(unit);
                        tracing::debug!(chain = %chain.id, task = %task.id, "no transition");
                        return Err(WeftError::NoTransition {
                            task: task.id.clone(),
                        });
                    };
                    unit.transition = next.clone();
                    units.push(unit);
                    current = out.value;

                    if next == TASK_END {
                        let data_type = current.data_type();
                        return Ok(ChainOutcome {
                            value: current,
                            data_type,
                            units,
                        });
                    }
                    if next == TASK_ERROR {
                        return Err(WeftError::ChainFailed(format!(
                            "chain {} routed to error sentinel from task {}",
                            chain.id, task.id
                        )));
                    }
                    task_id = next;
                }
                Err(e) => {
                    if matches!(e, WeftError::Canceled) {
                        // No unit, no on-failure: the execution is torn down.
                        return Err(WeftError::Canceled);
                    }
                    unit.error = Some(e.to_string());
                    let on_failure = task
                        .transition
                        .on_failure
                        .clone()
                        .filter(|t| !t.is_empty());
                    match on_failure {
                        Some(target) => {
                            unit.transition = target.clone();
                            units.push(unit);
                            tracing::debug!(
                                chain = %chain.id, task = %task.id, error = %e,
                                "handler failed, following on_failure"
                            );
                            if target == TASK_END {
                                let data_type = current.data_type();
                                return Ok(ChainOutcome {
                                    value: current,
                                    data_type,
                                    units,
                                });
                            }
                            if target == TASK_ERROR {
                                return Err(WeftError::ChainFailed(e.to_string()));
                            }
                            task_id = target;
                        }
                        None => {
                            units.push(unit);
                            return Err(e);
                        }
                    }
                }
            }
        }
        Err(WeftError::ChainFailed(format!(
            "chain {} exceeded {MAX_STEPS} steps",
            chain.id
        )))
    }

    /// One handler invocation: compose, convert, token guard, retry, timeout.
    async fn run_step(
        &self,
        ctx: &ChainContext,
        chain: &ChainDefinition,
        task: &TaskDefinition,
        current: &DataValue,
        prompt: &str,
        system: &str,
    ) -> Result<HandlerOutput, WeftError> {
        let composed = compose_input(task, current, &ctx.vars);
        let task_input = composed.convert_to(task.handler.expected_input())?;

        if task.handler == HandlerKind::ChatCompletion {
            if let (Some(limit), DataValue::ChatHistory(history)) =
                (chain.token_limit, &task_input)
            {
                let estimate = history.estimate_tokens();
                if estimate > limit {
                    return Err(WeftError::TokenLimit(format!(
                        "history ≈{estimate} tokens over chain limit {limit}"
                    )));
                }
            }
        }

        let attempts = task.retry.unwrap_or(0) + 1;
        let mut last_err = None;
        for attempt in 0..attempts {
            let dispatch = self
                .runner
                .dispatch(&ctx.cancel, task, &task_input, prompt, system);
            let result = match task.timeout {
                Some(secs) => {
                    let limit = Duration::from_secs_f64(secs);
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => Err(WeftError::Canceled),
                        out = tokio::time::timeout(limit, dispatch) => match out {
                            Ok(inner) => inner,
                            Err(_) => Err(WeftError::Timeout(limit)),
                        },
                    }
                }
                None => tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(WeftError::Canceled),
                    out = dispatch => out,
                },
            };
            match result {
                Ok(out) => return Ok(out),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    tracing::debug!(task = %task.id, attempt, error = %e, "retrying task");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| WeftError::ChainFailed("retry bookkeeping".into())))
    }
}

/// Applies the task's compose rule to the incoming value.
fn compose_input(
    task: &TaskDefinition,
    current: &DataValue,
    vars: &HashMap<String, DataValue>,
) -> DataValue {
    let Some(spec) = &task.compose else {
        return current.clone();
    };
    let Some(var) = vars.get(&spec.with_var) else {
        // Undefined variables resolve to nothing; keep the incoming value.
        return current.clone();
    };
    match spec.strategy {
        ComposeStrategy::Override => var.clone(),
        ComposeStrategy::AppendVar => match current {
            DataValue::ChatHistory(history) => {
                let mut history = history.clone();
                history.messages.push(ChatMessage::user(var.render()));
                DataValue::ChatHistory(history)
            }
            DataValue::String(s) if s.is_empty() => DataValue::String(var.render()),
            DataValue::String(s) => DataValue::String(format!("{s}\n{}", var.render())),
            other => other.clone(),
        },
    }
}

/// Evaluates branches in declaration order; returns the winning target and
/// the evaluation trace.
fn select_branch(task: &TaskDefinition, out: &HandlerOutput) -> (Option<String>, Vec<String>) {
    let mut trace = Vec::new();
    for branch in &task.transition.branches {
        let hit = branch.matches(&out.value, &out.transition);
        trace.push(format!(
            "{:?} {:?} vs {:?} -> {}",
            branch.operator,
            branch.when.as_deref().unwrap_or(""),
            out.transition,
            if hit { "take" } else { "skip" }
        ));
        if hit {
            return (Some(branch.goto.clone()), trace);
        }
    }
    trace.push("no branch matched".to_string());
    (None, trace)
}
