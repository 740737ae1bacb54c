//! Chain and task definitions: the persisted JSON shape of a workflow.
//!
//! A chain is a directed state machine over tasks. Each task names a handler,
//! handler-specific config, and a transition record whose branches are
//! evaluated in declaration order against the task's output — the first
//! satisfied branch wins and `default` matches unconditionally. Every `goto`
//! must resolve to another task id, the terminal `end`, or the error
//! sentinel.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::WeftError;

use super::value::{DataType, DataValue};

/// Terminal target: successful chain exit.
pub const TASK_END: &str = "end";
/// Error sentinel target: the chain fails when routed here.
pub const TASK_ERROR: &str = "error";

/// Handler kinds dispatchable by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    RawString,
    PromptToCondition,
    ParseNumber,
    ParseRange,
    Embedding,
    ChatCompletion,
    ExecuteToolCalls,
    Hook,
    ConvertToOpenaiChatResponse,
    PromptToJs,
}

impl HandlerKind {
    /// Input type the handler consumes; the engine converts the current value
    /// to this before dispatch.
    pub fn expected_input(&self) -> DataType {
        match self {
            HandlerKind::RawString
            | HandlerKind::PromptToCondition
            | HandlerKind::ParseNumber
            | HandlerKind::ParseRange
            | HandlerKind::Embedding
            | HandlerKind::PromptToJs => DataType::String,
            HandlerKind::ChatCompletion
            | HandlerKind::ExecuteToolCalls
            | HandlerKind::ConvertToOpenaiChatResponse => DataType::ChatHistory,
            HandlerKind::Hook => DataType::Any,
        }
    }
}

/// Model/provider selection for handlers that call a language model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteConfig {
    #[serde(default)]
    pub model: String,
    /// Provider-type tag; empty means any type.
    #[serde(default)]
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Hook invocation config for `hook` tasks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSpec {
    pub name: String,
    /// Tool within the hook; when absent the hook's sole tool is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

/// Merge rule applied to the incoming value before type conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposeStrategy {
    /// Replace the incoming value with the named variable.
    #[default]
    Override,
    /// Append the variable's rendering to the incoming value (as a user
    /// message for chat histories, newline-joined for strings).
    AppendVar,
}

/// Compose instruction: merge a context variable into the task input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeSpec {
    pub with_var: String,
    #[serde(default)]
    pub strategy: ComposeStrategy,
}

/// Branch operator; comparison semantics follow the output value's tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchOperator {
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "equals")]
    Equals,
    #[serde(rename = "greater-than")]
    GreaterThan,
    #[serde(rename = "less-than")]
    LessThan,
    #[serde(rename = "in-set")]
    InSet,
    #[serde(rename = "regex-match")]
    RegexMatch,
}

/// One transition branch: operator, comparison value, target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionBranch {
    pub operator: BranchOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    pub goto: String,
}

impl TransitionBranch {
    /// Whether this branch is satisfied by the output. `value` carries the
    /// typed output; `rendered` is the transition string (output rendering,
    /// or the handler's explicit transition value such as `"tool-call"`).
    pub fn matches(&self, value: &DataValue, rendered: &str) -> bool {
        let when = self.when.as_deref().unwrap_or("");
        match self.operator {
            BranchOperator::Default => true,
            BranchOperator::Equals => match value {
                DataValue::Int(i) => when.trim().parse::<i64>() == Ok(*i),
                DataValue::Float(f) => when.trim().parse::<f64>().map(|w| w == *f).unwrap_or(false),
                DataValue::Bool(b) => when.trim().parse::<bool>() == Ok(*b),
                _ => rendered == when,
            },
            BranchOperator::GreaterThan => match (value.as_number(), when.trim().parse::<f64>()) {
                (Some(v), Ok(w)) => v > w,
                _ => false,
            },
            BranchOperator::LessThan => match (value.as_number(), when.trim().parse::<f64>()) {
                (Some(v), Ok(w)) => v < w,
                _ => false,
            },
            BranchOperator::InSet => when
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate == rendered),
            BranchOperator::RegexMatch => match regex::Regex::new(when) {
                Ok(re) => re.is_match(rendered),
                Err(e) => {
                    tracing::warn!(pattern = %when, error = %e, "invalid branch regex");
                    false
                }
            },
        }
    }
}

/// Transition record: ordered branches plus an on-failure target.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Task to jump to when the handler errors; empty fails the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    #[serde(default)]
    pub branches: Vec<TransitionBranch>,
}

/// One task in a chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub handler: HandlerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_config: Option<ExecuteConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_conditions: Option<HashMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<HookSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose: Option<ComposeSpec>,
    /// Retries for transient handler errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    /// Handler timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    pub transition: Transition,
}

/// One chain: ordered tasks plus a declared token limit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_limit: Option<i64>,
    pub tasks: Vec<TaskDefinition>,
}

impl ChainDefinition {
    /// Validates structure: at least one task, unique ids, and every branch
    /// `goto` / `on_failure` resolving to a task id, `end`, or the error
    /// sentinel.
    pub fn validate(&self) -> Result<(), WeftError> {
        if self.tasks.is_empty() {
            return Err(WeftError::Unprocessable(format!(
                "chain {} has no tasks",
                self.id
            )));
        }
        let mut ids = HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(WeftError::Unprocessable(format!(
                    "duplicate task id {} in chain {}",
                    task.id, self.id
                )));
            }
        }
        let resolves = |target: &str| {
            target == TASK_END || target == TASK_ERROR || ids.contains(target)
        };
        for task in &self.tasks {
            for branch in &task.transition.branches {
                if !resolves(&branch.goto) {
                    return Err(WeftError::Unprocessable(format!(
                        "task {}: branch goto {:?} resolves to nothing",
                        task.id, branch.goto
                    )));
                }
            }
            if let Some(on_failure) = &task.transition.on_failure {
                if !on_failure.is_empty() && !resolves(on_failure) {
                    return Err(WeftError::Unprocessable(format!(
                        "task {}: on_failure {:?} resolves to nothing",
                        task.id, on_failure
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Entry point: first task in declaration order.
    pub fn first_task_id(&self) -> Option<&str> {
        self.tasks.first().map(|t| t.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, goto: &str) -> TaskDefinition {
        TaskDefinition {
            id: id.into(),
            description: String::new(),
            handler: HandlerKind::RawString,
            system_instruction: None,
            prompt_template: None,
            execute_config: None,
            valid_conditions: None,
            hook: None,
            compose: None,
            retry: None,
            timeout: None,
            transition: Transition {
                on_failure: None,
                branches: vec![TransitionBranch {
                    operator: BranchOperator::Default,
                    when: None,
                    goto: goto.into(),
                }],
            },
        }
    }

    /// **Scenario**: wire format round-trips, including operator names.
    #[test]
    fn chain_json_round_trip() {
        let json = serde_json::json!({
            "id": "qa",
            "debug": true,
            "token_limit": 4096,
            "tasks": [{
                "id": "ask",
                "handler": "raw_string",
                "prompt_template": "Capital of Italy?",
                "execute_config": {"model": "llama2", "provider": "ollama"},
                "transition": {
                    "on_failure": "recover",
                    "branches": [
                        {"operator": "equals", "when": "tool-call", "goto": "tools"},
                        {"operator": "default", "goto": "end"}
                    ]
                }
            }]
        });
        let chain: ChainDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(chain.tasks[0].handler, HandlerKind::RawString);
        assert_eq!(
            chain.tasks[0].transition.branches[0].operator,
            BranchOperator::Equals
        );
        let back = serde_json::to_value(&chain).unwrap();
        assert_eq!(back["tasks"][0]["transition"]["branches"][1]["operator"], "default");
    }

    /// **Scenario**: a goto that resolves to nothing fails validation.
    #[test]
    fn dangling_goto_invalid() {
        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            token_limit: None,
            tasks: vec![task("a", "ghost")],
        };
        assert!(matches!(
            chain.validate(),
            Err(WeftError::Unprocessable(_))
        ));
    }

    /// **Scenario**: `end` and the error sentinel are valid targets.
    #[test]
    fn terminal_targets_valid() {
        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            token_limit: None,
            tasks: vec![task("a", TASK_END), task("b", TASK_ERROR)],
        };
        chain.validate().unwrap();
    }

    /// **Scenario**: operator semantics follow the output's type tag.
    #[test]
    fn branch_operator_semantics() {
        let eq = TransitionBranch {
            operator: BranchOperator::Equals,
            when: Some("5".into()),
            goto: TASK_END.into(),
        };
        assert!(eq.matches(&DataValue::Int(5), "5"));
        assert!(!eq.matches(&DataValue::Int(6), "6"));

        let gt = TransitionBranch {
            operator: BranchOperator::GreaterThan,
            when: Some("4".into()),
            goto: TASK_END.into(),
        };
        assert!(gt.matches(&DataValue::Float(4.5), "4.5"));
        assert!(!gt.matches(&DataValue::String("not a number".into()), "not a number"));

        let in_set = TransitionBranch {
            operator: BranchOperator::InSet,
            when: Some("yes, no, maybe".into()),
            goto: TASK_END.into(),
        };
        assert!(in_set.matches(&DataValue::String("maybe".into()), "maybe"));
        assert!(!in_set.matches(&DataValue::String("never".into()), "never"));

        let re = TransitionBranch {
            operator: BranchOperator::RegexMatch,
            when: Some("^tool-".into()),
            goto: TASK_END.into(),
        };
        assert!(re.matches(&DataValue::String("tool-call".into()), "tool-call"));

        let broken = TransitionBranch {
            operator: BranchOperator::RegexMatch,
            when: Some("([".into()),
            goto: TASK_END.into(),
        };
        assert!(!broken.matches(&DataValue::String("x".into()), "x"));
    }

    /// **Scenario**: declaration order decides when several branches match.
    #[test]
    fn first_satisfied_branch_wins() {
        let branches = [
            TransitionBranch {
                operator: BranchOperator::Equals,
                when: Some("hit".into()),
                goto: "first".into(),
            },
            TransitionBranch {
                operator: BranchOperator::Default,
                when: None,
                goto: "fallback".into(),
            },
        ];
        let value = DataValue::String("hit".into());
        let winner = branches
            .iter()
            .find(|b| b.matches(&value, "hit"))
            .map(|b| b.goto.as_str());
        assert_eq!(winner, Some("first"));
    }
}
