//! Integration test: the agentic tool-call loop as an emergent chain shape.
//!
//! Two tasks: `chat_completion` (branch `equals "tool-call"` →
//! `execute_tool_calls`, `default` → end) and `execute_tool_calls` (default
//! back to `chat_completion`). The scripted model first requests
//! `get_weather`, then answers with the tool result folded in.

mod init_logging;

use std::sync::Arc;

use weft::chain::{
    BranchOperator, ExecuteConfig, StaticProviders, TaskRunner, Transition, TransitionBranch,
    TASK_END, TRANSITION_TOOL_CALL,
};
use weft::chat::ChatRole;
use weft::hooks::StaticToolProvider;
use weft::{
    ChainContext, ChainDefinition, ChainEngine, ChatHistory, DataType, DataValue, HandlerKind,
    MockProvider, Provider, SelectionPolicy, SimpleRegistry, TaskDefinition, ToolCall, ToolSpec,
};

fn chat_task(id: &str) -> TaskDefinition {
    TaskDefinition {
        id: id.into(),
        description: String::new(),
        handler: HandlerKind::ChatCompletion,
        system_instruction: None,
        prompt_template: None,
        execute_config: Some(ExecuteConfig {
            model: "llama2".into(),
            provider: String::new(),
            temperature: None,
        }),
        valid_conditions: None,
        hook: None,
        compose: None,
        retry: None,
        timeout: None,
        transition: Transition {
            on_failure: None,
            branches: vec![
                TransitionBranch {
                    operator: BranchOperator::Equals,
                    when: Some(TRANSITION_TOOL_CALL.into()),
                    goto: "run_tools".into(),
                },
                TransitionBranch {
                    operator: BranchOperator::Default,
                    when: None,
                    goto: TASK_END.into(),
                },
            ],
        },
    }
}

fn tools_task(id: &str) -> TaskDefinition {
    TaskDefinition {
        id: id.into(),
        description: String::new(),
        handler: HandlerKind::ExecuteToolCalls,
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
                goto: "chat".into(),
            }],
        },
    }
}

#[tokio::test]
async fn tool_call_loop_round_trips() {
    let provider = MockProvider::new("llama2", 4096)
        .with_tool_call_reply(vec![ToolCall {
            id: "c1".into(),
            name: "get_weather".into(),
            arguments: "{\"city\":\"Paris\"}".into(),
        }])
        .with_chat_reply("It is sunny in Paris today.");
    let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(provider)];

    let registry = Arc::new(SimpleRegistry::new());
    registry.register(Arc::new(
        StaticToolProvider::new("weather").with_tool(
            ToolSpec {
                name: "get_weather".into(),
                description: Some("Current weather for a city".into()),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {"city": {"type": "string"}}
                }),
            },
            |call| {
                let city = call.args.get("city").cloned().unwrap_or_default();
                Ok((
                    DataValue::String(format!("sunny in {city}")),
                    DataType::String,
                ))
            },
        ),
    ));

    let engine = ChainEngine::new(TaskRunner::new(
        Arc::new(StaticProviders(providers)),
        registry,
        SelectionPolicy::Random,
    ));

    let chain = ChainDefinition {
        id: "weather-agent".into(),
        description: String::new(),
        debug: false,
        token_limit: None,
        tasks: vec![chat_task("chat"), tools_task("run_tools")],
    };

    let input = DataValue::ChatHistory(ChatHistory::from_user("Weather in Paris?"));
    let outcome = engine
        .execute(&ChainContext::new(), &chain, input)
        .await
        .expect("loop completes");

    // chat (tool-call) → run_tools → chat (stop) = at least three units.
    assert!(outcome.units.len() >= 3, "units: {}", outcome.units.len());
    assert_eq!(outcome.units[0].transition, "run_tools");
    assert_eq!(outcome.units[1].transition, "chat");
    assert_eq!(outcome.units.last().unwrap().transition, TASK_END);

    let DataValue::ChatHistory(history) = &outcome.value else {
        panic!("expected chat history, got {:?}", outcome.data_type);
    };
    let last = history.messages.last().expect("messages");
    assert_eq!(last.role, ChatRole::Assistant);
    assert!(last.content.contains("sunny"));

    // The tool result itself was appended as a tool-role message answering c1.
    let tool_msg = history
        .messages
        .iter()
        .find(|m| m.role == ChatRole::Tool)
        .expect("tool message");
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
    assert!(tool_msg.content.contains("sunny in Paris"));
}
