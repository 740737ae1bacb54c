//! Integration test: one-task prompt chain, String in, String out.
//!
//! A single `raw_string` task asks for the capital of Italy against a
//! scripted provider; the chain ends after one captured state unit.

mod init_logging;

use std::sync::Arc;

use weft::chain::{
    BranchOperator, ExecuteConfig, StaticProviders, TaskRunner, Transition, TransitionBranch,
    TASK_END,
};
use weft::{
    ChainContext, ChainDefinition, ChainEngine, DataType, DataValue, HandlerKind, MockProvider,
    Provider, SelectionPolicy, SimpleRegistry, TaskDefinition,
};

fn engine(provider: MockProvider) -> ChainEngine {
    let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(provider)];
    ChainEngine::new(TaskRunner::new(
        Arc::new(StaticProviders(providers)),
        Arc::new(SimpleRegistry::new()),
        SelectionPolicy::Random,
    ))
}

#[tokio::test]
async fn simple_prompt_chain_answers_rome() {
    let engine = engine(MockProvider::new("llama2", 4096).with_prompt_response("Rome"));

    let chain = ChainDefinition {
        id: "capital-qa".into(),
        description: String::new(),
        debug: false,
        token_limit: None,
        tasks: vec![TaskDefinition {
            id: "ask".into(),
            description: String::new(),
            handler: HandlerKind::RawString,
            system_instruction: None,
            prompt_template: Some("Capital of Italy?".into()),
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
                branches: vec![TransitionBranch {
                    operator: BranchOperator::Default,
                    when: None,
                    goto: TASK_END.into(),
                }],
            },
        }],
    };

    let outcome = engine
        .execute(&ChainContext::new(), &chain, DataValue::String(String::new()))
        .await
        .expect("chain runs");

    assert_eq!(outcome.units.len(), 1);
    assert_eq!(outcome.units[0].task_id, "ask");
    assert_eq!(outcome.data_type, DataType::String);
    assert!(outcome.value.render().to_lowercase().contains("rome"));
    assert_eq!(outcome.units[0].transition, TASK_END);
}
