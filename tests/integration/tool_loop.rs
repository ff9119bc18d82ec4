//! Tool-calling loop against scripted models and tools.

use std::sync::Arc;

use hark::agent::StopReason;
use hark::llm::{ModelResponse, Role};
use hark::{ConversationHistory, LoopConfig, ToolCallLoop, ToolRegistry};
use serde_json::json;

use crate::helpers::{FlakyTool, ScriptedModel, test_config, tool_call};

fn agent(model: Arc<ScriptedModel>, tool: Arc<FlakyTool>) -> ToolCallLoop {
    let config = test_config();
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    ToolCallLoop::new(
        LoopConfig::from_agent(&config.agent, &config.wake.wake_word),
        model,
        Arc::new(registry),
    )
}

#[tokio::test]
async fn flaky_tool_succeeds_within_its_retry_budget() {
    let tool = Arc::new(FlakyTool::new(2));
    let model = Arc::new(ScriptedModel::new(vec![
        Ok(tool_call("flaky", json!({}))),
        Ok(ModelResponse::text("It worked in the end.")),
    ]));

    let outcome = agent(model.clone(), tool.clone())
        .run("try the flaky thing", None, None)
        .await
        .unwrap();

    assert_eq!(tool.attempts(), 3);
    assert_eq!(outcome.invocations.len(), 1);
    assert_eq!(outcome.invocations[0].attempts, 3);
    assert!(!outcome.invocations[0].result.is_failure());
    assert_eq!(outcome.invocations[0].result.get("attempt"), Some(&json!(3)));
    assert_eq!(outcome.speakable.as_deref(), Some("It worked in the end."));
}

#[tokio::test]
async fn exhausted_tool_hands_the_model_a_structured_failure() {
    let tool = Arc::new(FlakyTool::new(u32::MAX));
    let model = Arc::new(ScriptedModel::new(vec![
        Ok(tool_call("flaky", json!({}))),
        Ok(ModelResponse::text("That tool is broken, sorry.")),
    ]));

    let outcome = agent(model.clone(), tool.clone())
        .run("try the flaky thing", None, None)
        .await
        .unwrap();

    // One attempt plus two retries.
    assert_eq!(tool.attempts(), 3);
    let result = &outcome.invocations[0].result;
    assert!(result.is_failure());
    assert_eq!(result.get("attempts"), Some(&json!(3)));
    assert_eq!(result.get("tool_name"), Some(&json!("flaky")));
    assert!(
        result
            .get("suggestion")
            .and_then(|v| v.as_str())
            .is_some_and(|s| s.contains("alternative"))
    );
    // The failure was sent back and the model answered.
    assert_eq!(model.calls(), 2);
    assert_eq!(outcome.stop_reason, StopReason::Complete);
    let roles: Vec<Role> = outcome.new_turns.iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Model, Role::ToolResult, Role::Model]
    );
}

#[tokio::test]
async fn endless_tool_requests_stop_at_the_round_trip_cap() {
    let tool = Arc::new(FlakyTool::new(0));
    let model = Arc::new(ScriptedModel::new(vec![Ok(tool_call("flaky", json!({})))]));

    let outcome = agent(model.clone(), tool.clone())
        .run("loop forever", None, None)
        .await
        .unwrap();

    let cap = test_config().agent.max_tool_iterations;
    assert_eq!(model.calls(), cap);
    assert_eq!(outcome.round_trips, cap);
    assert_eq!(outcome.stop_reason, StopReason::MaxIterations);
    assert_eq!(tool.attempts(), cap);
}

#[tokio::test]
async fn history_stays_bounded_across_many_turns() {
    let tool = Arc::new(FlakyTool::new(0));
    let model = Arc::new(ScriptedModel::new(vec![
        Ok(tool_call("flaky", json!({}))),
        Ok(ModelResponse::text("Done with that one.")),
    ]));
    let agent = agent(model.clone(), tool);
    let mut history = ConversationHistory::new(6);

    for i in 0..12 {
        let outcome = agent
            .run(&format!("request {i}"), None, Some(history.turns()))
            .await
            .unwrap();
        history.extend(outcome.new_turns);

        assert!(history.len() <= 6);
        assert_ne!(history.turns()[0].role, Role::ToolResult);
    }

    // Every request saw at most the bound plus its own turns.
    let counts = model.turn_counts.lock().unwrap();
    assert!(counts.iter().all(|&n| n <= 6 + 3));
}
