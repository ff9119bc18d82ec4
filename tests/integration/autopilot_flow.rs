//! The autopilot driven through the conversation's tool loop.

use std::sync::Arc;

use hark::autopilot::{AUTOPILOT_TOOL_NAME, registry_with_autopilot};
use hark::desktop::AutomationBackend;
use hark::llm::ModelResponse;
use hark::{LoopConfig, ToolCallLoop, ToolRegistry};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::helpers::{
    FixedScreen, FlakyTool, RecordingBackend, ScriptedModel, test_config, tool_call,
};

struct Rig {
    agent: ToolCallLoop,
    planner: Arc<ScriptedModel>,
    backend: Arc<RecordingBackend>,
    flaky: Arc<FlakyTool>,
}

fn rig(conversation: ScriptedModel, planner: ScriptedModel) -> Rig {
    let config = test_config();
    let planner = Arc::new(planner);
    let backend = Arc::new(RecordingBackend::default());
    let flaky = Arc::new(FlakyTool::new(0));

    let mut base = ToolRegistry::new();
    base.register(flaky.clone());
    let registry = registry_with_autopilot(
        base,
        planner.clone(),
        Arc::new(FixedScreen),
        Some(backend.clone() as Arc<dyn AutomationBackend>),
        config.autopilot.clone(),
        CancellationToken::new(),
    );

    Rig {
        agent: ToolCallLoop::new(
            LoopConfig::from_agent(&config.agent, &config.wake.wake_word),
            Arc::new(conversation),
            Arc::new(registry),
        ),
        planner,
        backend,
        flaky,
    }
}

#[tokio::test]
async fn autopilot_runs_steps_and_reports_success() {
    let rig = rig(
        ScriptedModel::new(vec![
            Ok(tool_call(
                AUTOPILOT_TOOL_NAME,
                json!({"objective": "submit the form", "max_iterations": 3}),
            )),
            Ok(ModelResponse::text("The form is submitted.")),
        ]),
        ScriptedModel::replies(&[
            r#"```json
{"steps": [
  {"function": "press", "parameters": {"key": "enter"}, "human_readable_justification": "Submit"},
  {"tool": "flaky", "parameters": {}, "human_readable_justification": "Check"}
], "done": null}
```"#,
            r#"{"steps": [], "done": "Form submitted."}"#,
        ]),
    );

    let outcome = rig.agent.run("submit the form", None, None).await.unwrap();

    assert_eq!(rig.planner.calls(), 2);
    assert_eq!(*rig.backend.0.lock().unwrap(), vec!["press(enter) x1"]);
    assert_eq!(rig.flaky.attempts(), 1);

    let result = &outcome.invocations[0].result;
    assert_eq!(outcome.invocations[0].name, AUTOPILOT_TOOL_NAME);
    assert_eq!(result.get("status"), Some(&json!("success")));
    assert_eq!(result.get("message"), Some(&json!("Form submitted.")));
    assert_eq!(result.get("steps_taken"), Some(&json!(2)));
    assert_eq!(outcome.speakable.as_deref(), Some("The form is submitted."));
}

#[tokio::test]
async fn autopilot_cannot_call_itself_and_reports_partial() {
    let rig = rig(
        ScriptedModel::new(vec![
            Ok(tool_call(
                AUTOPILOT_TOOL_NAME,
                json!({"objective": "do it again", "max_iterations": 2}),
            )),
            Ok(ModelResponse::text("I only got part of the way.")),
        ]),
        ScriptedModel::replies(&[
            r#"{"steps": [{"tool": "execute_autopilot", "parameters": {"objective": "loop"}}], "done": null}"#,
        ]),
    );

    let outcome = rig.agent.run("do it again", None, None).await.unwrap();

    // One planning call per iteration; the nested call never ran.
    assert_eq!(rig.planner.calls(), 2);
    let invocation = &outcome.invocations[0];
    assert_eq!(invocation.attempts, 1);
    assert_eq!(invocation.result.get("status"), Some(&json!("partial")));
    assert_eq!(invocation.result.get("steps_taken"), Some(&json!(2)));
    assert!(
        invocation
            .result
            .get("message")
            .and_then(|m| m.as_str())
            .is_some_and(|m| m.contains("maximum iterations (2)"))
    );
    assert!(rig.backend.0.lock().unwrap().is_empty());
}
