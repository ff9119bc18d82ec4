//! Step plans returned by the model during an autopilot iteration.
//!
//! The model is asked for `{ "steps": [...], "done": null | "message" }`.
//! Replies often arrive wrapped in Markdown fences or surrounded by prose,
//! so the JSON object is located first and then deserialized.

use serde::Deserialize;
use serde_json::{Map, Value};

/// One action the model asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum AutopilotStep {
    /// A raw UI primitive such as `click` or `write`.
    Automation {
        function: String,
        parameters: Map<String, Value>,
        justification: Option<String>,
    },
    /// A named tool from the registry.
    ToolCall {
        name: String,
        parameters: Map<String, Value>,
        justification: Option<String>,
    },
}

impl AutopilotStep {
    /// The model's explanation, if it gave one.
    pub fn justification(&self) -> Option<&str> {
        match self {
            Self::Automation { justification, .. } | Self::ToolCall { justification, .. } => {
                justification.as_deref()
            }
        }
    }
}

/// A decoded model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutopilotPlan {
    /// Steps to run this iteration, in order.
    pub steps: Vec<AutopilotStep>,
    /// Completion message. When set, the objective is finished.
    pub done: Option<String>,
}

/// Why a reply could not be turned into a plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("no JSON object in model reply")]
    NoJson,
    #[error("malformed plan JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    steps: Vec<RawStep>,
    #[serde(default)]
    done: Option<Value>,
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(default)]
    function: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    parameters: Option<Map<String, Value>>,
    #[serde(default, alias = "justification")]
    human_readable_justification: Option<String>,
}

impl RawStep {
    fn into_step(self) -> Option<AutopilotStep> {
        let parameters = self.parameters.unwrap_or_default();
        let justification = self
            .human_readable_justification
            .filter(|j| !j.trim().is_empty());
        if let Some(name) = self.tool {
            return Some(AutopilotStep::ToolCall {
                name,
                parameters,
                justification,
            });
        }
        self.function.map(|function| AutopilotStep::Automation {
            function,
            parameters,
            justification,
        })
    }
}

/// Decode a model reply into a plan.
///
/// Steps naming neither a `function` nor a `tool` are dropped. A `done`
/// value that is null, `false` or an empty string means "not done".
///
/// # Errors
///
/// Returns [`PlanError`] when no JSON object can be found or it does not
/// have the plan shape.
pub fn parse_plan(reply: &str) -> Result<AutopilotPlan, PlanError> {
    let cleaned = strip_markdown_fences(reply);
    let json = extract_json_object(&cleaned).ok_or(PlanError::NoJson)?;
    let raw: RawPlan = serde_json::from_str(json)?;

    let total = raw.steps.len();
    let steps: Vec<AutopilotStep> = raw
        .steps
        .into_iter()
        .filter_map(RawStep::into_step)
        .collect();
    if steps.len() < total {
        tracing::warn!(
            dropped = total - steps.len(),
            "autopilot plan had steps without a function or tool"
        );
    }

    let done = match raw.done {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Bool(true)) => Some("Task complete.".to_owned()),
        _ => None,
    };

    Ok(AutopilotPlan { steps, done })
}

/// Remove one ```lang … ``` wrapper if present.
fn strip_markdown_fences(text: &str) -> String {
    let mut s = text.to_owned();
    if let Some(start) = s.find("```") {
        let fence_end = s[start + 3..]
            .find('\n')
            .map(|i| start + 3 + i + 1)
            .unwrap_or(start + 3);
        s.replace_range(start..fence_end, "");
    }
    if let Some(end) = s.rfind("```") {
        s.replace_range(end..end + 3, "");
    }
    s
}

/// The outermost balanced `{...}`, skipping braces inside strings.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
