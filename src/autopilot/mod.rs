//! Autopilot: a bounded perceive-decide-act loop over the desktop.
//!
//! Each iteration captures the screen, asks the reasoning model for the
//! next few steps toward an objective and runs them, either as raw UI
//! primitives through an [`AutomationBackend`] or as named tools from the
//! [`ToolRegistry`]. The loop ends when the model reports `done`, when the
//! iteration budget runs out (a "partial" result, not a failure) or when
//! the screen cannot be captured.
//!
//! The loop is exposed to the conversational model as the
//! `execute_autopilot` tool via [`AutopilotTool`].

pub mod plan;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use plan::{AutopilotPlan, AutopilotStep, PlanError, parse_plan};
pub use prompt::build_prompt;

use crate::config::AutopilotConfig;
use crate::desktop::{AutomationBackend, AutomationCommand, AutomationError, ScreenCapture};
use crate::error::ToolError;
use crate::llm::{GenerateOptions, ImageAttachment, ReasoningModel, Turn};
use crate::tools::{Tool, ToolOutput, ToolRegistry, required_str};

/// Registry name of the autopilot tool.
pub const AUTOPILOT_TOOL_NAME: &str = "execute_autopilot";

/// How an autopilot run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutopilotOutcome {
    /// The model reported the objective complete.
    Success { message: String, steps_taken: u32 },
    /// The iteration budget ran out first.
    Partial { message: String, steps_taken: u32 },
    /// The run was stopped from outside.
    Cancelled { steps_taken: u32 },
    /// Screen capture or the model failed.
    Error { message: String },
}

impl AutopilotOutcome {
    /// The result payload handed back to the model.
    pub fn into_output(self) -> ToolOutput {
        match self {
            Self::Success {
                message,
                steps_taken,
            } => ToolOutput::success(message).with("steps_taken", steps_taken),
            Self::Partial {
                message,
                steps_taken,
            } => ToolOutput::from_value(json!({
                "status": "partial",
                "message": message,
                "steps_taken": steps_taken,
            })),
            Self::Cancelled { steps_taken } => ToolOutput::from_value(json!({
                "status": "cancelled",
                "message": "Autopilot was stopped before finishing.",
                "steps_taken": steps_taken,
            })),
            Self::Error { message } => ToolOutput::error(message),
        }
    }
}

/// Why a single step did not run.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("recursive autopilot call rejected")]
    Recursive,
    #[error(transparent)]
    Automation(#[from] AutomationError),
    #[error("tool {name} failed: {message}")]
    Tool { name: String, message: String },
}

/// The perceive-decide-act loop.
pub struct AutopilotLoop {
    model: Arc<dyn ReasoningModel>,
    registry: Arc<ToolRegistry>,
    screen: Arc<dyn ScreenCapture>,
    backend: Option<Arc<dyn AutomationBackend>>,
    config: AutopilotConfig,
    cancel: CancellationToken,
}

impl AutopilotLoop {
    /// Build a loop. `registry` should not contain the autopilot tool
    /// itself; recursive calls are rejected either way.
    pub fn new(
        model: Arc<dyn ReasoningModel>,
        registry: Arc<ToolRegistry>,
        screen: Arc<dyn ScreenCapture>,
        backend: Option<Arc<dyn AutomationBackend>>,
        config: AutopilotConfig,
    ) -> Self {
        Self {
            model,
            registry,
            screen,
            backend,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between iterations and steps once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Configured defaults.
    pub fn config(&self) -> &AutopilotConfig {
        &self.config
    }

    /// Work toward `objective` for at most `max_iterations` cycles.
    pub async fn run(&self, objective: &str, max_iterations: u32) -> AutopilotOutcome {
        let max_iterations = max_iterations.max(1);
        let tools = self.registry.describe();
        let options = GenerateOptions::default().with_temperature(self.config.temperature);
        tracing::info!(objective, max_iterations, "autopilot started");

        for step in 0..max_iterations {
            if self.cancel.is_cancelled() {
                tracing::info!(steps_taken = step, "autopilot cancelled");
                return AutopilotOutcome::Cancelled { steps_taken: step };
            }
            let span = tracing::info_span!("autopilot_iteration", step = step + 1, max_iterations);

            let shot = match self.screen.capture().instrument(span.clone()).await {
                Ok(shot) => shot,
                Err(e) => {
                    tracing::error!(parent: &span, "screen capture failed: {e}");
                    return AutopilotOutcome::Error {
                        message: "Failed to capture screenshot".to_owned(),
                    };
                }
            };
            let jpeg = match shot.to_jpeg(self.config.screenshot_jpeg_quality) {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    tracing::error!(parent: &span, "screenshot encoding failed: {e}");
                    return AutopilotOutcome::Error {
                        message: "Failed to capture screenshot".to_owned(),
                    };
                }
            };

            let prompt = build_prompt(objective, step, shot.width, shot.height, &tools);
            let turns = [Turn::user(prompt, Some(ImageAttachment::jpeg(&jpeg)))];
            let reply = match self
                .model
                .generate(&turns, &[], None, &options)
                .instrument(span.clone())
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(parent: &span, "autopilot model call failed: {e}");
                    return AutopilotOutcome::Error {
                        message: format!("Autopilot error: {e}"),
                    };
                }
            };

            let plan = match parse_plan(&reply.text) {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!(parent: &span, "skipping iteration: {e}");
                    continue;
                }
            };

            if let Some(message) = plan.done {
                tracing::info!(parent: &span, "autopilot finished: {message}");
                return AutopilotOutcome::Success {
                    message,
                    steps_taken: step + 1,
                };
            }

            if plan.steps.is_empty() {
                tracing::debug!(parent: &span, "no steps returned, continuing");
            }
            for (index, item) in plan.steps.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    break;
                }
                if let Some(why) = item.justification() {
                    tracing::info!(parent: &span, "step {}: {why}", index + 1);
                }
                match self.execute_step(item).instrument(span.clone()).await {
                    Ok(summary) => tracing::debug!(parent: &span, "step {} ok: {summary}", index + 1),
                    Err(e) => tracing::warn!(parent: &span, "step {} failed: {e}", index + 1),
                }
            }

            self.settle().await;
        }

        tracing::warn!(max_iterations, "autopilot hit its iteration budget");
        AutopilotOutcome::Partial {
            message: format!(
                "Autopilot reached maximum iterations ({max_iterations}). Task may be incomplete."
            ),
            steps_taken: max_iterations,
        }
    }

    /// Run one step. Returns a short summary on success.
    ///
    /// # Errors
    ///
    /// Returns [`StepError`] for rejected, unparsable or failed steps.
    pub async fn execute_step(&self, step: &AutopilotStep) -> Result<String, StepError> {
        match step {
            AutopilotStep::ToolCall {
                name, parameters, ..
            } => {
                if name == AUTOPILOT_TOOL_NAME {
                    return Err(StepError::Recursive);
                }
                let output = self
                    .registry
                    .dispatch(name, parameters.clone())
                    .await
                    .map_err(|e| StepError::Tool {
                        name: name.clone(),
                        message: e.to_string(),
                    })?;
                if output.is_failure() {
                    return Err(StepError::Tool {
                        name: name.clone(),
                        message: output.error_message().unwrap_or("failed").to_owned(),
                    });
                }
                Ok(format!("tool {name}"))
            }
            AutopilotStep::Automation {
                function,
                parameters,
                ..
            } => {
                let command = AutomationCommand::parse(function, parameters)?;
                let summary = command.to_string();
                if let AutomationCommand::Sleep { duration } = command {
                    tokio::time::sleep(duration).await;
                    return Ok(summary);
                }
                let backend = self.backend.clone().ok_or(AutomationError::Unavailable)?;
                crate::desktop::run_command(backend, command).await?;
                Ok(summary)
            }
        }
    }

    async fn settle(&self) {
        let delay = Duration::from_millis(self.config.settle_delay_ms);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = self.cancel.cancelled() => {}
        }
    }
}

/// Exposes [`AutopilotLoop`] as the `execute_autopilot` tool.
pub struct AutopilotTool {
    autopilot: Arc<AutopilotLoop>,
}

impl AutopilotTool {
    /// Wrap a loop.
    pub fn new(autopilot: Arc<AutopilotLoop>) -> Self {
        Self { autopilot }
    }
}

#[async_trait]
impl Tool for AutopilotTool {
    fn name(&self) -> &str {
        AUTOPILOT_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Take control of the screen to complete a multi-step task: opening apps, \
         navigating interfaces, filling forms. Works in a loop of screenshot, plan, act."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "objective": {
                    "type": "string",
                    "description": "What to accomplish, e.g. 'Open the browser and search for the weather'"
                },
                "max_iterations": {
                    "type": "integer",
                    "description": "Maximum screenshot-plan-act cycles"
                }
            },
            "required": ["objective"]
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let objective = required_str(&args, "objective")?;
        let max_iterations = args
            .get("max_iterations")
            .and_then(Value::as_u64)
            .map(|n| n.clamp(1, u64::from(u32::MAX)) as u32)
            .unwrap_or(self.autopilot.config().max_iterations);
        Ok(self
            .autopilot
            .run(objective, max_iterations)
            .await
            .into_output())
    }
}

/// Final registry: `base` plus the autopilot tool driving `base`.
pub fn registry_with_autopilot(
    base: ToolRegistry,
    model: Arc<dyn ReasoningModel>,
    screen: Arc<dyn ScreenCapture>,
    backend: Option<Arc<dyn AutomationBackend>>,
    config: AutopilotConfig,
    cancel: CancellationToken,
) -> ToolRegistry {
    let mut full = base.clone();
    let autopilot = AutopilotLoop::new(model, Arc::new(base), screen, backend, config)
        .with_cancellation(cancel);
    full.register(Arc::new(AutopilotTool::new(Arc::new(autopilot))));
    full
}
