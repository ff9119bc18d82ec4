//! Core tool-calling loop.
//!
//! Implements the round trip: prompt -> model -> tool calls -> execute ->
//! resubmit. The [`ToolCallLoop`] ties together a reasoning model, the tool
//! registry and a [`LoopConfig`].
//!
//! # Safety Guards
//!
//! - **Round-trip cap**: at most [`LoopConfig::max_tool_iterations`] model
//!   calls per user message, even if the model keeps requesting tools
//! - **Model retry**: only transient (overload) errors are retried, with
//!   exponential backoff; anything else propagates immediately
//! - **Tool retry**: failing tools are retried with linear backoff and
//!   folded back to the model as a structured failure

use std::sync::Arc;

use tracing::Instrument;

use super::types::{LoopConfig, StopReason, ToolInvocation, TurnOutcome};
use crate::error::ModelError;
use crate::llm::{
    FunctionResponse, GenerateOptions, ImageAttachment, ModelResponse, ReasoningModel, Turn,
};
use crate::runtime::{EventSink, LifecycleEvent};
use crate::tools::{ToolRegistry, invoke_with_retry};

/// The tool-calling loop for one conversation.
pub struct ToolCallLoop {
    config: LoopConfig,
    model: Arc<dyn ReasoningModel>,
    registry: Arc<ToolRegistry>,
    events: EventSink,
}

impl ToolCallLoop {
    /// Create a loop.
    pub fn new(
        config: LoopConfig,
        model: Arc<dyn ReasoningModel>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            config,
            model,
            registry,
            events: EventSink::disabled(),
        }
    }

    /// Publish tool events on `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// The loop configuration.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run one user message to completion.
    ///
    /// `history` is prepended when given. The returned
    /// [`TurnOutcome::new_turns`] holds every turn this call produced,
    /// starting with the user turn, for the caller to append to history.
    ///
    /// # Errors
    ///
    /// Returns the model error once retries are exhausted, or immediately
    /// for non-transient errors. Tool failures never surface here.
    pub async fn run(
        &self,
        user_text: &str,
        image: Option<ImageAttachment>,
        history: Option<&[Turn]>,
    ) -> Result<TurnOutcome, ModelError> {
        let mut turns: Vec<Turn> = history.map(<[Turn]>::to_vec).unwrap_or_default();
        let user_turn = Turn::user(user_text, image);
        turns.push(user_turn.clone());
        let mut new_turns = vec![user_turn];

        let tools = self.registry.schemas();
        let mut invocations = Vec::new();
        let mut round_trips = 0u32;
        let mut last = ModelResponse::default();
        let mut stop_reason = StopReason::MaxIterations;

        for iteration in 0..self.config.max_tool_iterations {
            let span = tracing::info_span!(
                "tool_loop_round_trip",
                iteration = iteration + 1,
                max = self.config.max_tool_iterations,
            );

            let response = self
                .send_with_retry(&turns, &tools)
                .instrument(span.clone())
                .await?;
            round_trips += 1;

            let model_turn = Turn::model(&response);
            if model_turn.is_empty() {
                tracing::warn!(parent: &span, "model returned an empty reply");
            } else {
                turns.push(model_turn.clone());
                new_turns.push(model_turn);
            }

            if response.function_calls.is_empty() {
                last = response;
                stop_reason = StopReason::Complete;
                break;
            }

            tracing::info!(
                parent: &span,
                "model requested {} tool calls: {:?}",
                response.function_calls.len(),
                response
                    .function_calls
                    .iter()
                    .map(|c| &c.name)
                    .collect::<Vec<_>>()
            );

            let mut responses = Vec::with_capacity(response.function_calls.len());
            for call in &response.function_calls {
                self.events.emit(LifecycleEvent::ToolCall {
                    name: call.name.clone(),
                });
                let outcome =
                    invoke_with_retry(&self.registry, &call.name, &call.args, self.config.tool_retry)
                        .instrument(span.clone())
                        .await;
                let success = !outcome.output.is_failure();
                self.events.emit(LifecycleEvent::ToolResult {
                    name: call.name.clone(),
                    success,
                });
                responses.push(FunctionResponse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    response: outcome.output.0.clone(),
                });
                invocations.push(ToolInvocation {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.args.clone(),
                    result: outcome.output,
                    attempts: outcome.attempts,
                    duration_ms: outcome.duration_ms,
                });
            }

            let results_turn = Turn::tool_results(responses);
            turns.push(results_turn.clone());
            new_turns.push(results_turn);
            last = response;
        }

        if stop_reason == StopReason::MaxIterations {
            tracing::warn!(
                round_trips,
                "tool loop hit the round-trip cap with tool calls still pending"
            );
        }

        let text = strip_code_fences(&last.text);
        let speakable = (text.chars().count() >= self.config.min_speakable_length)
            .then(|| text.clone());

        Ok(TurnOutcome {
            text,
            speakable,
            new_turns,
            invocations,
            round_trips,
            stop_reason,
        })
    }

    async fn send_with_retry(
        &self,
        turns: &[Turn],
        tools: &[crate::llm::ToolSchema],
    ) -> Result<ModelResponse, ModelError> {
        let policy = self.config.model_retry;
        let options = GenerateOptions::default();
        let mut retry = 0u32;

        loop {
            match self
                .model
                .generate(turns, tools, self.config.system_prompt.as_deref(), &options)
                .await
            {
                Ok(response) => return Ok(response),
                Err(error) if error.is_transient() && retry < policy.max_retries => {
                    let delay = policy.delay_for_retry(retry);
                    retry += 1;
                    tracing::warn!(
                        attempt = retry,
                        max = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "model overloaded, retrying: {error}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    if error.is_transient() {
                        tracing::error!("model still overloaded after {retry} retries");
                    }
                    return Err(error);
                }
            }
        }
    }
}

/// Remove fenced code blocks (```…```, across lines) and trim.
///
/// An unterminated fence is left as is.
pub fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        match after.find("```") {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &after[end + 3..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out.trim().to_owned()
}
