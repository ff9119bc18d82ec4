//! Configuration and result types for the tool-calling loop.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::AgentConfig;
use crate::llm::Turn;
use crate::tools::{RetryConfig, ToolOutput};

/// Retry policy for transient model errors.
///
/// Retry `n` (0-based) waits `base * 2^n`, plus up to `jitter` of that as
/// random jitter. Only [`ModelError::is_transient`](crate::error::ModelError::is_transient)
/// errors are retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay.
    pub base_delay: Duration,
    /// Jitter as a fraction of the delay (0.0 disables it).
    pub jitter: f64,
}

impl ModelRetryPolicy {
    /// Build from the agent section of the config.
    pub fn from_agent(config: &AgentConfig) -> Self {
        Self {
            max_retries: config.model_max_retries,
            base_delay: Duration::from_millis(config.model_retry_base_delay_ms),
            jitter: 0.0,
        }
        .with_jitter(config.model_retry_jitter)
    }

    /// Set the jitter fraction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry `retry` (0-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        let delay = self.base_delay.saturating_mul(factor);
        if self.jitter > 0.0 {
            delay.mul_f64(1.0 + rand::random::<f64>() * self.jitter)
        } else {
            delay
        }
    }
}

impl Default for ModelRetryPolicy {
    fn default() -> Self {
        Self::from_agent(&AgentConfig::default())
    }
}

/// Settings for one [`ToolCallLoop`](super::ToolCallLoop).
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Maximum model round trips per user message.
    pub max_tool_iterations: u32,
    /// Per-tool retry.
    pub tool_retry: RetryConfig,
    /// Model retry.
    pub model_retry: ModelRetryPolicy,
    /// Responses shorter than this (in chars) are not spoken.
    pub min_speakable_length: usize,
    /// System prompt sent with every request.
    pub system_prompt: Option<String>,
}

impl LoopConfig {
    /// Build from config, using `wake_word` for the default system prompt.
    pub fn from_agent(config: &AgentConfig, wake_word: &str) -> Self {
        Self {
            max_tool_iterations: config.max_tool_iterations,
            tool_retry: RetryConfig::from_agent(config),
            model_retry: ModelRetryPolicy::from_agent(config),
            min_speakable_length: config.min_speakable_length,
            system_prompt: Some(config.system_prompt_for(wake_word)),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_agent(&AgentConfig::default(), "jarvis")
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered without requesting tools.
    Complete,
    /// The round-trip cap was hit while the model still wanted tools.
    MaxIterations,
}

/// One executed tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Call id from the model.
    pub call_id: String,
    /// Tool name.
    pub name: String,
    /// Arguments as requested.
    pub arguments: Map<String, Value>,
    /// Final result, or the synthesized failure.
    pub result: ToolOutput,
    /// Attempts made.
    pub attempts: u32,
    /// Wall time across attempts.
    pub duration_ms: u64,
}

/// The outcome of one user message.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Final response text with code fences stripped.
    pub text: String,
    /// `text` when long enough to speak.
    pub speakable: Option<String>,
    /// Turns to append to history: user, model, tool results, final model.
    pub new_turns: Vec<Turn>,
    /// Tool calls executed, in order.
    pub invocations: Vec<ToolInvocation>,
    /// Model round trips issued.
    pub round_trips: u32,
    /// Why the loop stopped.
    pub stop_reason: StopReason,
}

impl TurnOutcome {
    /// Whether the response ends with a question mark.
    pub fn asks_question(&self) -> bool {
        self.text.trim_end().ends_with('?')
    }
}
