//! Tool execution with per-tool retry.
//!
//! [`invoke_with_retry`] runs a registry entry up to `1 + retries` times with
//! linear backoff. Exhausting every attempt is not an error: the caller gets
//! a structured failure object to hand back to the model.

use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::registry::ToolRegistry;
use super::types::ToolOutput;
use crate::config::AgentConfig;

/// Retry settings for tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts after the first.
    pub retries: u32,
    /// Base delay; attempt `n` waits `delay * n`.
    pub delay: Duration,
}

impl RetryConfig {
    /// Build from the agent section of the config.
    pub fn from_agent(config: &AgentConfig) -> Self {
        Self {
            retries: config.tool_retry_attempts,
            delay: Duration::from_millis(config.tool_retry_delay_ms),
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        1 + self.retries
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_agent(&AgentConfig::default())
    }
}

/// What one retried call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// Final output, or the synthesized failure.
    pub output: ToolOutput,
    /// Attempts made.
    pub attempts: u32,
    /// Wall time across all attempts.
    pub duration_ms: u64,
}

/// Run `name` through the registry, retrying failures.
///
/// A failure is either an `Err` from the handler or an output whose
/// [`is_failure`](ToolOutput::is_failure) is true. Names the registry does
/// not know are reported once, without backoff.
pub async fn invoke_with_retry(
    registry: &ToolRegistry,
    name: &str,
    args: &Map<String, Value>,
    retry: RetryConfig,
) -> RetryOutcome {
    let start = Instant::now();
    if !registry.exists(name) {
        warn!(tool_name = %name, "unknown tool, not retrying");
        let output = exhausted_failure(name, &format!("Unknown tool: {name}"), 1);
        return RetryOutcome {
            output,
            attempts: 1,
            duration_ms: start.elapsed().as_millis() as u64,
        };
    }
    let max_attempts = retry.max_attempts();
    let mut last_error = String::from("unknown error");

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let wait = retry.delay * attempt;
            warn!(
                tool_name = %name,
                attempt,
                max = retry.retries,
                wait_ms = wait.as_millis() as u64,
                "retrying tool"
            );
            tokio::time::sleep(wait).await;
        }

        match registry.dispatch(name, args.clone()).await {
            Ok(output) if !output.is_failure() => {
                let duration_ms = start.elapsed().as_millis() as u64;
                info!(tool_name = %name, attempts = attempt + 1, duration_ms, "tool succeeded");
                return RetryOutcome {
                    output,
                    attempts: attempt + 1,
                    duration_ms,
                };
            }
            Ok(output) => {
                last_error = output
                    .error_message()
                    .unwrap_or("tool reported an error status")
                    .to_owned();
                debug!(tool_name = %name, attempt, error = %last_error, "tool returned failure");
            }
            Err(e) => {
                last_error = e.to_string();
                debug!(tool_name = %name, attempt, error = %last_error, "tool raised");
            }
        }
    }

    warn!(tool_name = %name, attempts = max_attempts, error = %last_error, "tool failed after retries");
    RetryOutcome {
        output: exhausted_failure(name, &last_error, max_attempts),
        attempts: max_attempts,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// The structured failure returned to the model once retries run out.
pub fn exhausted_failure(name: &str, error: &str, attempts: u32) -> ToolOutput {
    ToolOutput::default()
        .with("status", "error")
        .with("success", false)
        .with("error", error)
        .with("tool_name", name)
        .with("attempts", attempts)
        .with(
            "suggestion",
            format!(
                "Tool '{name}' failed after {attempts} attempts. Error: {error}. \
                 Please try an alternative approach or different tool."
            ),
        )
}
