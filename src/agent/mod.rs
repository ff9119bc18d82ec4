//! Tool-calling agent loop.
//!
//! [`ToolCallLoop`] drives one user message through the reasoning model,
//! executing requested tools via the [`ToolRegistry`](crate::tools::ToolRegistry)
//! and resubmitting their results until the model answers in plain text or
//! the round-trip cap is reached. [`ConversationHistory`] keeps the bounded
//! multi-turn context the session carries between messages.

pub mod history;
pub mod loop_engine;
pub mod types;

pub use history::ConversationHistory;
pub use loop_engine::{ToolCallLoop, strip_code_fences};
pub use types::{LoopConfig, ModelRetryPolicy, StopReason, ToolInvocation, TurnOutcome};
