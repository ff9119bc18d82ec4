//! The session: wake detection, turns and follow-up listening.
//!
//! [`SessionController`] owns the conversation state and drives the whole
//! assistant: it waits on the [`WakePhraseDetector`](crate::wakeword::WakePhraseDetector),
//! records and transcribes the command, runs the tool-calling loop, speaks
//! the answer and decides whether to keep listening. Turns are strictly
//! sequential; the controller is the only writer of [`Session`].

pub mod controller;
pub mod policy;

pub use controller::{Capabilities, SessionController, TriggerHandle};
pub use policy::{CommandKind, classify_command, is_decline, should_continue};

use crate::agent::ConversationHistory;

/// What the session is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Waiting for the wake phrase.
    #[default]
    Idle,
    /// Recording a command or answer.
    Listening,
    /// Waiting on the model and tools.
    Thinking,
    /// Playing a response.
    Speaking,
}

/// Per-assistant conversation state.
#[derive(Debug, Clone)]
pub struct Session {
    /// Current state.
    pub state: SessionState,
    /// Whether every utterance is treated as a command.
    pub continuous_mode: bool,
    /// Turns of the current exchange.
    pub history: ConversationHistory,
    /// Wake phrase that opened the current conversation, if one did.
    pub active_wake_phrase: Option<String>,
}

impl Session {
    /// A fresh idle session keeping at most `max_turns` history entries.
    pub fn new(max_turns: usize) -> Self {
        Self {
            state: SessionState::Idle,
            continuous_mode: false,
            history: ConversationHistory::new(max_turns),
            active_wake_phrase: None,
        }
    }
}
