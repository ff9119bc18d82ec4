//! Lifecycle events emitted by the session for UI and observability.
//!
//! Events are small and `Clone` so they can travel over a
//! `tokio::sync::broadcast` channel to any number of subscribers.

use tokio::sync::broadcast;

/// Default capacity of the lifecycle broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What the assistant is doing "right now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Recording a command or follow-up answer.
    Listening,
    /// A transcript was accepted and the model is working.
    Thinking,
    /// Speech output began.
    SpeakingStarted,
    /// Speech output ended. Fires exactly once per `SpeakingStarted`.
    SpeakingEnded,
    /// Waiting for the wake phrase.
    Idle,
    /// User transcription accepted for a turn.
    Transcription { text: String },
    /// The model requested a tool.
    ToolCall { name: String },
    /// A tool finished, after retries.
    ToolResult { name: String, success: bool },
    /// Continuous mode was switched on or off.
    ContinuousMode { enabled: bool },
}

/// A sender that never blocks and ignores missing subscribers.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<broadcast::Sender<LifecycleEvent>>,
}

impl EventSink {
    /// Sink publishing on `tx`.
    pub fn new(tx: broadcast::Sender<LifecycleEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish `event`.
    pub fn emit(&self, event: LifecycleEvent) {
        if let Some(tx) = &self.tx {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    /// Subscribe, if the sink is connected.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<LifecycleEvent>> {
        self.tx.as_ref().map(broadcast::Sender::subscribe)
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::disabled()
    }
}
