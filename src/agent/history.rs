//! Bounded conversation history.

use crate::llm::{Role, Turn};

/// Conversation turns kept across a multi-turn exchange.
///
/// Never holds more than `max_turns` entries: appending evicts from the
/// front. Tool-result turns orphaned at the front by eviction are dropped
/// too, since the model rejects results without their calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
    max_turns: usize,
}

impl ConversationHistory {
    /// Empty history bounded to `max_turns`.
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    /// Append turns, then truncate.
    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
        self.truncate();
    }

    /// Evict from the front down to the bound. Idempotent.
    pub fn truncate(&mut self) {
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
        }
        let orphans = self
            .turns
            .iter()
            .take_while(|t| t.role == Role::ToolResult)
            .count();
        if orphans > 0 {
            self.turns.drain(..orphans);
        }
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Borrow the turns, oldest first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns held.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turns are held.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The bound.
    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}
