//! Turn policy: special commands, declines and follow-up listening.

use crate::agent::TurnOutcome;
use crate::config::{ContinuationPolicy, SessionConfig};

/// Spoken after the user switches on continuous mode.
pub const CONTINUOUS_ON_REPLY: &str = "I'm listening.";
/// Spoken after the user switches continuous mode off.
pub const CONTINUOUS_OFF_REPLY: &str = "Continuous mode deactivated. Goodbye.";
/// Spoken when the user declines a follow-up question.
pub const DECLINE_REPLY: &str = "Alright! Let me know if you need anything.";

/// What a transcribed command asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Switch on continuous mode.
    ContinuousOn,
    /// Switch off continuous mode.
    ContinuousOff,
    /// Anything else: hand it to the model.
    Request,
}

/// Classify a command.
///
/// While continuous mode is on only the off phrase is special, so a
/// request mentioning "listen" is not swallowed.
pub fn classify_command(text: &str, config: &SessionConfig, continuous: bool) -> CommandKind {
    let lowered = text.trim().to_lowercase();
    if contains_phrase(&lowered, &config.continuous_off_phrase) {
        return CommandKind::ContinuousOff;
    }
    if !continuous
        && config
            .continuous_on_phrases
            .iter()
            .any(|p| contains_phrase(&lowered, p))
    {
        return CommandKind::ContinuousOn;
    }
    CommandKind::Request
}

/// Whether a follow-up answer ends the conversation.
///
/// Only short answers count, so "no, open the other file instead" is
/// still a request.
pub fn is_decline(answer: &str, config: &SessionConfig) -> bool {
    let lowered = answer.trim().to_lowercase();
    lowered.chars().count() < config.decline_max_length
        && config
            .decline_phrases
            .iter()
            .any(|p| contains_phrase(&lowered, p))
}

/// Whether to listen for a follow-up after speaking `outcome`.
///
/// `in_conversation` is true when history from earlier turns of this
/// exchange was sent with the request.
pub fn should_continue(
    policy: ContinuationPolicy,
    outcome: &TurnOutcome,
    in_conversation: bool,
) -> bool {
    match policy {
        ContinuationPolicy::QuestionOnly => outcome.asks_question(),
        ContinuationPolicy::AnyHistory => outcome.asks_question() || in_conversation,
    }
}

/// Case-insensitive phrase match on word boundaries.
///
/// `haystack` must already be lowercase.
pub fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let phrase = phrase.trim().to_lowercase();
    if phrase.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '\'';
    haystack.match_indices(&phrase).any(|(start, m)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + m.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}
