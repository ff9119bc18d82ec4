//! Transcript-based wake phrase detection.
//!
//! [`WakePhraseDetector`] runs the [`AudioEndpointer`] continuously, sends
//! each utterance to the [`Transcriber`], and checks the transcript against
//! a small candidate set built from the wake word: `"{word}"`,
//! `"hey {word}"`, `"ok {word}"`. The first candidate (in that order) found
//! in the transcript wins. Text spoken after the phrase in the same breath
//! is returned as a pre-supplied command.
//!
//! In continuous mode no phrase is required: any utterance triggers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::FrameSource;
use crate::config::{EndpointConfig, WakeConfig};
use crate::error::Result;
use crate::pipeline::messages::Utterance;
use crate::stt::Transcriber;
use crate::vad::AudioEndpointer;

/// Characters stripped from the front of a trailing command.
const COMMAND_LEADING_TRIM: &[char] = &['.', ',', '!', '?', ':', ';', ' '];

/// A wake phrase found in a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeMatch {
    /// The candidate that matched (lower case).
    pub phrase: String,
    /// Trailing command, if long enough to act on.
    pub command: Option<String>,
}

/// Matches transcripts against the wake phrase candidates.
#[derive(Debug, Clone)]
pub struct WakeMatcher {
    candidates: Vec<String>,
    min_command_length: usize,
}

impl WakeMatcher {
    /// Build the candidate set for `wake_word`.
    pub fn new(wake_word: &str, min_command_length: usize) -> Self {
        let word = wake_word.trim().to_lowercase();
        Self {
            candidates: vec![word.clone(), format!("hey {word}"), format!("ok {word}")],
            min_command_length,
        }
    }

    /// The candidates in match priority order.
    #[must_use]
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Check a transcript for a wake phrase.
    ///
    /// Matching is done on the lower-cased, trimmed transcript. The command
    /// is cut from the original text so its casing survives.
    pub fn match_transcript(&self, transcript: &str) -> Option<WakeMatch> {
        let text = transcript.trim();
        let lower = text.to_lowercase();

        let phrase = self
            .candidates
            .iter()
            .find(|c| !c.is_empty() && lower.contains(c.as_str()))?;

        let command = find_phrase_span(text, phrase)
            .map(|(_, end)| {
                text[end..]
                    .trim()
                    .trim_start_matches(COMMAND_LEADING_TRIM)
                    .trim()
                    .to_owned()
            })
            .filter(|cmd| cmd.chars().count() >= self.min_command_length);

        Some(WakeMatch {
            phrase: phrase.clone(),
            command,
        })
    }
}

/// Locate `phrase` in `text` case-insensitively, allowing any run of
/// whitespace, commas and periods between its words.
///
/// Returns byte offsets into `text`.
fn find_phrase_span(text: &str, phrase: &str) -> Option<(usize, usize)> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    text.char_indices()
        .find_map(|(start, _)| match_words_at(text, start, &words).map(|end| (start, end)))
}

fn match_words_at(text: &str, start: usize, words: &[&str]) -> Option<usize> {
    let mut pos = start;
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            let rest = &text[pos..];
            let skipped = rest.len()
                - rest
                    .trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '.')
                    .len();
            pos += skipped;
        }
        for expected in word.chars() {
            let actual = text[pos..].chars().next()?;
            if !actual.to_lowercase().eq(expected.to_lowercase()) {
                return None;
            }
            pos += actual.len_utf8();
        }
    }
    Some(pos)
}

// ── Detector ────────────────────────────────────────────────────

/// What triggered a wake.
#[derive(Debug, Clone)]
pub enum WakeTrigger {
    /// A wake phrase was recognised in this transcript.
    Phrase {
        /// The matched candidate.
        phrase: String,
        /// The full transcript.
        transcript: String,
    },
    /// Continuous mode: the utterance itself is the trigger.
    Activity {
        /// The triggering audio, for the caller to transcribe.
        utterance: Utterance,
    },
}

/// A wake event delivered to the session.
#[derive(Debug, Clone)]
pub struct WakeEvent {
    /// Why the detector fired.
    pub trigger: WakeTrigger,
    /// A command spoken together with the wake phrase.
    pub command: Option<String>,
}

/// Listens for the wake phrase on a frame source.
pub struct WakePhraseDetector {
    matcher: WakeMatcher,
    endpointer: AudioEndpointer,
    transcriber: Arc<dyn Transcriber>,
    language: String,
    continuous: bool,
    detection_cooldown: Duration,
    continuous_cooldown: Duration,
}

impl WakePhraseDetector {
    /// Create a detector.
    pub fn new(
        wake: &WakeConfig,
        endpoint: &EndpointConfig,
        sample_rate: u32,
        transcriber: Arc<dyn Transcriber>,
        language: impl Into<String>,
    ) -> Self {
        info!("listening for wake word '{}'", wake.wake_word);
        Self {
            matcher: WakeMatcher::new(&wake.wake_word, wake.min_command_length),
            endpointer: AudioEndpointer::new(endpoint, sample_rate),
            transcriber,
            language: language.into(),
            continuous: false,
            detection_cooldown: Duration::from_millis(wake.detection_cooldown_ms),
            continuous_cooldown: Duration::from_millis(wake.continuous_cooldown_ms),
        }
    }

    /// The phrase matcher.
    #[must_use]
    pub fn matcher(&self) -> &WakeMatcher {
        &self.matcher
    }

    /// Enable or disable continuous mode.
    pub fn set_continuous(&mut self, enabled: bool) {
        if self.continuous != enabled {
            info!(enabled, "wake detector continuous mode");
        }
        self.continuous = enabled;
    }

    /// Whether continuous mode is on.
    #[must_use]
    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    /// Wait for the next wake.
    ///
    /// Returns `Ok(None)` when the stream ends or `cancel` fires.
    /// Transcription failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Device errors from `source` are fatal and returned.
    pub async fn next_wake<S>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Option<WakeEvent>>
    where
        S: FrameSource + ?Sized,
    {
        loop {
            let Some(utterance) = self.endpointer.next_utterance(source, cancel).await? else {
                return Ok(None);
            };

            if self.continuous {
                debug!("continuous mode trigger");
                return Ok(Some(WakeEvent {
                    trigger: WakeTrigger::Activity { utterance },
                    command: None,
                }));
            }

            let transcript = match self.transcriber.transcribe(&utterance, &self.language).await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!("wake transcription failed: {e}");
                    continue;
                }
            };
            debug!(transcript = %transcript, "wake candidate transcript");

            if let Some(found) = self.matcher.match_transcript(&transcript) {
                info!(phrase = %found.phrase, has_command = found.command.is_some(), "wake phrase detected");
                return Ok(Some(WakeEvent {
                    trigger: WakeTrigger::Phrase {
                        phrase: found.phrase,
                        transcript,
                    },
                    command: found.command,
                }));
            }
        }
    }

    /// Pause after a wake has been handled so the detector does not
    /// immediately re-trigger on queued audio, then discard that audio.
    pub async fn cooldown<S>(&mut self, source: &mut S, cancel: &CancellationToken)
    where
        S: FrameSource + ?Sized,
    {
        let pause = if self.continuous {
            self.continuous_cooldown
        } else {
            self.detection_cooldown
        };
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(pause) => {}
        }
        let dropped = source.drain();
        self.endpointer.reset();
        debug!(dropped, "wake cooldown complete");
    }
}
