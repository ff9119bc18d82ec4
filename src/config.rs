//! Configuration types for the voice agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HarkError, Result};

/// Top-level configuration for the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarkConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Utterance endpointing settings.
    pub endpoint: EndpointConfig,
    /// Wake phrase settings.
    pub wake: WakeConfig,
    /// Conversation / turn policy settings.
    pub session: SessionConfig,
    /// Tool-calling loop settings.
    pub agent: AgentConfig,
    /// Autopilot loop settings.
    pub autopilot: AutopilotConfig,
    /// Reasoning model client settings.
    pub model: ModelConfig,
    /// Speech-to-text service settings.
    pub stt: SttConfig,
    /// Text-to-speech service settings.
    pub tts: TtsConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Sample rate frames are delivered at, in Hz.
    pub input_sample_rate: u32,
    /// Samples per frame handed to the endpointer.
    pub frame_size: usize,
    /// Output sample rate in Hz.
    pub output_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_sample_rate: 16_000,
            frame_size: 1024,
            output_sample_rate: 24_000,
        }
    }
}

/// Energy-based endpointing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// RMS energy a frame must exceed to count as speech.
    pub energy_threshold: f32,
    /// Consecutive quiet time that closes an utterance, in milliseconds.
    pub silence_duration_ms: u64,
    /// Minimum capture length before silence may end an utterance.
    pub min_audio_length_ms: u64,
    /// Hard cap on a single utterance.
    pub max_recording_duration_ms: u64,
    /// How long a command recording waits for speech to start.
    pub listen_timeout_ms: u64,
    /// Settle delay before a command recording starts.
    pub pre_roll_delay_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.01,
            silence_duration_ms: 2_000,
            min_audio_length_ms: 500,
            max_recording_duration_ms: 10_000,
            listen_timeout_ms: 8_000,
            pre_roll_delay_ms: 300,
        }
    }
}

/// Wake phrase configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// The wake word. `"hey {word}"` and `"ok {word}"` are also accepted.
    pub wake_word: String,
    /// Pause after a detection before listening for the next one.
    pub detection_cooldown_ms: u64,
    /// Pause after a continuous-mode trigger.
    pub continuous_cooldown_ms: u64,
    /// Trailing command text shorter than this is ignored.
    pub min_command_length: usize,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            wake_word: "jarvis".into(),
            detection_cooldown_ms: 5_000,
            continuous_cooldown_ms: 1_000,
            min_command_length: 4,
        }
    }
}

/// When the session keeps listening after speaking a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPolicy {
    /// Only when the spoken response ends with `?`.
    #[default]
    QuestionOnly,
    /// When the response is a question or the session already has history.
    AnyHistory,
}

/// Conversation and turn policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of history turns retained (oldest evicted first).
    pub max_conversation_turns: usize,
    /// Transcripts shorter than this are discarded.
    pub min_transcription_length: usize,
    /// Follow-up listening strategy.
    pub continuation: ContinuationPolicy,
    /// Upper bound on consecutive follow-up listens after one wake.
    pub max_follow_ups: u32,
    /// Short answers containing one of these end the conversation.
    pub decline_phrases: Vec<String>,
    /// Decline phrases only apply to answers shorter than this.
    pub decline_max_length: usize,
    /// Commands containing one of these switch on continuous mode.
    pub continuous_on_phrases: Vec<String>,
    /// Command that switches continuous mode off.
    pub continuous_off_phrase: String,
    /// Transcription language hint.
    pub language: String,
    /// Attach a screenshot to every user turn.
    pub attach_screenshot: bool,
    /// JPEG quality of the attached screenshot.
    pub screenshot_jpeg_quality: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_conversation_turns: 20,
            min_transcription_length: 3,
            continuation: ContinuationPolicy::default(),
            max_follow_ups: 5,
            decline_phrases: [
                "no",
                "nope",
                "nothing",
                "that's all",
                "thats all",
                "i'm good",
                "im good",
                "all good",
                "no thanks",
                "no thank you",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
            decline_max_length: 15,
            continuous_on_phrases: vec!["listen up".into(), "listen".into()],
            continuous_off_phrase: "terminate".into(),
            language: "en".into(),
            attach_screenshot: true,
            screenshot_jpeg_quality: 85,
        }
    }
}

/// Tool-calling loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum model round trips per user message.
    pub max_tool_iterations: u32,
    /// Extra attempts for a failing tool (total attempts = 1 + this).
    pub tool_retry_attempts: u32,
    /// Linear backoff unit between tool attempts.
    pub tool_retry_delay_ms: u64,
    /// Retries of an overloaded model call.
    pub model_max_retries: u32,
    /// Base of the exponential model backoff.
    pub model_retry_base_delay_ms: u64,
    /// Random extra delay on model retries, as a fraction of the backoff
    /// (0.0 to 1.0).
    pub model_retry_jitter: f64,
    /// Responses shorter than this are not spoken.
    pub min_speakable_length: usize,
    /// System prompt override. Built from the wake word when unset.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 5,
            tool_retry_attempts: 2,
            tool_retry_delay_ms: 1_000,
            model_max_retries: 3,
            model_retry_base_delay_ms: 2_000,
            model_retry_jitter: 0.0,
            min_speakable_length: 6,
            system_prompt: None,
        }
    }
}

/// Autopilot loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    /// Default iteration budget when the caller does not pass one.
    pub max_iterations: u32,
    /// Pause between iterations so the UI can settle.
    pub settle_delay_ms: u64,
    /// JPEG quality of the screenshot sent each iteration.
    pub screenshot_jpeg_quality: u8,
    /// Sampling temperature for step planning.
    pub temperature: f32,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            settle_delay_ms: 500,
            screenshot_jpeg_quality: 95,
            temperature: 0.7,
        }
    }
}

/// Reasoning model client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// API key. Falls back to `GEMINI_API_KEY`.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// API base URL.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash".into(),
            base_url: "https://generativelanguage.googleapis.com".into(),
            request_timeout_secs: 60,
        }
    }
}

impl ModelConfig {
    /// The configured API key, or the `GEMINI_API_KEY` environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), "GEMINI_API_KEY")
    }
}

/// Speech-to-text service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Base URL of an OpenAI-compatible transcription server.
    pub base_url: String,
    /// Transcription model name.
    pub model: String,
    /// Optional bearer token. Falls back to `HARK_STT_API_KEY`.
    pub api_key: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            model: "whisper-1".into(),
            api_key: None,
        }
    }
}

impl SttConfig {
    /// The configured API key, or the `HARK_STT_API_KEY` environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), "HARK_STT_API_KEY")
    }
}

/// Text-to-speech service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// API key. Falls back to `ELEVENLABS_API_KEY`.
    pub api_key: Option<String>,
    /// Voice identifier.
    pub voice_id: String,
    /// Synthesis model identifier.
    pub model_id: String,
    /// API base URL.
    pub base_url: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: "UgBBYS2sOqTuMpoF3BR0".into(),
            model_id: "eleven_flash_v2_5".into(),
            base_url: "https://api.elevenlabs.io".into(),
        }
    }
}

impl TtsConfig {
    /// The configured API key, or the `ELEVENLABS_API_KEY` environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), "ELEVENLABS_API_KEY")
    }
}

fn resolve_key(configured: Option<&str>, env_var: &str) -> Option<String> {
    configured
        .filter(|k| !k.trim().is_empty())
        .map(str::to_owned)
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.trim().is_empty()))
}

// ── Derived durations ───────────────────────────────────────────

impl EndpointConfig {
    /// Number of samples covering `ms` milliseconds at `sample_rate`.
    #[must_use]
    pub fn samples_for_ms(ms: u64, sample_rate: u32) -> usize {
        (ms.saturating_mul(u64::from(sample_rate)) / 1000) as usize
    }

    /// Listen timeout as a [`Duration`].
    #[must_use]
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_millis(self.listen_timeout_ms)
    }
}

impl AgentConfig {
    /// The system prompt to send, building a default from the wake word.
    pub fn system_prompt_for(&self, wake_word: &str) -> String {
        if let Some(prompt) = self.system_prompt.as_ref().filter(|p| !p.trim().is_empty()) {
            return prompt.clone();
        }
        format!(
            "You are {}, a voice assistant with vision and computer control. \
             Keep responses short (1-3 sentences) because they are spoken aloud. \
             Use tools when they help. You can see the screen via screenshots.",
            capitalize(wake_word)
        )
    }
}

/// Capitalize the first character of a word.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── Persistence ─────────────────────────────────────────────────

impl HarkConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| HarkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| HarkError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/hark/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("hark").join("config.toml")
        } else if let Some(config) = dirs::config_dir() {
            config.join("hark").join("config.toml")
        } else {
            PathBuf::from("/tmp/hark-config/config.toml")
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.audio.frame_size == 0 {
            return Err(HarkError::Config("audio.frame_size must be > 0".into()));
        }
        if self.audio.input_sample_rate == 0 {
            return Err(HarkError::Config("audio.input_sample_rate must be > 0".into()));
        }
        if self.endpoint.max_recording_duration_ms < self.endpoint.min_audio_length_ms {
            return Err(HarkError::Config(format!(
                "endpoint.max_recording_duration_ms ({}) is shorter than min_audio_length_ms ({})",
                self.endpoint.max_recording_duration_ms, self.endpoint.min_audio_length_ms
            )));
        }
        if self.agent.max_tool_iterations == 0 {
            return Err(HarkError::Config("agent.max_tool_iterations must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.agent.model_retry_jitter) {
            return Err(HarkError::Config(format!(
                "agent.model_retry_jitter ({}) must be between 0 and 1",
                self.agent.model_retry_jitter
            )));
        }
        if self.wake.wake_word.trim().is_empty() {
            return Err(HarkError::Config("wake.wake_word must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = HarkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.wake.wake_word, "jarvis");
        assert_eq!(config.agent.max_tool_iterations, 5);
        assert_eq!(config.session.continuation, ContinuationPolicy::QuestionOnly);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: HarkConfig = toml::from_str(
            r#"
            [wake]
            wake_word = "sarah"

            [session]
            continuation = "any_history"
            "#,
        )
        .unwrap();
        assert_eq!(config.wake.wake_word, "sarah");
        assert_eq!(config.session.continuation, ContinuationPolicy::AnyHistory);
        assert_eq!(config.endpoint.silence_duration_ms, 2_000);
        assert_eq!(config.session.decline_phrases.len(), 10);
    }

    #[test]
    fn config_round_trip_via_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = HarkConfig::default();
        config.agent.tool_retry_attempts = 4;
        config.endpoint.energy_threshold = 0.05;
        config.save_to_file(&path).unwrap();

        let loaded = HarkConfig::from_file(&path).unwrap();
        assert_eq!(loaded.agent.tool_retry_attempts, 4);
        assert!((loaded.endpoint.energy_threshold - 0.05).abs() < f32::EPSILON);
    }

    #[test]
    fn validate_rejects_inverted_durations() {
        let mut config = HarkConfig::default();
        config.endpoint.max_recording_duration_ms = 100;
        config.endpoint.min_audio_length_ms = 500;
        assert!(matches!(config.validate(), Err(HarkError::Config(_))));
    }

    #[test]
    fn validate_rejects_out_of_range_jitter() {
        let mut config = HarkConfig::default();
        config.agent.model_retry_jitter = 1.5;
        assert!(matches!(config.validate(), Err(HarkError::Config(_))));
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[agent]\nmax_tool_iterations = \"many\"").unwrap();
        assert!(matches!(
            HarkConfig::from_file(&path),
            Err(HarkError::Config(_))
        ));
    }

    #[test]
    fn samples_for_ms_at_16k() {
        assert_eq!(EndpointConfig::samples_for_ms(500, 16_000), 8_000);
        assert_eq!(EndpointConfig::samples_for_ms(0, 16_000), 0);
    }

    #[test]
    fn system_prompt_defaults_to_wake_word_persona() {
        let agent = AgentConfig::default();
        assert!(agent.system_prompt_for("jarvis").starts_with("You are Jarvis"));

        let custom = AgentConfig {
            system_prompt: Some("Be terse.".into()),
            ..AgentConfig::default()
        };
        assert_eq!(custom.system_prompt_for("jarvis"), "Be terse.");
    }

    #[test]
    fn default_path_ends_with_hark_config() {
        let path = HarkConfig::default_config_path();
        assert!(path.ends_with("hark/config.toml"));
    }
}
