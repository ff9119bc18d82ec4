//! Error types for the hark assistant.

/// Top-level error type for the voice agent.
#[derive(Debug, thiserror::Error)]
pub enum HarkError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Endpointing (utterance segmentation) error.
    #[error("endpoint error: {0}")]
    Endpoint(String),

    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Reasoning model error that escaped the retry policy.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Screen capture error.
    #[error("screen capture error: {0}")]
    Screen(String),

    /// UI automation error.
    #[error("automation error: {0}")]
    Automation(String),

    /// Tool execution error.
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Session / turn coordination error.
    #[error("session error: {0}")]
    Session(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HarkError>;

// ── Reasoning model errors ──────────────────────────────────────

/// Stable error codes for reasoning-model failures.
///
/// Codes are part of the log format and do not change between releases.
pub mod error_codes {
    /// The service is overloaded or rate limiting; safe to retry.
    pub const MODEL_OVERLOADED: &str = "MODEL_OVERLOADED";

    /// Authentication failed (invalid or missing API key).
    pub const AUTH_FAILED: &str = "AUTH_FAILED";

    /// The request could not be sent or was rejected.
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";

    /// The response body could not be interpreted.
    pub const INVALID_RESPONSE: &str = "INVALID_RESPONSE";

    /// Invalid or missing model configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
}

/// Errors produced by a [`ReasoningModel`](crate::llm::ReasoningModel).
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Rate limit, HTTP 503, or an "overloaded" response.
    #[error("[{}] {}", error_codes::MODEL_OVERLOADED, .0)]
    Overloaded(String),

    /// Authentication failed.
    #[error("[{}] {}", error_codes::AUTH_FAILED, .0)]
    Auth(String),

    /// Request failed for a non-transient reason.
    #[error("[{}] {}", error_codes::REQUEST_FAILED, .0)]
    Request(String),

    /// The model answered with something that could not be parsed.
    #[error("[{}] {}", error_codes::INVALID_RESPONSE, .0)]
    InvalidResponse(String),

    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),
}

impl ModelError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Overloaded(_) => error_codes::MODEL_OVERLOADED,
            Self::Auth(_) => error_codes::AUTH_FAILED,
            Self::Request(_) => error_codes::REQUEST_FAILED,
            Self::InvalidResponse(_) => error_codes::INVALID_RESPONSE,
            Self::Config(_) => error_codes::CONFIG_INVALID,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Overloaded(m)
            | Self::Auth(m)
            | Self::Request(m)
            | Self::InvalidResponse(m)
            | Self::Config(m) => m,
        }
    }

    /// Returns true for the transient kind the model retry policy retries.
    ///
    /// Only overload / rate-limit signals qualify. Every other failure
    /// propagates on the first occurrence.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Overloaded(_))
    }
}

// ── Tool errors ─────────────────────────────────────────────────

/// Errors returned by a [`Tool`](crate::tools::Tool) handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("Unknown tool: {0}")]
    NotFound(String),

    /// Arguments were missing or of the wrong type.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("{0}")]
    Execution(String),

    /// The call was refused before running (e.g. recursive autopilot).
    #[error("rejected: {0}")]
    Rejected(String),
}
