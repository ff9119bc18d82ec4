//! Reasoning model capability.
//!
//! The tool-calling loop and the autopilot talk to the model only through
//! [`ReasoningModel`]. Conversation state is a list of [`Turn`]s; a turn
//! carries text, an optional image, the function calls the model asked
//! for, or the results handed back for them.

pub mod gemini;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ModelError;

pub use gemini::GeminiModel;

// ── Conversation types ──────────────────────────────────────────

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human.
    User,
    /// The reasoning model.
    Model,
    /// Tool results returned to the model.
    ToolResult,
}

/// An inline image sent alongside a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// MIME type, e.g. `image/jpeg`.
    pub mime_type: String,
    /// Base64-encoded image bytes.
    pub data_base64: String,
}

impl ImageAttachment {
    /// Wrap raw JPEG bytes.
    pub fn jpeg(bytes: &[u8]) -> Self {
        Self {
            mime_type: "image/jpeg".into(),
            data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Call identifier, unique within a turn.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments object.
    pub args: Map<String, Value>,
}

/// The result of one function call, handed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Identifier of the call this answers.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Result object.
    pub response: Map<String, Value>,
}

/// One exchange unit stored in conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced the turn.
    pub role: Role,
    /// Text parts, in order.
    #[serde(default)]
    pub text_parts: Vec<String>,
    /// Optional image.
    #[serde(default)]
    pub image: Option<ImageAttachment>,
    /// Function calls requested by the model.
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
    /// Results for earlier function calls.
    #[serde(default)]
    pub function_responses: Vec<FunctionResponse>,
}

impl Turn {
    /// A user turn with text and an optional image.
    pub fn user(text: impl Into<String>, image: Option<ImageAttachment>) -> Self {
        Self {
            role: Role::User,
            text_parts: vec![text.into()],
            image,
            function_calls: Vec::new(),
            function_responses: Vec::new(),
        }
    }

    /// A model turn built from a response.
    pub fn model(response: &ModelResponse) -> Self {
        Self {
            role: Role::Model,
            text_parts: if response.text.is_empty() {
                Vec::new()
            } else {
                vec![response.text.clone()]
            },
            image: None,
            function_calls: response.function_calls.clone(),
            function_responses: Vec::new(),
        }
    }

    /// A turn carrying tool results.
    pub fn tool_results(responses: Vec<FunctionResponse>) -> Self {
        Self {
            role: Role::ToolResult,
            text_parts: Vec::new(),
            image: None,
            function_calls: Vec::new(),
            function_responses: responses,
        }
    }

    /// All text parts joined.
    #[must_use]
    pub fn text(&self) -> String {
        self.text_parts.join("")
    }

    /// Whether the turn carries nothing at all, e.g. a model reply cut off
    /// by a safety stop.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text_parts.iter().all(String::is_empty)
            && self.image.is_none()
            && self.function_calls.is_empty()
            && self.function_responses.is_empty()
    }
}

// ── Capability ──────────────────────────────────────────────────

/// A tool description offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// Sampling options.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerateOptions {
    /// Sampling temperature; provider default when `None`.
    pub temperature: Option<f32>,
}

impl GenerateOptions {
    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// What the model produced for one round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    /// Concatenated text output.
    pub text: String,
    /// Requested function calls, in order.
    pub function_calls: Vec<FunctionCall>,
}

impl ModelResponse {
    /// A text-only response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_calls: Vec::new(),
        }
    }
}

/// A remote reasoning model.
#[async_trait]
pub trait ReasoningModel: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Run one generation over `turns`.
    ///
    /// # Errors
    ///
    /// Overload and rate-limit failures must be reported as
    /// [`ModelError::Overloaded`] so callers can retry them.
    async fn generate(
        &self,
        turns: &[Turn],
        tools: &[ToolSchema],
        system_prompt: Option<&str>,
        options: &GenerateOptions,
    ) -> Result<ModelResponse, ModelError>;
}
