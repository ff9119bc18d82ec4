//! Core tool types.
//!
//! Defines the [`Tool`] trait every registry entry implements and
//! [`ToolOutput`], the JSON result object handed back to the model.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ToolError;

/// Result object of a tool execution.
///
/// Tools use one of two conventions to report failure: `status: "error"` or
/// `success: false`. [`is_failure`](Self::is_failure) honours both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput(pub Map<String, Value>);

impl ToolOutput {
    /// Wrap an existing JSON object.
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Build from a JSON value; non-objects are stored under `result`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            other => {
                let mut map = Map::new();
                map.insert("result".into(), other);
                Self(map)
            }
        }
    }

    /// `{"status": "success", "message": ...}`.
    pub fn success(message: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("status".into(), Value::from("success"));
        map.insert("message".into(), Value::from(message.into()));
        Self(map)
    }

    /// `{"status": "error", "message": ...}`.
    pub fn error(message: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("status".into(), Value::from("error"));
        map.insert("message".into(), Value::from(message.into()));
        Self(map)
    }

    /// Add a field, builder style.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    /// Whether the result reports failure under either convention.
    pub fn is_failure(&self) -> bool {
        self.0.get("status").and_then(Value::as_str) == Some("error")
            || self.0.get("success").and_then(Value::as_bool) == Some(false)
    }

    /// The error text, if the result carries one.
    pub fn error_message(&self) -> Option<&str> {
        self.0
            .get("error")
            .or_else(|| self.0.get("message"))
            .and_then(Value::as_str)
    }

    /// Borrow a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Unwrap into the inner map.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// A named capability the model may call.
///
/// Handlers return explicit results; a failure is either `Err(ToolError)` or
/// an `Ok` output with an error status. Both are retried by the executor.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as offered to the model.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn schema(&self) -> Value;

    /// Execute with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] for invalid arguments or execution failures.
    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput, ToolError>;
}

/// Fetch a required string argument.
///
/// # Errors
///
/// Returns [`ToolError::InvalidArguments`] when missing or not a string.
pub fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required argument: {key}")))
}
