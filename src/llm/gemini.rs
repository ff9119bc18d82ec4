//! Gemini `generateContent` REST client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{
    FunctionCall, GenerateOptions, ModelResponse, ReasoningModel, Role, ToolSchema, Turn,
};
use crate::config::ModelConfig;
use crate::error::ModelError;

/// Reasoning model backed by the Gemini REST API.
pub struct GeminiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiModel")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiModel {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Config`] if no API key is available or the
    /// HTTP client cannot be built.
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let api_key = config
            .resolved_api_key()
            .ok_or_else(|| ModelError::Config("GEMINI_API_KEY is not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ModelError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Build the request body.
    fn build_body(
        turns: &[Turn],
        tools: &[ToolSchema],
        system_prompt: Option<&str>,
        options: &GenerateOptions,
    ) -> Value {
        // Gemini rejects contents with no parts.
        let contents: Vec<Value> = turns
            .iter()
            .filter(|t| !t.is_empty())
            .map(turn_to_content)
            .collect();
        let mut body = json!({ "contents": contents });

        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        if let Some(prompt) = system_prompt {
            body["systemInstruction"] = json!({ "parts": [{ "text": prompt }] });
        }
        if let Some(temperature) = options.temperature {
            body["generationConfig"] = json!({ "temperature": temperature });
        }
        body
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> ModelError {
        let message = extract_error_message(body);
        match status.as_u16() {
            401 | 403 => ModelError::Auth(format!("Gemini authentication failed: {message}")),
            429 | 503 => ModelError::Overloaded(format!(
                "Gemini HTTP {}: {message}",
                status.as_u16()
            )),
            _ if message.to_ascii_lowercase().contains("overloaded") => {
                ModelError::Overloaded(format!("Gemini HTTP {}: {message}", status.as_u16()))
            }
            _ => ModelError::Request(format!("Gemini HTTP {}: {message}", status.as_u16())),
        }
    }
}

fn turn_to_content(turn: &Turn) -> Value {
    let role = match turn.role {
        Role::Model => "model",
        Role::User | Role::ToolResult => "user",
    };
    let mut parts: Vec<Value> = Vec::new();
    for text in &turn.text_parts {
        parts.push(json!({ "text": text }));
    }
    if let Some(image) = &turn.image {
        parts.push(json!({
            "inlineData": { "mimeType": image.mime_type, "data": image.data_base64 }
        }));
    }
    for call in &turn.function_calls {
        parts.push(json!({ "functionCall": { "name": call.name, "args": call.args } }));
    }
    for response in &turn.function_responses {
        parts.push(json!({
            "functionResponse": { "name": response.name, "response": response.response }
        }));
    }
    json!({ "role": role, "parts": parts })
}

/// Extract an error message from a Gemini error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Parse the first candidate of a `generateContent` response.
fn parse_response(body: &Value) -> Result<ModelResponse, ModelError> {
    let candidates = body
        .get("candidates")
        .and_then(Value::as_array)
        .ok_or_else(|| ModelError::InvalidResponse("response has no candidates".into()))?;
    let Some(candidate) = candidates.first() else {
        return Err(ModelError::InvalidResponse("candidate list is empty".into()));
    };

    let mut response = ModelResponse::default();
    let parts = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array);
    for part in parts.into_iter().flatten() {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            response.text.push_str(text);
        }
        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ModelError::InvalidResponse("functionCall without name".into()))?;
            let args = match call.get("args") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            response.function_calls.push(FunctionCall {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.to_owned(),
                args,
            });
        }
    }
    Ok(response)
}

#[async_trait]
impl ReasoningModel for GeminiModel {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        turns: &[Turn],
        tools: &[ToolSchema],
        system_prompt: Option<&str>,
        options: &GenerateOptions,
    ) -> Result<ModelResponse, ModelError> {
        let body = Self::build_body(turns, tools, system_prompt, options);
        debug!(model = %self.model, turns = turns.len(), tools = tools.len(), "gemini request");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Request(format!("Gemini request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::Request(format!("cannot read Gemini response: {e}")))?;
        if !status.is_success() {
            return Err(Self::map_http_error(status, &text));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ModelError::InvalidResponse(format!("invalid JSON: {e}")))?;
        parse_response(&value)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::llm::{FunctionResponse, ImageAttachment};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model_for(server: &MockServer) -> GeminiModel {
        GeminiModel::new(&ModelConfig {
            api_key: Some("test-key".into()),
            base_url: server.uri(),
            ..ModelConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn body_maps_roles_and_parts() {
        let mut args = Map::new();
        args.insert("path".into(), json!("/tmp"));
        let turns = vec![
            Turn::user(
                "what is on screen",
                Some(ImageAttachment {
                    mime_type: "image/jpeg".into(),
                    data_base64: "AAAA".into(),
                }),
            ),
            Turn::model(&ModelResponse {
                text: String::new(),
                function_calls: vec![FunctionCall {
                    id: "c1".into(),
                    name: "list_files".into(),
                    args: args.clone(),
                }],
            }),
            Turn::tool_results(vec![FunctionResponse {
                id: "c1".into(),
                name: "list_files".into(),
                response: args,
            }]),
        ];
        let tools = vec![ToolSchema {
            name: "list_files".into(),
            description: "List files".into(),
            parameters: json!({"type": "object"}),
        }];
        let body = GeminiModel::build_body(
            &turns,
            &tools,
            Some("be brief"),
            &GenerateOptions::default().with_temperature(0.7),
        );

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "list_files");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["path"],
            "/tmp"
        );
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "list_files");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn body_skips_turns_without_parts() {
        let turns = vec![
            Turn::user("are you there", None),
            Turn::model(&ModelResponse::default()),
            Turn::user("hello?", None),
        ];
        let body = GeminiModel::build_body(&turns, &[], None, &GenerateOptions::default());

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert!(
            contents
                .iter()
                .all(|c| !c["parts"].as_array().unwrap().is_empty())
        );
    }

    #[test]
    fn body_omits_empty_tools_and_options() {
        let body = GeminiModel::build_body(
            &[Turn::user("hi", None)],
            &[],
            None,
            &GenerateOptions::default(),
        );
        assert!(body.get("tools").is_none());
        assert!(body.get("systemInstruction").is_none());
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn http_errors_map_to_kinds() {
        use reqwest::StatusCode;
        assert!(GeminiModel::map_http_error(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(GeminiModel::map_http_error(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        let overloaded = GeminiModel::map_http_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":{"message":"The model is overloaded."}}"#,
        );
        assert!(overloaded.is_transient());
        assert!(matches!(
            GeminiModel::map_http_error(StatusCode::UNAUTHORIZED, "no"),
            ModelError::Auth(_)
        ));
        assert!(matches!(
            GeminiModel::map_http_error(StatusCode::BAD_REQUEST, "bad"),
            ModelError::Request(_)
        ));
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let config = ModelConfig {
            api_key: Some(String::new()),
            ..ModelConfig::default()
        };
        // An empty configured key falls back to the environment.
        if std::env::var("GEMINI_API_KEY").is_err() {
            assert!(matches!(
                GeminiModel::new(&config).unwrap_err(),
                ModelError::Config(_)
            ));
        }
    }

    #[tokio::test]
    async fn generate_parses_text_and_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [
                            {"text": "Checking. "},
                            {"functionCall": {"name": "get_current_time", "args": {}}},
                            {"functionCall": {"name": "list_files", "args": {"path": "~"}}}
                        ]
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = model_for(&server)
            .generate(&[Turn::user("time?", None)], &[], None, &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(response.text, "Checking. ");
        assert_eq!(response.function_calls.len(), 2);
        assert_eq!(response.function_calls[1].args["path"], "~");
        assert_ne!(response.function_calls[0].id, response.function_calls[1].id);
    }

    #[tokio::test]
    async fn overloaded_status_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": {"code": 503, "message": "The model is overloaded."}
            })))
            .mount(&server)
            .await;
        let err = model_for(&server)
            .generate(&[Turn::user("hi", None)], &[], None, &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.message().contains("overloaded"));
    }

    #[tokio::test]
    async fn garbage_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        let err = model_for(&server)
            .generate(&[Turn::user("hi", None)], &[], None, &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
    }
}
