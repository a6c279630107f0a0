use crate::error::{LlmError, PipelineError};
use crate::traits::{CallOptions, LanguageModel};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: Client,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, PipelineError> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(PipelineError::Config(
                "an Anthropic API key is required for clause extraction".to_string(),
            ));
        }

        let model = model.into().trim().to_string();
        if model.is_empty() {
            return Err(PipelineError::Config("model name is empty".to_string()));
        }

        Ok(Self {
            endpoint: DEFAULT_ANTHROPIC_ENDPOINT.to_string(),
            api_key,
            model,
            client: Client::new(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &CallOptions) -> Result<String, LlmError> {
        let payload = MessagesRequest {
            model: &self.model,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|error| LlmError::Transient(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|error| LlmError::InvalidResponse(error.to_string()))?;

        response_text(parsed)
    }
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> LlmError {
    let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let details = format!("HTTP {status}: {snippet}");

    if is_retryable_status(status) {
        LlmError::Transient(details)
    } else {
        LlmError::Rejected(details)
    }
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
        // Anthropic reports overload as 529.
        || status.as_u16() == 529
}

fn response_text(response: MessagesResponse) -> Result<String, LlmError> {
    let text = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(LlmError::InvalidResponse(
            "response contained no text content".to_string(),
        ));
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        for code in [429u16, 408, 500, 502, 503, 529] {
            let status = StatusCode::from_u16(code).expect("valid status code");
            assert!(classify_status(status, "busy").is_transient(), "{code}");
        }
    }

    #[test]
    fn client_errors_are_rejected() {
        for code in [400u16, 401, 403, 404] {
            let status = StatusCode::from_u16(code).expect("valid status code");
            let error = classify_status(status, "bad request");
            assert!(matches!(error, LlmError::Rejected(_)), "{code}");
        }
    }

    #[test]
    fn text_blocks_are_joined() -> Result<(), serde_json::Error> {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"{\"a\":"},{"type":"tool_use"},{"type":"text","text":"1}"}]}"#,
        )?;
        let text = response_text(response).expect("text content is present");
        assert_eq!(text, "{\"a\":1}");
        Ok(())
    }

    #[test]
    fn empty_content_is_invalid() -> Result<(), serde_json::Error> {
        let response: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#)?;
        assert!(matches!(
            response_text(response),
            Err(LlmError::InvalidResponse(_))
        ));
        Ok(())
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let result = AnthropicClient::new("  ", DEFAULT_ANTHROPIC_MODEL);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
