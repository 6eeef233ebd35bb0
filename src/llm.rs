use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmConfig;
use crate::http::{error_body, RetryPolicy};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Language model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Language model API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid language model response: {0}")]
    InvalidResponse(String),
}

/// Prompt in, text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiChatModel {
    client: Client,
    retry: RetryPolicy,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig, client: Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            endpoint: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            api_key: config.api_key.clone(),
            model: config.model_name.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        debug!(
            "Calling {} (temperature {}) with a {} byte prompt",
            self.model,
            self.temperature,
            prompt.len()
        );

        let response = self
            .retry
            .send(|| {
                self.client
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&request)
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = error_body(response).await;
            return Err(LlmError::Status { status, body });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("response has no message content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn model(server: &MockServer) -> OpenAiChatModel {
        let config = LlmConfig {
            api_key: "sk-test".to_string(),
            base_url: server.url("/v1/"),
            model_name: "gpt-4".to_string(),
            temperature: 0.0,
            max_results: 100,
        };
        OpenAiChatModel::new(&config, Client::new(), RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_completion_returns_first_choice() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body(json!({
                        "model": "gpt-4",
                        "temperature": 0.0,
                        "messages": [{"role": "user", "content": "How many orders?"}]
                    }));
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "{\"limit\": 5}"}}]
                }));
            })
            .await;

        let text = model(&server).complete("How many orders?").await.unwrap();
        mock.assert_async().await;
        assert_eq!(text, "{\"limit\": 5}");
    }

    #[tokio::test]
    async fn test_missing_choices_is_invalid() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;

        let err = model(&server).complete("hi").await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(404).body("model not found");
            })
            .await;

        let err = model(&server).complete("hi").await.unwrap_err();
        assert!(matches!(err, LlmError::Status { status: 404, .. }));
    }
}
