//! `OpenAI`-compatible chat completions backend
//!
//! Doubao (Volcengine Ark), Qwen (`DashScope` compatible mode) and Llama all
//! expose `/chat/completions` with bearer auth.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ChatBackend, ChatMessage};
use crate::config::ProviderConfig;
use crate::{Error, Result};

/// Chat backend speaking the `OpenAI` chat completions protocol
pub struct OpenAiCompatBackend {
    client: Client,
    provider: String,
    base_url: String,
    api_key: SecretString,
}

impl OpenAiCompatBackend {
    /// Create a backend for a configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the provider has no credential
    pub fn new(client: Client, config: &ProviderConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            Error::Config(format!("provider {} has no API key", config.id))
        })?;

        Ok(Self {
            client,
            provider: config.id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn send(&self, request: &ChatCompletionRequest<'_>) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable {
                provider: self.provider.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(provider = %self.provider, status = %status, body = %body, "chat API error");
            return Err(Error::Chat(format!("{} API error {status}: {body}", self.provider)));
        }

        let result: ChatCompletionResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Chat(format!("{} returned no choices", self.provider)))
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        tracing::debug!(provider = %self.provider, model, messages = messages.len(), "chat completion");
        self.send(&ChatCompletionRequest {
            model,
            messages,
            max_tokens: None,
        })
        .await
    }

    async fn ping(&self, model: &str) -> Result<()> {
        let messages = [ChatMessage::user("ping")];
        self.send(&ChatCompletionRequest {
            model,
            messages: &messages,
            max_tokens: Some(1),
        })
        .await
        .map(|_| ())
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_requires_api_key() {
        let config = Config::default();
        let doubao = config.provider("doubao").unwrap();
        assert!(OpenAiCompatBackend::new(Client::new(), doubao).is_err());
    }

    #[test]
    fn test_request_shape() {
        let messages = [ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let body = serde_json::to_value(ChatCompletionRequest {
            model: "qwen-plus",
            messages: &messages,
            max_tokens: None,
        })
        .unwrap();
        assert_eq!(body["model"], "qwen-plus");
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_response_parse() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hello"));
    }
}
