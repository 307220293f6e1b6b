//! LLM client trait and the OpenAI-compatible provider implementation.
//!
//! The engine treats chat and embedding generation as opaque capabilities
//! behind [`LLMClient`]; everything else in the crate depends only on the
//! trait. [`OpenAiClient`] is the production implementation and also serves
//! any OpenAI-compatible endpoint via `base_url`.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::error::{Error, Result};

use super::types::{
    ChatRole, CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse,
    TokenUsage,
};

/// LLM client capabilities used by the classification engine.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a chat prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Create embeddings for texts.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Human-readable provider name, used in error messages and metrics.
    fn provider(&self) -> &'static str;
}

/// Configuration for LLM clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Default chat model
    pub chat_model: String,
    /// Default embedding model
    pub embedding_model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            chat_model: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// OpenAI chat + embeddings client.
pub struct OpenAiClient {
    config: ClientConfig,
    http: Client,
}

impl OpenAiClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(config: ClientConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);

        // Proxy auto-detection has been seen panicking inside restricted
        // sandboxes, so treat a panicking or failing default builder as a
        // signal to construct the client with proxies disabled.
        let http = match catch_unwind(AssertUnwindSafe(|| {
            Client::builder().timeout(timeout).build()
        })) {
            Ok(Ok(client)) => client,
            Ok(Err(_)) | Err(_) => Client::builder()
                .no_proxy()
                .timeout(timeout)
                .build()
                .expect("proxy-free HTTP client must build"),
        };

        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Serialize)]
struct ChatApiRequest {
    model: String,
    messages: Vec<ChatApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatApiResponse {
    id: String,
    model: String,
    choices: Vec<ChatApiChoice>,
    usage: ChatApiUsage,
}

#[derive(Debug, Deserialize)]
struct ChatApiChoice {
    message: ChatApiMessage,
}

#[derive(Debug, Deserialize)]
struct ChatApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingApiRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    model: String,
    data: Vec<EmbeddingApiData>,
    usage: EmbeddingApiUsage,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiUsage {
    prompt_tokens: u64,
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

#[async_trait]
impl LLMClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .model
            .unwrap_or_else(|| self.config.chat_model.clone());

        let messages = request
            .messages
            .iter()
            .map(|m| ChatApiMessage {
                role: role_name(m.role).to_string(),
                content: m.content.clone(),
            })
            .collect();

        let api_request = ChatApiRequest {
            model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/v1/chat/completions", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(self.config.timeout_secs * 1000)
                } else {
                    Error::llm(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                return Err(Error::llm(format!("API error: {}", error.error.message)));
            }
            return Err(Error::llm(format!("API error ({}): {}", status, body)));
        }

        let api_response: ChatApiResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm(format!("Failed to parse response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::llm("No choices in response"))?;

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content: choice.message.content,
            usage: TokenUsage {
                input_tokens: api_response.usage.prompt_tokens,
                output_tokens: api_response.usage.completion_tokens,
            },
            timestamp: Utc::now(),
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request
            .model
            .unwrap_or_else(|| self.config.embedding_model.clone());

        let api_request = EmbeddingApiRequest {
            model,
            input: request.texts,
        };

        let url = format!("{}/v1/embeddings", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::embedding(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::embedding(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                return Err(Error::embedding(format!(
                    "API error: {}",
                    error.error.message
                )));
            }
            return Err(Error::embedding(format!("API error ({}): {}", status, body)));
        }

        let api_response: EmbeddingApiResponse = serde_json::from_str(&body)
            .map_err(|e| Error::embedding(format!("Failed to parse response: {}", e)))?;

        Ok(EmbeddingResponse {
            model: api_response.model,
            embeddings: api_response.data.into_iter().map(|d| d.embedding).collect(),
            usage: TokenUsage {
                input_tokens: api_response.usage.prompt_tokens,
                output_tokens: 0,
            },
        })
    }

    fn provider(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("test-key")
            .with_base_url("https://custom.api.com")
            .with_chat_model("gpt-4o-mini")
            .with_embedding_model("text-embedding-3-large")
            .with_timeout(60);

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.base_url, Some("https://custom.api.com".to_string()));
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.embedding_model, "text-embedding-3-large");
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_base_url_default() {
        let client = OpenAiClient::new(ClientConfig::new("test"));
        assert_eq!(client.base_url(), "https://api.openai.com");

        let client =
            OpenAiClient::new(ClientConfig::new("test").with_base_url("http://localhost:8080"));
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_role_names() {
        assert_eq!(role_name(ChatRole::System), "system");
        assert_eq!(role_name(ChatRole::User), "user");
        assert_eq!(role_name(ChatRole::Assistant), "assistant");
    }
}
