//! OpenAI chat-completions client, shared with OpenAI-compatible local servers.

use super::http::{build_provider_http_client, ensure_success, map_http_error, trim_base_url};
use super::{ChatMessage, GenerateOptions, GenerationProvider, GenerationResponse};
use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Client for the OpenAI API and any server speaking its `/chat/completions` dialect
pub struct OpenAIClient {
    client: Client,
    model: String,
    api_key: Option<String>,
    base_url: String,
    name: &'static str,
}

impl OpenAIClient {
    /// Hosted OpenAI (API key required)
    pub fn hosted(
        model: String,
        api_key: String,
        base_url: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_provider_http_client(request_timeout)?,
            model,
            api_key: Some(api_key),
            base_url: trim_base_url(base_url.unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())),
            name: "openai",
        })
    }

    /// OpenAI-compatible local server (API key optional)
    pub fn local(
        model: String,
        endpoint: String,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_provider_http_client(request_timeout)?,
            model,
            api_key,
            base_url: trim_base_url(endpoint),
            name: "local",
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[async_trait]
impl GenerationProvider for OpenAIClient {
    async fn generate(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<GenerationResponse, ApiError> {
        self.chat(vec![ChatMessage::user(prompt)], options).await
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
    ) -> Result<GenerationResponse, ApiError> {
        let request = ChatCompletionRequest {
            model: options.model.as_deref().unwrap_or(&self.model),
            messages: messages
                .into_iter()
                .map(|msg| OpenAIMessage {
                    role: msg.role.as_str(),
                    content: msg.content,
                })
                .collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: false,
        };

        let response = self
            .authorized(
                self.client
                    .post(format!("{}/chat/completions", self.base_url))
                    .json(&request),
            )
            .send()
            .await
            .map_err(map_http_error)?;
        let completion: ChatCompletionResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(map_http_error)?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::ProviderError("No choices in response".to_string()))?;

        Ok(GenerationResponse {
            content: choice.message.content.unwrap_or_default(),
            model: completion.model,
            done: true,
        })
    }

    fn provider_name(&self) -> &str {
        self.name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn list_models(&self) -> Result<Vec<String>, ApiError> {
        let response = self
            .authorized(self.client.get(format!("{}/models", self.base_url)))
            .send()
            .await
            .map_err(map_http_error)?;
        let body: ModelsResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(map_http_error)?;
        Ok(body.data.into_iter().map(|m| m.id).collect())
    }
}
