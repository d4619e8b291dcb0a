//! Anthropic Messages API client.

use super::http::{build_provider_http_client, ensure_success, map_http_error, trim_base_url};
use super::{ChatMessage, GenerateOptions, GenerationProvider, GenerationResponse, MessageRole};
use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
// max_tokens is mandatory on /v1/messages
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic provider client
pub struct AnthropicClient {
    client: Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(
        model: String,
        api_key: String,
        base_url: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = trim_base_url(base_url.unwrap_or_else(|| DEFAULT_ANTHROPIC_URL.to_string()));
        // Accept base URLs configured with or without the version segment
        let base_url = base_url
            .strip_suffix("/v1")
            .map(str::to_string)
            .unwrap_or(base_url);
        Ok(Self {
            client: build_provider_http_client(request_timeout)?,
            model,
            api_key,
            base_url,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Split system messages out; the Messages API takes them as a top-level field
fn split_system(messages: Vec<ChatMessage>) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_parts = Vec::new();
    let mut conversation = Vec::new();
    for msg in messages {
        match msg.role {
            MessageRole::System => system_parts.push(msg.content),
            MessageRole::User | MessageRole::Assistant => conversation.push(AnthropicMessage {
                role: msg.role.as_str(),
                content: msg.content,
            }),
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, conversation)
}

#[async_trait]
impl GenerationProvider for AnthropicClient {
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
        let (system, messages) = split_system(messages);
        let request = AnthropicRequest {
            model: options.model.as_deref().unwrap_or(&self.model),
            messages,
            system,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: options.temperature,
        };

        let response = self
            .request(
                self.client
                    .post(format!("{}/v1/messages", self.base_url))
                    .json(&request),
            )
            .send()
            .await
            .map_err(map_http_error)?;
        let body: AnthropicResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(map_http_error)?;

        let content = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(GenerationResponse {
            content,
            model: body.model,
            done: true,
        })
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn list_models(&self) -> Result<Vec<String>, ApiError> {
        let response = self
            .request(self.client.get(format!("{}/v1/models", self.base_url)))
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
