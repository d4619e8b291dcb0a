//! Ollama client over the native `/api/generate`, `/api/chat` and `/api/tags` endpoints.

use super::http::{build_provider_http_client, ensure_success, map_http_error, trim_base_url};
use super::{ChatMessage, GenerateOptions, GenerationProvider, GenerationResponse};
use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Ollama provider client (local model server)
pub struct OllamaClient {
    client: Client,
    model: String,
    base_url: String,
}

impl OllamaClient {
    pub fn new(
        model: String,
        base_url: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = trim_base_url(base_url.unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()));
        Ok(Self {
            client: build_provider_http_client(request_timeout)?,
            model,
            base_url,
        })
    }

    fn request_options(options: &GenerateOptions) -> Option<OllamaOptions> {
        if options.temperature.is_none() && options.max_tokens.is_none() {
            return None;
        }
        Some(OllamaOptions {
            temperature: options.temperature,
            num_predict: options.max_tokens,
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    model: String,
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Serialize)]
struct OllamaChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: String,
    message: OllamaResponseMessage,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[async_trait]
impl GenerationProvider for OllamaClient {
    async fn generate(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<GenerationResponse, ApiError> {
        let request = OllamaGenerateRequest {
            model: options.model.as_deref().unwrap_or(&self.model),
            prompt,
            stream: false,
            options: Self::request_options(&options),
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(map_http_error)?;
        let body: OllamaGenerateResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(map_http_error)?;

        Ok(GenerationResponse {
            content: body.response,
            model: body.model,
            done: body.done,
        })
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
    ) -> Result<GenerationResponse, ApiError> {
        let request = OllamaChatRequest {
            model: options.model.as_deref().unwrap_or(&self.model),
            messages: messages
                .into_iter()
                .map(|msg| OllamaChatMessage {
                    role: msg.role.as_str(),
                    content: msg.content,
                })
                .collect(),
            stream: false,
            options: Self::request_options(&options),
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(map_http_error)?;
        let body: OllamaChatResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(map_http_error)?;

        Ok(GenerationResponse {
            content: body.message.content,
            model: body.model,
            done: body.done,
        })
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn list_models(&self) -> Result<Vec<String>, ApiError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(map_http_error)?;
        let body: OllamaTagsResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(map_http_error)?;
        Ok(body.models.into_iter().map(|m| m.name).collect())
    }
}
