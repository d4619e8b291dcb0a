//! Generation Provider Abstraction
//!
//! Unified interface over text-generation backends: a local Ollama server, the hosted
//! OpenAI and Anthropic APIs, and any OpenAI-compatible local server. Every client
//! exposes `generate` and `chat` and returns raw text; interpreting that text is the
//! caller's job.

use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

mod anthropic;
mod http;
mod ollama;
mod openai;
pub mod profile;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;
pub use profile::{provider_type_slug, ProviderConfig, ProviderType};

/// Resolved provider selection, one variant per backend kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelProvider {
    OpenAI {
        model: String,
        api_key: String,
        base_url: Option<String>,
    },
    Anthropic {
        model: String,
        api_key: String,
        base_url: Option<String>,
    },
    Ollama {
        model: String,
        base_url: Option<String>,
    },
    LocalCustom {
        model: String,
        endpoint: String,
        api_key: Option<String>,
    },
}

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Per-call generation options
///
/// `stream` is accepted for interface compatibility; clients always request and return
/// the complete response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

impl GenerateOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Fill unset fields from `defaults`
    pub fn merged_over(self, defaults: &GenerateOptions) -> GenerateOptions {
        GenerateOptions {
            model: self.model.or_else(|| defaults.model.clone()),
            temperature: self.temperature.or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            stream: self.stream || defaults.stream,
        }
    }
}

/// Generation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    pub model: String,
    pub done: bool,
}

/// Text generation backend
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Single-prompt completion
    async fn generate(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<GenerationResponse, ApiError>;

    /// Multi-message chat completion
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
    ) -> Result<GenerationResponse, ApiError>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// List models the backend can serve (connectivity check)
    async fn list_models(&self) -> Result<Vec<String>, ApiError>;
}

/// Provider factory: maps a resolved provider kind to its client constructor
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create_client(
        provider: &ModelProvider,
        request_timeout: Duration,
    ) -> Result<Arc<dyn GenerationProvider>, ApiError> {
        match provider {
            ModelProvider::OpenAI {
                model,
                api_key,
                base_url,
            } => Ok(Arc::new(OpenAIClient::hosted(
                model.clone(),
                api_key.clone(),
                base_url.clone(),
                request_timeout,
            )?)),
            ModelProvider::Anthropic {
                model,
                api_key,
                base_url,
            } => Ok(Arc::new(AnthropicClient::new(
                model.clone(),
                api_key.clone(),
                base_url.clone(),
                request_timeout,
            )?)),
            ModelProvider::Ollama { model, base_url } => Ok(Arc::new(OllamaClient::new(
                model.clone(),
                base_url.clone(),
                request_timeout,
            )?)),
            ModelProvider::LocalCustom {
                model,
                endpoint,
                api_key,
            } => Ok(Arc::new(OpenAIClient::local(
                model.clone(),
                endpoint.clone(),
                api_key.clone(),
                request_timeout,
            )?)),
        }
    }

    /// Resolve a provider config (including API keys from the environment) and build its client
    pub fn from_config(config: &ProviderConfig) -> Result<Arc<dyn GenerationProvider>, ApiError> {
        let model_provider = config.to_model_provider()?;
        Self::create_client(&model_provider, config.request_timeout())
    }
}

/// Outcome of a provider connectivity check
#[derive(Debug, Clone, Serialize)]
pub struct ProviderCheckResult {
    pub provider_name: String,
    pub model_checked: String,
    pub connectivity_ok: bool,
    pub model_available: bool,
    pub available_models: Vec<String>,
    pub error_message: Option<String>,
    pub elapsed_ms: u64,
}

/// Ollama lists tagged names (`mistral:latest`) for untagged requests
fn model_matches(listed: &str, wanted: &str) -> bool {
    listed == wanted || listed.strip_suffix(":latest") == Some(wanted)
}

/// Provider front used by the workers
///
/// Applies configured default options and bounds every call with a timeout. Dropping
/// the timed-out future drops the in-flight HTTP request.
pub struct GenerationService {
    provider: Arc<dyn GenerationProvider>,
    default_options: GenerateOptions,
    timeout: Duration,
}

impl GenerationService {
    pub fn new(provider: Arc<dyn GenerationProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            default_options: GenerateOptions::default(),
            timeout,
        }
    }

    pub fn with_default_options(mut self, options: GenerateOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    pub async fn generate(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<GenerationResponse, ApiError> {
        let options = self.resolve_options(options);
        let started = Instant::now();
        let response = self
            .bounded(self.provider.generate(prompt, options))
            .await?;
        self.finish(response, started)
    }

    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
    ) -> Result<GenerationResponse, ApiError> {
        let options = self.resolve_options(options);
        let message_count = messages.len();
        let started = Instant::now();
        debug!(
            provider = self.provider.provider_name(),
            model = options.model.as_deref().unwrap_or(self.provider.model_name()),
            message_count,
            "Provider chat request sent"
        );
        let response = self.bounded(self.provider.chat(messages, options)).await?;
        self.finish(response, started)
    }

    /// List the backend's models within the call timeout and look for the configured one
    pub async fn check(&self) -> ProviderCheckResult {
        let model_checked = self
            .default_options
            .model
            .clone()
            .unwrap_or_else(|| self.provider.model_name().to_string());
        let started = Instant::now();
        let listed = match tokio::time::timeout(self.timeout, self.provider.list_models()).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::ProviderTimeout(self.timeout.as_secs())),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match listed {
            Ok(available_models) => ProviderCheckResult {
                provider_name: self.provider.provider_name().to_string(),
                model_available: available_models
                    .iter()
                    .any(|m| model_matches(m, &model_checked)),
                model_checked,
                connectivity_ok: true,
                available_models,
                error_message: None,
                elapsed_ms,
            },
            Err(e) => ProviderCheckResult {
                provider_name: self.provider.provider_name().to_string(),
                model_checked,
                connectivity_ok: false,
                model_available: false,
                available_models: Vec::new(),
                error_message: Some(e.to_string()),
                elapsed_ms,
            },
        }
    }

    fn resolve_options(&self, options: GenerateOptions) -> GenerateOptions {
        let options = options.merged_over(&self.default_options);
        if options.stream {
            debug!(
                provider = self.provider.provider_name(),
                "Streaming requested; waiting for the complete response"
            );
        }
        options
    }

    async fn bounded<F>(&self, call: F) -> Result<GenerationResponse, ApiError>
    where
        F: std::future::Future<Output = Result<GenerationResponse, ApiError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    provider = self.provider.provider_name(),
                    timeout_secs = self.timeout.as_secs(),
                    "Provider call timed out"
                );
                Err(ApiError::ProviderTimeout(self.timeout.as_secs()))
            }
        }
    }

    fn finish(
        &self,
        response: GenerationResponse,
        started: Instant,
    ) -> Result<GenerationResponse, ApiError> {
        if !response.done {
            return Err(ApiError::ProviderError(format!(
                "{} returned an incomplete response",
                self.provider.provider_name()
            )));
        }
        debug!(
            provider = self.provider.provider_name(),
            model = %response.model,
            duration_ms = started.elapsed().as_millis() as u64,
            response_chars = response.content.chars().count(),
            "Provider response received"
        );
        Ok(response)
    }
}
