//! Provider configuration profile.

use super::{GenerateOptions, ModelProvider};
use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Provider kind selected in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "local")]
    LocalCustom,
}

pub fn provider_type_slug(provider_type: ProviderType) -> &'static str {
    match provider_type {
        ProviderType::OpenAI => "openai",
        ProviderType::Anthropic => "anthropic",
        ProviderType::Ollama => "ollama",
        ProviderType::LocalCustom => "local",
    }
}

impl std::str::FromStr for ProviderType {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderType::OpenAI),
            "anthropic" => Ok(ProviderType::Anthropic),
            "ollama" => Ok(ProviderType::Ollama),
            "local" | "localcustom" => Ok(ProviderType::LocalCustom),
            other => Err(ApiError::ConfigError(format!(
                "Unknown provider type '{}' (expected openai, anthropic, ollama or local)",
                other
            ))),
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_type")]
    pub provider_type: ProviderType,

    /// Default model used when a call does not name one
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL; required for `local`, optional override for the others
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API key; falls back to OPENAI_API_KEY / ANTHROPIC_API_KEY
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Upper bound for a single provider call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub default_options: GenerateOptions,
}

fn default_provider_type() -> ProviderType {
    ProviderType::Ollama
}

fn default_model() -> String {
    "mistral".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: default_provider_type(),
            model: default_model(),
            endpoint: None,
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            default_options: GenerateOptions::default(),
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!("Invalid endpoint URL: {}", endpoint));
            }
        }
        if self.provider_type == ProviderType::LocalCustom && self.endpoint.is_none() {
            return Err("Local provider requires an endpoint".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than 0".to_string());
        }
        if let Some(temperature) = self.default_options.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(format!("Temperature {} outside 0.0..=2.0", temperature));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Environment variable consulted when `api_key` is unset
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self.provider_type {
            ProviderType::OpenAI => Some("OPENAI_API_KEY"),
            ProviderType::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderType::Ollama | ProviderType::LocalCustom => None,
        }
    }

    fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| {
                self.api_key_env_var()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|key| !key.is_empty())
            })
    }

    fn require_api_key(&self) -> Result<String, ApiError> {
        self.resolve_api_key().ok_or_else(|| {
            ApiError::ProviderNotConfigured(format!(
                "{} requires an API key (set provider.api_key or {})",
                provider_type_slug(self.provider_type),
                self.api_key_env_var().unwrap_or("an API key")
            ))
        })
    }

    /// Resolve into a concrete provider selection
    pub fn to_model_provider(&self) -> Result<ModelProvider, ApiError> {
        let model = self.model.clone();
        match self.provider_type {
            ProviderType::OpenAI => Ok(ModelProvider::OpenAI {
                model,
                api_key: self.require_api_key()?,
                base_url: self.endpoint.clone(),
            }),
            ProviderType::Anthropic => Ok(ModelProvider::Anthropic {
                model,
                api_key: self.require_api_key()?,
                base_url: self.endpoint.clone(),
            }),
            ProviderType::Ollama => Ok(ModelProvider::Ollama {
                model,
                base_url: self.endpoint.clone(),
            }),
            ProviderType::LocalCustom => Ok(ModelProvider::LocalCustom {
                model,
                endpoint: self.endpoint.clone().ok_or_else(|| {
                    ApiError::ProviderNotConfigured(
                        "Local provider requires an endpoint".to_string(),
                    )
                })?,
                api_key: self.resolve_api_key(),
            }),
        }
    }
}
