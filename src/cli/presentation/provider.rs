//! Provider check and config presentation.

use crate::config::PraxisConfig;
use crate::error::ApiError;
use crate::provider::profile::provider_type_slug;
use crate::provider::ProviderCheckResult;

pub fn format_provider_check_result(result: &ProviderCheckResult) -> String {
    let mut output = format!("Checking provider: {}\n\n", result.provider_name);
    if !result.connectivity_ok {
        if let Some(ref msg) = result.error_message {
            output.push_str(&format!("✗ API connectivity failed: {}\n", msg));
        }
        return output;
    }
    output.push_str(&format!("✓ API connectivity: OK ({}ms)\n", result.elapsed_ms));
    if !result.model_available {
        output.push_str(&format!("✗ Model '{}' not found\n", result.model_checked));
        output.push_str(&format!(
            "Available models: {}\n",
            result.available_models.join(", ")
        ));
        return output;
    }
    output.push_str(&format!("✓ Model '{}' is available\n", result.model_checked));
    output.push_str("\nProvider is working correctly.\n");
    output
}

/// Resolved configuration as TOML; API keys never leave the process.
pub fn format_resolved_config(config: &PraxisConfig) -> Result<String, ApiError> {
    let mut out = toml::to_string_pretty(config)
        .map_err(|e| ApiError::ConfigError(format!("Failed to render config: {}", e)))?;
    let key_status = match (config.provider.api_key.as_ref(), config.provider.api_key_env_var()) {
        (Some(_), _) => "set in config".to_string(),
        (None, Some(var)) if std::env::var(var).is_ok() => format!("from ${}", var),
        (None, Some(var)) => format!("not set (expected ${})", var),
        (None, None) => "not required".to_string(),
    };
    out.push_str(&format!(
        "\n# provider: {} / api key: {}\n",
        provider_type_slug(config.provider.provider_type),
        key_status
    ));
    Ok(out)
}
