//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::ApiError;

/// Map domain/service errors to a string for CLI output, prefixed with the stable code.
pub fn map_error(e: &ApiError) -> String {
    format!("error[{}]: {}", e.code(), e)
}

/// Serialize a value as pretty JSON for `--format json` output.
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ApiError::Validation(format!("Failed to render JSON: {}", e)))
}
