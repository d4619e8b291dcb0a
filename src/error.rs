//! Error types for the Praxis plan generation pipeline.

use crate::types::{PlanId, TaskId};
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Plan not found: {0}")]
    PlanNotFound(PlanId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Version conflict on {entity}: expected {expected}, found {actual}")]
    VersionConflict {
        entity: String,
        expected: u64,
        actual: u64,
    },

    #[error("Lease on {key} is held by {owner}")]
    LeaseHeld { key: String, owner: String },

    #[error("Invalid status transition on {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Coarse classification used for retry decisions and status mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedOutput,
    Provider,
    Persistence,
    Validation,
    NotFound,
    Conflict,
    Config,
}

/// Pipeline errors surfaced by services, workers and the CLI
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Plan not found: {0}")]
    PlanNotFound(PlanId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Malformed provider output: {0}")]
    MalformedOutput(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimit(String),

    #[error("Provider model not found: {0}")]
    ProviderModelNotFound(String),

    #[error("Provider timed out after {0} seconds")]
    ProviderTimeout(u64),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Another job holds the entity's lease; the job waits instead of failing
    #[error("Entity busy: {0}")]
    LeaseHeld(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::PlanNotFound(_) | ApiError::TaskNotFound(_) => ErrorKind::NotFound,
            ApiError::Validation(_) => ErrorKind::Validation,
            ApiError::MalformedOutput(_) => ErrorKind::MalformedOutput,
            ApiError::ProviderError(_)
            | ApiError::ProviderRequestFailed(_)
            | ApiError::ProviderAuthFailed(_)
            | ApiError::ProviderRateLimit(_)
            | ApiError::ProviderModelNotFound(_)
            | ApiError::ProviderTimeout(_) => ErrorKind::Provider,
            ApiError::Conflict(_) | ApiError::LeaseHeld(_) => ErrorKind::Conflict,
            ApiError::StorageError(_) | ApiError::QueueError(_) => ErrorKind::Persistence,
            ApiError::ProviderNotConfigured(_) | ApiError::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// HTTP-equivalent status for callers that surface errors over a request boundary
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::ProviderTimeout(_) => 504,
            _ => match self.kind() {
                ErrorKind::Validation => 400,
                ErrorKind::NotFound => 404,
                ErrorKind::Conflict => 409,
                ErrorKind::MalformedOutput => 422,
                ErrorKind::Provider => 502,
                ErrorKind::Persistence | ErrorKind::Config => 500,
            },
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::MalformedOutput => "MALFORMED_OUTPUT",
            ErrorKind::Provider => "PROVIDER_ERROR",
            ErrorKind::Persistence => "PERSISTENCE_ERROR",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Config => "CONFIG_ERROR",
        }
    }

    /// Whether the queue should schedule another attempt for a job failing with this error
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::ProviderAuthFailed(_) | ApiError::ProviderModelNotFound(_) => false,
            _ => !matches!(
                self.kind(),
                ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Config
            ),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::PlanNotFound(id) => ApiError::PlanNotFound(id),
            StorageError::TaskNotFound(id) => ApiError::TaskNotFound(id),
            StorageError::VersionConflict { .. } => ApiError::Conflict(err.to_string()),
            StorageError::LeaseHeld { .. } => ApiError::LeaseHeld(err.to_string()),
            StorageError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            other => ApiError::StorageError(other.to_string()),
        }
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
