//! Configuration System
//!
//! Layered runtime configuration for the provider, the job queues, storage and logging.
//! Sources are merged from built-in defaults, the user's global config file, the
//! workspace config files and `PRAXIS__SECTION__KEY` environment variables.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use crate::provider::{ProviderConfig, ProviderType};

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PraxisConfig {
    /// Generation provider used by every worker
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Per-queue consumer settings
    #[serde(default)]
    pub queues: QueuesConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the three named queues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuesConfig {
    #[serde(default = "QueueConfig::plan_generation")]
    pub plan_generation: QueueConfig,

    #[serde(default = "QueueConfig::xp_recalculation")]
    pub xp_recalculation: QueueConfig,

    #[serde(default = "QueueConfig::task_regeneration")]
    pub task_regeneration: QueueConfig,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            plan_generation: QueueConfig::plan_generation(),
            xp_recalculation: QueueConfig::xp_recalculation(),
            task_regeneration: QueueConfig::task_regeneration(),
        }
    }
}

/// Consumer settings for one queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of this queue's jobs running at once
    pub concurrency: usize,

    /// Attempts before a job is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Idle wait between claim attempts when no enqueue notification arrives
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Dead-lettered jobs retained for inspection
    #[serde(default = "default_dead_letter_limit")]
    pub dead_letter_limit: usize,

    /// Completed jobs retained for inspection
    #[serde(default = "default_completed_limit")]
    pub completed_limit: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_dead_letter_limit() -> usize {
    50
}

fn default_completed_limit() -> usize {
    100
}

impl QueueConfig {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            max_attempts: default_max_attempts(),
            backoff: BackoffConfig::default(),
            poll_interval_ms: default_poll_interval_ms(),
            dead_letter_limit: default_dead_letter_limit(),
            completed_limit: default_completed_limit(),
        }
    }

    pub fn plan_generation() -> Self {
        Self::with_concurrency(2)
    }

    pub fn xp_recalculation() -> Self {
        Self::with_concurrency(5)
    }

    pub fn task_regeneration() -> Self {
        Self::with_concurrency(3)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }
        self.backoff.validate()
    }
}

/// Backoff strategy between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_kind")]
    pub strategy: BackoffKind,

    /// Base delay; doubled per attempt for exponential backoff
    #[serde(default = "default_backoff_delay_ms")]
    pub delay_ms: u64,

    /// Cap for exponential backoff
    #[serde(default = "default_backoff_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_backoff_kind() -> BackoffKind {
    BackoffKind::Exponential
}

fn default_backoff_delay_ms() -> u64 {
    1000
}

fn default_backoff_max_delay_ms() -> u64 {
    30_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: default_backoff_kind(),
            delay_ms: default_backoff_delay_ms(),
            max_delay_ms: default_backoff_max_delay_ms(),
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<(), String> {
        if self.strategy == BackoffKind::Exponential && self.max_delay_ms < self.delay_ms {
            return Err(format!(
                "backoff max_delay_ms ({}) is below delay_ms ({})",
                self.max_delay_ms, self.delay_ms
            ));
        }
        Ok(())
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// sled database directory
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Lifetime of an entity lease held by a job
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

/// Default database location: `$XDG_DATA_HOME/praxis/db`
pub fn default_storage_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "praxis")
        .map(|dirs| dirs.data_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from(".praxis/db"))
}

fn default_lease_ttl_secs() -> u64 {
    300
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl StorageConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Provider(String),
    Queue(String, String),
    Storage(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(msg) => write!(f, "Provider: {}", msg),
            ValidationError::Queue(name, msg) => write!(f, "Queue '{}': {}", name, msg),
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl PraxisConfig {
    /// Validate the entire configuration, collecting every problem
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.provider.validate() {
            errors.push(ValidationError::Provider(e));
        }

        for (name, queue) in [
            ("plan-generation", &self.queues.plan_generation),
            ("xp-recalculation", &self.queues.xp_recalculation),
            ("task-regeneration", &self.queues.task_regeneration),
        ] {
            if let Err(e) = queue.validate() {
                errors.push(ValidationError::Queue(name.to_string(), e));
            }
        }

        if self.storage.path.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "Storage path cannot be empty".to_string(),
            ));
        }
        if self.storage.lease_ttl_secs == 0 {
            errors.push(ValidationError::Storage(
                "lease_ttl_secs must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "json" | "text") {
            errors.push(ValidationError::Logging(format!(
                "Invalid log format '{}'",
                self.logging.format
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Queue settings by queue name
    pub fn queue(&self, queue: crate::queue::QueueName) -> &QueueConfig {
        use crate::queue::QueueName;
        match queue {
            QueueName::PlanGeneration => &self.queues.plan_generation,
            QueueName::XpRecalculation => &self.queues.xp_recalculation,
            QueueName::TaskRegeneration => &self.queues.task_regeneration,
        }
    }
}
