//! Merge rules: defaults, override order, conflict handling.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Queue concurrency has no serde default, so every queue table stays valid when a
/// higher-precedence source overrides only some of its keys.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("provider.provider_type", "ollama")?
        .set_default("provider.model", "mistral")?
        .set_default("queues.plan_generation.concurrency", 2)?
        .set_default("queues.xp_recalculation.concurrency", 5)?
        .set_default("queues.task_regeneration.concurrency", 3)
}
