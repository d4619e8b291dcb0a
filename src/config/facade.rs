//! Public configuration entry point.

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::PraxisConfig;
use crate::error::ApiError;
use config::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace
    ///
    /// Precedence, lowest to highest: defaults, global file, `config/config.toml`,
    /// `config/{PRAXIS_ENV}.toml`, `PRAXIS__*` environment variables.
    pub fn load(workspace_root: &Path) -> Result<PraxisConfig, ApiError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder);

        let config: PraxisConfig = builder.build()?.try_deserialize()?;
        debug!(
            workspace = %workspace_root.display(),
            provider = ?config.provider.provider_type,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from a single file on top of the defaults
    pub fn load_from_file(path: &Path) -> Result<PraxisConfig, ApiError> {
        if !path.exists() {
            return Err(ApiError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config = merge_policy::builder_with_defaults()?
            .add_source(File::from(path.to_path_buf()))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load and validate, folding every validation error into one message
    pub fn load_validated(
        workspace_root: &Path,
        config_file: Option<&Path>,
    ) -> Result<PraxisConfig, ApiError> {
        let config = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load(workspace_root)?,
        };
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        Ok(config)
    }

    /// Path to the global config file, if it exists
    pub fn xdg_config_path() -> Option<PathBuf> {
        global_file::global_config_path().filter(|path| path.exists())
    }
}
