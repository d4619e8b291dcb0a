//! Environment source: PRAXIS__SECTION__KEY variables, e.g. PRAXIS__PROVIDER__MODEL

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub const ENV_PREFIX: &str = "PRAXIS";
pub const ENV_SEPARATOR: &str = "__";

/// Add the environment override layer; always highest precedence.
pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    )
}
