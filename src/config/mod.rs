//! Configuration loading.
//!
//! Values come from (lowest to highest precedence) built-in defaults, an
//! optional `config/default.{toml,yaml,json}` file, and `STANLISTEN__`
//! prefixed environment variables such as `STANLISTEN__NATS__URL`.

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{ListenerSettings, LoggingSettings, NatsSettings, Settings};

const DEFAULT_CONFIG_FILE: &str = "config/default";
const ENV_PREFIX: &str = "STANLISTEN";

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Same as [`load_config`] but reads the file at `path` (extension optional).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available, then merge with defaults
    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge_with_defaults())
}
