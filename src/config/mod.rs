mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use crate::config::settings::PartialSettings;

pub use settings::{BrokerSettings, LogSettings, Settings, TopologySettings, WorkerSettings};

pub const ENV_PREFIX: &str = "FANWORK";

/// Loads the configuration from `config/default.*`, a `.env` file and
/// environment variables, then merges it over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config")
}

/// Like [`load_config`], reading `default.*` from `dir`.
///
/// Environment variables take precedence over the file and use the form
/// `FANWORK__SECTION__KEY`, e.g. `FANWORK__BROKER__HOST`.
pub fn load_config_from(dir: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let file = dir.as_ref().join("default");
    let builder = Config::builder()
        .add_source(File::from(file).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_over(Settings::default()))
}
