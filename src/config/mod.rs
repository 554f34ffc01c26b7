mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BatchSettings, BrokerSettings, LoggingSettings, PartialSettings, ServerSettings, Settings,
    SledSettings, StoreBackend, StoreSettings,
};

/// Environment variables override files, e.g. `SUBJECTMQ__STORE__BACKEND=sled`.
pub const ENV_PREFIX: &str = "SUBJECTMQ";

/// Loads the configuration from `config/default` and environment variables,
/// merges it with the defaults and validates the result.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = Settings::merge(partial);
    settings.validate().map_err(ConfigError::Message)?;
    Ok(settings)
}
