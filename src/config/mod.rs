mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    DEFAULT_MQTT_PORT, LogSettings, MqttSettings, RelaySettings, ServerSettings, Settings,
};

/// Prefix of the environment variables read by [`load_config`].
pub const ENV_PREFIX: &str = "GPSRELAY";

/// Loads the configuration from `config/default` (if present) and
/// `GPSRELAY_*` environment variables, then fills the gaps with defaults.
///
/// Nested keys use a double underscore: `GPSRELAY_SERVER__PORT=9000`.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as [`load_config`] but reads the file at `path` (extension optional).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
