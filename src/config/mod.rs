mod settings;

use crate::config::settings::PartialSettings;
use crate::utils::PipelineError;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, LedgerSettings, LogSettings, PipelineSettings, Settings, SinkSettings,
};

/// Environment variable prefix, e.g. `IMGFEED_PIPELINE__TOPIC=imgtest`.
pub const ENV_PREFIX: &str = "IMGFEED";

/// Loads configuration from `config/default` (if present), a `.env` file and
/// `IMGFEED_*` environment variables, merged over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default", false)
}

/// Same as [`load_config`] but reads the file at `path` instead.
///
/// When `required` is false a missing file is silently skipped.
pub fn load_config_from(path: &str, required: bool) -> Result<Settings, ConfigError> {
    dotenvy::dotenv().ok();

    let builder = Config::builder()
        .add_source(File::with_name(path).required(required))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("pipeline.extensions")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Deserialize whatever is available, then fill the gaps.
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merged(partial))
}

impl Settings {
    /// Rejects settings no run can start with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.pipeline.max_in_flight == 0 {
            return Err(PipelineError::Config(
                "pipeline.max_in_flight must be at least 1".into(),
            ));
        }
        if self.broker.max_in_flight_per_connection == 0 {
            return Err(PipelineError::Config(
                "broker.max_in_flight_per_connection must be at least 1".into(),
            ));
        }
        if self.broker.poll_interval_ms == 0 {
            return Err(PipelineError::Config(
                "broker.poll_interval_ms must be at least 1".into(),
            ));
        }
        if self.pipeline.topic.trim().is_empty() {
            return Err(PipelineError::Config("pipeline.topic must not be empty".into()));
        }
        if self.broker.bootstrap_servers.trim().is_empty() {
            return Err(PipelineError::Config(
                "broker.bootstrap_servers must not be empty".into(),
            ));
        }
        Ok(())
    }
}
