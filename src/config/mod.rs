/**
 * Initialize tool configuration, using hierarchical configuration
 * https://docs.rs/config/latest/config/
 *
 * 1. First turnamp.yaml is read
 * 2. Then turnamp.{environment}.yaml is read
 * 3. Then turnamp.local.yaml is read (this is normally used for dev and not checked in git)
 * 4. Then environment variables prefixed with AMP_ are read
 * 5. Finally, command line flags are applied on top (see `Overrides`)
 */
use config::{Config, ConfigError, Environment, File};
use environment_type::EnvironmentType;
use serde::Deserialize;
use std::{env, str::FromStr, time::Duration};
pub(crate) mod environment_type;
pub(crate) mod loglevel_type;

/// Prefix of the environment variables read by `Settings::new`
pub(crate) const ENV_PREFIX: &str = "AMP";

/**
 * Represents the configuration settings for a measurement run.
 *
 * Fields:
 * - `environment`: The environment type (e.g., development, staging, or production).
 * - `server_address`: The TURN server to probe (host:port format)
 * - `request_count`: How many Allocate requests to send
 * - `read_timeout_ms`: How long to wait for each response before giving up on that request
 * - `interval_ms`: Pause between two requests, so the target doesn't see a flood
 * - `log_level`: The logging level. By default, logging is inferred from environment type if no other settings are found.
 */
#[derive(Debug, Deserialize, Clone)]
pub(crate) struct Settings {
    pub(crate) environment: EnvironmentType,
    pub(crate) server_address: String,
    pub(crate) request_count: u32,
    pub(crate) read_timeout_ms: u64,
    pub(crate) interval_ms: u64,
    #[serde(deserialize_with = "loglevel_type::deserialize")]
    pub(crate) log_level: slog::Level,
}

/**
 * Values given on the command line. `None` keeps whatever the configuration says.
 */
#[derive(Debug, Default, Clone)]
pub(crate) struct Overrides {
    pub(crate) server_address: Option<String>,
    pub(crate) request_count: Option<u32>,
    pub(crate) read_timeout_ms: Option<u64>,
    pub(crate) interval_ms: Option<u64>,
    pub(crate) log_level: Option<slog::Level>,
}

impl Settings {
    pub(crate) fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var(format!("{ENV_PREFIX}_ENVIRONMENT"))
            .unwrap_or_else(|_| EnvironmentType::production.as_str().into());
        let environment =
            EnvironmentType::from_str(&run_mode).unwrap_or(EnvironmentType::production);

        let s = Config::builder()
            // default config file
            .add_source(File::with_name("turnamp.yaml").required(false))
            // environment-based config file
            .add_source(
                File::with_name(&format!("turnamp.{}.yaml", environment.as_str())).required(false),
            )
            // local config file (don't check this into source control)
            .add_source(File::with_name("turnamp.local.yaml").required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .set_default("server_address", "127.0.0.1:3478")?
            .set_default("request_count", 100)?
            .set_default("read_timeout_ms", 2000)?
            .set_default("interval_ms", 10)?
            .set_default(
                "log_level",
                match environment.default_log_level() {
                    slog::Level::Debug => "debug",
                    _ => "warn",
                },
            )?
            .set_default("environment", EnvironmentType::production.as_str())?
            .build()?;

        s.try_deserialize()
    }

    /**
     * Apply command line values on top of the loaded configuration
     */
    pub(crate) fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(server_address) = overrides.server_address {
            self.server_address = server_address;
        }
        if let Some(count) = overrides.request_count {
            self.request_count = count;
        }
        if let Some(ms) = overrides.read_timeout_ms {
            self.read_timeout_ms = ms;
        }
        if let Some(ms) = overrides.interval_ms {
            self.interval_ms = ms;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
        self
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub(crate) fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
