/**
 * Define `EnvironmentType` enum and implements various traits for it.
 *
 * The environment decides which optional `turnamp.{environment}.yaml` file is read and the
 * default log level:
 * - `development` (also aliased as 'dev')
 * - `staging` (also aliased as 'stg')
 * - `production` (also aliased as 'prod')
 */
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub(crate) enum EnvironmentType {
    development,
    staging,
    production,
}

impl FromStr for EnvironmentType {
    type Err = ();

    /**
     * Parse a string into an `EnvironmentType` enum. Anything unrecognised is production.
     */
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(EnvironmentType::development),
            "staging" | "stg" => Ok(EnvironmentType::staging),
            _ => Ok(EnvironmentType::production),
        }
    }
}

impl EnvironmentType {
    /**
     * Name of the environment as used in file names and defaults
     */
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::development => "development",
            EnvironmentType::staging => "staging",
            EnvironmentType::production => "production",
        }
    }

    /**
     * Log level used when none is configured
     */
    pub fn default_log_level(&self) -> slog::Level {
        match self {
            EnvironmentType::development => slog::Level::Debug,
            EnvironmentType::staging | EnvironmentType::production => slog::Level::Warning,
        }
    }
}

impl<'de> Deserialize<'de> for EnvironmentType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(EnvironmentType::from_str(&s).unwrap_or(EnvironmentType::production))
    }
}
