use serde::de::{self, Deserializer, Visitor};

use slog::Level;
use std::{env, fmt, str::FromStr};

use super::{environment_type::EnvironmentType, ENV_PREFIX};

/**
 * Parse a log level name, case insensitive. Used for configuration values and the
 * `--log-level` flag.
 */
pub(crate) fn parse(value: &str) -> Option<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Some(Level::Trace),
        "debug" => Some(Level::Debug),
        "info" => Some(Level::Info),
        "warn" | "warning" => Some(Level::Warning),
        "error" => Some(Level::Error),
        "critical" | "crit" => Some(Level::Critical),
        _ => None,
    }
}

/**
 * Deserialize the log level from the configuration.
 *
 * If the configured level is not recognised, it is inferred from the environment type.
 */
pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
    D: Deserializer<'de>,
{
    match deserializer.deserialize_str(LogLevelVisitor) {
        Ok(level) => Ok(level),
        Err(_) => {
            let env = env::var(format!("{ENV_PREFIX}_ENVIRONMENT")).unwrap_or_default();
            let environment =
                EnvironmentType::from_str(&env).unwrap_or(EnvironmentType::production);
            Ok(environment.default_log_level())
        }
    }
}

struct LogLevelVisitor;

impl<'de> Visitor<'de> for LogLevelVisitor {
    type Value = Level;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string representing a log level")
    }

    fn visit_str<E>(self, value: &str) -> Result<Level, E>
    where
        E: de::Error,
    {
        parse(value).ok_or_else(|| {
            de::Error::unknown_variant(
                value,
                &["trace", "debug", "info", "warn", "error", "critical"],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(parse("TRACE"), Some(Level::Trace));
        assert_eq!(parse("warn"), Some(Level::Warning));
        assert_eq!(parse("Warning"), Some(Level::Warning));
        assert_eq!(parse("crit"), Some(Level::Critical));
        assert_eq!(parse("loud"), None);
    }
}
