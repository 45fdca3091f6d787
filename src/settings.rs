//! Module for loading and validating coordinator settings.
//!
//! Settings defined in the configuration file can be overridden by environment variables.

use std::{fmt, path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::crypto::DEFAULT_KEY_BITS;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
pub struct Settings {
    #[validate]
    pub round: RoundSettings,
    #[validate]
    pub crypto: CryptoSettings,
    pub model: ModelSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: PathBuf) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path))?;
        config.merge(Environment::with_prefix("guardian").separator("__"))?;
        config.try_into()
    }
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_round"))]
/// Round settings.
pub struct RoundSettings {
    #[validate(range(min = 1))]
    /// The number of update submissions required before a round may
    /// aggregate. The value must be greater or equal to `1`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// min_required = 3
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// GUARDIAN_ROUND__MIN_REQUIRED=3
    /// ```
    pub min_required: usize,

    #[validate(range(min = 1))]
    /// The number of distinct clients that must connect over the lifetime of
    /// a run before a failed round is treated as recoverable.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// min_clients = 3
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// GUARDIAN_ROUND__MIN_CLIENTS=3
    /// ```
    pub min_clients: usize,

    #[validate(range(min = 1))]
    /// The collection window in seconds. Submissions arriving after the
    /// window closed are discarded.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// timeout_secs = 30
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// GUARDIAN_ROUND__TIMEOUT_SECS=30
    /// ```
    pub timeout_secs: u64,
}

impl RoundSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn validate_round(settings: &RoundSettings) -> Result<(), ValidationError> {
    if settings.min_clients < settings.min_required {
        return Err(ValidationError::new(
            "min_clients must be greater or equal to min_required",
        ));
    }
    Ok(())
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
/// Cryptographic settings.
pub struct CryptoSettings {
    #[validate(range(min = 512))]
    /// The bit length of the modulus of freshly generated key pairs. The
    /// value must be greater or equal to `512`; production deployments
    /// should use `2048` or more.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [crypto]
    /// key_bits = 2048
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// GUARDIAN_CRYPTO__KEY_BITS=2048
    /// ```
    pub key_bits: usize,
}

impl Default for CryptoSettings {
    fn default() -> Self {
        Self {
            key_bits: DEFAULT_KEY_BITS,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
/// Model settings.
pub struct ModelSettings {
    /// The expected length of the global parameter vector. `0` leaves the
    /// length to be fixed by the first aggregated round.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [model]
    /// length = 4
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// GUARDIAN_MODEL__LENGTH=4
    /// ```
    pub length: usize,
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// GUARDIAN_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.2.6/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.2.6/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_new() {
        assert!(Settings::new(PathBuf::from("configs/config.toml")).is_ok());
        assert!(Settings::new(PathBuf::from("")).is_err());
    }

    #[test]
    fn test_validate_round() {
        let valid = RoundSettings {
            min_required: 2,
            min_clients: 3,
            timeout_secs: 10,
        };
        assert!(valid.validate().is_ok());

        let quorum_above_clients = RoundSettings {
            min_required: 4,
            min_clients: 3,
            timeout_secs: 10,
        };
        assert!(quorum_above_clients.validate().is_err());

        let zero_quorum = RoundSettings {
            min_required: 0,
            min_clients: 3,
            timeout_secs: 10,
        };
        assert!(zero_quorum.validate().is_err());
    }

    #[test]
    fn test_validate_crypto() {
        assert!(CryptoSettings { key_bits: 2048 }.validate().is_ok());
        assert!(CryptoSettings { key_bits: 512 }.validate().is_ok());
        assert!(CryptoSettings { key_bits: 256 }.validate().is_err());
    }
}
