//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. An example
//! configuration file can be found in the `configs/` directory located in the repository root.

use std::{fmt, path::Path};

use config::{Config, ConfigError, Environment, File};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use fedsum_core::{model::Shape, share::MIN_PIECES};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    pub api: ApiSettings,
    #[validate]
    pub party: PartySettings,
    #[validate]
    pub model: ModelSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("fedsum").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Deserialize, Clone)]
/// Websocket API settings.
pub struct ApiSettings {
    /// The address to which the websocket endpoint should be bound.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// bind_address = "0.0.0.0:4000"
    /// # or
    /// bind_address = "127.0.0.1:4000"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDSUM__API__BIND_ADDRESS=127.0.0.1:4000
    /// ```
    pub bind_address: std::net::SocketAddr,
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_party"))]
/// Party formation settings.
pub struct PartySettings {
    /// The number of participants that jointly compute one sum. Every participant receives
    /// `size - 1` pieces from its friends. The value must be at least `2`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [party]
    /// size = 3
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDSUM__PARTY__SIZE=3
    /// ```
    #[serde(default = "default_party_size")]
    pub size: usize,

    /// Whether a participant that disconnects before its party produced a sum is removed from
    /// the party.
    ///
    /// When enabled, the partial sums already recorded for the remaining members are discarded,
    /// since they contain pieces of the departed participant, and the remaining members are told
    /// to leave it out via a `leave` message. The free slot is filled by the next enrollment.
    ///
    /// When disabled, the departed participant stays expected and its party never completes.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [party]
    /// evict_on_disconnect = true
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDSUM__PARTY__EVICT_ON_DISCONNECT=true
    /// ```
    #[serde(default)]
    pub evict_on_disconnect: bool,
}

fn default_party_size() -> usize {
    3
}

/// A wrapper for validate derive.
fn validate_party(s: &PartySettings) -> Result<(), ValidationError> {
    // the party size is the number of pieces an update is split into
    if s.size < MIN_PIECES {
        Err(ValidationError::new("a party needs at least two participants"))
    } else {
        Ok(())
    }
}

#[derive(Debug, Validate, Deserialize, Clone)]
#[validate(schema(function = "validate_model"))]
/// Model settings.
pub struct ModelSettings {
    /// The shapes of the parameter tensors of the reference architecture, in order. Partial sums
    /// are validated against them.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [model]
    /// shapes = [[3, 3, 1, 16], [16], [288, 64], [64]]
    /// ```
    pub shapes: Vec<Shape>,

    /// The value every parameter of the initial model is set to.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [model]
    /// initial_value = 1.0
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDSUM__MODEL__INITIAL_VALUE=1.0
    /// ```
    #[serde(default = "default_initial_value")]
    pub initial_value: f32,
}

fn default_initial_value() -> f32 {
    1.0
}

impl ModelSettings {
    /// Checks the model settings.
    fn validate_model(&self) -> Result<(), ValidationError> {
        if self.shapes.is_empty() {
            return Err(ValidationError::new("the model has no parameters"));
        }
        if self.shapes.iter().any(|shape| shape.contains(&0)) {
            return Err(ValidationError::new("shapes must not have empty dimensions"));
        }
        if !self.initial_value.is_finite() {
            return Err(ValidationError::new("the initial value must be finite"));
        }
        Ok(())
    }
}

/// A wrapper for validate derive.
fn validate_model(s: &ModelSettings) -> Result<(), ValidationError> {
    s.validate_model()
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
    /// FEDSUM__LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.3/tracing_subscriber/filter/struct.EnvFilter.html#directives
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
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.3/tracing_subscriber/filter/struct.EnvFilter.html#directives")
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
