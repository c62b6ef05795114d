//! Configuration parsing.
//!
//! A single TOML file (`hemabridge.toml` by convention) with four sections.
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8000"
//! upload_limit_bytes = 10485760
//!
//! [database]
//! path = "hemabridge.db"
//!
//! [auth]
//! secret_env = "HEMABRIDGE_SECRET"
//! token_ttl_minutes = 30
//!
//! [auth.throttle]
//! max_failures = 5
//! window_secs = 300
//!
//! [model]
//! mode = "command"        # or "fixed"
//! command = "python3"
//! args = ["model_runner.py"]
//! weights = "models/blood_cell_model.h5"
//! timeout_secs = 30
//! min_image_side = 32
//! min_confidence = 30.0
//! fixed_probabilities = [0.30, 0.08, 0.03, 0.52, 0.07]
//! ```
//!
//! The token signing secret is never stored in the file; `auth.secret_env`
//! names the environment variable that holds it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::ThrottleConfig;
use crate::cell::CellType;
use crate::model::{
    CellClassifier, CommandClassifier, CommandSpec, FixedClassifier, HandlerLimits, ModelError,
    ModelHandler,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HemabridgeConfig {
    /// HTTP listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// `SQLite` database.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Tokens and login throttling.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Image classifier.
    #[serde(default)]
    pub model: ModelConfig,
}

impl HemabridgeConfig {
    /// Loads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.upload_limit_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.upload_limit_bytes must be positive".to_string(),
            ));
        }
        if self.auth.token_ttl_minutes == 0 {
            return Err(ConfigError::Validation(
                "auth.token_ttl_minutes must be positive".to_string(),
            ));
        }
        if self.auth.throttle.max_failures == 0 || self.auth.throttle.window_secs == 0 {
            return Err(ConfigError::Validation(
                "auth.throttle values must be positive".to_string(),
            ));
        }
        if self.auth.secret_env.trim().is_empty() {
            return Err(ConfigError::Validation(
                "auth.secret_env must name an environment variable".to_string(),
            ));
        }
        self.model.validate()
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Largest accepted request body.
    pub upload_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            upload_limit_bytes: 10 * 1024 * 1024,
        }
    }
}

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file, created on first start.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("hemabridge.db"),
        }
    }
}

/// `[auth]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Environment variable holding the token signing secret.
    pub secret_env: String,
    /// Bearer token lifetime.
    pub token_ttl_minutes: u64,
    /// Failed-login throttle.
    pub throttle: ThrottleConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_env: "HEMABRIDGE_SECRET".to_string(),
            token_ttl_minutes: 30,
            throttle: ThrottleConfig::default(),
        }
    }
}

impl AuthConfig {
    /// Token lifetime as a [`Duration`].
    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_minutes.saturating_mul(60))
    }

    /// Reads the signing secret from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] when the variable is unset or
    /// blank.
    pub fn secret(&self) -> Result<SecretString, ConfigError> {
        self.secret_from(|name| std::env::var(name).ok())
    }

    /// Reads the signing secret through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] when `lookup` yields nothing or
    /// a blank value.
    pub fn secret_from(
        &self,
        lookup: impl FnOnce(&str) -> Option<String>,
    ) -> Result<SecretString, ConfigError> {
        match lookup(&self.secret_env) {
            Some(value) if !value.trim().is_empty() => Ok(SecretString::from(value)),
            _ => Err(ConfigError::MissingSecret {
                var: self.secret_env.clone(),
            }),
        }
    }
}

/// How the classifier is provided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    /// External runner process.
    #[default]
    Command,
    /// Constant probabilities.
    Fixed,
}

/// `[model]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Classifier source.
    pub mode: ModelMode,
    /// Runner executable.
    pub command: String,
    /// Runner arguments before the weights path.
    pub args: Vec<String>,
    /// Trained weights file.
    pub weights: PathBuf,
    /// Per-inference time limit.
    pub timeout_secs: u64,
    /// Minimum accepted image width and height.
    pub min_image_side: u32,
    /// Minimum dominant-class percentage.
    pub min_confidence: f64,
    /// Probabilities returned in `fixed` mode, in classifier order.
    pub fixed_probabilities: Vec<f64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let limits = HandlerLimits::default();
        Self {
            mode: ModelMode::Command,
            command: "python3".to_string(),
            args: vec!["model_runner.py".to_string()],
            weights: PathBuf::from("models/blood_cell_model.h5"),
            timeout_secs: 30,
            min_image_side: limits.min_image_side,
            min_confidence: limits.min_confidence,
            fixed_probabilities: vec![0.30, 0.08, 0.03, 0.52, 0.07],
        }
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(ConfigError::Validation(
                "model.min_confidence must be within [0, 100]".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "model.timeout_secs must be positive".to_string(),
            ));
        }
        match self.mode {
            ModelMode::Command if self.command.trim().is_empty() => Err(ConfigError::Validation(
                "model.command must be set in command mode".to_string(),
            )),
            ModelMode::Fixed if self.fixed_probabilities.len() != CellType::ALL.len() => {
                Err(ConfigError::Validation(format!(
                    "model.fixed_probabilities must have {} entries, got {}",
                    CellType::ALL.len(),
                    self.fixed_probabilities.len()
                )))
            },
            _ => Ok(()),
        }
    }

    /// Handler limits from this section.
    #[must_use]
    pub const fn limits(&self) -> HandlerLimits {
        HandlerLimits {
            min_image_side: self.min_image_side,
            min_confidence: self.min_confidence,
        }
    }

    /// Runner invocation from this section.
    #[must_use]
    pub fn command_spec(&self) -> CommandSpec {
        CommandSpec {
            command: self.command.clone(),
            args: self.args.clone(),
            weights: self.weights.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// Builds the handler for the configured mode.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ModelUnavailable`] in command mode when the
    /// weights file is missing.
    pub fn build_handler(&self) -> Result<ModelHandler, ModelError> {
        let classifier: Arc<dyn CellClassifier> = match self.mode {
            ModelMode::Command => Arc::new(CommandClassifier::load(self.command_spec())?),
            ModelMode::Fixed => Arc::new(FixedClassifier::new(self.fixed_probabilities.clone())),
        };
        tracing::info!(classifier = classifier.name(), "model handler ready");
        Ok(ModelHandler::new(classifier, self.limits()))
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),

    /// The token secret environment variable is unset.
    #[error("environment variable {var} must hold the token signing secret")]
    MissingSecret {
        /// Variable name.
        var: String,
    },
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = HemabridgeConfig::from_toml("").unwrap();
        assert_eq!(config, HemabridgeConfig::default());
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.auth.token_ttl(), Duration::from_secs(1800));
        assert_eq!(config.model.mode, ModelMode::Command);
    }

    #[test]
    fn test_parse_sections() {
        let config = HemabridgeConfig::from_toml(
            r#"
            [server]
            bind = "0.0.0.0:9000"

            [database]
            path = "/var/lib/hemabridge/app.db"

            [auth]
            secret_env = "APP_SECRET"
            token_ttl_minutes = 5

            [auth.throttle]
            max_failures = 2

            [model]
            mode = "fixed"
            fixed_probabilities = [0.1, 0.25, 0.05, 0.55, 0.05]
            min_confidence = 40.0
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.upload_limit_bytes, 10 * 1024 * 1024);
        assert_eq!(config.database.path, PathBuf::from("/var/lib/hemabridge/app.db"));
        assert_eq!(config.auth.secret_env, "APP_SECRET");
        assert_eq!(config.auth.throttle.max_failures, 2);
        assert_eq!(config.auth.throttle.window_secs, 300);
        assert_eq!(config.model.mode, ModelMode::Fixed);
        assert!((config.model.limits().min_confidence - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fixed_mode_requires_five_probabilities() {
        let err = HemabridgeConfig::from_toml(
            r#"
            [model]
            mode = "fixed"
            fixed_probabilities = [0.5, 0.5]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("5 entries")));
    }

    #[test]
    fn test_rejects_zero_ttl_and_bad_mode() {
        assert!(matches!(
            HemabridgeConfig::from_toml("[auth]\ntoken_ttl_minutes = 0"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            HemabridgeConfig::from_toml("[model]\nmode = \"tensorflow\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_secret_lookup_fails_closed() {
        let auth = AuthConfig::default();
        let err = auth.secret_from(|_| None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingSecret { ref var } if var == "HEMABRIDGE_SECRET"
        ));
        assert!(auth.secret_from(|_| Some("   ".to_string())).is_err());

        let secret = auth
            .secret_from(|name| (name == "HEMABRIDGE_SECRET").then(|| "s3cret".to_string()))
            .unwrap();
        assert_eq!(secret.expose_secret(), "s3cret");
    }

    #[test]
    fn test_from_file_and_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[database]\npath = \"test.db\"").unwrap();
        let config = HemabridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database.path, PathBuf::from("test.db"));

        let reparsed = HemabridgeConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_build_handler_in_command_mode_needs_weights() {
        let config = ModelConfig {
            weights: PathBuf::from("/nonexistent/weights.h5"),
            ..ModelConfig::default()
        };
        assert!(matches!(
            config.build_handler(),
            Err(ModelError::ModelUnavailable { .. })
        ));

        let fixed = ModelConfig {
            mode: ModelMode::Fixed,
            ..ModelConfig::default()
        };
        assert!(fixed.build_handler().is_ok());
    }

    #[test]
    fn test_example_file_matches_defaults() {
        let example = include_str!("../../../hemabridge.example.toml");
        assert_eq!(
            HemabridgeConfig::from_toml(example).unwrap(),
            HemabridgeConfig::default()
        );
    }
}
