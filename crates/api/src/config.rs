//! Service configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `DIGIT_CLASSIFIER__SECTION__KEY` environment variables.

use config::{Config, ConfigError, Environment, File};
use image_preprocessor::PreprocessConfig;
use inference_engine::ModelConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::rate_limit::RateLimitConfig;

/// Default config file, overridable with `DIGIT_CLASSIFIER_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "digit-classifier.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "DIGIT_CLASSIFIER";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub preprocess: PreprocessConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Files accepted by one batch request
    pub max_batch_items: usize,
    /// Request body limit in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_batch_items: 64,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load from the default (or `DIGIT_CLASSIFIER_CONFIG`) path and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("DIGIT_CLASSIFIER_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from a specific file (optional) and the environment
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::build(path, ENV_PREFIX)
    }

    fn build(path: &Path, env_prefix: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("model.paths"),
            )
            .build()?
            .try_deserialize()
    }
}
