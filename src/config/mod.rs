//! Process configuration, read once from the environment at startup.
//!
//! | Variable            | Required | Default                     |
//! |---------------------|----------|-----------------------------|
//! | `OPENAI_API_KEY`    | yes      |                             |
//! | `NEURALINK_API_KEY` | yes      |                             |
//! | `NEURALINK_API_URL` | yes      |                             |
//! | `OPENAI_API_URL`    | no       | `https://api.openai.com/v1` |
//! | `OPENAI_MODEL`      | no       | `gpt-4`                     |
//!
//! Each variable may also come from a `.env` file in the working directory
//! or one of its parents ([`Config::load`]); the process environment wins
//! when both set it. Empty values count as missing.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::http::Endpoint;

pub const MODEL_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const MODEL_API_URL_VAR: &str = "OPENAI_API_URL";
pub const MODEL_NAME_VAR: &str = "OPENAI_MODEL";
pub const DEVICE_API_KEY_VAR: &str = "NEURALINK_API_KEY";
pub const DEVICE_API_URL_VAR: &str = "NEURALINK_API_URL";

pub const DEFAULT_MODEL_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_READ_DURATION_MS: u64 = 1000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} not found in environment variables")]
    Missing { var: &'static str },

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("failed to read env file: {0}")]
    EnvFile(String),
}

/// Everything the relay needs, built once and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub model: ModelConfig,
    pub device: DeviceConfig,
    pub relay: RelayConfig,
}

/// Settings for the chat-completion service.
#[derive(Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub endpoint: Endpoint,
    pub model: String,
}

/// Settings for the device API.
#[derive(Clone)]
pub struct DeviceConfig {
    pub api_key: String,
    pub endpoint: Endpoint,
}

/// Loop pacing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Advisory read window passed to the device with every poll.
    pub read_duration_ms: u64,
    /// Pause after every iteration.
    pub poll_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            read_duration_ms: DEFAULT_READ_DURATION_MS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment, layered over a
    /// `.env` file if one is found.
    ///
    /// A missing `.env` file is not an error; an unreadable one is logged
    /// and skipped.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn load() -> Result<Self, ConfigError> {
        let file = match dotenvy::dotenv_iter() {
            Ok(iter) => collect_env_file(iter),
            Err(e) if e.not_found() => Ok(HashMap::new()),
            Err(e) => Err(ConfigError::EnvFile(e.to_string())),
        }
        .unwrap_or_else(|e| {
            warn!(error = %e, "ignoring .env file");
            HashMap::new()
        });
        if !file.is_empty() {
            debug!(vars = file.len(), "loaded .env file");
        }
        Self::from_lookup(layered(|name| std::env::var(name).ok(), file))
    }

    /// Like [`load`](Self::load), but reads the env file at `path` and fails
    /// if it cannot be read or parsed.
    ///
    /// # Errors
    ///
    /// [`ConfigError::EnvFile`] for an unreadable file, otherwise see
    /// [`from_env`](Self::from_env).
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let iter = dotenvy::from_path_iter(path).map_err(|e| ConfigError::EnvFile(e.to_string()))?;
        let file = collect_env_file(iter)?;
        Self::from_lookup(layered(|name| std::env::var(name).ok(), file))
    }

    /// Reads the configuration from the process environment only.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for an absent or empty required
    /// variable and [`ConfigError::Invalid`] for an unparseable URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use neurorelay::config::Config;
    ///
    /// let vars = HashMap::from([
    ///     ("OPENAI_API_KEY", "sk-test"),
    ///     ("NEURALINK_API_KEY", "nl-test"),
    ///     ("NEURALINK_API_URL", "http://127.0.0.1:9000"),
    /// ]);
    /// let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
    /// assert_eq!(config.model.model, "gpt-4");
    /// assert_eq!(config.device.endpoint.port(), 9000);
    /// ```
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());
        let require = |var: &'static str| get(var).ok_or(ConfigError::Missing { var });

        let model_api_key = require(MODEL_API_KEY_VAR)?;
        let device_api_key = require(DEVICE_API_KEY_VAR)?;
        let device_url = require(DEVICE_API_URL_VAR)?;

        let model_url = get(MODEL_API_URL_VAR).unwrap_or_else(|| DEFAULT_MODEL_API_URL.to_owned());
        let model = get(MODEL_NAME_VAR).unwrap_or_else(|| DEFAULT_MODEL.to_owned());

        Ok(Self {
            model: ModelConfig {
                api_key: model_api_key,
                endpoint: parse_endpoint(MODEL_API_URL_VAR, &model_url)?,
                model,
            },
            device: DeviceConfig {
                api_key: device_api_key,
                endpoint: parse_endpoint(DEVICE_API_URL_VAR, &device_url)?,
            },
            relay: RelayConfig::default(),
        })
    }
}

fn collect_env_file<I>(iter: I) -> Result<HashMap<String, String>, ConfigError>
where
    I: IntoIterator<Item = dotenvy::Result<(String, String)>>,
{
    iter.into_iter()
        .collect::<Result<_, _>>()
        .map_err(|e| ConfigError::EnvFile(e.to_string()))
}

/// Looks a variable up in `env` first, then in `file`.
fn layered<F>(env: F, file: HashMap<String, String>) -> impl Fn(&str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    move |name: &str| env(name).or_else(|| file.get(name).cloned())
}

fn parse_endpoint(var: &'static str, url: &str) -> Result<Endpoint, ConfigError> {
    Endpoint::parse(url).map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint.to_string())
            .field("model", &self.model)
            .finish()
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint.to_string())
            .finish()
    }
}
