//! Environment and file configuration.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const ENV_BACKEND: &str = "STOCKPILOT_BACKEND";
pub const ENV_API_URL: &str = "STOCKPILOT_API_URL";
pub const ENV_API_TOKEN: &str = "STOCKPILOT_API_TOKEN";
pub const ENV_TIMEOUT_SEC: &str = "STOCKPILOT_TIMEOUT_SEC";
pub const ENV_MODEL: &str = "STOCKPILOT_MODEL";
pub const ENV_LOG: &str = "STOCKPILOT_LOG";
pub const ENV_CONFIG_PATH: &str = "STOCKPILOT_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// Which implementation of the store and turn channel to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Mock,
    Http,
}

/// Raw, unvalidated values read from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub backend: Option<String>,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub timeout_sec: Option<String>,
    pub model: Option<String>,
    pub log_filter: Option<String>,
    pub config_path: Option<PathBuf>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            backend: env_string_opt(ENV_BACKEND),
            api_url: env_string_opt(ENV_API_URL),
            api_token: env_string_opt(ENV_API_TOKEN),
            timeout_sec: env_string_opt(ENV_TIMEOUT_SEC),
            model: env_string_opt(ENV_MODEL),
            log_filter: env_string_opt(ENV_LOG),
            config_path: env_string_opt(ENV_CONFIG_PATH).map(PathBuf::from),
        }
    }
}

/// On-disk JSON document named by `STOCKPILOT_CONFIG_PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub api_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub default_model: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Validated settings. Environment values win over file values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub timeout: Option<Duration>,
    pub default_model: Option<String>,
    pub log_filter: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(EnvConfig::from_env())
    }

    pub fn resolve(env: EnvConfig) -> Result<Self, ConfigError> {
        let file = match &env.config_path {
            Some(path) => Some(FileConfig::load(path)?),
            None => None,
        };

        let backend = match env.backend.as_deref().map(str::trim) {
            None => BackendKind::Mock,
            Some(value) if value.eq_ignore_ascii_case("mock") => BackendKind::Mock,
            Some(value) if value.eq_ignore_ascii_case("http") => BackendKind::Http,
            Some(other) => {
                return Err(ConfigError::invalid(
                    ENV_BACKEND,
                    format!("expected 'mock' or 'http', got '{other}'"),
                ))
            }
        };

        let api_url = env
            .api_url
            .or_else(|| file.as_ref().map(|file| file.api_url.clone()));
        if let Some(url) = &api_url {
            if url.trim().is_empty() {
                return Err(ConfigError::invalid("api_url", "must not be empty"));
            }
        }
        if backend == BackendKind::Http && api_url.is_none() {
            return Err(ConfigError::invalid(
                ENV_API_URL,
                "required when the http backend is selected",
            ));
        }

        let timeout_sec = match env.timeout_sec.as_deref() {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|error| {
                ConfigError::invalid(ENV_TIMEOUT_SEC, format!("'{raw}' is not a number: {error}"))
            })?),
            None => file.as_ref().and_then(|file| file.timeout_sec),
        };
        if timeout_sec == Some(0) {
            return Err(ConfigError::invalid("timeout_sec", "must be greater than zero"));
        }

        Ok(Self {
            backend,
            api_url,
            api_token: env
                .api_token
                .or_else(|| file.as_ref().and_then(|file| file.api_token.clone())),
            timeout: timeout_sec.map(Duration::from_secs),
            default_model: env
                .model
                .or_else(|| file.as_ref().and_then(|file| file.default_model.clone())),
            log_filter: env.log_filter,
        })
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}
