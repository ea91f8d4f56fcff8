//! Configuration management for loopguard
//!
//! Parses TOML configuration files, applies `LOOP_DETECTION_*` environment
//! overrides and provides typed access to settings.

use crate::error::{AppError, AppResult};
use crate::loop_detection::DetectionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

pub const ENV_ENABLED: &str = "LOOP_DETECTION_ENABLED";
pub const ENV_CHUNK_SIZE: &str = "LOOP_DETECTION_CHUNK_SIZE";
pub const ENV_THRESHOLD: &str = "LOOP_DETECTION_THRESHOLD";
pub const ENV_MAX_HISTORY: &str = "LOOP_DETECTION_MAX_HISTORY";
pub const ENV_BUFFER_SIZE: &str = "LOOP_DETECTION_BUFFER_SIZE";
pub const ENV_WHITELIST: &str = "LOOP_DETECTION_WHITELIST";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub loop_detection: DetectionConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file, with overrides from the process environment
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::from_file_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load configuration from a TOML file, resolving overrides through `lookup`
    pub fn from_file_with_env<P, F>(path: P, lookup: F) -> AppResult<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path_display = path.as_ref().display().to_string();

        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        let mut config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .apply_env_overrides(lookup)
            .and_then(|()| config.validate())
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Apply `LOOP_DETECTION_*` overrides found by `lookup`
    ///
    /// Unset variables leave the file value in place. The resulting detection
    /// configuration is re-validated as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] for unparseable values and
    /// [`AppError::LoopDetection`] when the combined values violate the
    /// detector invariants.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = self.loop_detection.to_builder();
        let mut overridden = Vec::new();

        if let Some(raw) = lookup(ENV_ENABLED) {
            builder = builder.enabled(parse_bool(ENV_ENABLED, &raw)?);
            overridden.push(ENV_ENABLED);
        }
        if let Some(raw) = lookup(ENV_CHUNK_SIZE) {
            builder = builder.content_chunk_size(parse_usize(ENV_CHUNK_SIZE, &raw)?);
            overridden.push(ENV_CHUNK_SIZE);
        }
        if let Some(raw) = lookup(ENV_THRESHOLD) {
            builder = builder.content_loop_threshold(parse_usize(ENV_THRESHOLD, &raw)?);
            overridden.push(ENV_THRESHOLD);
        }
        if let Some(raw) = lookup(ENV_MAX_HISTORY) {
            builder = builder.max_history_length(parse_usize(ENV_MAX_HISTORY, &raw)?);
            overridden.push(ENV_MAX_HISTORY);
        }
        if let Some(raw) = lookup(ENV_BUFFER_SIZE) {
            builder = builder.buffer_size(parse_usize(ENV_BUFFER_SIZE, &raw)?);
            overridden.push(ENV_BUFFER_SIZE);
        }
        if let Some(raw) = lookup(ENV_WHITELIST) {
            builder = builder.whitelist(
                raw.split(',')
                    .map(str::trim)
                    .filter(|token| !token.is_empty())
                    .map(str::to_string),
            );
            overridden.push(ENV_WHITELIST);
        }

        if overridden.is_empty() {
            return Ok(());
        }

        self.loop_detection = builder.build()?;
        tracing::debug!(
            overrides = ?overridden,
            "Applied loop detection environment overrides"
        );
        Ok(())
    }

    /// Validate configuration after parsing
    ///
    /// Called by `from_file()` and `from_str()`; call it explicitly when
    /// building a `Config` by other means.
    pub fn validate(&self) -> AppResult<()> {
        if self.server.port == 0 {
            return Err(AppError::Config(
                "server.port must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.observability.log_level.as_str()) {
            return Err(AppError::Config(format!(
                "observability.log_level must be one of {:?}, got '{}'",
                VALID_LOG_LEVELS, self.observability.log_level
            )));
        }

        self.loop_detection.validate()?;
        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(toml_str).map_err(|source| {
            AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            }
        })?;

        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> AppResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::Config(format!(
            "{} must be a boolean (true/false), got '{}'",
            key, other
        ))),
    }
}

fn parse_usize(key: &str, raw: &str) -> AppResult<usize> {
    raw.trim().parse().map_err(|_| {
        AppError::Config(format!(
            "{} must be a non-negative integer, got '{}'",
            key, raw
        ))
    })
}
