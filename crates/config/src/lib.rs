//! Configuration loading, validation, and management for Vigil.
//!
//! Loads configuration from `~/.vigil/config.toml` with environment
//! variable overrides. Validates all settings before the SDK starts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.vigil/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Session tracking
    #[serde(default)]
    pub session: SessionConfig,

    /// Log record batching
    #[serde(default)]
    pub logs: BatchConfig,

    /// Metric point batching
    #[serde(default)]
    pub metrics: BatchConfig,

    /// Slow/frozen frame attribution
    #[serde(default)]
    pub frames: FramesConfig,

    /// App start measurement
    #[serde(default)]
    pub app_start: AppStartConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Background time after which the session ends, and the minimum gap
    /// between foregrounds that starts a new one.
    #[serde(default = "default_session_interval_ms")]
    pub session_interval_ms: u64,
}

fn default_session_interval_ms() -> u64 {
    30_000
}

impl SessionConfig {
    pub fn session_interval(&self) -> Duration {
        Duration::from_millis(self.session_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session_interval_ms: default_session_interval_ms(),
        }
    }
}

/// Settings for one telemetry batch coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Buffer capacity; reaching it triggers a flush, exceeding it drops the oldest.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Periodic flush interval.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Deadline for a single flush attempt.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Deadline for the flush submitted when the app is backgrounded.
    #[serde(default = "default_background_flush_timeout_ms")]
    pub background_flush_timeout_ms: u64,

    /// How long `close` waits for the final flush.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,

    /// Pending flush tasks the background executor accepts before rejecting.
    #[serde(default = "default_executor_queue_capacity")]
    pub executor_queue_capacity: usize,
}

fn default_max_batch_size() -> usize {
    100
}
fn default_flush_interval_ms() -> u64 {
    5_000
}
fn default_flush_timeout_ms() -> u64 {
    5_000
}
fn default_background_flush_timeout_ms() -> u64 {
    2_000
}
fn default_close_grace_ms() -> u64 {
    2_000
}
fn default_executor_queue_capacity() -> usize {
    16
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn background_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.background_flush_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{section}.max_batch_size must be > 0"
            )));
        }
        if self.flush_interval_ms == 0 || self.flush_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{section}.flush_interval_ms and {section}.flush_timeout_ms must be > 0"
            )));
        }
        if self.background_flush_timeout_ms == 0 || self.close_grace_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{section}.background_flush_timeout_ms and {section}.close_grace_ms must be > 0"
            )));
        }
        if self.executor_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{section}.executor_queue_capacity must be > 0"
            )));
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: default_max_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
            background_flush_timeout_ms: default_background_flush_timeout_ms(),
            close_grace_ms: default_close_grace_ms(),
            executor_queue_capacity: default_executor_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// A frame is slow when it takes longer than `multiplier × 1s / refresh_rate`.
    #[serde(default = "default_slow_frame_multiplier")]
    pub slow_frame_multiplier: f64,

    /// A frame is frozen when it takes longer than this.
    #[serde(default = "default_frozen_frame_threshold_ms")]
    pub frozen_frame_threshold_ms: u64,
}

fn default_slow_frame_multiplier() -> f64 {
    1.0
}
fn default_frozen_frame_threshold_ms() -> u64 {
    700
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_frame_multiplier: default_slow_frame_multiplier(),
            frozen_frame_threshold_ms: default_frozen_frame_threshold_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStartConfig {
    /// Longer app starts are discarded as bogus (pre-warmed or background launches).
    #[serde(default = "default_max_app_start_ms")]
    pub max_duration_ms: u64,
}

fn default_max_app_start_ms() -> u64 {
    60_000
}

impl AppStartConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

impl Default for AppStartConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: default_max_app_start_ms(),
        }
    }
}

impl SdkConfig {
    /// Load configuration from the default path (~/.vigil/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `VIGIL_SESSION_INTERVAL_MS`
    /// - `VIGIL_LOGS_ENABLED`
    /// - `VIGIL_METRICS_ENABLED`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `VIGIL_*` overrides read through `lookup`. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("VIGIL_SESSION_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.session.session_interval_ms = ms,
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid VIGIL_SESSION_INTERVAL_MS"),
            }
        }
        if let Some(enabled) = lookup("VIGIL_LOGS_ENABLED").and_then(|v| parse_bool(&v)) {
            self.logs.enabled = enabled;
        }
        if let Some(enabled) = lookup("VIGIL_METRICS_ENABLED").and_then(|v| parse_bool(&v)) {
            self.metrics.enabled = enabled;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".vigil")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.session_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "session.session_interval_ms must be > 0".into(),
            ));
        }

        self.logs.validate("logs")?;
        self.metrics.validate("metrics")?;

        if !(self.frames.slow_frame_multiplier >= 1.0) {
            return Err(ConfigError::ValidationError(
                "frames.slow_frame_multiplier must be >= 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for vigil_core::Error {
    fn from(err: ConfigError) -> Self {
        vigil_core::Error::Config {
            message: err.to_string(),
        }
    }
}
