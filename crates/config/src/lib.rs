//! Configuration loading, validation, and management for Ironloop.
//!
//! Loads configuration from `~/.ironloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ironloop/config.toml`. Every field has a default,
/// so a missing or partial file always yields a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default model identifier sent with every provider request
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Hard ceiling on run iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Keep looping until the task list completes (vs. stop on first
    /// response without tool calls)
    #[serde(default = "default_true")]
    pub workflow_mode: bool,

    /// Per-request timeout for model calls, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Transient-failure retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Context window budget settings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Stall detection and auto-continuation settings
    #[serde(default)]
    pub continuation: ContinuationConfig,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_iterations() -> usize {
    20
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

/// Retry behavior for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt (so 3 means up to 4 attempts)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before each retry, in seconds. The last entry repeats if
    /// there are more retries than entries.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,

    /// Dedicated (longer) delay table for rate-limit responses
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: Vec<u64>,

    /// Attempt ceiling while the provider keeps rate-limiting
    #[serde(default = "default_rate_limit_max_attempts")]
    pub rate_limit_max_attempts: u32,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_secs() -> Vec<u64> {
    vec![2, 4, 6]
}
fn default_rate_limit_backoff_secs() -> Vec<u64> {
    vec![4, 8, 16, 32, 60]
}
fn default_rate_limit_max_attempts() -> u32 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
            rate_limit_backoff_secs: default_rate_limit_backoff_secs(),
            rate_limit_max_attempts: default_rate_limit_max_attempts(),
        }
    }
}

/// Context window budget and compaction thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Override the per-model context window (tokens). None = infer from
    /// the model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_limit: Option<usize>,

    /// Usage fraction that triggers history compaction
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,

    /// Usage fraction compaction aims to come back down to
    #[serde(default = "default_compaction_target")]
    pub compaction_target: f32,
}

fn default_compaction_threshold() -> f32 {
    0.85
}
fn default_compaction_target() -> f32 {
    0.70
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            context_limit: None,
            compaction_threshold: default_compaction_threshold(),
            compaction_target: default_compaction_target(),
        }
    }
}

/// Stall detection and auto-continuation behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationConfig {
    /// Consecutive auto-continuations allowed before the run stops
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Tool names that count as planning rather than work. Iterations
    /// that invoke only these tools count toward stall detection.
    #[serde(default = "default_planning_tools")]
    pub planning_tools: Vec<String>,

    /// Iteration window for counting consecutive failures of one tool.
    /// A gap longer than this resets the streak.
    #[serde(default = "default_failure_window")]
    pub failure_window: usize,
}

fn default_retry_limit() -> u32 {
    5
}
fn default_planning_tools() -> Vec<String> {
    vec!["think".into(), "update_todos".into()]
}
fn default_failure_window() -> usize {
    5
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            planning_tools: default_planning_tools(),
            failure_window: default_failure_window(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.ironloop/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `IRONLOOP_MODEL`
    /// - `IRONLOOP_MAX_ITERATIONS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("IRONLOOP_MODEL") {
            config.model = model;
        }

        if let Ok(raw) = std::env::var("IRONLOOP_MAX_ITERATIONS") {
            config.max_iterations = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "IRONLOOP_MAX_ITERATIONS must be a positive integer, got {raw:?}"
                ))
            })?;
        }

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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ironloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retry.max_retries > 0 && self.retry.backoff_secs.is_empty() {
            return Err(ConfigError::ValidationError(
                "retry.backoff_secs must not be empty when retries are enabled".into(),
            ));
        }

        if self.retry.rate_limit_max_attempts > 1 && self.retry.rate_limit_backoff_secs.is_empty()
        {
            return Err(ConfigError::ValidationError(
                "retry.rate_limit_backoff_secs must not be empty".into(),
            ));
        }

        if self.budget.compaction_threshold <= 0.0 || self.budget.compaction_threshold > 1.0 {
            return Err(ConfigError::ValidationError(
                "budget.compaction_threshold must be in (0.0, 1.0]".into(),
            ));
        }

        if self.budget.compaction_target <= 0.0
            || self.budget.compaction_target >= self.budget.compaction_threshold
        {
            return Err(ConfigError::ValidationError(
                "budget.compaction_target must be > 0 and below compaction_threshold".into(),
            ));
        }

        if self.continuation.failure_window == 0 {
            return Err(ConfigError::ValidationError(
                "continuation.failure_window must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for first-run setup).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_iterations: default_max_iterations(),
            workflow_mode: true,
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
            budget: BudgetConfig::default(),
            continuation: ContinuationConfig::default(),
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff_secs, vec![2, 4, 6]);
        assert_eq!(config.retry.rate_limit_backoff_secs, vec![4, 8, 16, 32, 60]);
        assert!(config.workflow_mode);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.retry.backoff_secs, config.retry.backoff_secs);
        assert_eq!(
            parsed.continuation.planning_tools,
            config.continuation.planning_tools
        );
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = EngineConfig {
            temperature: 5.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn compaction_target_must_sit_below_threshold() {
        let mut config = EngineConfig::default();
        config.budget.compaction_target = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_backoff_table_rejected() {
        let mut config = EngineConfig::default();
        config.retry.backoff_secs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = EngineConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.max_iterations, 20);
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
model = "local/test-model"

[continuation]
retry_limit = 2
"#,
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "local/test-model");
        assert_eq!(config.continuation.retry_limit, 2);
        assert_eq!(config.continuation.failure_window, 5);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = EngineConfig::default_toml();
        assert!(toml_str.contains("claude-sonnet-4"));
        assert!(toml_str.contains("compaction_threshold"));
        assert!(toml_str.contains("update_todos"));
    }
}
