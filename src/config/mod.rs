//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`FRAMEGUARD_*`)
//! - CLI arguments (for the `frameguard` binary)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Validation pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Audit queue configuration
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| GuardError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GuardError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Default config file location (`$XDG_CONFIG_HOME/frameguard/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("frameguard").join("config.toml"))
    }

    /// Load from an explicit file, else the default path if it exists, else
    /// defaults; environment variables are applied last.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(path)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(val) = env_parse("FRAMEGUARD_RISK_THRESHOLD") {
            self.pipeline.risk_threshold = val;
        }
        if let Some(val) = env_parse("FRAMEGUARD_EVAL_TIMEOUT_MS") {
            self.pipeline.eval_timeout_ms = val;
        }
        if let Some(val) = env_parse("FRAMEGUARD_MAX_DECODE_LAYERS") {
            self.pipeline.max_decode_layers = val;
        }
        if let Some(val) = env_parse("FRAMEGUARD_MAX_INPUT_BYTES") {
            self.pipeline.max_input_bytes = val;
        }
        if let Some(val) = env_parse("FRAMEGUARD_AUDIT_CAPACITY") {
            self.audit.capacity = val;
        }
    }

    /// Reject settings that would weaken the gate.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if !(0.0..=1.0).contains(&p.risk_threshold) || p.risk_threshold == 0.0 {
            return Err(GuardError::Config(format!(
                "risk_threshold must be in (0.0, 1.0], got {}",
                p.risk_threshold
            )));
        }
        if p.max_decode_layers == 0 {
            return Err(GuardError::Config(
                "max_decode_layers must be at least 1".to_string(),
            ));
        }
        if p.max_decoded_bytes < p.max_input_bytes {
            return Err(GuardError::Config(format!(
                "max_decoded_bytes ({}) must not be below max_input_bytes ({})",
                p.max_decoded_bytes, p.max_input_bytes
            )));
        }
        if self.audit.capacity == 0 {
            return Err(GuardError::Config(
                "audit capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Validation pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Aggregate risk score at or above which input is rejected
    pub risk_threshold: f32,

    /// Wall-clock budget for threat evaluation of one request (ms)
    pub eval_timeout_ms: u64,

    /// Maximum decoding layers the normalizer peels off
    pub max_decode_layers: usize,

    /// Maximum serialized request size in bytes
    pub max_input_bytes: usize,

    /// Maximum size of any decoded string
    pub max_decoded_bytes: usize,

    /// Maximum object/array nesting depth
    pub max_depth: usize,

    /// Maximum array length anywhere in the query
    pub max_array_len: usize,

    /// Operator keys the sanitizer keeps (default: none)
    pub allowed_operators: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            risk_threshold: 0.7,
            eval_timeout_ms: 50,
            max_decode_layers: 5,
            max_input_bytes: 16 * 1024,  // 16 KB
            max_decoded_bytes: 64 * 1024, // 64 KB
            max_depth: 8,
            max_array_len: 100,
            allowed_operators: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Evaluation budget as a Duration
    pub fn eval_timeout(&self) -> Duration {
        Duration::from_millis(self.eval_timeout_ms)
    }
}

/// Audit queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Maximum queued entries before the oldest is dropped
    pub capacity: usize,

    /// Characters of the raw value kept in an entry
    pub excerpt_len: usize,

    /// Flush interval for the background flusher (ms)
    pub flush_interval_ms: u64,

    /// Append entries as JSON lines to this file (default: tracing only)
    pub log_path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            excerpt_len: 64,
            flush_interval_ms: 500,
            log_path: None,
        }
    }
}

impl AuditConfig {
    /// Flush interval as a Duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.eval_timeout_ms, 50);
        assert_eq!(config.pipeline.max_decode_layers, 5);
        assert!(config.pipeline.allowed_operators.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [pipeline]
            risk_threshold = 0.8
            eval_timeout_ms = 25
            max_decode_layers = 3

            [audit]
            capacity = 16
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!((config.pipeline.risk_threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.pipeline.eval_timeout(), Duration::from_millis(25));
        assert_eq!(config.pipeline.max_decode_layers, 3);
        // Unspecified fields keep their defaults
        assert_eq!(config.pipeline.max_depth, 8);
        assert_eq!(config.audit.capacity, 16);
        assert_eq!(config.audit.excerpt_len, 64);
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frameguard.toml");
        std::fs::write(&path, "[pipeline]\nmax_depth = 4\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.pipeline.max_depth, 4);
    }

    #[test]
    fn test_rejects_weakening_settings() {
        let mut config = Config::default();
        config.pipeline.risk_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.max_decode_layers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.audit.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/frameguard.toml").unwrap_err();
        assert!(matches!(err, GuardError::Config(_)));
    }
}
