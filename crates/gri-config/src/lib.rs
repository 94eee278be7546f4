// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and environment overrides for the
//! Grimoire ingestion core.
//!
//! This crate provides [`IngestConfig`] — the process-wide runtime settings —
//! together with helpers for loading from TOML files, applying environment
//! variable overrides, and producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },

    /// An environment variable override carried an unparseable value.
    #[error("invalid value for {var}: {value}")]
    InvalidEnvOverride {
        /// Variable name.
        var: String,
        /// Offending value.
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Worker slots set to 1 serializes all jobs.
    SingleWorkerSlot,
    /// A per-pass timeout is unusually large.
    LargeTimeout {
        /// Pass letter.
        pass: String,
        /// Timeout value in milliseconds.
        ms: u64,
    },
    /// The configured log level is not a recognised tracing level.
    UnknownLogLevel {
        /// The offending level string.
        level: String,
    },
    /// Gate 0 is disabled; every ingest runs the full pipeline.
    Gate0Disabled,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::SingleWorkerSlot => {
                write!(f, "worker_slots=1 serializes all jobs")
            }
            ConfigWarning::LargeTimeout { pass, ms } => {
                write!(f, "pass {pass} has a large timeout ({ms} ms)")
            }
            ConfigWarning::UnknownLogLevel { level } => {
                write!(f, "unknown log level '{level}'")
            }
            ConfigWarning::Gate0Disabled => {
                write!(f, "gate0 disabled: unchanged sources will be fully re-ingested")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Retry settings applied to retryable adapter failures.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RetrySettings {
    /// Maximum attempts including the first (default 3).
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds (default 500).
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Top-level runtime configuration for the ingestion core.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct IngestConfig {
    /// Root directory for all job artifacts.
    #[serde(default = "default_artifacts_root")]
    pub artifacts_root: PathBuf,

    /// Process-wide worker slots; distinct jobs run in parallel across slots.
    #[serde(default = "default_worker_slots")]
    pub worker_slots: usize,

    /// Whether Gate 0 bypass/delta decisions are consulted at all.
    #[serde(default = "default_true")]
    pub gate0_enabled: bool,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Per-pass timeout defaults in milliseconds, keyed by pass letter.
    /// Request policy may override per job.
    #[serde(default)]
    pub pass_timeouts_ms: BTreeMap<String, u64>,

    /// Retry settings for retryable adapter failures.
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_artifacts_root() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_worker_slots() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            artifacts_root: default_artifacts_root(),
            worker_slots: default_worker_slots(),
            gate0_enabled: true,
            log_level: Some("info".into()),
            pass_timeouts_ms: BTreeMap::new(),
            retry: RetrySettings::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Threshold above which a pass timeout generates a warning (2 hours).
const LARGE_TIMEOUT_THRESHOLD_MS: u64 = 7_200_000;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Environment variable naming the artifacts root.
pub const ENV_ARTIFACTS_ROOT: &str = "ARTIFACTS_ROOT";
/// Environment variable naming the worker slot count.
pub const ENV_WORKER_SLOTS: &str = "INGEST_WORKER_SLOTS";
/// Environment variable toggling Gate 0.
pub const ENV_GATE0_ENABLED: &str = "GATE0_ENABLED";

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load an [`IngestConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`IngestConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<IngestConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => IngestConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Parse a TOML string into an [`IngestConfig`].
pub fn parse_toml(content: &str) -> Result<IngestConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Apply `ARTIFACTS_ROOT`, `INGEST_WORKER_SLOTS`, and `GATE0_ENABLED`
/// overrides from the process environment.
pub fn apply_env_overrides(config: &mut IngestConfig) -> Result<(), ConfigError> {
    if let Ok(root) = std::env::var(ENV_ARTIFACTS_ROOT)
        && !root.is_empty()
    {
        config.artifacts_root = PathBuf::from(root);
    }
    if let Ok(slots) = std::env::var(ENV_WORKER_SLOTS) {
        config.worker_slots =
            slots
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidEnvOverride {
                    var: ENV_WORKER_SLOTS.to_string(),
                    value: slots,
                })?;
    }
    if let Ok(enabled) = std::env::var(ENV_GATE0_ENABLED) {
        config.gate0_enabled = match enabled.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                return Err(ConfigError::InvalidEnvOverride {
                    var: ENV_GATE0_ENABLED.to_string(),
                    value: other.to_string(),
                });
            }
        };
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a configuration, returning hard errors or advisory warnings.
///
/// Hard errors (returned as [`ConfigError::ValidationError`]): zero worker
/// slots, an unknown pass letter in the timeout table, a zero timeout.
pub fn validate(config: &IngestConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut reasons = Vec::new();
    let mut warnings = Vec::new();

    if config.worker_slots == 0 {
        reasons.push("worker_slots must be at least 1".to_string());
    } else if config.worker_slots == 1 {
        warnings.push(ConfigWarning::SingleWorkerSlot);
    }

    for (pass, ms) in &config.pass_timeouts_ms {
        let known = matches!(pass.as_str(), "A" | "B" | "C" | "D" | "E" | "F" | "G");
        if !known {
            reasons.push(format!("unknown pass '{pass}' in pass_timeouts_ms"));
        }
        if *ms == 0 {
            reasons.push(format!("pass {pass} timeout must be non-zero"));
        } else if *ms > LARGE_TIMEOUT_THRESHOLD_MS {
            warnings.push(ConfigWarning::LargeTimeout {
                pass: pass.clone(),
                ms: *ms,
            });
        }
    }

    if let Some(level) = &config.log_level
        && !VALID_LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str())
    {
        warnings.push(ConfigWarning::UnknownLogLevel {
            level: level.clone(),
        });
    }

    if !config.gate0_enabled {
        warnings.push(ConfigWarning::Gate0Disabled);
    }

    if config.retry.max_attempts == 0 {
        reasons.push("retry.max_attempts must be at least 1".to_string());
    }

    if reasons.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons })
    }
}
