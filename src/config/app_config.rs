//! Application configuration: TOML structure, discovery and validation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `AppConfig::load()` which searches:
/// 1. `$SLOPEWATCH_CONFIG` env var
/// 2. `./slopewatch.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Update cadence, window length and variable catalogue
    #[serde(default)]
    pub analysis: AnalysisSettings,

    /// Status / background-job poll periods
    #[serde(default)]
    pub polling: PollingSettings,

    /// Live producer connection parameters
    #[serde(default)]
    pub producer: ProducerSettings,

    /// Export destination
    #[serde(default)]
    pub export: ExportSettings,
}

impl AppConfig {
    /// Load configuration using the standard search order:
    /// 1. `$SLOPEWATCH_CONFIG` environment variable
    /// 2. `./slopewatch.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        let mut candidates = Vec::with_capacity(2);
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            candidates.push(PathBuf::from(path));
        }
        candidates.push(PathBuf::from(defaults::LOCAL_CONFIG_FILE));
        Self::load_from_candidates(&candidates)
    }

    /// First candidate that exists and loads cleanly wins; a missing or
    /// broken file is logged and the search moves on. Defaults otherwise.
    pub fn load_from_candidates(candidates: &[PathBuf]) -> Self {
        for path in candidates {
            if !path.exists() {
                debug!(path = %path.display(), "Config candidate not found");
                continue;
            }
            match Self::load_from_file(path) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded config");
                    return config;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load config, falling back");
                }
            }
        }

        info!("No usable config file found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let a = &self.analysis;

        if a.update_interval_ms == 0 {
            errors.push("analysis.update_interval_ms must be > 0".to_string());
        }
        if a.sliding_window_samples == 0 {
            errors.push("analysis.sliding_window_samples must be > 0".to_string());
        }
        if a.variables.is_empty() {
            errors.push("analysis.variables must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for var in &a.variables {
            if !is_variable_name(var) {
                errors.push(format!(
                    "analysis.variables: '{var}' is not a lower_snake_case name"
                ));
            }
            if !seen.insert(var.as_str()) {
                errors.push(format!("analysis.variables: '{var}' listed more than once"));
            }
        }

        if self.polling.status_poll_interval_ms == 0 {
            errors.push("polling.status_poll_interval_ms must be > 0".to_string());
        }
        if self.polling.job_poll_interval_ms == 0 {
            errors.push("polling.job_poll_interval_ms must be > 0".to_string());
        }

        let p = &self.producer;
        if p.kind == ProducerKind::Process
            && p.command.as_deref().map_or(true, |c| c.trim().is_empty())
        {
            errors.push("producer.command is required when producer.kind = \"process\"".to_string());
        }
        if p.startup_timeout_ms == 0 {
            errors.push("producer.startup_timeout_ms must be > 0".to_string());
        }
        if p.synthetic.entities == 0 {
            errors.push("producer.synthetic.entities must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// lower_snake_case: a lowercase letter followed by lowercase letters, digits or `_`.
fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Analysis
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Scheduling loop period (ms)
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// Sliding window length in samples
    #[serde(default = "default_sliding_window_samples")]
    pub sliding_window_samples: usize,

    /// Variables every FeatureMatrix row covers, in display order
    #[serde(default = "default_variables")]
    pub variables: Vec<String>,
}

fn default_update_interval_ms() -> u64 {
    defaults::UPDATE_INTERVAL_MS
}

fn default_sliding_window_samples() -> usize {
    defaults::SLIDING_WINDOW_SAMPLES
}

/// Emotion group followed by the behaviour group.
pub fn default_variables() -> Vec<String> {
    defaults::EMOTION_VARIABLES
        .iter()
        .chain(defaults::BEHAVIOR_VARIABLES.iter())
        .map(|v| (*v).to_string())
        .collect()
}

/// Catalogue group of a variable, used to split radar-style views.
pub fn variable_group(name: &str) -> &'static str {
    if defaults::EMOTION_VARIABLES.contains(&name) {
        "emotion"
    } else if defaults::BEHAVIOR_VARIABLES.contains(&name) {
        "behavior"
    } else {
        "other"
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            sliding_window_samples: default_sliding_window_samples(),
            variables: default_variables(),
        }
    }
}

impl AnalysisSettings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

// ============================================================================
// Polling
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,

    #[serde(default = "default_job_poll_interval_ms")]
    pub job_poll_interval_ms: u64,
}

fn default_status_poll_interval_ms() -> u64 {
    defaults::STATUS_POLL_INTERVAL_MS
}

fn default_job_poll_interval_ms() -> u64 {
    defaults::JOB_POLL_INTERVAL_MS
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            status_poll_interval_ms: default_status_poll_interval_ms(),
            job_poll_interval_ms: default_job_poll_interval_ms(),
        }
    }
}

impl PollingSettings {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn job_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }
}

// ============================================================================
// Producer
// ============================================================================

/// Where live packets come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerKind {
    /// Built-in synthetic generator on a supervised thread
    #[default]
    Synthetic,
    /// External OS process speaking the JSON-lines wire protocol
    Process,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerSettings {
    #[serde(default)]
    pub kind: ProducerKind,

    /// Executable for `kind = "process"`
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Wait for the producer's ready handshake (ms)
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Grace period before a non-responsive producer is killed (ms)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Opaque producer parameters (video source, model paths, device).
    /// Passed through untouched.
    #[serde(default)]
    pub settings: toml::Table,

    #[serde(default)]
    pub synthetic: SyntheticSettings,
}

fn default_startup_timeout_ms() -> u64 {
    defaults::PRODUCER_STARTUP_TIMEOUT_MS
}

fn default_shutdown_grace_ms() -> u64 {
    defaults::PRODUCER_SHUTDOWN_GRACE_MS
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            kind: ProducerKind::default(),
            command: None,
            args: Vec::new(),
            startup_timeout_ms: default_startup_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            settings: toml::Table::new(),
            synthetic: SyntheticSettings::default(),
        }
    }
}

impl ProducerSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Pass-through settings as a JSON document.
    pub fn settings_json(&self) -> String {
        serde_json::to_string(&self.settings).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Synthetic producer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSettings {
    #[serde(default = "default_synthetic_entities")]
    pub entities: usize,

    /// Capture period (ms); 0 emits as fast as the consumer drains
    #[serde(default = "default_synthetic_interval_ms")]
    pub interval_ms: u64,

    /// Stop after this many packets; unbounded when absent
    #[serde(default)]
    pub packets: Option<usize>,

    #[serde(default)]
    pub seed: Option<u64>,

    /// Emit a small preview frame with every packet
    #[serde(default)]
    pub frames: bool,
}

fn default_synthetic_entities() -> usize {
    defaults::SYNTHETIC_ENTITIES
}

fn default_synthetic_interval_ms() -> u64 {
    defaults::SYNTHETIC_INTERVAL_MS
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            entities: default_synthetic_entities(),
            interval_ms: default_synthetic_interval_ms(),
            packets: None,
            seed: None,
            frames: false,
        }
    }
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Root under which timestamped export folders are created
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(defaults::EXPORT_DIR)
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
