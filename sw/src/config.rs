//! Stepwise configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::failure::CascadeMode;

/// Main Stepwise configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Step engine limits
    pub engine: EngineConfig,

    /// Intervention rule thresholds
    pub reflection: ReflectionConfig,

    /// Retry and cascade behavior
    pub failure: FailureConfig,

    /// Checkpoint storage
    pub storage: StorageConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .stepwise.yml
        let local_config = PathBuf::from(".stepwise.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/stepwise/stepwise.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("stepwise").join("stepwise.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed; the full load reports them once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".stepwise.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("stepwise").join("stepwise.yml"));
                }
                paths
            }
        };

        candidates
            .into_iter()
            .find(|p| p.exists())
            .and_then(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Step engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Iterations budgeted for the whole plan before per-step capping
    #[serde(rename = "total-iteration-budget")]
    pub total_iteration_budget: u32,

    /// Upper bound on the per-step iteration window
    #[serde(rename = "max-per-step-iterations")]
    pub max_per_step_iterations: u32,

    /// Demand a self-report every N iterations within a step (0 disables)
    #[serde(rename = "self-report-interval")]
    pub self_report_interval: u32,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Retries for transient step failures when the plan does not say
    #[serde(rename = "default-max-retries")]
    pub default_max_retries: u32,

    /// Consecutive rate-limit waits before the run is stopped
    #[serde(rename = "max-rate-limit-waits")]
    pub max_rate_limit_waits: u32,

    /// Tools offered to the worker (empty = all registered tools)
    pub tools: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_iteration_budget: 100,
            max_per_step_iterations: 25,
            self_report_interval: 5,
            max_tokens: 16384,
            default_max_retries: crate::domain::DEFAULT_MAX_RETRIES,
            max_rate_limit_waits: 3,
            tools: Vec::new(),
        }
    }
}

/// Intervention rule thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Confidence strictly below this raises LowConfidence
    #[serde(rename = "low-confidence-threshold")]
    pub low_confidence_threshold: u8,

    /// Blocker count at or above this raises MultipleBlockers
    #[serde(rename = "multi-blocker-threshold")]
    pub multi_blocker_threshold: usize,

    /// Confidence drop greater than this across the trend window raises ConfidenceDeclining
    #[serde(rename = "confidence-drop-threshold")]
    pub confidence_drop_threshold: u8,

    /// Reports considered for the confidence trend
    #[serde(rename = "trend-window")]
    pub trend_window: usize,

    /// Consecutive zero-progress reports that raise Stalled
    #[serde(rename = "stall-window")]
    pub stall_window: usize,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 40,
            multi_blocker_threshold: 3,
            confidence_drop_threshold: 30,
            trend_window: 3,
            stall_window: 3,
        }
    }
}

/// Retry and cascade behavior
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureConfig {
    /// How far a permanent failure propagates
    #[serde(rename = "cascade-mode")]
    pub cascade_mode: CascadeMode,

    /// Extra substrings classified as transient
    #[serde(rename = "transient-patterns")]
    pub transient_patterns: Vec<String>,
}

/// Checkpoint storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding plan and conversation checkpoints
    #[serde(rename = "checkpoint-dir")]
    pub checkpoint_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stepwise")
                .join("checkpoints"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.total_iteration_budget, 100);
        assert_eq!(config.engine.max_per_step_iterations, 25);
        assert_eq!(config.engine.self_report_interval, 5);
        assert_eq!(config.engine.default_max_retries, 2);
        assert_eq!(config.reflection.low_confidence_threshold, 40);
        assert_eq!(config.failure.cascade_mode, CascadeMode::SinglePass);
        assert!(config.storage.checkpoint_dir.ends_with("stepwise/checkpoints"));
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
engine:
  total-iteration-budget: 30
  max-per-step-iterations: 10
reflection:
  stall-window: 5
failure:
  cascade-mode: fixed-point
  transient-patterns:
    - "flaky"
storage:
  checkpoint-dir: /tmp/sw
log-level: debug
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.engine.total_iteration_budget, 30);
        assert_eq!(config.engine.max_per_step_iterations, 10);
        // Unspecified fields keep defaults
        assert_eq!(config.engine.self_report_interval, 5);
        assert_eq!(config.reflection.stall_window, 5);
        assert_eq!(config.reflection.trend_window, 3);
        assert_eq!(config.failure.cascade_mode, CascadeMode::FixedPoint);
        assert_eq!(config.failure.transient_patterns, vec!["flaky"]);
        assert_eq!(config.storage.checkpoint_dir, PathBuf::from("/tmp/sw"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("custom.yml");
        fs::write(&path, "engine:\n  max-tokens: 2048\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.engine.max_tokens, 2048);
    }

    #[test]
    fn test_load_explicit_missing_path_errors() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_log_level() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("custom.yml");
        fs::write(&path, "log-level: warn\n").unwrap();

        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
        assert!(Config::load_log_level(Some(&temp.path().join("nope.yml"))).is_none());
    }
}
