//! Trilateration configuration - anchor layout, queue sizes and collaborator endpoints.
//!
//! Each section implements `Default`, so only `[[anchors]]` has to be written.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;
use crate::types::ANCHOR_COUNT;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one three-anchor deployment.
///
/// Load with [`TrilaterationConfig::load`], which searches:
/// 1. an explicit path (CLI `--config`)
/// 2. `$TRILATERATOR_CONFIG`
/// 3. `./trilateration_config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrilaterationConfig {
    /// Endpoint receiving estimates; estimates are only logged/recorded when unset.
    #[serde(default)]
    pub output_url: Option<String>,

    /// Anchors in index order (first entry is anchor 1).
    pub anchors: Vec<AnchorConfig>,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub egress: EgressConfig,

    #[serde(default)]
    pub recording: RecordingConfig,
}

/// One fixed anchor station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Label used in logs.
    #[serde(default)]
    pub name: String,
    /// Endpoint returning the anchor's JSON record array.
    pub input_url: String,
    pub x: f64,
    pub y: f64,
}

impl AnchorConfig {
    /// Name for logs, falling back to the 1-based position.
    pub fn display_name(&self, position: usize) -> String {
        if self.name.is_empty() {
            format!("anchor-{}", position + 1)
        } else {
            self.name.clone()
        }
    }
}

/// Anchor polling and merged-queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub poll_interval_ms: u64,
    pub merged_queue_capacity: usize,
    pub request_timeout_secs: u64,
    pub max_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            merged_queue_capacity: defaults::MERGED_QUEUE_CAPACITY,
            request_timeout_secs: defaults::ANCHOR_REQUEST_TIMEOUT_SECS,
            max_backoff_ms: defaults::ANCHOR_MAX_BACKOFF_MS,
        }
    }
}

impl IngestConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// What the router does when a device queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for room; a slow device stalls ingestion for everyone.
    #[default]
    Block,
    /// Drop the measurement and count it.
    #[serde(alias = "drop")]
    DropNewest,
}

/// Device actor registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub device_queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Evict actors idle this long; `0` keeps them for the process lifetime.
    pub idle_eviction_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            device_queue_capacity: defaults::DEVICE_QUEUE_CAPACITY,
            overflow: OverflowPolicy::Block,
            idle_eviction_secs: 0,
        }
    }
}

impl RouterConfig {
    pub const fn idle_eviction(&self) -> Option<Duration> {
        if self.idle_eviction_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_eviction_secs))
        }
    }
}

/// Estimate delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::EMISSION_QUEUE_CAPACITY,
            max_attempts: defaults::DELIVERY_MAX_ATTEMPTS,
            initial_backoff_ms: defaults::DELIVERY_INITIAL_BACKOFF_MS,
            max_backoff_ms: defaults::DELIVERY_MAX_BACKOFF_MS,
            request_timeout_secs: defaults::DELIVERY_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Optional CSV files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// One line per position estimate.
    pub results_csv: Option<PathBuf>,
    /// One line per measurement received by the router.
    pub detections_csv: Option<PathBuf>,
}

// ============================================================================
// Loading
// ============================================================================

impl TrilaterationConfig {
    /// Load configuration using the standard search order.
    ///
    /// There is no built-in fallback: without anchors the pipeline cannot run.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            info!(path = %p.display(), "Loading config from {}", defaults::CONFIG_ENV_VAR);
            return Self::load_from_file(&p);
        }

        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            return Self::load_from_file(&local);
        }

        Err(ConfigError::NotFound(local))
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| e.with_path(path))?;
        info!(
            path = %path.display(),
            anchors = config.anchors.len(),
            "Loaded trilateration config"
        );
        Ok(config)
    }

    /// Parse and validate a TOML document. Unknown keys only warn.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Reject configurations the pipeline cannot start with.
    ///
    /// Suspicious-but-usable values are logged as warnings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!("{}", w);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn anchor_count_ok(&self) -> bool {
        self.anchors.len() == ANCHOR_COUNT
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Fatal startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration found (pass --config, set TRILATERATOR_CONFIG, or create {0})")]
    NotFound(PathBuf),

    #[error("config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, toml::de::Error),

    #[error("config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        match self {
            Self::Parse(_, e) => Self::Parse(path.to_path_buf(), e),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[[anchors]]
input_url = "http://127.0.0.1:5000/getData1"
x = 0.0
y = 0.0

[[anchors]]
input_url = "http://127.0.0.1:5000/getData2"
x = 10.0
y = 0.0

[[anchors]]
input_url = "http://127.0.0.1:5000/getData3"
x = 5.0
y = 10.0
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = TrilaterationConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.anchors.len(), 3);
        assert!(config.output_url.is_none());
        assert_eq!(config.ingest.poll_interval_ms, defaults::POLL_INTERVAL_MS);
        assert_eq!(config.router.overflow, OverflowPolicy::Block);
        assert!(config.router.idle_eviction().is_none());
        assert_eq!(config.egress.max_attempts, defaults::DELIVERY_MAX_ATTEMPTS);
        assert!(config.recording.results_csv.is_none());
        assert_eq!(config.anchors[1].display_name(1), "anchor-2");
    }

    #[test]
    fn overflow_policy_accepts_drop_alias() {
        let toml_str = format!("{MINIMAL}\n[router]\noverflow = \"drop\"\nidle_eviction_secs = 30\n");
        let config = TrilaterationConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(config.router.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.router.idle_eviction(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn two_anchors_fail_validation() {
        let toml_str = r#"
[[anchors]]
input_url = "http://a"
x = 0.0
y = 0.0

[[anchors]]
input_url = "http://b"
x = 1.0
y = 0.0
"#;
        let err = TrilaterationConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)), "got {err}");
    }

    #[test]
    fn missing_anchor_coordinate_is_parse_error() {
        let toml_str = r#"
[[anchors]]
input_url = "http://a"
x = 0.0
"#;
        let err = TrilaterationConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(..)));
    }

    #[test]
    fn load_from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = TrilaterationConfig::load(Some(file.path())).unwrap();
        assert!(config.anchor_count_ok());
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = TrilaterationConfig::load(Some(Path::new("/nonexistent/trilat.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = TrilaterationConfig::from_toml_str(MINIMAL).unwrap();
        let text = config.to_toml().unwrap();
        let again = TrilaterationConfig::from_toml_str(&text).unwrap();
        assert_eq!(again.anchors, config.anchors);
    }
}
