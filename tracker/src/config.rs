use std::path::{Path, PathBuf};

use serde::Deserialize;
use workout_tracker_data_management::DEFAULT_BATCH_SIZE;

use crate::{motion_classifier::ClassifierConfig, TrackerError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub classifier: ClassifierConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Read once, when a stop is confirmed.
    pub auto_pause_enabled: bool,
    /// Accepted points closer than this to the previous one are treated as jitter.
    pub min_distance_meters: f64,
    /// Vehicle detections that end the session by force.
    pub vehicle_strike_limit: u32,
    pub tick_interval_ms: u64,
    pub stats_persist_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_pause_enabled: true,
            min_distance_meters: 2.0,
            vehicle_strike_limit: 2,
            tick_interval_ms: 1000,
            stats_persist_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub batch_size: usize,
    /// Relative paths are resolved against the project root.
    pub data_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            data_dir: None,
        }
    }
}

impl TrackerConfig {
    /// Reads a TOML config file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        if !path.exists() {
            tracing::debug!(path = ?path, "No config file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| TrackerError::Config(format!("Failed to read {:?}: {e}", path)))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, TrackerError> {
        toml::from_str(text).map_err(|e| TrackerError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = TrackerConfig::parse("
            [session]
            auto_pause_enabled = false

            [classifier]
            vehicle_duration_ms = 8000
        ").unwrap();

        assert!(!config.session.auto_pause_enabled);
        assert_eq!(config.session.min_distance_meters, 2.0);
        assert_eq!(config.classifier.vehicle_duration_ms, 8000);
        assert_eq!(config.classifier.stop_threshold, 1.2);
        assert_eq!(config.storage.batch_size, 10);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        assert!(matches!(TrackerConfig::parse("[session\nfoo"), Err(TrackerError::Config(_))));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = TrackerConfig::load(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(config.session.vehicle_strike_limit, 2);
    }
}
