//! Configuration types for the storage and synchronization engine.
//!
//! [`EngineConfig`] is a plain value type: the store, compactor, GC and
//! polling dispatcher are constructed with one and never reach into
//! process-wide statics. Persisted form is TOML, following the same
//! load/save/merge shape used throughout this crate's ancestry.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Rotate a log file once its current offset would exceed this many bytes.
pub const DEFAULT_ROTATION_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Trigger a snapshot once a note has this many updates uncovered by its
/// newest snapshot.
pub const DEFAULT_SNAPSHOT_THRESHOLD: usize = 100;

/// Minimum contiguous run length eligible for packing.
pub const DEFAULT_PACK_WINDOW: usize = 50;

/// Only pack updates whose newest entry is older than this.
pub const DEFAULT_AGING_WINDOW_MS: i64 = 60 * 60 * 1000;

/// Keep this many snapshots (newest by `totalChanges`).
pub const DEFAULT_SNAPSHOT_RETENTION_COUNT: usize = 3;

/// Never delete a file newer than this, even if covered by the kept snapshot.
pub const DEFAULT_MINIMUM_HISTORY_DURATION_MS: i64 = 24 * 60 * 60 * 1000;

/// Configuration for the compaction pipeline and garbage collector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompactionConfig {
    /// Log rotation threshold, in bytes.
    #[serde(default = "default_rotation_size_bytes")]
    pub rotation_size_bytes: u64,
    /// Updates-since-last-snapshot threshold that triggers a new snapshot.
    #[serde(default = "default_snapshot_threshold")]
    pub snapshot_threshold: usize,
    /// Minimum run length eligible for packing.
    #[serde(default = "default_pack_window")]
    pub pack_window: usize,
    /// Only pack/GC updates whose newest entry is older than this (ms).
    #[serde(default = "default_aging_window_ms")]
    pub aging_window_ms: i64,
    /// Number of newest snapshots retained by GC.
    #[serde(default = "default_snapshot_retention_count")]
    pub snapshot_retention_count: usize,
    /// Minimum age (ms) before a covered pack/update becomes GC-eligible.
    #[serde(default = "default_minimum_history_duration_ms")]
    pub minimum_history_duration_ms: i64,
}

fn default_rotation_size_bytes() -> u64 {
    DEFAULT_ROTATION_SIZE_BYTES
}
fn default_snapshot_threshold() -> usize {
    DEFAULT_SNAPSHOT_THRESHOLD
}
fn default_pack_window() -> usize {
    DEFAULT_PACK_WINDOW
}
fn default_aging_window_ms() -> i64 {
    DEFAULT_AGING_WINDOW_MS
}
fn default_snapshot_retention_count() -> usize {
    DEFAULT_SNAPSHOT_RETENTION_COUNT
}
fn default_minimum_history_duration_ms() -> i64 {
    DEFAULT_MINIMUM_HISTORY_DURATION_MS
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            rotation_size_bytes: DEFAULT_ROTATION_SIZE_BYTES,
            snapshot_threshold: DEFAULT_SNAPSHOT_THRESHOLD,
            pack_window: DEFAULT_PACK_WINDOW,
            aging_window_ms: DEFAULT_AGING_WINDOW_MS,
            snapshot_retention_count: DEFAULT_SNAPSHOT_RETENTION_COUNT,
            minimum_history_duration_ms: DEFAULT_MINIMUM_HISTORY_DURATION_MS,
        }
    }
}

/// Configuration for the polling dispatcher (§4.11).
///
/// Stored settings are expressed in human units (minutes, seconds) and
/// layered over the defaults below; explicit overrides win. See
/// [`PollingConfig::merge`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PollingConfig {
    /// Baseline token budget, in polls per minute.
    pub poll_rate_per_minute: f64,
    /// Multiplier applied to recent hit rate to accelerate the token budget.
    pub hit_rate_multiplier: f64,
    /// Hard ceiling on tokens per second regardless of acceleration.
    pub max_burst_per_second: f64,
    /// Fraction of each batch reserved for normal-priority entries.
    pub normal_priority_reserve: f64,
    /// `recent-edit` entries expire after this many milliseconds.
    pub recent_edit_window_ms: i64,
    /// Default cadence for `full-repoll` entries, in milliseconds.
    pub full_repoll_interval_ms: i64,
    /// Upper bound on how long a fast-path handoff may wait, in milliseconds.
    pub fast_path_max_delay_ms: i64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_rate_per_minute: 120.0,
            hit_rate_multiplier: 0.25,
            max_burst_per_second: 10.0,
            normal_priority_reserve: 0.2,
            recent_edit_window_ms: 300_000,
            full_repoll_interval_ms: 1_800_000,
            fast_path_max_delay_ms: 60_000,
        }
    }
}

/// Stored, human-unit override of [`PollingConfig`]. Every field is
/// optional; absent fields fall back to the default.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct StoredPollingConfig {
    /// Overrides `poll_rate_per_minute` directly (already per-minute).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_rate_per_minute: Option<f64>,
    /// Overrides `hit_rate_multiplier`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_rate_multiplier: Option<f64>,
    /// Overrides `max_burst_per_second`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_burst_per_second: Option<f64>,
    /// Overrides `normal_priority_reserve`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal_priority_reserve: Option<f64>,
    /// Overrides `recent_edit_window_ms`, expressed in seconds on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_edit_window_secs: Option<f64>,
    /// Overrides `full_repoll_interval_ms`, expressed in minutes on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_repoll_interval_mins: Option<f64>,
    /// Overrides `fast_path_max_delay_ms`, expressed in seconds on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fast_path_max_delay_secs: Option<f64>,
}

impl PollingConfig {
    /// Layer a stored, human-unit override over the defaults. Absent fields
    /// fall back to `PollingConfig::default()`; present fields win outright.
    pub fn merge(stored: &StoredPollingConfig) -> Self {
        let base = Self::default();
        Self {
            poll_rate_per_minute: stored.poll_rate_per_minute.unwrap_or(base.poll_rate_per_minute),
            hit_rate_multiplier: stored.hit_rate_multiplier.unwrap_or(base.hit_rate_multiplier),
            max_burst_per_second: stored.max_burst_per_second.unwrap_or(base.max_burst_per_second),
            normal_priority_reserve: stored
                .normal_priority_reserve
                .unwrap_or(base.normal_priority_reserve),
            recent_edit_window_ms: stored
                .recent_edit_window_secs
                .map(|secs| (secs * 1000.0) as i64)
                .unwrap_or(base.recent_edit_window_ms),
            full_repoll_interval_ms: stored
                .full_repoll_interval_mins
                .map(|mins| (mins * 60_000.0) as i64)
                .unwrap_or(base.full_repoll_interval_ms),
            fast_path_max_delay_ms: stored
                .fast_path_max_delay_secs
                .map(|secs| (secs * 1000.0) as i64)
                .unwrap_or(base.fast_path_max_delay_ms),
        }
    }
}

/// Top-level engine configuration: one value, threaded through the store,
/// compactor, GC and polling dispatcher at construction time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Compaction and GC thresholds.
    #[serde(default)]
    pub compaction: CompactionConfig,
    /// Polling dispatcher rate budget and exit criteria.
    #[serde(default)]
    pub polling: PollingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compaction: CompactionConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults if the
    /// file is absent.
    pub async fn load_from_or_default(path: &Path) -> Self {
        match Self::load_from(path).await {
            Ok(config) => config,
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific TOML file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a specific TOML file, creating parent
    /// directories as needed.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| std::io::Error::other(e.to_string()))?;
        tokio::fs::write(path, contents).await?;
        Ok(())
    }
}

/// Identifies one storage directory registered with the store.
pub type SdId = String;

/// Resolve the default config file path for a given profile directory.
pub fn default_config_path(profile_dir: &Path) -> PathBuf {
    profile_dir.join("engine.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_polling_config_matches_spec_defaults() {
        let config = PollingConfig::default();
        assert_eq!(config.poll_rate_per_minute, 120.0);
        assert_eq!(config.hit_rate_multiplier, 0.25);
        assert_eq!(config.max_burst_per_second, 10.0);
        assert_eq!(config.normal_priority_reserve, 0.2);
        assert_eq!(config.recent_edit_window_ms, 300_000);
        assert_eq!(config.full_repoll_interval_ms, 1_800_000);
        assert_eq!(config.fast_path_max_delay_ms, 60_000);
    }

    #[test]
    fn merge_overrides_only_present_fields() {
        let stored = StoredPollingConfig {
            recent_edit_window_secs: Some(120.0),
            ..Default::default()
        };
        let merged = PollingConfig::merge(&stored);
        assert_eq!(merged.recent_edit_window_ms, 120_000);
        assert_eq!(merged.poll_rate_per_minute, 120.0);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = default_config_path(dir.path());
        let config = EngineConfig::default();
        config.save_to(&path).await.unwrap();
        let loaded = EngineConfig::load_from(&path).await.unwrap();
        assert_eq!(config, loaded);
    }

    #[tokio::test]
    async fn load_missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = default_config_path(dir.path());
        let loaded = EngineConfig::load_from_or_default(&path).await;
        assert_eq!(loaded, EngineConfig::default());
    }
}
