//! Database configuration via `velox.toml` (§10.4).
//!
//! Replaces a builder pattern with a config file in the database's data
//! directory. On first open a default `velox.toml` is written; to change
//! settings, edit the file and reopen.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use velox_core::{VeloxError, VeloxResult};

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "velox.toml";

/// How aggressively the group committer fsyncs the write-ahead log (§4.8,
/// Open Question (a): "the precise grouping window for group commit ...
/// should be made a tunable with a documented default").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DurabilityMode {
    /// Batch committers within a short window before fsyncing, trading a
    /// small commit-latency increase for much higher throughput.
    Standard {
        /// The group commit window.
        max_delay: Duration,
    },
    /// Fsync every commit individually; no batching window.
    Always,
}

impl DurabilityMode {
    /// The default `"standard"` window, matching
    /// [`velox_durability::GroupCommitConfig::default`]'s 5ms.
    pub fn standard_default() -> Self {
        DurabilityMode::Standard { max_delay: Duration::from_millis(5) }
    }

    /// The group-commit config this mode implies. `Always` collapses the
    /// window to zero, so every commit leads its own round.
    pub fn group_commit_config(&self) -> velox_durability::GroupCommitConfig {
        let mut config = velox_durability::GroupCommitConfig::default();
        match self {
            DurabilityMode::Standard { max_delay } => config.max_delay = *max_delay,
            DurabilityMode::Always => config.max_delay = Duration::from_millis(0),
        }
        config
    }
}

/// Database configuration loaded from `velox.toml`.
///
/// # Example
///
/// ```toml
/// # Durability mode: "standard" (default) or "always"
/// durability = "standard"
/// snapshot_interval_secs = 300
/// gc_interval_ms = 1000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VeloxConfig {
    /// Durability mode: `"standard"` or `"always"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// How often the persister writes a new snapshot and rotates the log
    /// (§4.8).
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    /// How often the garbage collector sweeps reclaimable versions (§4.7).
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,
    /// Path to the cluster configuration JSON document (§6), if this
    /// database participates in replication. Relative to the data
    /// directory when not absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_config_path: Option<String>,
    /// This node's name within `cluster_config_path`'s topology, used to
    /// pick out which endpoint block applies locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

fn default_durability_str() -> String {
    "standard".to_string()
}

fn default_snapshot_interval_secs() -> u64 {
    300
}

fn default_gc_interval_ms() -> u64 {
    1000
}

impl Default for VeloxConfig {
    fn default() -> Self {
        Self {
            durability: default_durability_str(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            gc_interval_ms: default_gc_interval_ms(),
            cluster_config_path: None,
            node_name: None,
        }
    }
}

impl VeloxConfig {
    /// Parse the durability string into a [`DurabilityMode`].
    pub fn durability_mode(&self) -> VeloxResult<DurabilityMode> {
        match self.durability.as_str() {
            "standard" => Ok(DurabilityMode::standard_default()),
            "always" => Ok(DurabilityMode::Always),
            other => Err(VeloxError::fatal(format!(
                "invalid durability mode '{other}' in velox.toml; expected \"standard\" or \"always\""
            ))),
        }
    }

    /// The default config file content, with explanatory comments.
    pub fn default_toml() -> &'static str {
        r#"# VeloxDB database configuration
#
# Durability mode: "standard" (default) or "always"
#   "standard" = group-committed fsync within a short window (~5ms)
#   "always"   = fsync every commit individually, no batching window
durability = "standard"

# How often the persister writes a snapshot and rotates the log, in seconds.
snapshot_interval_secs = 300

# How often the garbage collector sweeps reclaimable record versions, in
# milliseconds.
gc_interval_ms = 1000

# Cluster configuration (§6). Uncomment to enable replication.
# cluster_config_path = "cluster.json"
# node_name = "alpha"
"#
    }

    /// Read and parse config from a file path, validating the durability
    /// mode eagerly so a bad config surfaces at open time, not first commit.
    pub fn from_file(path: &Path) -> VeloxResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VeloxError::fatal(format!("failed to read config file '{}': {e}", path.display())))?;
        let config: VeloxConfig = toml::from_str(&content)
            .map_err(|e| VeloxError::fatal(format!("failed to parse config file '{}': {e}", path.display())))?;
        config.durability_mode()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> VeloxResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())
                .map_err(|e| VeloxError::fatal(format!("failed to write default config '{}': {e}", path.display())))?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to `path`.
    pub fn write_to_file(&self, path: &Path) -> VeloxResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| VeloxError::fatal(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| VeloxError::fatal(format!("failed to write config file '{}': {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_standard() {
        let config = VeloxConfig::default();
        assert_eq!(config.durability, "standard");
        assert!(matches!(config.durability_mode().unwrap(), DurabilityMode::Standard { .. }));
    }

    #[test]
    fn parse_always() {
        let config: VeloxConfig = toml::from_str("durability = \"always\"").unwrap();
        assert_eq!(config.durability_mode().unwrap(), DurabilityMode::Always);
    }

    #[test]
    fn parse_invalid_mode_returns_error() {
        let config: VeloxConfig = toml::from_str("durability = \"turbo\"").unwrap();
        assert!(config.durability_mode().is_err());
    }

    #[test]
    fn default_toml_parses_correctly() {
        let config: VeloxConfig = toml::from_str(VeloxConfig::default_toml()).unwrap();
        assert_eq!(config.durability, "standard");
        assert_eq!(config.snapshot_interval_secs, 300);
    }

    #[test]
    fn write_default_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());
        VeloxConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        let config = VeloxConfig::from_file(&path).unwrap();
        assert_eq!(config.durability, "standard");
    }

    #[test]
    fn write_default_does_not_overwrite_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "durability = \"always\"\n").unwrap();
        VeloxConfig::write_default_if_missing(&path).unwrap();
        let config = VeloxConfig::from_file(&path).unwrap();
        assert_eq!(config.durability, "always");
    }

    #[test]
    fn always_mode_collapses_group_commit_window() {
        let config = DurabilityMode::Always.group_commit_config();
        assert_eq!(config.max_delay, Duration::from_millis(0));
    }

    #[test]
    fn write_to_file_round_trips_cluster_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = VeloxConfig {
            cluster_config_path: Some("cluster.json".into()),
            node_name: Some("alpha".into()),
            ..VeloxConfig::default()
        };
        config.write_to_file(&path).unwrap();
        let loaded = VeloxConfig::from_file(&path).unwrap();
        assert_eq!(loaded.cluster_config_path.as_deref(), Some("cluster.json"));
        assert_eq!(loaded.node_name.as_deref(), Some("alpha"));
    }
}
