//! Configuration schema for volsnap
//!
//! Settings are read from `~/.config/volsnap/config.toml`; every field has a
//! default so the file is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Volume provisioning defaults
    pub volume: VolumeConfig,

    /// Snapshot policy
    pub snapshot: SnapshotConfig,

    /// Container engine whose data directory may be the mount target
    pub engine: EngineConfig,

    /// Runner environment
    pub runner: RunnerSettings,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append lifecycle events to the audit journal
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Volume settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// EBS volume type
    pub volume_type: String,

    /// Target size in GiB
    pub size_gib: i32,

    /// Provisioned IOPS
    pub iops: i32,

    /// Provisioned throughput in MiB/s
    pub throughput: i32,

    /// Hydration rate in MiB/s for snapshot-backed volumes (0 = provider default)
    pub initialization_rate: i32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            volume_type: "gp3".to_string(),
            size_gib: 40,
            iops: 3000,
            throughput: 750,
            initialization_rate: 0,
        }
    }
}

/// Snapshot policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Cache version; bump to invalidate all existing snapshots
    pub version: String,

    /// Block until the snapshot completes at job end
    pub wait_for_completion: bool,

    /// Take a snapshot at job end at all
    pub save: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            wait_for_completion: true,
            save: true,
        }
    }
}

/// Container engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine data directory
    pub data_dir: PathBuf,

    /// systemd unit controlling the engine
    pub service: String,

    /// Engine CLI used for the health probe and build-cache pruning
    pub cli: String,

    /// Buildx builder whose cache is pruned before snapshotting
    pub builder: String,

    /// Cache size to keep when pruning
    pub keep_storage: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/docker"),
            service: "docker".to_string(),
            cli: "docker".to_string(),
            builder: "runs-on".to_string(),
            keep_storage: "12g".to_string(),
        }
    }
}

impl EngineConfig {
    /// Whether `mount_point` lives inside the engine data directory
    pub fn owns(&self, mount_point: &str) -> bool {
        Path::new(mount_point).starts_with(&self.data_dir)
    }
}

/// Runner environment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Runner home holding `config.json` (falls back to `$RUNS_ON_HOME`)
    pub home: Option<PathBuf>,

    /// Directory for volume records and the audit journal
    pub state_dir: PathBuf,

    /// AWS region (falls back to the CLI's own resolution)
    pub region: Option<String>,

    /// Prefix privileged host commands with sudo
    pub use_sudo: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            home: None,
            state_dir: PathBuf::from("/runs-on"),
            region: None,
            use_sudo: true,
        }
    }
}
