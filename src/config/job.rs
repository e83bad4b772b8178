//! Per-job configuration resolved from settings, runner config and inputs

use crate::cloud::Tag;
use crate::config::runner::RunnerConfig;
use crate::config::schema::{Config, EngineConfig, VolumeConfig};
use crate::error::{VolsnapError, VolsnapResult};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Longest git ref fragment used in resource names
const MAX_REF_NAME_LEN: usize = 40;

/// Raw per-job inputs (flags or environment); `None` keeps the configured value
#[derive(Debug, Clone, Default)]
pub struct JobInputs {
    pub path: Option<String>,
    pub git_ref: Option<String>,
    pub repository: Option<String>,
    pub instance_id: Option<String>,
    pub availability_zone: Option<String>,
    pub default_branch: Option<String>,
    pub version: Option<String>,
    pub wait_for_completion: Option<bool>,
    pub save: Option<bool>,
    pub volume_type: Option<String>,
    pub volume_size: Option<i32>,
    pub volume_iops: Option<i32>,
    pub volume_throughput: Option<i32>,
    pub volume_initialization_rate: Option<i32>,
}

/// Fully resolved and validated job configuration
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Absolute path the volume is mounted on
    pub mount_point: String,
    pub git_ref: String,
    pub repository: String,
    pub instance_id: String,
    pub availability_zone: String,
    pub default_branch: Option<String>,
    pub custom_tags: Vec<Tag>,
    pub version: String,
    pub wait_for_completion: bool,
    pub save: bool,
    pub volume: VolumeConfig,
    pub engine: EngineConfig,
    pub state_dir: PathBuf,
    pub region: Option<String>,
    pub use_sudo: bool,
    pub audit_log: bool,
    /// `Name` tag for the volume
    pub volume_name: String,
    /// `Name` tag for the snapshot
    pub snapshot_name: String,
}

impl JobConfig {
    /// Merge inputs over settings and validate
    pub fn resolve(
        inputs: JobInputs,
        config: &Config,
        runner: Option<&RunnerConfig>,
        now: DateTime<Utc>,
    ) -> VolsnapResult<Self> {
        let mount_point = required(inputs.path, "path")?;
        if !mount_point.starts_with('/') {
            return Err(VolsnapError::InputInvalid {
                name: "path",
                reason: format!("'{}' must be an absolute path", mount_point),
            });
        }

        let git_ref = required(inputs.git_ref, "git ref (GITHUB_REF_NAME)")?;
        let repository = required(inputs.repository, "repository (GITHUB_REPOSITORY)")?;
        let instance_id = required(inputs.instance_id, "instance id (RUNS_ON_INSTANCE_ID)")?;
        let availability_zone =
            required(inputs.availability_zone, "availability zone (RUNS_ON_AWS_AZ)")?;

        let mut volume = config.volume.clone();
        if let Some(volume_type) = non_empty(inputs.volume_type) {
            volume.volume_type = volume_type;
        }
        volume.size_gib = inputs.volume_size.unwrap_or(volume.size_gib);
        volume.iops = inputs.volume_iops.unwrap_or(volume.iops);
        volume.throughput = inputs.volume_throughput.unwrap_or(volume.throughput);
        volume.initialization_rate = inputs
            .volume_initialization_rate
            .unwrap_or(volume.initialization_rate);
        validate_volume(&volume)?;

        let default_branch = non_empty(inputs.default_branch)
            .or_else(|| runner.and_then(|r| non_empty(r.default_branch.clone())));
        let custom_tags = runner.map(RunnerConfig::tags).unwrap_or_default();

        let ref_name = sanitize_ref(&git_ref);
        let stamp = now.format("%Y%m%d-%H%M%S");

        Ok(Self {
            volume_name: format!("runs-on-volume-{}-{}", ref_name, stamp),
            snapshot_name: format!("runs-on-snapshot-{}-{}", ref_name, stamp),
            mount_point,
            git_ref,
            repository,
            instance_id,
            availability_zone,
            default_branch,
            custom_tags,
            version: non_empty(inputs.version).unwrap_or_else(|| config.snapshot.version.clone()),
            wait_for_completion: inputs
                .wait_for_completion
                .unwrap_or(config.snapshot.wait_for_completion),
            save: inputs.save.unwrap_or(config.snapshot.save),
            volume,
            engine: config.engine.clone(),
            state_dir: config.runner.state_dir.clone(),
            region: config.runner.region.clone(),
            use_sudo: config.runner.use_sudo,
            audit_log: config.general.audit_log,
        })
    }

    /// Whether the mount point is the container engine's data directory
    pub fn is_engine_path(&self) -> bool {
        self.engine.owns(&self.mount_point)
    }
}

/// Make a git ref usable inside resource names: drop `refs/`, replace `/`,
/// cap the length.
pub fn sanitize_ref(git_ref: &str) -> String {
    let trimmed = git_ref.strip_prefix("refs/").unwrap_or(git_ref);
    trimmed
        .replace('/', "-")
        .chars()
        .take(MAX_REF_NAME_LEN)
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, name: &'static str) -> VolsnapResult<String> {
    non_empty(value).ok_or(VolsnapError::ConfigMissing(name))
}

fn validate_volume(volume: &VolumeConfig) -> VolsnapResult<()> {
    let checks: [(&'static str, i32, i32); 4] = [
        ("volume_size", volume.size_gib, 1),
        ("volume_iops", volume.iops, 0),
        ("volume_throughput", volume.throughput, 0),
        ("volume_initialization_rate", volume.initialization_rate, 0),
    ];
    for (name, value, min) in checks {
        if value < min {
            return Err(VolsnapError::InputInvalid {
                name,
                reason: format!("{} must be at least {}", value, min),
            });
        }
    }
    Ok(())
}
