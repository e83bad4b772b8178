//! Identity and lifetime tags for managed volumes and snapshots
//!
//! Tag keys are shared with the external reaper and with snapshots taken by
//! earlier runs, so they are part of the wire format.

use crate::cloud::{Filter, Tag};
use crate::config::JobConfig;
use chrono::{DateTime, Duration, Utc};

/// Volume/snapshot tag keys
pub mod keys {
    pub const VERSION: &str = "runs-on-snapshot-version";
    pub const REPOSITORY: &str = "runs-on-snapshot-repository";
    pub const BRANCH: &str = "runs-on-snapshot-branch";
    pub const ARCH: &str = "runs-on-snapshot-arch";
    pub const PLATFORM: &str = "runs-on-snapshot-platform";
    pub const NAME: &str = "Name";
    /// Epoch seconds after which the reaper may delete the resource
    pub const TTL: &str = "runs-on-delete-after";
}

/// Tags identifying which snapshots a job may restore from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    pub version: String,
    pub repository: String,
    pub branch: String,
    pub arch: String,
    pub platform: String,
    /// Appended verbatim after the identity tags
    pub custom: Vec<Tag>,
}

impl TagSet {
    /// Tag set for the current job on this host
    pub fn for_job(config: &JobConfig) -> Self {
        Self {
            version: config.version.clone(),
            repository: config.repository.clone(),
            branch: config.git_ref.clone(),
            arch: host_arch().to_string(),
            platform: host_platform().to_string(),
            custom: config.custom_tags.clone(),
        }
    }

    /// Same identity on another branch
    pub fn with_branch(&self, branch: &str) -> Self {
        Self {
            branch: branch.to_string(),
            ..self.clone()
        }
    }

    /// Identity tags followed by custom tags
    pub fn tags(&self) -> Vec<Tag> {
        let mut tags = vec![
            Tag::new(keys::VERSION, &self.version),
            Tag::new(keys::REPOSITORY, &self.repository),
            Tag::new(keys::BRANCH, &self.branch),
            Tag::new(keys::ARCH, &self.arch),
            Tag::new(keys::PLATFORM, &self.platform),
        ];
        tags.extend(self.custom.iter().cloned());
        tags
    }

    /// One equality filter per tag
    pub fn filters(&self) -> Vec<Filter> {
        self.tags().iter().map(Filter::tag).collect()
    }
}

/// `Name` tag
pub fn name_tag(name: &str) -> Tag {
    Tag::new(keys::NAME, name)
}

/// TTL tag marking the resource deletable `lifetime` after `now`
pub fn ttl_tag(now: DateTime<Utc>, lifetime: Duration) -> Tag {
    Tag::new(keys::TTL, (now + lifetime).timestamp().to_string())
}

/// Architecture name as recorded on snapshots (`amd64`, `arm64`)
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// Operating system name as recorded on snapshots
pub fn host_platform() -> &'static str {
    std::env::consts::OS
}
