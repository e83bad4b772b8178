//! Volume record persistence
//!
//! The restore and save phases run as separate processes; the only thing
//! they share is one JSON record per mount point under the state directory.

use crate::error::{VolsnapError, VolsnapResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Volume owned by a mount point between restore and save
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub volume_id: String,

    /// Device path the volume was mounted from
    pub device_name: String,

    pub mount_point: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,

    /// Blank volume provisioned for this run (not restored from a snapshot)
    #[serde(default, skip_serializing_if = "is_false")]
    pub new_volume: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Reads and writes volume records under a state directory
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record file for a mount point: `/var/lib/docker` -> `snapshot-var-lib-docker.json`
    ///
    /// Literal `%` and `-` are percent-escaped first so that `-` in the file
    /// name only ever stands for a separator.
    pub fn record_path(&self, mount_point: &str) -> PathBuf {
        let escaped = mount_point.replace('%', "%25").replace('-', "%2D");
        let sanitized = escaped.replace('/', "-");
        self.dir
            .join(format!("snapshot-{}.json", sanitized.trim_matches('-')))
    }

    /// Write the record for its mount point, replacing any previous one
    pub async fn save(&self, record: &VolumeRecord) -> VolsnapResult<PathBuf> {
        let path = self.record_path(&record.mount_point);

        fs::create_dir_all(&self.dir).await.map_err(|e| {
            VolsnapError::io(format!("creating state directory {}", self.dir.display()), e)
        })?;

        let content = serde_json::to_string_pretty(record)?;
        fs::write(&path, content)
            .await
            .map_err(|e| VolsnapError::io(format!("writing volume record {}", path.display()), e))?;

        Ok(path)
    }

    /// Load the record for a mount point; missing or unparsable records are errors
    pub async fn load(&self, mount_point: &str) -> VolsnapResult<VolumeRecord> {
        let path = self.record_path(mount_point);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VolsnapError::StateMissing {
                    mount_point: mount_point.to_string(),
                    path,
                })
            }
            Err(e) => {
                return Err(VolsnapError::io(
                    format!("reading volume record {}", path.display()),
                    e,
                ))
            }
        };

        serde_json::from_str(&content).map_err(|e| VolsnapError::StateCorrupt {
            path,
            reason: e.to_string(),
        })
    }
}
