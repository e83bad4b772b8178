//! Runner-provided configuration (`<runner home>/config.json`)

use crate::cloud::Tag;
use crate::error::{VolsnapError, VolsnapResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// File name of the runner config inside the runner home
const RUNNER_CONFIG_FILE: &str = "config.json";

/// Settings the runner writes for every job
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Repository default branch, used as the snapshot fallback
    #[serde(default)]
    pub default_branch: Option<String>,

    /// Extra tags applied to every volume and snapshot
    #[serde(default)]
    pub custom_tags: Vec<RunnerTag>,
}

/// Custom tag as written by the runner
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunnerTag {
    pub key: String,
    pub value: String,
}

impl From<&RunnerTag> for Tag {
    fn from(tag: &RunnerTag) -> Self {
        Tag::new(tag.key.clone(), tag.value.clone())
    }
}

impl RunnerConfig {
    /// Path of the runner config inside `home`
    pub fn path_in(home: &Path) -> PathBuf {
        home.join(RUNNER_CONFIG_FILE)
    }

    /// Load the runner config; `Ok(None)` when the file does not exist
    pub async fn load(home: &Path) -> VolsnapResult<Option<Self>> {
        let path = Self::path_in(home);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| VolsnapError::io(format!("reading runner config {}", path.display()), e))?;

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| VolsnapError::ConfigInvalid {
                path,
                reason: e.to_string(),
            })
    }

    /// Custom tags in cloud form
    pub fn tags(&self) -> Vec<Tag> {
        self.custom_tags.iter().map(Tag::from).collect()
    }
}
