//! Cloud block-storage API
//!
//! Provides the volume/snapshot operations the restore and save flows need:
//! - `CloudApi`: the operation surface, implemented by the AWS CLI backend
//!   and by in-memory fakes in tests
//! - `waiter`: bounded polling for volume and snapshot state transitions

mod aws;
pub mod waiter;

pub use aws::AwsCli;
pub use waiter::{poll_until, Poll, WaitPolicy, WaitSettings};

use crate::error::VolsnapResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Volume state reported once a volume is usable or detached
pub const VOLUME_AVAILABLE: &str = "available";
/// Volume state reported while attached to an instance
pub const VOLUME_IN_USE: &str = "in-use";
/// Attachment state once the attach has completed
pub const ATTACHMENT_ATTACHED: &str = "attached";
/// Snapshot state once the snapshot data is fully persisted
pub const SNAPSHOT_COMPLETED: &str = "completed";

/// A resource tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A describe-call filter (`Name` matched against any of `Values`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
        }
    }

    /// Filter on exact tag equality
    pub fn tag(tag: &Tag) -> Self {
        Self::new(format!("tag:{}", tag.key), tag.value.clone())
    }
}

/// Snapshot as reported by the cloud API
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotDescriptor {
    pub id: String,
    pub start_time: DateTime<Utc>,
    /// Size in GiB of the volume the snapshot was taken from
    pub volume_size: Option<i32>,
    pub state: String,
    pub tags: Vec<Tag>,
}

/// Attachment of a volume to an instance
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeAttachment {
    pub device: Option<String>,
    pub state: String,
    pub instance_id: Option<String>,
}

/// Volume as reported by the cloud API
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeDescriptor {
    pub id: String,
    pub state: String,
    pub size: Option<i32>,
    pub attachments: Vec<VolumeAttachment>,
}

impl VolumeDescriptor {
    /// Whether any attachment reports the attached state
    pub fn is_attached(&self) -> bool {
        self.attachments
            .iter()
            .any(|a| a.state == ATTACHMENT_ATTACHED)
    }

    /// Device name reported by the first attachment
    pub fn attached_device(&self) -> Option<&str> {
        self.attachments.first().and_then(|a| a.device.as_deref())
    }
}

/// Parameters for creating a volume
#[derive(Debug, Clone, PartialEq)]
pub struct CreateVolumeRequest {
    pub availability_zone: String,
    pub volume_type: String,
    /// Size in GiB; `None` inherits the snapshot size
    pub size: Option<i32>,
    pub snapshot_id: Option<String>,
    pub iops: Option<i32>,
    pub throughput: Option<i32>,
    /// MiB/s hydration rate for snapshot-backed volumes
    pub initialization_rate: Option<i32>,
    pub tags: Vec<Tag>,
}

/// Block-storage operations used by the snapshot flows
///
/// All describe calls are scoped to resources owned by the caller.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// List snapshots matching every filter
    async fn describe_snapshots(&self, filters: &[Filter]) -> VolsnapResult<Vec<SnapshotDescriptor>>;

    /// Fetch a single snapshot by id
    async fn describe_snapshot(&self, snapshot_id: &str) -> VolsnapResult<Option<SnapshotDescriptor>>;

    /// Create a volume and return its id
    async fn create_volume(&self, request: &CreateVolumeRequest) -> VolsnapResult<String>;

    /// Fetch a volume; with `attached_only` a volume not yet attached is reported as absent
    async fn describe_volume(
        &self,
        volume_id: &str,
        attached_only: bool,
    ) -> VolsnapResult<Option<VolumeDescriptor>>;

    /// Request attachment and return the device name the API echoes back
    async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> VolsnapResult<Option<String>>;

    /// Request detachment from the instance
    async fn detach_volume(&self, volume_id: &str, instance_id: &str) -> VolsnapResult<()>;

    /// Add or overwrite tags on a resource
    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> VolsnapResult<()>;

    /// Start a snapshot of a volume and return the snapshot id
    async fn create_snapshot(
        &self,
        volume_id: &str,
        description: &str,
        tags: &[Tag],
    ) -> VolsnapResult<String>;

    /// Delete a volume
    async fn delete_volume(&self, volume_id: &str) -> VolsnapResult<()>;
}
