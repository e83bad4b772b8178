//! Volume creation and cleanup on failed restores

use crate::cancel::Cancellation;
use crate::cloud::waiter::wait_volume_available;
use crate::cloud::{CloudApi, CreateVolumeRequest, SnapshotDescriptor, Tag, WaitPolicy};
use crate::config::schema::VolumeConfig;
use crate::error::{ResultExt, VolsnapResult};
use tracing::{info, warn};

/// Where a new volume's data comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    /// Restore from a snapshot; size is inherited from it
    Snapshot(String),
    /// Blank volume of the configured size, formatted after attach
    Blank,
}

impl VolumeSource {
    /// Whether the volume needs a filesystem before mounting
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Blank)
    }
}

/// A snapshot smaller than the target size is ignored in favor of a blank volume
pub fn plan_volume(snapshot: Option<&SnapshotDescriptor>, target_size: i32) -> VolumeSource {
    match snapshot {
        Some(s) if s.volume_size.is_some_and(|size| size >= target_size) => {
            VolumeSource::Snapshot(s.id.clone())
        }
        _ => VolumeSource::Blank,
    }
}

/// Build the create-volume call for a planned source
pub fn volume_request(
    source: &VolumeSource,
    availability_zone: &str,
    volume: &VolumeConfig,
    tags: Vec<Tag>,
) -> CreateVolumeRequest {
    let positive = |value: i32| (value > 0).then_some(value);
    let (size, snapshot_id, initialization_rate) = match source {
        VolumeSource::Snapshot(id) => (None, Some(id.clone()), positive(volume.initialization_rate)),
        VolumeSource::Blank => (Some(volume.size_gib), None, None),
    };

    CreateVolumeRequest {
        availability_zone: availability_zone.to_string(),
        volume_type: volume.volume_type.clone(),
        size,
        snapshot_id,
        iops: positive(volume.iops),
        throughput: positive(volume.throughput),
        initialization_rate,
        tags,
    }
}

/// Create the volume and return its id
pub async fn create_volume(cloud: &dyn CloudApi, request: &CreateVolumeRequest) -> VolsnapResult<String> {
    match &request.snapshot_id {
        Some(snapshot_id) => {
            info!("Creating volume from snapshot {}", snapshot_id);
            let id = cloud
                .create_volume(request)
                .await
                .during("create volume from snapshot", snapshot_id.as_str())?;
            info!("Created volume {} from snapshot {}", id, snapshot_id);
            Ok(id)
        }
        None => {
            info!("Creating a new blank volume");
            let id = cloud
                .create_volume(request)
                .await
                .during("create volume in", request.availability_zone.as_str())?;
            info!("Created new blank volume {}", id);
            Ok(id)
        }
    }
}

/// Deletes a freshly created volume unless the restore completes
///
/// Armed on creation. The restore disarms it once the volume is mounted;
/// on any earlier failure [`VolumeGuard::release`] detaches (when an attach
/// was requested) and deletes the volume, logging rather than returning
/// its own failures.
#[derive(Debug)]
pub struct VolumeGuard {
    volume_id: String,
    armed: bool,
    attach_requested: bool,
}

impl VolumeGuard {
    pub fn new(volume_id: impl Into<String>) -> Self {
        Self {
            volume_id: volume_id.into(),
            armed: true,
            attach_requested: false,
        }
    }

    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    /// Record that an attach call was issued, so release must detach first
    pub fn mark_attach_requested(&mut self) {
        self.attach_requested = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Best-effort cleanup; returns whether the volume was deleted.
    ///
    /// The detach wait is bounded only by `detach_policy`: cleanup usually runs
    /// after cancellation has fired, and a volume still in use cannot be deleted.
    pub async fn release(
        self,
        cloud: &dyn CloudApi,
        instance_id: &str,
        detach_policy: WaitPolicy,
    ) -> bool {
        if !self.armed {
            return false;
        }

        info!("Cleaning up volume {}", self.volume_id);
        if self.attach_requested {
            let uncancellable = Cancellation::never();
            match cloud.detach_volume(&self.volume_id, instance_id).await {
                Ok(()) => {
                    if let Err(e) =
                        wait_volume_available(cloud, &self.volume_id, detach_policy, &uncancellable)
                            .await
                    {
                        warn!("Volume {} did not detach cleanly: {}", self.volume_id, e);
                    }
                }
                Err(e) => warn!("Failed to detach volume {}: {}", self.volume_id, e),
            }
        }

        match cloud.delete_volume(&self.volume_id).await {
            Ok(()) => {
                info!("Deleted volume {}", self.volume_id);
                true
            }
            Err(e) => {
                warn!("Failed to delete volume {}: {}", self.volume_id, e);
                false
            }
        }
    }
}
