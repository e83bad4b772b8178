use super::tags::{name_tag, ttl_tag};
use super::{filesystem, Snapshotter};
use crate::cloud::waiter::{wait_snapshot_completed, wait_volume_available};
use crate::error::{ResultExt, VolsnapResult};
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::json;
use tracing::{info, warn};

/// Extra lifetime granted to the volume while teardown runs
const TEARDOWN_GRACE_MINUTES: i64 = 10;

/// Whether the new snapshot was waited on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotCompletion {
    Completed,
    /// Initiated only; completes in the background
    Pending,
}

/// Result of a successful save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutput {
    pub snapshot_id: String,
    pub completion: SnapshotCompletion,
    /// Source volume that was snapshotted
    pub volume_id: String,
    pub volume_deleted: bool,
}

impl Snapshotter {
    /// Unmount the job's volume and snapshot it; the volume is deleted once the snapshot completes
    pub async fn save(&self) -> VolsnapResult<SaveOutput> {
        let job = &self.job;
        let cloud = self.cloud.as_ref();
        info!(
            "Saving {} for branch {} (instance {})",
            job.mount_point, job.git_ref, job.instance_id
        );

        let record = self.store.load(&job.mount_point).await?;
        let volume_id = record.volume_id.as_str();
        info!(
            "Unmounting {} (device {}, volume {})",
            job.mount_point, record.device_name, volume_id
        );
        filesystem::teardown(&self.host, &job.mount_point, self.engine()).await?;

        let ttl = ttl_tag(Utc::now(), Duration::minutes(TEARDOWN_GRACE_MINUTES));
        if let Err(e) = cloud.create_tags(volume_id, &[ttl]).await {
            warn!("Failed to update TTL tag on volume {}: {}", volume_id, e);
        }

        info!("Detaching volume {}", volume_id);
        cloud
            .detach_volume(volume_id, &job.instance_id)
            .await
            .during("detach volume", volume_id)?;
        wait_volume_available(cloud, volume_id, self.waits.volume_available, &self.cancel)
            .await
            .during("detach volume", volume_id)?;
        info!("Volume {} is detached", volume_id);

        let mut tags = self.tag_set().tags();
        tags.push(name_tag(&job.snapshot_name));
        let description = format!(
            "Snapshot for branch {} taken at {}",
            job.git_ref,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        info!(
            "Creating snapshot '{}' from volume {} for branch {}",
            job.snapshot_name, volume_id, job.git_ref
        );
        let snapshot_id = cloud
            .create_snapshot(volume_id, &description, &tags)
            .await
            .during("create snapshot from volume", volume_id)?;
        info!("Snapshot {} creation initiated", snapshot_id);
        self.audit
            .log(
                "snapshot.created",
                &json!({
                    "snapshot_id": snapshot_id,
                    "volume_id": volume_id,
                    "branch": job.git_ref,
                }),
            )
            .await;

        if !record.new_volume && !job.wait_for_completion {
            info!(
                "Not waiting for snapshot {} to complete, volume {} expires with its TTL tag",
                snapshot_id, volume_id
            );
            return Ok(SaveOutput {
                snapshot_id,
                completion: SnapshotCompletion::Pending,
                volume_id: record.volume_id.clone(),
                volume_deleted: false,
            });
        }

        if record.new_volume {
            info!("First snapshot of a new volume, waiting for completion");
        }
        info!("Waiting for snapshot {} to complete", snapshot_id);
        wait_snapshot_completed(cloud, &snapshot_id, self.waits.snapshot_completed, &self.cancel)
            .await
            .during("complete snapshot", snapshot_id.as_str())?;
        info!("Snapshot {} completed", snapshot_id);

        info!("Deleting volume {}, its contents are now in {}", volume_id, snapshot_id);
        let volume_deleted = match cloud.delete_volume(volume_id).await {
            Ok(()) => {
                info!("Deleted volume {}", volume_id);
                self.audit
                    .log("volume.deleted", &json!({ "volume_id": volume_id, "snapshot_id": snapshot_id }))
                    .await;
                true
            }
            Err(e) => {
                warn!(
                    "Failed to delete volume {}, leaving it to the TTL reaper: {}",
                    volume_id, e
                );
                false
            }
        };

        Ok(SaveOutput {
            snapshot_id,
            completion: SnapshotCompletion::Completed,
            volume_id: record.volume_id.clone(),
            volume_deleted,
        })
    }
}
