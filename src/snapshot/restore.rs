use super::attach::{attach_volume, AttachedVolume};
use super::locator::{find_snapshot, LocatedSnapshot};
use super::provisioner::{create_volume, plan_volume, volume_request, VolumeGuard, VolumeSource};
use super::tags::{name_tag, ttl_tag};
use super::{filesystem, Snapshotter};
use crate::cloud::waiter::wait_volume_available;
use crate::error::{ResultExt, VolsnapResult};
use crate::state::VolumeRecord;
use chrono::{Duration, Utc};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

/// How long a new volume may live before the reaper considers it abandoned
const VOLUME_LIFETIME_MINUTES: i64 = 20;

/// Result of a successful restore
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreOutput {
    pub volume_id: String,
    pub device_name: String,
    /// Blank volume, formatted during this restore
    pub new_volume: bool,
    /// Snapshot the volume was created from
    pub snapshot: Option<LocatedSnapshot>,
    /// Where the volume record was written, if writing succeeded
    pub record_path: Option<PathBuf>,
}

impl Snapshotter {
    /// Provision, attach and mount a volume at the job's mount point
    ///
    /// Any failure after the volume exists deletes it again before the
    /// error is returned.
    pub async fn restore(&self) -> VolsnapResult<RestoreOutput> {
        let job = &self.job;
        info!(
            "Restoring {} for {} on branch {} (instance {})",
            job.mount_point, job.repository, job.git_ref, job.instance_id
        );

        let tags = self.tag_set();
        let located = find_snapshot(self.cloud.as_ref(), &tags, job.default_branch.as_deref()).await?;

        let source = plan_volume(located.as_ref().map(|l| &l.snapshot), job.volume.size_gib);
        if let (Some(found), VolumeSource::Blank) = (&located, &source) {
            info!(
                "Snapshot {} is smaller than {} GiB, creating a blank volume instead",
                found.snapshot.id, job.volume.size_gib
            );
        }
        let snapshot = match source {
            VolumeSource::Snapshot(_) => located,
            VolumeSource::Blank => None,
        };

        let mut volume_tags = tags.tags();
        volume_tags.push(name_tag(&job.volume_name));
        volume_tags.push(ttl_tag(Utc::now(), Duration::minutes(VOLUME_LIFETIME_MINUTES)));
        let request = volume_request(&source, &job.availability_zone, &job.volume, volume_tags);

        let volume_id = create_volume(self.cloud.as_ref(), &request).await?;
        self.audit
            .log(
                "volume.created",
                &json!({
                    "volume_id": volume_id,
                    "snapshot_id": request.snapshot_id,
                    "mount_point": job.mount_point,
                }),
            )
            .await;

        let new_volume = source.is_new();
        let mut guard = VolumeGuard::new(volume_id.clone());
        let attached = match self.bring_up(&mut guard, new_volume).await {
            Ok(attached) => {
                guard.disarm();
                attached
            }
            Err(e) => {
                warn!("Restore of volume {} failed, cleaning up: {}", volume_id, e);
                let deleted = guard
                    .release(
                        self.cloud.as_ref(),
                        &job.instance_id,
                        self.waits.volume_available,
                    )
                    .await;
                if deleted {
                    self.audit
                        .log("volume.deleted", &json!({ "volume_id": volume_id, "reason": "restore failed" }))
                        .await;
                }
                return Err(e);
            }
        };

        self.audit
            .log(
                "volume.mounted",
                &json!({
                    "volume_id": volume_id,
                    "device_name": attached.device_name,
                    "mount_point": job.mount_point,
                    "new_volume": new_volume,
                }),
            )
            .await;

        let record = VolumeRecord {
            volume_id: volume_id.clone(),
            device_name: attached.device_name.clone(),
            mount_point: job.mount_point.clone(),
            attachment_id: None,
            new_volume,
        };
        let record_path = match self.store.save(&record).await {
            Ok(path) => {
                info!("Saved volume record to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to save volume record: {}", e);
                None
            }
        };

        Ok(RestoreOutput {
            volume_id,
            device_name: attached.device_name,
            new_volume,
            snapshot,
            record_path,
        })
    }

    /// Everything between volume creation and a usable mount
    async fn bring_up(&self, guard: &mut VolumeGuard, new_volume: bool) -> VolsnapResult<AttachedVolume> {
        let cloud = self.cloud.as_ref();
        let volume_id = guard.volume_id().to_string();

        info!("Waiting for volume {} to become available", volume_id);
        wait_volume_available(cloud, &volume_id, self.waits.volume_available, &self.cancel)
            .await
            .during("create volume", volume_id.as_str())?;

        guard.mark_attach_requested();
        let attached = attach_volume(
            cloud,
            &self.host,
            &volume_id,
            &self.job.instance_id,
            self.waits.volume_attached,
            &self.cancel,
        )
        .await?;

        filesystem::prepare(
            &self.host,
            &attached.device_name,
            &self.job.mount_point,
            new_volume,
            self.engine(),
        )
        .await
        .during("prepare volume", volume_id.as_str())?;

        info!(
            "Volume {} mounted at {} from {}",
            volume_id, self.job.mount_point, attached.device_name
        );
        Ok(attached)
    }
}
