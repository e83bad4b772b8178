//! Attaching a volume and finding where it shows up on the host

use crate::cancel::Cancellation;
use crate::cloud::waiter::wait_volume_attached;
use crate::cloud::{CloudApi, WaitPolicy};
use crate::error::{ResultExt, VolsnapError, VolsnapResult};
use crate::host::{BlockDevice, Host, BLOCK_STORE_MODEL};
use tracing::{info, warn};

/// Device name requested on attach; the host may expose the volume elsewhere
pub const SUGGESTED_DEVICE: &str = "/dev/sdf";

/// An attached volume and its resolved device path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedVolume {
    pub device_name: String,
    /// Device name the cloud API reported for the attachment
    pub api_device: Option<String>,
}

/// Last block device whose model matches `expected_model`
///
/// Newly attached disks are listed after the ones already present.
pub fn resolve_device_path<'a>(devices: &'a [BlockDevice], expected_model: &str) -> Option<&'a str> {
    devices
        .iter()
        .rev()
        .find(|device| device.model == expected_model)
        .map(|device| device.path.as_str())
}

/// Pick the device to mount: the host's view wins over the API's
pub fn choose_device(host_device: Option<&str>, api_device: Option<&str>) -> Option<String> {
    host_device.or(api_device).map(str::to_string)
}

/// Attach `volume_id` to the instance, wait for the attachment and resolve
/// the on-host device path
pub async fn attach_volume(
    cloud: &dyn CloudApi,
    host: &Host,
    volume_id: &str,
    instance_id: &str,
    policy: WaitPolicy,
    cancel: &Cancellation,
) -> VolsnapResult<AttachedVolume> {
    info!("Attaching volume {} to {} as {}", volume_id, instance_id, SUGGESTED_DEVICE);
    let echoed = cloud
        .attach_volume(volume_id, instance_id, SUGGESTED_DEVICE)
        .await
        .during("attach volume", volume_id)?;
    if let Some(device) = &echoed {
        info!("Attach request accepted, device {}", device);
    }

    wait_volume_attached(cloud, volume_id, policy, cancel)
        .await
        .during("attach volume", volume_id)?;

    let volume = cloud
        .describe_volume(volume_id, false)
        .await
        .during("describe volume", volume_id)?
        .ok_or_else(|| {
            VolsnapError::cloud("describe-volumes", "volume not found after attach")
                .during("describe volume", volume_id)
        })?;
    let api_device = volume.attached_device().map(str::to_string);

    let host_device = match host.block_devices().await {
        Ok(devices) => resolve_device_path(&devices, BLOCK_STORE_MODEL).map(str::to_string),
        Err(e) => {
            warn!("Failed to list block devices: {}", e);
            None
        }
    };
    if host_device.is_none() {
        warn!("No block store device found on host for volume {}", volume_id);
    }

    let device_name = choose_device(host_device.as_deref(), api_device.as_deref())
        .ok_or_else(|| VolsnapError::DeviceNotResolved(volume_id.to_string()))?;
    info!("Volume {} attached as {}", volume_id, device_name);

    Ok(AttachedVolume {
        device_name,
        api_device,
    })
}
