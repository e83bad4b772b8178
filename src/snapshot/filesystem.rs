//! Mounting a volume on the host, and unmounting it again at teardown
//!
//! When the mount point belongs to the container engine, the engine is
//! stopped around the mount and its build cache is pruned before unmount.

use crate::config::schema::EngineConfig;
use crate::error::{VolsnapError, VolsnapResult};
use crate::host::{CommandOutput, Host};
use tracing::{info, warn};

/// Bring a freshly attached device up at `mount_point`
///
/// `engine` is set when the mount point lives under the engine data directory.
pub async fn prepare(
    host: &Host,
    device: &str,
    mount_point: &str,
    new_volume: bool,
    engine: Option<&EngineConfig>,
) -> VolsnapResult<()> {
    if let Some(engine) = engine {
        info!("Stopping {} service", engine.service);
        best_effort(
            host.stop_service(&engine.service).await,
            "stop service (may not be running)",
        );
    }

    info!("Attempting to unmount {} (defensive)", mount_point);
    best_effort(host.unmount(mount_point).await, "defensive unmount");

    if new_volume {
        info!("Formatting new volume {} with ext4", device);
        require(host.format_ext4(device).await, "mkfs.ext4").map_err(|reason| VolsnapError::Format {
            device: device.to_string(),
            reason,
        })?;
    }

    require(host.create_dir(mount_point).await, "mkdir").map_err(|reason| {
        VolsnapError::MountPointCreate {
            path: mount_point.to_string(),
            reason,
        }
    })?;

    info!("Mounting {} to {}", device, mount_point);
    require(host.mount(device, mount_point).await, "mount").map_err(|reason| VolsnapError::Mount {
        device: device.to_string(),
        mount_point: mount_point.to_string(),
        reason,
    })?;

    if let Some(engine) = engine {
        start_engine(host, engine, mount_point).await?;
    }

    Ok(())
}

async fn start_engine(host: &Host, engine: &EngineConfig, mount_point: &str) -> VolsnapResult<()> {
    let engine_error = |reason: String| VolsnapError::Engine {
        service: engine.service.clone(),
        reason,
    };

    info!("Starting {} service", engine.service);
    require(host.start_service(&engine.service).await, "systemctl start").map_err(engine_error)?;

    if let Err(reason) = require(host.engine_info(&engine.cli).await, "health probe") {
        warn!(
            "{} is not healthy on the restored data directory, unmounting {}",
            engine.service, mount_point
        );
        best_effort(host.unmount(mount_point).await, "unmount after failed health probe");
        return Err(engine_error(reason));
    }

    Ok(())
}

/// Quiesce the engine (if any) and unmount `mount_point`
///
/// Only an unmount failure while the path is still mounted is an error.
pub async fn teardown(host: &Host, mount_point: &str, engine: Option<&EngineConfig>) -> VolsnapResult<()> {
    if let Some(engine) = engine {
        reclaim_build_cache(host, engine).await;

        info!("Stopping {} service", engine.service);
        best_effort(
            host.stop_service(&engine.service).await,
            "stop service (may not be running)",
        );
    }

    info!("Unmounting {}", mount_point);
    match host.unmount(mount_point).await {
        Ok(output) if output.success => {
            info!("Unmounted {}", mount_point);
            Ok(())
        }
        Ok(output) => confirm_unmounted(host, mount_point, output.output.trim()).await,
        Err(e) => confirm_unmounted(host, mount_point, &e.to_string()).await,
    }
}

async fn reclaim_build_cache(host: &Host, engine: &EngineConfig) {
    log_disk_usage(host, engine, "before").await;

    info!(
        "Pruning builder {} down to {}",
        engine.builder, engine.keep_storage
    );
    best_effort(
        host.engine_prune(&engine.cli, &engine.builder, &engine.keep_storage).await,
        "prune build cache",
    );

    log_disk_usage(host, engine, "after").await;
}

async fn log_disk_usage(host: &Host, engine: &EngineConfig, when: &str) {
    match host.engine_disk_usage(&engine.cli, &engine.builder).await {
        Ok(output) if output.success => {
            info!("Build cache disk usage {} prune:\n{}", when, output.output.trim_end())
        }
        Ok(output) => warn!(
            "Failed to check build cache disk usage {} prune: {}",
            when,
            output.output.trim()
        ),
        Err(e) => warn!("Failed to check build cache disk usage {} prune: {}", when, e),
    }
}

/// An unmount failed; it only counts if `df` still reports the mount point
async fn confirm_unmounted(host: &Host, mount_point: &str, reason: &str) -> VolsnapResult<()> {
    let still_mounted = match host.disk_free(mount_point).await {
        Ok(df) if df.success => df_reports_mount(&df.output, mount_point),
        Ok(_) | Err(_) => false,
    };

    if still_mounted {
        return Err(VolsnapError::Unmount {
            mount_point: mount_point.to_string(),
            reason: reason.to_string(),
        });
    }

    warn!(
        "Unmount of {} failed but it is no longer mounted: {}",
        mount_point, reason
    );
    Ok(())
}

/// Whether `df <path>` output lists `mount_point` as a mount
pub fn df_reports_mount(df_output: &str, mount_point: &str) -> bool {
    df_output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().last())
        .any(|mounted_on| mounted_on == mount_point.trim_end_matches('/'))
}

fn best_effort(result: VolsnapResult<CommandOutput>, what: &str) {
    match result {
        Ok(output) if output.success => {}
        Ok(output) => warn!("Failed to {}: {}", what, output.output.trim()),
        Err(e) => warn!("Failed to {}: {}", what, e),
    }
}

/// Failure reason of a command that must succeed
fn require(result: VolsnapResult<CommandOutput>, what: &str) -> Result<(), String> {
    match result {
        Ok(output) if output.success => Ok(()),
        Ok(output) => Err(format!("{} failed: {}", what, output.output.trim())),
        Err(e) => Err(e.to_string()),
    }
}
