//! Restore command - bring the directory back from its latest snapshot

use super::{cloud_for, resolve_job};
use crate::cancel::Cancellation;
use crate::cli::args::JobArgs;
use crate::config::Config;
use crate::error::VolsnapResult;
use crate::host::SystemShell;
use crate::snapshot::Snapshotter;
use crate::ui::{self, TaskSpinner, UiContext};
use std::sync::Arc;

/// Execute the restore command
pub async fn execute(args: JobArgs, config: &Config, cancel: Cancellation) -> VolsnapResult<()> {
    let ctx = UiContext::detect();
    let job = resolve_job(&args, config).await?;
    let cloud = cloud_for(&job).await?;
    let mount_point = job.mount_point.clone();

    let snapshotter =
        Snapshotter::new(cloud, Arc::new(SystemShell::new()), job).with_cancellation(cancel);

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Restoring volume for {}...", mount_point));

    let output = match snapshotter.restore().await {
        Ok(output) => output,
        Err(e) => {
            spinner.stop_error(&format!("Failed to restore {}", mount_point));
            return Err(e);
        }
    };

    match &output.snapshot {
        Some(found) => spinner.stop(&format!(
            "Restored {} from snapshot {}",
            mount_point, found.snapshot.id
        )),
        None => spinner.stop(&format!("Mounted a blank volume at {}", mount_point)),
    }

    ui::key_value(&ctx, "Volume", &output.volume_id);
    ui::key_value(&ctx, "Device", &output.device_name);
    if let Some(found) = output.snapshot.as_ref().filter(|f| f.fallback) {
        ui::step_info(
            &ctx,
            &format!("No snapshot for this branch, used {} instead", found.branch),
        );
    }
    if output.record_path.is_none() {
        ui::key_value_status(&ctx, "Volume record", "not written", false);
    }

    Ok(())
}
