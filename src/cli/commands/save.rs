//! Save command - snapshot the directory at job end

use super::{cloud_for, resolve_job};
use crate::cancel::Cancellation;
use crate::cli::args::JobArgs;
use crate::config::{Config, JobConfig};
use crate::error::VolsnapResult;
use crate::host::SystemShell;
use crate::snapshot::{SnapshotCompletion, Snapshotter};
use crate::state::StateStore;
use crate::ui::{self, TaskSpinner, UiContext};
use console::style;
use std::sync::Arc;

/// Execute the save command
pub async fn execute(args: JobArgs, config: &Config, cancel: Cancellation) -> VolsnapResult<()> {
    let ctx = UiContext::detect();
    let job = resolve_job(&args, config).await?;

    if !job.save {
        println!(
            "{} Skipping snapshot of {} ('save' is false)",
            style("!").yellow(),
            job.mount_point
        );
        return Ok(());
    }

    // Fail on a missing record before touching the cloud
    job_record_exists(&job).await?;

    let cloud = cloud_for(&job).await?;
    let mount_point = job.mount_point.clone();
    let snapshotter =
        Snapshotter::new(cloud, Arc::new(SystemShell::new()), job).with_cancellation(cancel);

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Snapshotting {}...", mount_point));

    let output = match snapshotter.save().await {
        Ok(output) => output,
        Err(e) => {
            spinner.stop_error(&format!("Failed to snapshot {}", mount_point));
            return Err(e);
        }
    };

    match output.completion {
        SnapshotCompletion::Completed => {
            spinner.stop(&format!("Snapshot {} completed", output.snapshot_id))
        }
        SnapshotCompletion::Pending => spinner.stop_warn(&format!(
            "Snapshot {} started; it may take a few minutes to become available",
            output.snapshot_id
        )),
    }

    ui::key_value(&ctx, "Source volume", &output.volume_id);
    ui::key_value_status(
        &ctx,
        "Volume deleted",
        if output.volume_deleted { "yes" } else { "no (left to TTL reaper)" },
        output.volume_deleted,
    );

    Ok(())
}

async fn job_record_exists(job: &JobConfig) -> VolsnapResult<()> {
    StateStore::new(job.state_dir.clone())
        .load(&job.mount_point)
        .await
        .map(|_| ())
}
