//! CLI command implementations

mod restore;
mod save;

pub use restore::execute as restore;
pub use save::execute as save;

use crate::cli::args::JobArgs;
use crate::cloud::{AwsCli, CloudApi};
use crate::config::{Config, JobConfig, RunnerConfig};
use crate::error::{VolsnapError, VolsnapResult};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Merge flags, environment, runner config and settings into a job
pub(crate) async fn resolve_job(args: &JobArgs, config: &Config) -> VolsnapResult<JobConfig> {
    let mut config = config.clone();
    if let Some(state_dir) = &args.state_dir {
        config.runner.state_dir = state_dir.clone();
    }

    let runner = match args.runner_home.as_ref().or(config.runner.home.as_ref()) {
        Some(home) => match RunnerConfig::load(home).await {
            Ok(Some(runner)) => {
                debug!("Runner config: {:?}", runner);
                Some(runner)
            }
            Ok(None) => {
                warn!(
                    "No runner config at {}; RunsOn v2.8.3+ provides it",
                    RunnerConfig::path_in(home).display()
                );
                None
            }
            Err(e) => {
                warn!("Ignoring runner config: {}", e);
                None
            }
        },
        None => {
            warn!("Runner home not set (RUNS_ON_HOME), skipping runner config");
            None
        }
    };

    JobConfig::resolve(args.inputs(), &config, runner.as_ref(), Utc::now())
}

/// Cloud backend for a job
pub(crate) async fn cloud_for(job: &JobConfig) -> VolsnapResult<Arc<dyn CloudApi>> {
    if !AwsCli::is_installed().await {
        return Err(VolsnapError::cloud("aws --version", "AWS CLI not found in PATH"));
    }
    Ok(Arc::new(AwsCli::new(job.region.clone())))
}
