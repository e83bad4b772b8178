//! CLI argument definitions using clap derive
//!
//! Job inputs fall back to the environment a GitHub Actions runner provides
//! (`INPUT_*` for action inputs, `GITHUB_*` and `RUNS_ON_*` for the job).

use crate::config::JobInputs;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// volsnap - snapshot-backed working directories for ephemeral CI runners
///
/// Restores a directory from the newest block-storage snapshot for the
/// current branch at job start, and snapshots it again at job end.
#[derive(Parser, Debug)]
#[command(name = "volsnap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute (defaults to restore, or save with --post)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "VOLSNAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run the end-of-job phase; same as `volsnap save`
    #[arg(long)]
    pub post: bool,

    #[command(flatten)]
    pub job: JobArgs,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Restore the directory from the latest snapshot (job start)
    Restore(JobArgs),

    /// Snapshot the directory and release its volume (job end)
    Save(JobArgs),
}

/// Which half of the job lifecycle to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Restore,
    Save,
}

impl Cli {
    /// Resolve the phase and its arguments from subcommand or `--post`
    pub fn into_phase(self) -> (Phase, JobArgs) {
        match self.command {
            Some(Commands::Restore(args)) => (Phase::Restore, args),
            Some(Commands::Save(args)) => (Phase::Save, args),
            None if self.post => (Phase::Save, self.job),
            None => (Phase::Restore, self.job),
        }
    }
}

/// Per-job inputs
#[derive(Args, Debug, Clone, Default)]
pub struct JobArgs {
    /// Absolute path of the directory to restore and snapshot
    #[arg(short, long, env = "INPUT_PATH")]
    pub path: Option<String>,

    /// Git ref (branch) the snapshot belongs to
    #[arg(long = "ref", env = "GITHUB_REF_NAME")]
    pub git_ref: Option<String>,

    /// Repository in owner/name form
    #[arg(long, env = "GITHUB_REPOSITORY")]
    pub repository: Option<String>,

    /// Instance the volume is attached to
    #[arg(long, env = "RUNS_ON_INSTANCE_ID")]
    pub instance_id: Option<String>,

    /// Availability zone for new volumes
    #[arg(long = "az", env = "RUNS_ON_AWS_AZ")]
    pub availability_zone: Option<String>,

    /// Branch to restore from when the current branch has no snapshot
    #[arg(long, env = "INPUT_DEFAULT_BRANCH")]
    pub default_branch: Option<String>,

    /// Cache version; snapshots with another version are ignored
    #[arg(id = "cache_version", long = "cache-version", env = "INPUT_VERSION")]
    pub version: Option<String>,

    /// Wait for the snapshot to complete before exiting
    #[arg(long, env = "INPUT_WAIT_FOR_COMPLETION", value_parser = BoolishValueParser::new())]
    pub wait_for_completion: Option<bool>,

    /// Take a snapshot at job end
    #[arg(long, env = "INPUT_SAVE", value_parser = BoolishValueParser::new())]
    pub save: Option<bool>,

    /// Volume type (gp3, io2, ...)
    #[arg(long, env = "INPUT_VOLUME_TYPE")]
    pub volume_type: Option<String>,

    /// Volume size in GiB
    #[arg(long, env = "INPUT_VOLUME_SIZE")]
    pub volume_size: Option<i32>,

    /// Provisioned IOPS
    #[arg(long, env = "INPUT_VOLUME_IOPS")]
    pub volume_iops: Option<i32>,

    /// Provisioned throughput in MiB/s
    #[arg(long, env = "INPUT_VOLUME_THROUGHPUT")]
    pub volume_throughput: Option<i32>,

    /// Hydration rate in MiB/s for volumes restored from a snapshot
    #[arg(long, env = "INPUT_VOLUME_INITIALIZATION_RATE")]
    pub volume_initialization_rate: Option<i32>,

    /// Runner home holding config.json
    #[arg(long, env = "RUNS_ON_HOME")]
    pub runner_home: Option<PathBuf>,

    /// Directory for volume records and the audit journal
    #[arg(long, env = "VOLSNAP_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

impl JobArgs {
    /// Job inputs for [`JobConfig::resolve`](crate::config::JobConfig::resolve)
    pub fn inputs(&self) -> JobInputs {
        JobInputs {
            path: self.path.clone(),
            git_ref: self.git_ref.clone(),
            repository: self.repository.clone(),
            instance_id: self.instance_id.clone(),
            availability_zone: self.availability_zone.clone(),
            default_branch: self.default_branch.clone(),
            version: self.version.clone(),
            wait_for_completion: self.wait_for_completion,
            save: self.save,
            volume_type: self.volume_type.clone(),
            volume_size: self.volume_size,
            volume_iops: self.volume_iops,
            volume_throughput: self.volume_throughput,
            volume_initialization_rate: self.volume_initialization_rate,
        }
    }
}
