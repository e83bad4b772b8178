//! Restore and save flows for snapshot-backed working directories
//!
//! A job's working directory lives on its own block-storage volume:
//! - `restore` (job start): find the newest snapshot for the branch, create a
//!   volume from it (or a blank one), attach, format if new, mount
//! - `save` (job end): unmount, detach, snapshot the volume, delete it
//!
//! The two phases run as separate processes and hand the volume over through
//! a [`VolumeRecord`](crate::state::VolumeRecord) in the state directory.

pub mod attach;
pub mod filesystem;
pub mod locator;
pub mod provisioner;
mod restore;
mod save;
pub mod tags;

pub use locator::LocatedSnapshot;
pub use restore::RestoreOutput;
pub use save::{SaveOutput, SnapshotCompletion};
pub use tags::TagSet;

use crate::audit::AuditLog;
use crate::cancel::Cancellation;
use crate::cloud::{CloudApi, WaitSettings};
use crate::config::schema::EngineConfig;
use crate::config::JobConfig;
use crate::host::{Host, HostShell};
use crate::state::StateStore;
use std::sync::Arc;

/// Runs the restore and save flows for one job
pub struct Snapshotter {
    cloud: Arc<dyn CloudApi>,
    host: Host,
    job: JobConfig,
    store: StateStore,
    audit: AuditLog,
    waits: WaitSettings,
    cancel: Cancellation,
}

impl Snapshotter {
    /// Snapshotter with default waits, the job's state directory and no cancellation
    pub fn new(cloud: Arc<dyn CloudApi>, shell: Arc<dyn HostShell>, job: JobConfig) -> Self {
        let host = Host::new(shell, job.use_sudo);
        let store = StateStore::new(job.state_dir.clone());
        let audit = AuditLog::new(job.audit_log, &job.state_dir);

        Self {
            cloud,
            host,
            job,
            store,
            audit,
            waits: WaitSettings::default(),
            cancel: Cancellation::never(),
        }
    }

    pub fn with_wait_settings(mut self, waits: WaitSettings) -> Self {
        self.waits = waits;
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    fn tag_set(&self) -> TagSet {
        TagSet::for_job(&self.job)
    }

    /// Engine settings when the mount point is the engine's data directory
    fn engine(&self) -> Option<&EngineConfig> {
        self.job.is_engine_path().then_some(&self.job.engine)
    }
}
