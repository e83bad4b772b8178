//! Restore/save flows against in-memory cloud and host doubles


use chrono::{Duration as ChronoDuration, Utc};
use fakes::{FakeCloud, FakeShell};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use volsnap::cancel::Cancellation;
use volsnap::cloud::{Tag, WaitPolicy, WaitSettings};
use volsnap::config::{Config, JobConfig, JobInputs};
use volsnap::snapshot::tags::keys;
use volsnap::snapshot::{SnapshotCompletion, Snapshotter, TagSet};
use volsnap::state::StateStore;
use volsnap::VolsnapError;

struct Harness {
    cloud: Arc<FakeCloud>,
    shell: Arc<FakeShell>,
    state_dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            cloud: Arc::new(FakeCloud::new()),
            shell: Arc::new(FakeShell::new()),
            state_dir: TempDir::new().unwrap(),
        }
    }

    fn job(&self, mount_point: &str, branch: &str, default_branch: Option<&str>) -> JobConfig {
        let mut config = Config::default();
        config.runner.state_dir = self.state_dir.path().to_path_buf();
        config.runner.use_sudo = false;

        let inputs = JobInputs {
            path: Some(mount_point.to_string()),
            git_ref: Some(branch.to_string()),
            repository: Some("acme/app".to_string()),
            instance_id: Some("i-0abc".to_string()),
            availability_zone: Some("us-east-1a".to_string()),
            default_branch: default_branch.map(str::to_string),
            ..Default::default()
        };
        JobConfig::resolve(inputs, &config, None, Utc::now()).unwrap()
    }

    fn snapshotter(&self, job: JobConfig) -> Snapshotter {
        Snapshotter::new(self.cloud.clone(), self.shell.clone(), job).with_wait_settings(fast_waits())
    }

    fn store(&self) -> StateStore {
        StateStore::new(self.state_dir.path())
    }

    /// Seed a completed snapshot carrying the job's identity on `branch`
    fn seed_snapshot(&self, job: &JobConfig, id: &str, branch: &str, minutes_ago: i64, size: i32) {
        let tags = TagSet::for_job(job).with_branch(branch).tags();
        self.cloud.add_snapshot(
            id,
            Utc::now() - ChronoDuration::minutes(minutes_ago),
            size,
            tags,
        );
    }
}

fn fast_waits() -> WaitSettings {
    let policy = WaitPolicy::new(Duration::from_millis(1), Duration::from_millis(50));
    WaitSettings {
        volume_available: policy,
        volume_attached: policy,
        snapshot_completed: policy,
    }
}

fn tag_value<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter().find(|t| t.key == key).map(|t| t.value.as_str())
}

#[tokio::test]
async fn blank_volume_restored_then_snapshotted_and_deleted() {
    let h = Harness::new();
    let job = h.job("/data", "feature-x", None);

    let restored = h.snapshotter(job.clone()).restore().await.unwrap();

    assert!(restored.new_volume);
    assert!(restored.snapshot.is_none());
    assert_eq!(restored.device_name, "/dev/nvme1n1");
    assert!(h.shell.ran("mkfs.ext4 -F /dev/nvme1n1"));
    assert!(h.shell.ran("mkdir -p /data"));
    assert!(h.shell.ran("mount /dev/nvme1n1 /data"));

    let record = h.store().load("/data").await.unwrap();
    assert_eq!(record.volume_id, restored.volume_id);
    assert!(record.new_volume);

    let saved = h.snapshotter(job).save().await.unwrap();

    assert_eq!(saved.completion, SnapshotCompletion::Completed);
    assert!(saved.volume_deleted);
    let state = h.cloud.state();
    assert_eq!(state.deleted, vec![restored.volume_id.clone()]);
    let snapshot = &state.created_snapshots[0];
    assert_eq!(snapshot.volume_id, restored.volume_id);
    assert_eq!(tag_value(&snapshot.tags, keys::BRANCH), Some("feature-x"));
    assert!(tag_value(&snapshot.tags, keys::NAME)
        .unwrap()
        .starts_with("runs-on-snapshot-feature-x-"));
    assert!(snapshot.description.starts_with("Snapshot for branch feature-x taken at "));
}

#[tokio::test]
async fn branch_snapshot_restored_without_formatting() {
    let h = Harness::new();
    let job = h.job("/data", "feature-x", None);
    h.seed_snapshot(&job, "snap-feature", "feature-x", 30, 40);

    let restored = h.snapshotter(job).restore().await.unwrap();

    assert!(!restored.new_volume);
    let located = restored.snapshot.unwrap();
    assert_eq!(located.snapshot.id, "snap-feature");
    assert!(!located.fallback);
    assert!(!h.shell.commands().iter().any(|c| c.starts_with("mkfs")));

    let state = h.cloud.state();
    let request = &state.volume_requests[0];
    assert_eq!(request.snapshot_id.as_deref(), Some("snap-feature"));
    assert_eq!(request.size, None);
    assert_eq!(tag_value(&request.tags, keys::BRANCH), Some("feature-x"));
}

#[tokio::test]
async fn falls_back_to_default_branch_snapshot() {
    let h = Harness::new();
    let job = h.job("/data", "feature-x", Some("main"));
    h.seed_snapshot(&job, "snap-main", "main", 10, 40);

    let restored = h.snapshotter(job).restore().await.unwrap();

    let located = restored.snapshot.unwrap();
    assert_eq!(located.snapshot.id, "snap-main");
    assert_eq!(located.branch, "main");
    assert!(located.fallback);
    assert!(!restored.new_volume);

    // The volume carries the job's own branch, not the fallback's
    let state = h.cloud.state();
    assert_eq!(tag_value(&state.volume_requests[0].tags, keys::BRANCH), Some("feature-x"));
}

#[tokio::test]
async fn no_snapshot_anywhere_gives_blank_volume() {
    let h = Harness::new();
    let job = h.job("/data", "feature-x", Some("main"));

    let restored = h.snapshotter(job).restore().await.unwrap();

    assert!(restored.new_volume);
    assert!(restored.snapshot.is_none());
    let state = h.cloud.state();
    assert_eq!(
        state.calls.iter().filter(|c| *c == "describe-snapshots").count(),
        2
    );
    assert_eq!(state.volume_requests[0].size, Some(40));
}

#[tokio::test]
async fn snapshots_of_other_repositories_are_ignored() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    let mut other = TagSet::for_job(&job);
    other.repository = "acme/other".to_string();
    h.cloud.add_snapshot("snap-other", Utc::now(), 40, other.tags());

    let restored = h.snapshotter(job).restore().await.unwrap();

    assert!(restored.snapshot.is_none());
    assert!(restored.new_volume);
}

#[tokio::test]
async fn newest_snapshot_wins() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    h.seed_snapshot(&job, "snap-old", "main", 120, 40);
    h.seed_snapshot(&job, "snap-new", "main", 5, 40);
    h.seed_snapshot(&job, "snap-mid", "main", 60, 40);

    let restored = h.snapshotter(job).restore().await.unwrap();

    assert_eq!(restored.snapshot.unwrap().snapshot.id, "snap-new");
}

#[tokio::test]
async fn undersized_snapshot_is_replaced_by_blank_volume() {
    let h = Harness::new();
    let mut job = h.job("/data", "main", None);
    job.volume.size_gib = 100;
    h.seed_snapshot(&job, "snap-small", "main", 5, 40);

    let restored = h.snapshotter(job).restore().await.unwrap();

    assert!(restored.new_volume);
    assert!(restored.snapshot.is_none());
    let state = h.cloud.state();
    assert_eq!(state.volume_requests[0].snapshot_id, None);
    assert_eq!(state.volume_requests[0].size, Some(100));
}

#[tokio::test]
async fn new_volume_ttl_is_in_the_future() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    let before = Utc::now().timestamp();

    h.snapshotter(job).restore().await.unwrap();

    let state = h.cloud.state();
    let ttl: i64 = tag_value(&state.volume_requests[0].tags, keys::TTL)
        .unwrap()
        .parse()
        .unwrap();
    assert!(ttl > before);
    assert!(ttl >= before + 20 * 60);
}

#[tokio::test]
async fn attach_timeout_deletes_new_volume() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    h.cloud.state().never_attach = true;

    let err = h.snapshotter(job).restore().await.unwrap_err();

    assert!(err.to_string().contains("attach volume"));
    let state = h.cloud.state();
    assert!(state.calls.iter().any(|c| c == "detach-volume"));
    assert_eq!(state.deleted.len(), 1);
    assert!(state.volumes.is_empty());
    drop(state);
    assert!(h.store().load("/data").await.is_err());
}

#[tokio::test]
async fn mount_failure_deletes_new_volume() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    h.shell.fail("mount ");

    let err = h.snapshotter(job).restore().await.unwrap_err();

    assert!(err.to_string().contains("Failed to mount /dev/nvme1n1 to /data"));
    assert_eq!(h.cloud.state().deleted.len(), 1);
}

#[tokio::test]
async fn device_falls_back_to_api_name_without_block_store_devices() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    *h.shell.lsblk.lock().unwrap() = "/dev/loop0\n/dev/sda QEMU HARDDISK\n".to_string();

    let restored = h.snapshotter(job).restore().await.unwrap();

    assert_eq!(restored.device_name, "/dev/sdf");
    assert!(h.shell.ran("mount /dev/sdf /data"));
}

#[tokio::test]
async fn engine_directory_stops_and_restarts_service() {
    let h = Harness::new();
    let job = h.job("/var/lib/docker", "main", None);

    h.snapshotter(job).restore().await.unwrap();

    let stop = h.shell.position("systemctl stop docker").unwrap();
    let mount = h.shell.position("mount /dev/nvme1n1 /var/lib/docker").unwrap();
    let start = h.shell.position("systemctl start docker").unwrap();
    let probe = h.shell.position("docker system info").unwrap();
    assert!(stop < mount && mount < start && start < probe);
}

#[tokio::test]
async fn unhealthy_engine_unmounts_and_deletes_volume() {
    let h = Harness::new();
    let job = h.job("/var/lib/docker", "main", None);
    h.shell.fail("docker system info");

    let err = h.snapshotter(job).restore().await.unwrap_err();

    assert!(err.to_string().contains("Container engine docker failed"));
    let commands = h.shell.commands();
    let probe = h.shell.position("docker system info").unwrap();
    assert!(commands[probe + 1..].iter().any(|c| c == "umount /var/lib/docker"));
    assert_eq!(h.cloud.state().deleted.len(), 1);
}

#[tokio::test]
async fn engine_start_failure_is_fatal() {
    let h = Harness::new();
    let job = h.job("/var/lib/docker", "main", None);
    h.shell.fail("systemctl start");

    let err = h.snapshotter(job).restore().await.unwrap_err();

    assert!(matches!(
        err,
        VolsnapError::ResourceOp { ref source, .. } if matches!(**source, VolsnapError::Engine { .. })
    ));
}

#[tokio::test]
async fn engine_commands_use_configured_cli() {
    let h = Harness::new();
    let mut job = h.job("/var/lib/docker", "main", None);
    job.engine.service = "containerd".to_string();
    job.engine.cli = "nerdctl".to_string();

    h.snapshotter(job.clone()).restore().await.unwrap();
    h.snapshotter(job).save().await.unwrap();

    assert!(h.shell.ran("systemctl start containerd"));
    assert!(h.shell.ran("nerdctl system info"));
    assert!(h.shell.ran("nerdctl buildx --builder runs-on prune --keep-storage 12g -f"));
    assert!(!h.shell.commands().iter().any(|c| c.starts_with("docker ")));
}

#[tokio::test]
async fn failed_service_stop_does_not_abort_restore() {
    let h = Harness::new();
    let job = h.job("/var/lib/docker", "main", None);
    h.shell.fail("systemctl stop");
    h.shell.fail("umount");

    let restored = h.snapshotter(job).restore().await.unwrap();

    assert!(restored.record_path.is_some());
}

#[tokio::test]
async fn save_prunes_engine_cache_before_unmount() {
    let h = Harness::new();
    let job = h.job("/var/lib/docker", "main", None);
    h.snapshotter(job.clone()).restore().await.unwrap();
    let restore_commands = h.shell.commands().len();

    h.snapshotter(job).save().await.unwrap();

    let commands = h.shell.commands()[restore_commands..].to_vec();
    assert_eq!(
        commands,
        vec![
            "docker buildx --builder runs-on du",
            "docker buildx --builder runs-on prune --keep-storage 12g -f",
            "docker buildx --builder runs-on du",
            "systemctl stop docker",
            "umount /var/lib/docker",
        ]
    );
}

#[tokio::test]
async fn save_rearms_ttl_detaches_then_snapshots() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    let restored = h.snapshotter(job.clone()).restore().await.unwrap();
    let before = Utc::now().timestamp();

    h.snapshotter(job).save().await.unwrap();

    let state = h.cloud.state();
    let (resource, tags) = &state.tag_updates[0];
    assert_eq!(resource, &restored.volume_id);
    let ttl: i64 = tag_value(tags, keys::TTL).unwrap().parse().unwrap();
    assert!(ttl >= before + 10 * 60);

    let detach = state.calls.iter().position(|c| c == "detach-volume").unwrap();
    let snapshot = state.calls.iter().position(|c| c == "create-snapshot").unwrap();
    let delete = state.calls.iter().position(|c| c == "delete-volume").unwrap();
    assert!(detach < snapshot && snapshot < delete);
}

#[tokio::test]
async fn save_without_wait_returns_pending_and_keeps_volume() {
    let h = Harness::new();
    let mut job = h.job("/data", "main", None);
    h.seed_snapshot(&job, "snap-base", "main", 5, 40);
    job.wait_for_completion = false;
    h.cloud.state().new_snapshot_state = "pending".to_string();

    let restored = h.snapshotter(job.clone()).restore().await.unwrap();
    assert!(!restored.new_volume);
    let saved = h.snapshotter(job).save().await.unwrap();

    assert_eq!(saved.completion, SnapshotCompletion::Pending);
    assert!(!saved.volume_deleted);
    assert!(!h.cloud.called("describe-snapshot"));
    assert!(!h.cloud.called("delete-volume"));
    let state = h.cloud.state();
    assert!(state.volumes.contains_key(&restored.volume_id));
    let (resource, tags) = &state.tag_updates[0];
    assert_eq!(resource, &restored.volume_id);
    assert!(tag_value(tags, keys::TTL).is_some());
}

#[tokio::test]
async fn first_snapshot_of_new_volume_is_always_awaited() {
    let h = Harness::new();
    let mut job = h.job("/data", "main", None);
    job.wait_for_completion = false;

    h.snapshotter(job.clone()).restore().await.unwrap();
    let saved = h.snapshotter(job).save().await.unwrap();

    assert_eq!(saved.completion, SnapshotCompletion::Completed);
    assert!(h.cloud.called("describe-snapshot"));
}

#[tokio::test]
async fn snapshot_that_never_completes_times_out() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    h.snapshotter(job.clone()).restore().await.unwrap();
    h.cloud.state().new_snapshot_state = "pending".to_string();

    let err = h.snapshotter(job).save().await.unwrap_err();

    assert!(err.to_string().contains("did not reach state 'completed'"));
    assert!(h.cloud.state().deleted.is_empty());
}

#[tokio::test]
async fn failed_volume_delete_after_snapshot_is_not_fatal() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    h.snapshotter(job.clone()).restore().await.unwrap();
    h.cloud.state().fail_delete = true;

    let saved = h.snapshotter(job).save().await.unwrap();

    assert!(!saved.volume_deleted);
}

#[tokio::test]
async fn unmount_failure_tolerated_when_no_longer_mounted() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    h.snapshotter(job.clone()).restore().await.unwrap();
    h.shell.fail("umount");

    let saved = h.snapshotter(job).save().await.unwrap();

    assert!(h.shell.ran("df /data"));
    assert!(!saved.snapshot_id.is_empty());
}

#[tokio::test]
async fn unmount_failure_fatal_while_still_mounted() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    h.snapshotter(job.clone()).restore().await.unwrap();
    h.shell.fail("umount");
    *h.shell.df.lock().unwrap() = "Filesystem 1K-blocks Used Available Use% Mounted on\n\
                                   /dev/nvme1n1 41022688 2048 38907528 1% /data\n"
        .to_string();

    let err = h.snapshotter(job).save().await.unwrap_err();

    assert!(matches!(err, VolsnapError::Unmount { .. }));
    assert!(!h.cloud.called("detach-volume"));
}

#[tokio::test]
async fn save_without_record_fails_before_cloud_calls() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);

    let err = h.snapshotter(job).save().await.unwrap_err();

    assert!(matches!(err, VolsnapError::StateMissing { .. }));
    assert!(h.cloud.state().calls.is_empty());
    assert!(h.shell.commands().is_empty());
}

#[tokio::test]
async fn saved_snapshot_is_found_by_next_restore() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    h.snapshotter(job.clone()).restore().await.unwrap();
    let saved = h.snapshotter(job.clone()).save().await.unwrap();

    let next = h.snapshotter(job).restore().await.unwrap();

    assert_eq!(next.snapshot.unwrap().snapshot.id, saved.snapshot_id);
    assert!(!next.new_volume);
}

#[tokio::test]
async fn cancellation_aborts_restore_and_cleans_up() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    let (handle, cancel) = Cancellation::new();
    handle.cancel();

    let err = h
        .snapshotter(job)
        .with_cancellation(cancel)
        .restore()
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    let state = h.cloud.state();
    assert_eq!(state.deleted.len(), 1);
    assert!(!state.calls.iter().any(|c| c == "attach-volume"));
}

#[tokio::test]
async fn lifecycle_events_are_journaled() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    h.snapshotter(job.clone()).restore().await.unwrap();
    h.snapshotter(job).save().await.unwrap();

    let journal =
        std::fs::read_to_string(h.state_dir.path().join("volsnap-audit.log")).unwrap();
    let events: Vec<String> = journal
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["event"].to_string())
        .collect();
    assert_eq!(
        events,
        vec![
            "\"volume.created\"",
            "\"volume.mounted\"",
            "\"snapshot.created\"",
            "\"volume.deleted\"",
        ]
    );
}

#[tokio::test]
async fn cancellation_during_attach_detaches_before_deleting() {
    let h = Harness::new();
    let job = h.job("/data", "main", None);
    {
        let mut state = h.cloud.state();
        state.never_attach = true;
        state.detach_polls = 2;
    }
    let (handle, cancel) = Cancellation::new();
    let mut waits = fast_waits();
    waits.volume_attached = WaitPolicy::new(Duration::from_millis(1), Duration::from_secs(5));

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });
    let err = h
        .snapshotter(job)
        .with_wait_settings(waits)
        .with_cancellation(cancel)
        .restore()
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(err.is_cancelled());
    let state = h.cloud.state();
    assert_eq!(state.deleted.len(), 1);
    assert!(state.volumes.is_empty());
    let detach = state.calls.iter().position(|c| c == "detach-volume").unwrap();
    let delete = state.calls.iter().position(|c| c == "delete-volume").unwrap();
    assert!(detach < delete);
    assert_eq!(state.calls.iter().filter(|c| *c == "delete-volume").count(), 1);
}
