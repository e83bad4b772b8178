//! Bounded polling for cloud resource state transitions
//!
//! One loop, [`poll_until`], backs every wait: fetch the resource, stop when
//! it reports the target state, fail on a terminal state, otherwise sleep a
//! fixed interval. Running past the deadline is a fatal timeout.

use crate::cancel::Cancellation;
use crate::cloud::{
    CloudApi, SnapshotDescriptor, VolumeDescriptor, SNAPSHOT_COMPLETED, VOLUME_AVAILABLE,
    VOLUME_IN_USE,
};
use crate::error::{VolsnapError, VolsnapResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const VOLUME_AVAILABLE_DEADLINE: Duration = Duration::from_secs(5 * 60);
const VOLUME_ATTACHED_DEADLINE: Duration = Duration::from_secs(5 * 60);
const SNAPSHOT_COMPLETED_DEADLINE: Duration = Duration::from_secs(10 * 60);

/// Outcome of a single poll
#[derive(Debug, Clone, PartialEq)]
pub enum Poll<T> {
    /// Target state reached
    Ready(T),
    /// Not there yet; carries the observed state for logging
    Pending(String),
    /// Terminal state from which the target can never be reached
    Failed(String),
}

/// Poll interval and hard deadline for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl WaitPolicy {
    pub const fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

/// Policies for the three waits used by the flows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    pub volume_available: WaitPolicy,
    pub volume_attached: WaitPolicy,
    pub snapshot_completed: WaitPolicy,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            volume_available: WaitPolicy::new(DEFAULT_POLL_INTERVAL, VOLUME_AVAILABLE_DEADLINE),
            volume_attached: WaitPolicy::new(DEFAULT_POLL_INTERVAL, VOLUME_ATTACHED_DEADLINE),
            snapshot_completed: WaitPolicy::new(
                DEFAULT_POLL_INTERVAL,
                SNAPSHOT_COMPLETED_DEADLINE,
            ),
        }
    }
}

/// Poll `fetch` until it reports [`Poll::Ready`], a terminal state, the
/// deadline, or cancellation.
///
/// Errors returned by `fetch` abort the wait immediately.
pub async fn poll_until<T, F, Fut>(
    resource: &str,
    target: &'static str,
    policy: WaitPolicy,
    cancel: &Cancellation,
    mut fetch: F,
) -> VolsnapResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VolsnapResult<Poll<T>>>,
{
    let started = Instant::now();
    let timed_out = || VolsnapError::WaitTimeout {
        resource: resource.to_string(),
        target,
        waited: policy.deadline,
    };

    loop {
        if cancel.is_cancelled() {
            return Err(VolsnapError::Cancelled);
        }

        let remaining = policy.deadline.saturating_sub(started.elapsed());
        let polled = tokio::select! {
            polled = tokio::time::timeout(remaining, fetch()) => polled.map_err(|_| timed_out())?,
            _ = cancel.cancelled() => return Err(VolsnapError::Cancelled),
        };

        match polled? {
            Poll::Ready(value) => return Ok(value),
            Poll::Failed(state) => {
                return Err(VolsnapError::WaitFailed {
                    resource: resource.to_string(),
                    state,
                    target,
                })
            }
            Poll::Pending(state) => {
                debug!("{} is '{}', waiting for '{}'", resource, state, target);
            }
        }

        if started.elapsed() + policy.interval > policy.deadline {
            return Err(timed_out());
        }

        tokio::select! {
            _ = tokio::time::sleep(policy.interval) => {}
            _ = cancel.cancelled() => return Err(VolsnapError::Cancelled),
        }
    }
}

/// Wait until a volume reports `available` (created, or fully detached)
pub async fn wait_volume_available(
    cloud: &dyn CloudApi,
    volume_id: &str,
    policy: WaitPolicy,
    cancel: &Cancellation,
) -> VolsnapResult<VolumeDescriptor> {
    let resource = format!("volume {}", volume_id);
    poll_until(&resource, VOLUME_AVAILABLE, policy, cancel, move || async move {
        Ok(match cloud.describe_volume(volume_id, false).await? {
            Some(volume) if volume.state == VOLUME_AVAILABLE => Poll::Ready(volume),
            Some(volume) if is_terminal_volume_state(&volume.state) => Poll::Failed(volume.state),
            Some(volume) => Poll::Pending(volume.state),
            None => Poll::Pending("not visible yet".to_string()),
        })
    })
    .await
}

/// Wait until a volume is in use with an attachment in the `attached` state
pub async fn wait_volume_attached(
    cloud: &dyn CloudApi,
    volume_id: &str,
    policy: WaitPolicy,
    cancel: &Cancellation,
) -> VolsnapResult<VolumeDescriptor> {
    let resource = format!("volume {}", volume_id);
    poll_until(&resource, "attached", policy, cancel, move || async move {
        Ok(match cloud.describe_volume(volume_id, true).await? {
            Some(volume) if volume.state == VOLUME_IN_USE && volume.is_attached() => {
                Poll::Ready(volume)
            }
            Some(volume) if is_terminal_volume_state(&volume.state) => Poll::Failed(volume.state),
            Some(volume) => Poll::Pending(volume.state),
            None => Poll::Pending("attaching".to_string()),
        })
    })
    .await
}

/// Wait until a snapshot reports `completed`
pub async fn wait_snapshot_completed(
    cloud: &dyn CloudApi,
    snapshot_id: &str,
    policy: WaitPolicy,
    cancel: &Cancellation,
) -> VolsnapResult<SnapshotDescriptor> {
    let resource = format!("snapshot {}", snapshot_id);
    poll_until(&resource, SNAPSHOT_COMPLETED, policy, cancel, move || async move {
        Ok(match cloud.describe_snapshot(snapshot_id).await? {
            Some(snapshot) if snapshot.state == SNAPSHOT_COMPLETED => Poll::Ready(snapshot),
            Some(snapshot) if snapshot.state == "error" => Poll::Failed(snapshot.state),
            Some(snapshot) => Poll::Pending(snapshot.state),
            None => Poll::Pending("not visible yet".to_string()),
        })
    })
    .await
}

fn is_terminal_volume_state(state: &str) -> bool {
    matches!(state, "deleting" | "deleted" | "error")
}
