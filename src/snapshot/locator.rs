//! Snapshot lookup by tag identity, with default-branch fallback

use crate::cloud::{CloudApi, Filter, SnapshotDescriptor, SNAPSHOT_COMPLETED};
use crate::error::VolsnapResult;
use crate::snapshot::tags::TagSet;
use tracing::info;

/// Snapshot chosen for a restore
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedSnapshot {
    pub snapshot: SnapshotDescriptor,
    /// Branch whose snapshot was found
    pub branch: String,
    /// Found on the default branch rather than the job's own
    pub fallback: bool,
}

/// Most recently started snapshot; the first one seen wins a tie
pub fn select_latest(snapshots: &[SnapshotDescriptor]) -> Option<&SnapshotDescriptor> {
    snapshots.iter().fold(None, |best, candidate| match best {
        Some(current) if current.start_time >= candidate.start_time => Some(current),
        _ => Some(candidate),
    })
}

/// Completed snapshots carrying every tag in `tags`
fn snapshot_filters(tags: &TagSet) -> Vec<Filter> {
    let mut filters = vec![Filter::new("status", SNAPSHOT_COMPLETED)];
    filters.extend(tags.filters());
    filters
}

async fn latest_for(cloud: &dyn CloudApi, tags: &TagSet) -> VolsnapResult<Option<SnapshotDescriptor>> {
    let snapshots = cloud.describe_snapshots(&snapshot_filters(tags)).await?;
    Ok(select_latest(&snapshots).cloned())
}

/// Find the newest completed snapshot for the job's branch, falling back to
/// `default_branch` when the branch has none.
///
/// Finding nothing is not an error.
pub async fn find_snapshot(
    cloud: &dyn CloudApi,
    tags: &TagSet,
    default_branch: Option<&str>,
) -> VolsnapResult<Option<LocatedSnapshot>> {
    info!("Searching for latest snapshot for branch {}", tags.branch);
    if let Some(snapshot) = latest_for(cloud, tags).await? {
        info!("Found snapshot {} for branch {}", snapshot.id, tags.branch);
        return Ok(Some(LocatedSnapshot {
            snapshot,
            branch: tags.branch.clone(),
            fallback: false,
        }));
    }

    let default_branch = match default_branch {
        Some(branch) if branch != tags.branch => branch,
        _ => {
            info!("No snapshot found for branch {}", tags.branch);
            return Ok(None);
        }
    };

    info!(
        "No snapshot found for branch {}, trying default branch {}",
        tags.branch, default_branch
    );
    let fallback_tags = tags.with_branch(default_branch);
    match latest_for(cloud, &fallback_tags).await? {
        Some(snapshot) => {
            info!("Found snapshot {} for default branch {}", snapshot.id, default_branch);
            Ok(Some(LocatedSnapshot {
                snapshot,
                branch: default_branch.to_string(),
                fallback: true,
            }))
        }
        None => {
            info!("No snapshot found for default branch {}", default_branch);
            Ok(None)
        }
    }
}
