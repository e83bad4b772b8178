//! EC2 volume/snapshot backend using the AWS CLI

use crate::cloud::{
    CloudApi, CreateVolumeRequest, Filter, SnapshotDescriptor, Tag, VolumeAttachment,
    VolumeDescriptor,
};
use crate::error::{VolsnapError, VolsnapResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Cloud backend that drives `aws ec2 ...` with JSON output
pub struct AwsCli {
    region: Option<String>,
}

impl AwsCli {
    /// Create a backend; `region` is passed as `--region` when set
    pub fn new(region: Option<String>) -> Self {
        Self { region }
    }

    /// Check if the AWS CLI is installed
    pub async fn is_installed() -> bool {
        Command::new("aws")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn base_args(&self, operation: &str) -> Vec<String> {
        let mut args = vec!["ec2".to_string(), operation.to_string()];
        args.extend(["--output".to_string(), "json".to_string()]);
        if let Some(region) = &self.region {
            args.extend(["--region".to_string(), region.clone()]);
        }
        args
    }

    /// Run an `aws ec2` operation and return raw stdout
    async fn exec(&self, operation: &str, extra: Vec<String>) -> VolsnapResult<Vec<u8>> {
        let mut args = self.base_args(operation);
        args.extend(extra);
        debug!("Executing: aws {:?}", args);

        let output = Command::new("aws")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| VolsnapError::command_failed(format!("aws ec2 {}", operation), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Unable to locate credentials") {
                return Err(VolsnapError::AwsNotConfigured);
            }
            return Err(VolsnapError::cloud(operation, stderr.trim()));
        }

        Ok(output.stdout)
    }

    /// Run an operation and parse its JSON response
    async fn exec_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        extra: Vec<String>,
    ) -> VolsnapResult<T> {
        let stdout = self.exec(operation, extra).await?;
        serde_json::from_slice(&stdout).map_err(|e| {
            VolsnapError::cloud(operation, format!("Failed to parse response: {}", e))
        })
    }
}

fn tag_specifications(resource_type: &str, tags: &[Tag]) -> VolsnapResult<String> {
    let spec = [TagSpecification {
        resource_type,
        tags,
    }];
    Ok(serde_json::to_string(&spec)?)
}

#[async_trait]
impl CloudApi for AwsCli {
    async fn describe_snapshots(&self, filters: &[Filter]) -> VolsnapResult<Vec<SnapshotDescriptor>> {
        let response: DescribeSnapshotsResponse = self
            .exec_json(
                "describe-snapshots",
                vec![
                    "--owner-ids".to_string(),
                    "self".to_string(),
                    "--filters".to_string(),
                    serde_json::to_string(filters)?,
                ],
            )
            .await?;

        Ok(response.snapshots.into_iter().map(Into::into).collect())
    }

    async fn describe_snapshot(&self, snapshot_id: &str) -> VolsnapResult<Option<SnapshotDescriptor>> {
        let response: DescribeSnapshotsResponse = self
            .exec_json(
                "describe-snapshots",
                vec!["--snapshot-ids".to_string(), snapshot_id.to_string()],
            )
            .await?;

        Ok(response.snapshots.into_iter().next().map(Into::into))
    }

    async fn create_volume(&self, request: &CreateVolumeRequest) -> VolsnapResult<String> {
        let mut args = vec![
            "--availability-zone".to_string(),
            request.availability_zone.clone(),
            "--volume-type".to_string(),
            request.volume_type.clone(),
            "--tag-specifications".to_string(),
            tag_specifications("volume", &request.tags)?,
        ];
        if let Some(snapshot_id) = &request.snapshot_id {
            args.extend(["--snapshot-id".to_string(), snapshot_id.clone()]);
        }
        if let Some(size) = request.size {
            args.extend(["--size".to_string(), size.to_string()]);
        }
        if let Some(iops) = request.iops {
            args.extend(["--iops".to_string(), iops.to_string()]);
        }
        if let Some(throughput) = request.throughput {
            args.extend(["--throughput".to_string(), throughput.to_string()]);
        }
        if let Some(rate) = request.initialization_rate {
            args.extend(["--volume-initialization-rate".to_string(), rate.to_string()]);
        }

        let response: CreateVolumeResponse = self.exec_json("create-volume", args).await?;
        Ok(response.volume_id)
    }

    async fn describe_volume(
        &self,
        volume_id: &str,
        attached_only: bool,
    ) -> VolsnapResult<Option<VolumeDescriptor>> {
        let mut args = vec!["--volume-ids".to_string(), volume_id.to_string()];
        if attached_only {
            args.extend([
                "--filters".to_string(),
                serde_json::to_string(&[Filter::new("attachment.status", "attached")])?,
            ]);
        }

        let response: DescribeVolumesResponse = self.exec_json("describe-volumes", args).await?;
        Ok(response.volumes.into_iter().next().map(Into::into))
    }

    async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> VolsnapResult<Option<String>> {
        let response: AttachmentResponse = self
            .exec_json(
                "attach-volume",
                vec![
                    "--volume-id".to_string(),
                    volume_id.to_string(),
                    "--instance-id".to_string(),
                    instance_id.to_string(),
                    "--device".to_string(),
                    device.to_string(),
                ],
            )
            .await?;

        Ok(response.device)
    }

    async fn detach_volume(&self, volume_id: &str, instance_id: &str) -> VolsnapResult<()> {
        self.exec(
            "detach-volume",
            vec![
                "--volume-id".to_string(),
                volume_id.to_string(),
                "--instance-id".to_string(),
                instance_id.to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> VolsnapResult<()> {
        self.exec(
            "create-tags",
            vec![
                "--resources".to_string(),
                resource_id.to_string(),
                "--tags".to_string(),
                serde_json::to_string(tags)?,
            ],
        )
        .await?;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        volume_id: &str,
        description: &str,
        tags: &[Tag],
    ) -> VolsnapResult<String> {
        let response: CreateSnapshotResponse = self
            .exec_json(
                "create-snapshot",
                vec![
                    "--volume-id".to_string(),
                    volume_id.to_string(),
                    "--description".to_string(),
                    description.to_string(),
                    "--tag-specifications".to_string(),
                    tag_specifications("snapshot", tags)?,
                ],
            )
            .await?;

        Ok(response.snapshot_id)
    }

    async fn delete_volume(&self, volume_id: &str) -> VolsnapResult<()> {
        self.exec(
            "delete-volume",
            vec!["--volume-id".to_string(), volume_id.to_string()],
        )
        .await?;
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TagSpecification<'a> {
    resource_type: &'a str,
    tags: &'a [Tag],
}

#[derive(Deserialize)]
struct DescribeSnapshotsResponse {
    #[serde(rename = "Snapshots", default)]
    snapshots: Vec<SnapshotResponse>,
}

#[derive(Deserialize)]
struct SnapshotResponse {
    #[serde(rename = "SnapshotId")]
    snapshot_id: String,
    #[serde(rename = "StartTime")]
    start_time: DateTime<Utc>,
    #[serde(rename = "VolumeSize")]
    volume_size: Option<i32>,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Tags", default)]
    tags: Vec<Tag>,
}

impl From<SnapshotResponse> for SnapshotDescriptor {
    fn from(s: SnapshotResponse) -> Self {
        Self {
            id: s.snapshot_id,
            start_time: s.start_time,
            volume_size: s.volume_size,
            state: s.state,
            tags: s.tags,
        }
    }
}

#[derive(Deserialize)]
struct CreateVolumeResponse {
    #[serde(rename = "VolumeId")]
    volume_id: String,
}

#[derive(Deserialize)]
struct DescribeVolumesResponse {
    #[serde(rename = "Volumes", default)]
    volumes: Vec<VolumeResponse>,
}

#[derive(Deserialize)]
struct VolumeResponse {
    #[serde(rename = "VolumeId")]
    volume_id: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Size")]
    size: Option<i32>,
    #[serde(rename = "Attachments", default)]
    attachments: Vec<AttachmentResponse>,
}

impl From<VolumeResponse> for VolumeDescriptor {
    fn from(v: VolumeResponse) -> Self {
        Self {
            id: v.volume_id,
            state: v.state,
            size: v.size,
            attachments: v
                .attachments
                .into_iter()
                .map(|a| VolumeAttachment {
                    device: a.device,
                    state: a.state.unwrap_or_default(),
                    instance_id: a.instance_id,
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct AttachmentResponse {
    #[serde(rename = "Device")]
    device: Option<String>,
    #[serde(rename = "State")]
    state: Option<String>,
    #[serde(rename = "InstanceId")]
    instance_id: Option<String>,
}

#[derive(Deserialize)]
struct CreateSnapshotResponse {
    #[serde(rename = "SnapshotId")]
    snapshot_id: String,
}
