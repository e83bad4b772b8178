//! Error types for volsnap
//!
//! All modules use `VolsnapResult<T>` as their return type.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for volsnap operations
pub type VolsnapResult<T> = Result<T, VolsnapError>;

/// All errors that can occur in volsnap
#[derive(Error, Debug)]
pub enum VolsnapError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Missing required input: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid input '{name}': {reason}")]
    InputInvalid { name: &'static str, reason: String },

    // Cloud API errors
    #[error("AWS CLI not configured or no credentials available")]
    AwsNotConfigured,

    #[error("Cloud API call {operation} failed: {reason}")]
    Cloud { operation: String, reason: String },

    #[error("{resource} did not reach state '{target}' within {}s", waited.as_secs())]
    WaitTimeout {
        resource: String,
        target: &'static str,
        waited: Duration,
    },

    #[error("{resource} entered terminal state '{state}' while waiting for '{target}'")]
    WaitFailed {
        resource: String,
        state: String,
        target: &'static str,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Could not resolve a device path for volume {0}")]
    DeviceNotResolved(String),

    // Host errors
    #[error("Failed to format device {device}: {reason}")]
    Format { device: String, reason: String },

    #[error("Failed to create mount point {path}: {reason}")]
    MountPointCreate { path: String, reason: String },

    #[error("Failed to mount {device} to {mount_point}: {reason}")]
    Mount {
        device: String,
        mount_point: String,
        reason: String,
    },

    #[error("Failed to unmount {mount_point}: {reason}")]
    Unmount { mount_point: String, reason: String },

    #[error("Container engine {service} failed: {reason}")]
    Engine { service: String, reason: String },

    // State errors
    #[error("No volume record for {mount_point} at {path}")]
    StateMissing { mount_point: String, path: PathBuf },

    #[error("Corrupt volume record at {path}: {reason}")]
    StateCorrupt { path: PathBuf, reason: String },

    // Wrapped errors
    #[error("{operation} {resource}: {source}")]
    ResourceOp {
        operation: &'static str,
        resource: String,
        #[source]
        source: Box<VolsnapError>,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` failed: {output}")]
    HostCommand { command: String, output: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VolsnapError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a cloud API error
    pub fn cloud(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cloud {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Wrap this error with the operation and resource it happened on
    pub fn during(self, operation: &'static str, resource: impl Into<String>) -> Self {
        Self::ResourceOp {
            operation,
            resource: resource.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) is a cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::ResourceOp { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::AwsNotConfigured => {
                Some("Make sure the runner has an instance profile allowing ec2:* volume and snapshot calls")
            }
            Self::StateMissing { .. } => {
                Some("Run `volsnap restore` for the same path earlier in the job")
            }
            Self::ConfigMissing(_) => Some("Are you running on a RunsOn runner (v2.8.3+)?"),
            Self::ResourceOp { source, .. } => source.hint(),
            _ => None,
        }
    }
}

/// Attach operation/resource context to a fallible result
pub trait ResultExt<T> {
    fn during(self, operation: &'static str, resource: impl Into<String>) -> VolsnapResult<T>;
}

impl<T> ResultExt<T> for VolsnapResult<T> {
    fn during(self, operation: &'static str, resource: impl Into<String>) -> VolsnapResult<T> {
        self.map_err(|e| e.during(operation, resource))
    }
}
