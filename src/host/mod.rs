//! Host command surface
//!
//! `HostShell` is the seam to the machine (real processes, or a scripted
//! fake in tests). `Host` layers the typed operations the flows need on
//! top of it: mounting, formatting, block-device listing and container
//! engine control.

mod shell;

pub use shell::SystemShell;

use crate::error::{VolsnapError, VolsnapResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Output is logged in full up to this many bytes
const LOG_OUTPUT_LIMIT: usize = 400;
/// Prefix kept when output is truncated for logging
const LOG_OUTPUT_PREFIX: usize = 200;

/// Hardware model reported by the host for cloud block-store volumes
pub const BLOCK_STORE_MODEL: &str = "Amazon Elastic Block Store";

/// Result of a host command: combined stdout+stderr and a success flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }

    /// Convert a failed run into a [`VolsnapError::HostCommand`]
    pub fn into_result(self, command: &str) -> VolsnapResult<String> {
        if self.success {
            Ok(self.output)
        } else {
            Err(VolsnapError::HostCommand {
                command: command.to_string(),
                output: self.output.trim().to_string(),
            })
        }
    }
}

/// Runs programs on the host
#[async_trait]
pub trait HostShell: Send + Sync {
    /// Run `program` with `args`, capturing combined output.
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`];
    /// `Err` means the program could not be run at all.
    async fn run(&self, program: &str, args: &[&str]) -> VolsnapResult<CommandOutput>;
}

/// A block device as listed by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub path: String,
    pub model: String,
}

/// Parse `lsblk -d -n -o PATH,MODEL` output.
///
/// Lines without a model column yield an empty model.
pub fn parse_block_devices(output: &str) -> Vec<BlockDevice> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(char::is_whitespace) {
            Some((path, model)) => BlockDevice {
                path: path.to_string(),
                model: model.trim().to_string(),
            },
            None => BlockDevice {
                path: line.to_string(),
                model: String::new(),
            },
        })
        .collect()
}

/// Shorten command output for logs, respecting char boundaries
pub fn truncate_for_log(output: &str) -> String {
    if output.len() <= LOG_OUTPUT_LIMIT {
        return output.to_string();
    }
    let mut end = LOG_OUTPUT_PREFIX;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (output truncated)", &output[..end])
}

/// Typed host operations
#[derive(Clone)]
pub struct Host {
    shell: Arc<dyn HostShell>,
    sudo: bool,
}

impl Host {
    /// Wrap a shell; privileged commands are prefixed with `sudo` when `sudo` is set
    pub fn new(shell: Arc<dyn HostShell>, sudo: bool) -> Self {
        Self { shell, sudo }
    }

    async fn exec(&self, privileged: bool, program: &str, args: &[&str]) -> VolsnapResult<CommandOutput> {
        let (program, args): (&str, Vec<&str>) = if privileged && self.sudo {
            ("sudo", std::iter::once(program).chain(args.iter().copied()).collect())
        } else {
            (program, args.to_vec())
        };
        let command = format!("{} {}", program, args.join(" "));

        info!("Executing command: {}", command);
        let output = self.shell.run(program, &args).await?;
        if output.success {
            info!("Command successful. Output:\n{}", truncate_for_log(&output.output));
        } else {
            warn!(
                "Command failed: {}\nOutput:\n{}",
                command,
                truncate_for_log(&output.output)
            );
        }
        Ok(output)
    }

    pub async fn unmount(&self, mount_point: &str) -> VolsnapResult<CommandOutput> {
        self.exec(true, "umount", &[mount_point]).await
    }

    pub async fn mount(&self, device: &str, mount_point: &str) -> VolsnapResult<CommandOutput> {
        self.exec(true, "mount", &[device, mount_point]).await
    }

    /// Force-create an ext4 filesystem on `device`
    pub async fn format_ext4(&self, device: &str) -> VolsnapResult<CommandOutput> {
        self.exec(true, "mkfs.ext4", &["-F", device]).await
    }

    pub async fn create_dir(&self, path: &str) -> VolsnapResult<CommandOutput> {
        self.exec(true, "mkdir", &["-p", path]).await
    }

    /// Disk-free report for a path; used to tell whether it is still a mount point
    pub async fn disk_free(&self, path: &str) -> VolsnapResult<CommandOutput> {
        self.exec(false, "df", &[path]).await
    }

    /// List whole-disk block devices with their hardware model
    pub async fn block_devices(&self) -> VolsnapResult<Vec<BlockDevice>> {
        let output = self
            .exec(false, "lsblk", &["-d", "-n", "-o", "PATH,MODEL"])
            .await?
            .into_result("lsblk")?;
        Ok(parse_block_devices(&output))
    }

    pub async fn stop_service(&self, service: &str) -> VolsnapResult<CommandOutput> {
        self.exec(true, "systemctl", &["stop", service]).await
    }

    pub async fn start_service(&self, service: &str) -> VolsnapResult<CommandOutput> {
        self.exec(true, "systemctl", &["start", service]).await
    }

    /// Container engine health/diagnostic probe
    pub async fn engine_info(&self, cli: &str) -> VolsnapResult<CommandOutput> {
        self.exec(true, cli, &["system", "info"]).await
    }

    /// Build-cache disk usage for a builder
    pub async fn engine_disk_usage(&self, cli: &str, builder: &str) -> VolsnapResult<CommandOutput> {
        self.exec(true, cli, &["buildx", "--builder", builder, "du"])
            .await
    }

    /// Prune a builder's cache down to `keep_storage`
    pub async fn engine_prune(
        &self,
        cli: &str,
        builder: &str,
        keep_storage: &str,
    ) -> VolsnapResult<CommandOutput> {
        self.exec(
            true,
            cli,
            &["buildx", "--builder", builder, "prune", "--keep-storage", keep_storage, "-f"],
        )
        .await
    }
}
