//! Host shell backed by real process execution

use crate::error::{VolsnapError, VolsnapResult};
use crate::host::{CommandOutput, HostShell};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Runs commands on the local machine
pub struct SystemShell;

impl SystemShell {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostShell for SystemShell {
    async fn run(&self, program: &str, args: &[&str]) -> VolsnapResult<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                VolsnapError::command_failed(format!("{} {}", program, args.join(" ")), e)
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            output: combined,
        })
    }
}
