use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::Provisioner;
use crate::protocol::{ProvisionCommand, VmRecord};

/// Runs an external program for every command.
///
/// The program is invoked as `<program> [args..] <command>` and receives the
/// VM records as a JSON array on stdin. Only the exit status decides success:
/// a program that exits 0 without reading its input has still succeeded.
#[derive(Debug, Clone)]
pub struct ScriptProvisioner {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ScriptProvisioner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Adds a fixed argument placed before the command name.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Kills the program if it has not exited within `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Provisioner for ScriptProvisioner {
    async fn provision(&self, command: ProvisionCommand, vms: Vec<VmRecord>) -> Result<()> {
        let input = serde_json::to_vec(&vms)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(command.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;

        // stdin is fed while stdout/stderr are drained, so neither side can
        // block the other on a full pipe.
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&input).await {
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
            // stdin is dropped here, closing the program's input.
        };
        let run = async { tokio::join!(feed, child.wait_with_output()) };

        let (fed, output) = match self.timeout {
            // Dropping `run` drops the child, and kill_on_drop reaps it.
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                anyhow!(
                    "{} did not finish {} within {:?}",
                    self.program.display(),
                    command,
                    limit
                )
            })?,
            None => run.await,
        };
        let output = output?;
        if let Err(e) = fed {
            debug!("[{}] failed to write input: {}", command, e);
        }

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("[{}] {}", command, line);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{} script failed: {}", command, stderr.trim());
            return Err(anyhow!(
                "{} exited with {} for {}",
                self.program.display(),
                output.status,
                command
            ));
        }

        info!("{} completed for {} VM(s)", command, vms.len());
        Ok(())
    }
}
