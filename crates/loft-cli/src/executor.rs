//! External command execution.
//!
//! `helm` and `kubectl` are only ever reached through [`CommandExecutor`], so
//! the install flow can run against a fake in tests.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::{Error, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// stdout followed by stderr
    pub combined: String,
}

/// A long-running child process owned by a background task.
///
/// `exited` resolves once the process has terminated, carrying a short
/// description of how it ended.
#[derive(Debug)]
pub struct BackgroundProcess {
    pub exited: oneshot::Receiver<String>,
}

/// Trait for running external tools
///
/// This trait abstracts subprocess execution for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Resolve `program` on PATH
    fn locate(&self, program: &str) -> Option<PathBuf>;

    /// Run to completion and capture combined output
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Start in the background and supervise until it exits
    fn spawn(&self, program: &str, args: &[String]) -> Result<BackgroundProcess>;
}

/// Render a command line for log output.
pub fn display_command(program: &str, args: &[String]) -> String {
    format!("{} {}", program, args.join(" "))
}

/// Run a command and turn a non-zero exit into `Error::CommandFailed` carrying
/// the tool's output verbatim.
pub async fn run_checked<E: CommandExecutor + ?Sized>(
    executor: &E,
    program: &str,
    args: &[String],
) -> Result<String> {
    info!("Executing command: {}", display_command(program, args));
    let output = executor.run(program, args).await?;
    if !output.success {
        return Err(Error::command_failed(format!(
            "error during {} command: {}",
            program, output.combined
        )));
    }
    Ok(output.combined)
}

// =============================================================================
// Real Implementation
// =============================================================================

/// Executor backed by real subprocesses
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            combined,
        })
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<BackgroundProcess> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::command_failed(format!("error starting {} command: {}", program, e)))?;

        let (tx, rx) = oneshot::channel();
        let name = program.to_string();
        tokio::spawn(async move {
            let reason = match child.wait().await {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {}", e),
            };
            debug!("{} exited: {}", name, reason);
            let _ = tx.send(reason);
        });

        Ok(BackgroundProcess { exited: rx })
    }
}
