use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::{debug, error, info, warn};

use crate::relay_modules::trigger::Trigger;

pub const DEFAULT_ENVIRONMENT_COMMAND: &str = "/usr/bin/python3 /opt/light/FFWLightControlTrigger.py";
pub const DEFAULT_DISPLAY_COMMAND: &str = "/usr/bin/php /usr/local/bin/automate_tv 900";

#[derive(Error, Debug)]
pub enum SideEffectError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Local automation run for triggers flagged `local`.
#[async_trait]
pub trait LocalActions: Send + Sync {
    /// Switches on the station lighting.
    async fn control_environment(&self) -> Result<(), SideEffectError>;
    /// Wakes the alarm display.
    async fn control_display(&self) -> Result<(), SideEffectError>;
}

/// Runs both local actions when `trigger.local` is set. Each action's failure
/// is logged and never affects the other one or the caller.
pub async fn invoke_local_actions(actions: &dyn LocalActions, trigger: &Trigger) {
    if !trigger.local {
        debug!(trigger = %trigger.name, "Trigger has no local actions.");
        return;
    }

    info!(trigger = %trigger.name, "Starting light control.");
    if let Err(e) = actions.control_environment().await {
        error!(trigger = %trigger.name, error = %e, "Light control failed.");
    }

    info!(trigger = %trigger.name, "Starting display control.");
    if let Err(e) = actions.control_display().await {
        error!(trigger = %trigger.name, error = %e, "Display control failed.");
    }
}

/// A shell command line run through `/bin/sh -c`.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub command_line: String,
    /// Return as soon as the process is spawned; its exit is logged later.
    pub detach: bool,
}

impl ShellCommand {
    pub fn new(command_line: impl Into<String>, detach: bool) -> Self {
        Self {
            command_line: command_line.into(),
            detach,
        }
    }

    fn command(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new("/bin/sh");
        cmd.arg("-c").arg(&self.command_line);
        cmd
    }

    pub async fn run(&self) -> Result<(), SideEffectError> {
        if self.detach {
            return self.spawn_detached();
        }

        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| SideEffectError::Spawn {
                command: self.command_line.clone(),
                source,
            })?;

        debug!(
            command = %self.command_line,
            stdout = %String::from_utf8_lossy(&output.stdout),
            "Command finished."
        );
        if !output.status.success() {
            return Err(SideEffectError::Failed {
                command: self.command_line.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn spawn_detached(&self) -> Result<(), SideEffectError> {
        let mut child = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SideEffectError::Spawn {
                command: self.command_line.clone(),
                source,
            })?;

        let command_line = self.command_line.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    debug!(command = %command_line, "Detached command finished.");
                }
                Ok(status) => {
                    warn!(command = %command_line, %status, "Detached command exited with failure.");
                }
                Err(e) => {
                    warn!(command = %command_line, error = %e, "Failed to wait for detached command.");
                }
            }
        });
        Ok(())
    }
}

/// `LocalActions` backed by two shell commands.
#[derive(Debug, Clone)]
pub struct ShellLocalActions {
    pub environment: ShellCommand,
    pub display: ShellCommand,
}

impl Default for ShellLocalActions {
    fn default() -> Self {
        Self {
            environment: ShellCommand::new(DEFAULT_ENVIRONMENT_COMMAND, false),
            display: ShellCommand::new(DEFAULT_DISPLAY_COMMAND, true),
        }
    }
}

#[async_trait]
impl LocalActions for ShellLocalActions {
    async fn control_environment(&self) -> Result<(), SideEffectError> {
        self.environment.run().await
    }

    async fn control_display(&self) -> Result<(), SideEffectError> {
        self.display.run().await
    }
}
