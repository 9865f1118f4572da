//! Command execution for `exec`.

use std::io;
use std::process::Command;

use thiserror::Error;
use warden_config::ExecConfig;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn { command: String, source: io::Error },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    /// Stdout, followed by stderr when the command failed.
    #[must_use]
    pub fn combined(&self) -> String {
        if self.success || self.stderr.is_empty() {
            return self.stdout.clone();
        }
        let mut text = self.stdout.clone();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }
}

/// Runs one command line to completion.
pub trait CommandRunner {
    fn run(&self, command: &str) -> Result<CommandOutput, RunnerError>;
}

/// `<shell> <shell_args...> <command>`, synchronous, no timeout.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    args: Vec<String>,
}

impl ShellRunner {
    #[must_use]
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            args: config.shell_args.clone(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(&ExecConfig::default())
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<CommandOutput, RunnerError> {
        let output = Command::new(&self.shell)
            .args(&self.args)
            .arg(command)
            .output()
            .map_err(|source| RunnerError::Spawn {
                command: command.to_string(),
                source,
            })?;
        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        };
        if !result.success {
            tracing::warn!(command, status = ?output.status.code(), "Command exited unsuccessfully");
        }
        Ok(result)
    }
}
