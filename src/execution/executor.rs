use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::config::ExecutorConfig;
use crate::types::{CommandOutput, ExecutionError, Result};

/// Maximum size for captured stdout/stderr to prevent memory issues
const MAX_OUTPUT_SIZE: usize = 64 * 1024; // 64KB per stream

/// Length of command output echoed into debug logs
const LOG_PREVIEW_SIZE: usize = 120;

/// Runs a shell command against a target host and captures its output
///
/// `Err` means the command never produced a result (spawn failure, timeout).
/// A command that ran and exited non-zero is returned as `Ok` with its exit
/// code so callers can decide what a failure means for them.
#[async_trait]
pub trait Executor: Send + Sync + std::fmt::Debug {
    async fn run(&self, command: &str) -> Result<CommandOutput>;
}

/// Executes commands through `<shell> -c`, with a timeout, environment
/// variables and an optional working directory
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    /// Shell used to interpret the command line
    pub shell: String,
    /// Maximum time to wait for command completion
    pub timeout: Duration,
    /// Environment variables to set for the command
    pub env: HashMap<String, String>,
    /// Working directory for command execution
    pub working_dir: Option<String>,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            timeout,
            env: HashMap::new(),
            working_dir: None,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.shell.clone(), Duration::from_secs(config.command_timeout))
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_working_dir<P: AsRef<Path>>(mut self, working_dir: P) -> Self {
        self.working_dir = Some(working_dir.as_ref().to_string_lossy().to_string());
        self
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        if command.trim().is_empty() {
            return Err(ExecutionError::StartFailed {
                command: "<empty>".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "Command cannot be empty",
                ),
            }
            .into());
        }

        debug!(
            command = %command,
            shell = %self.shell,
            timeout_secs = self.timeout.as_secs(),
            "Executing command"
        );

        let start_time = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .envs(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null()) // Ensure no stdin interaction
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let execution_result = timeout(self.timeout, cmd.output()).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match execution_result {
            Ok(Ok(output)) => {
                let result = CommandOutput {
                    command: command.to_string(),
                    exit_code: output.status.code(),
                    stdout: truncate_output(output.stdout),
                    stderr: truncate_output(output.stderr),
                    duration_ms,
                };

                debug!(
                    command = %command,
                    exit_code = ?result.exit_code,
                    duration_ms = duration_ms,
                    output = %shorten(&result.combined(), LOG_PREVIEW_SIZE),
                    "Command completed"
                );

                Ok(result)
            }
            Ok(Err(io_error)) => {
                error!(
                    command = %command,
                    error = %io_error,
                    "Failed to execute command"
                );
                Err(ExecutionError::StartFailed {
                    command: command.to_string(),
                    source: io_error,
                }
                .into())
            }
            Err(_elapsed) => {
                warn!(
                    command = %command,
                    timeout_secs = self.timeout.as_secs(),
                    duration_ms = duration_ms,
                    "Command timed out"
                );
                Err(ExecutionError::Timeout {
                    command: command.to_string(),
                    timeout: self.timeout.as_secs(),
                }
                .into())
            }
        }
    }
}

/// Truncate command output to prevent memory issues
fn truncate_output(output: Vec<u8>) -> String {
    let output_str = String::from_utf8_lossy(&output);
    if output_str.len() > MAX_OUTPUT_SIZE {
        let truncated = &output_str[..floor_char_boundary(&output_str, MAX_OUTPUT_SIZE)];
        format!("{}... [truncated at {} bytes]", truncated, MAX_OUTPUT_SIZE)
    } else {
        output_str.to_string()
    }
}

/// Single-line preview of command output for log records
pub(crate) fn shorten(text: &str, max: usize) -> String {
    let flat = text.trim().replace("\r\n", " ").replace('\n', " ");
    if flat.len() <= max {
        flat
    } else {
        format!("{}...", &flat[..floor_char_boundary(&flat, max)])
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
