use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Deploy of {instance} failed while trying to {step}: {source}")]
    Deploy {
        instance: String,
        step: DeployStep,
        #[source]
        source: Box<Error>,
    },

    #[error("{instance} did not {action} within {waited_ms}ms")]
    LivenessTimeout {
        instance: String,
        action: LifecycleAction,
        waited_ms: u64,
    },

    #[error("Validation failed: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Malformed status document: {0}")]
    StatusDocument(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Config file parse error: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Template file {path} could not be read: {source}")]
    TemplateUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Execution-related errors
///
/// A command that ran and exited non-zero is not an error at this level; it
/// comes back as a [`CommandOutput`] whose `exit_code` callers can inspect.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command '{command}' failed with exit code {code}")]
    NonZeroExit { command: String, code: i32 },

    #[error("Command '{command}' timed out after {timeout}s")]
    Timeout { command: String, timeout: u64 },

    #[error("Command '{command}' could not be started: {source}")]
    StartFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Type alias for Results
pub type Result<T> = std::result::Result<T, Error>;

/// The step of a deploy that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    CreateDirectories,
    CopyBinaries,
    WriteConfig,
    WriteControlScript,
}

impl std::fmt::Display for DeployStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeployStep::CreateDirectories => "create directories",
            DeployStep::CopyBinaries => "copy binaries",
            DeployStep::WriteConfig => "write config",
            DeployStep::WriteControlScript => "write control script",
        };
        f.write_str(s)
    }
}

/// Lifecycle operation, used for logging, metrics and timeout errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Deploy,
    Start,
    Stop,
    Reconfig,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Deploy => "deploy",
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Reconfig => "reconfig",
        }
    }
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of a managed process
///
/// `Deployed` and `Stopped` are operationally the same (installed, process
/// absent); `Stopped` is what a probe reports once a control script exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Undeployed,
    Deployed,
    Running,
    Stopped,
}

/// Health status reported by `status()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// Result of running a command through an executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String, // Truncated to reasonable size
    pub stderr: String, // Truncated to reasonable size
    pub duration_ms: u64,
}

impl CommandOutput {
    /// True when the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, the way a terminal would show them
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}{}", self.stdout, self.stderr)
        }
    }

    /// Convert a non-zero exit into an [`ExecutionError::NonZeroExit`]
    pub fn into_checked(self) -> Result<Self> {
        match self.exit_code {
            Some(0) => Ok(self),
            code => Err(ExecutionError::NonZeroExit {
                command: self.command,
                code: code.unwrap_or(-1),
            }
            .into()),
        }
    }
}
