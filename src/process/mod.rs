//! Managed process lifecycle
//!
//! A managed process is a handle to a service installed under a single root
//! path on a host. The shared lifecycle (deploy, start, stop, log) lives in
//! [`lifecycle`] and is driven through the [`ManagedProcess`] trait, which
//! each concrete instance type implements by supplying a liveness probe and a
//! pre-deploy hook.

pub mod backoff;
mod lifecycle;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClusterConfig;
use crate::execution::{ConfigRenderer, Executor, ShellExecutor, TemplateArgs, TemplateSet};
use crate::types::{CommandOutput, HealthStatus, ProcessState, Result};

pub use backoff::{Backoff, PollPolicy};
pub(crate) use lifecycle::{copy_binaries, render_template, write_config};

/// Subdirectories created under every install path
pub const SUBDIRECTORIES: [&str; 4] = ["bin", "conf", "log", "data"];

/// Identity of a managed process plus the template arguments derived from it
///
/// Identity fields are fixed at construction. Derived arguments (start
/// command, run signature, log file and type-specific paths) are rendered
/// once by the owning instance's constructor.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    name: String,
    host: String,
    port: u16,
    path: PathBuf,
    args: TemplateArgs,
}

impl ProcessSpec {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<PathBuf>,
    ) -> Self {
        let name = name.into();
        let host = host.into();
        let path = path.into();

        let args = TemplateArgs::new()
            .with("name", &name)
            .with("host", &host)
            .with("port", port)
            .with("path", path.display())
            // Filled in by the concrete instance type
            .with("startcmd", "")
            .with("runcmd", "")
            .with("logfile", "");

        Self {
            name,
            host,
            port,
            path,
            args,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn args(&self) -> &TemplateArgs {
        &self.args
    }

    /// Command line the control script runs to start the process
    pub fn start_cmd(&self) -> &str {
        self.args.get("startcmd").unwrap_or_default()
    }

    /// Process signature as seen in `ps`, used by the control script to stop it
    pub fn run_cmd(&self) -> &str {
        self.args.get("runcmd").unwrap_or_default()
    }

    pub fn log_file(&self) -> &str {
        self.args.get("logfile").unwrap_or_default()
    }

    /// `<path>/<name>_control`
    pub fn control_script(&self) -> PathBuf {
        self.path.join(format!("{}_control", self.name))
    }

    /// Shell command invoking a control script sub-command
    pub fn control_command(&self, action: &str) -> String {
        let template = format!("cd $path && ./${{name}}_control {}", action);
        ConfigRenderer::render(&template, &self.args)
    }

    /// Set a literal argument
    pub(crate) fn set(&mut self, name: &str, value: impl ToString) {
        self.args.set(name, value);
    }

    /// Set an argument by rendering `template` against the current arguments
    pub(crate) fn derive(&mut self, name: &str, template: &str) {
        let value = ConfigRenderer::render(template, &self.args);
        self.args.set(name, value);
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}:{}]", self.name, self.host, self.port)
    }
}

/// Collaborators shared by every instance of a cluster
#[derive(Debug, Clone)]
pub struct ProcessContext {
    pub executor: Arc<dyn Executor>,
    pub config: Arc<ClusterConfig>,
    pub templates: Arc<TemplateSet>,
    pub policy: PollPolicy,
}

impl ProcessContext {
    /// Build a context from configuration, loading templates eagerly
    ///
    /// Fails with [`Error::Validation`](crate::Error::Validation) when the
    /// polling schedule has a zero interval or an initial interval above its cap.
    pub fn new(executor: Arc<dyn Executor>, config: Arc<ClusterConfig>) -> Result<Self> {
        config.polling.validate()?;
        let templates = TemplateSet::load(&config.templates)?;
        let policy = PollPolicy::from_config(&config.polling);
        Ok(Self {
            executor,
            config,
            templates: Arc::new(templates),
            policy,
        })
    }

    /// Context using a [`ShellExecutor`] built from the executor settings
    pub fn with_shell(config: Arc<ClusterConfig>) -> Result<Self> {
        let executor = Arc::new(ShellExecutor::from_config(&config.executor));
        Self::new(executor, config)
    }

    /// Builder pattern: replace the polling schedule
    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// State shared by every managed process: identity, collaborators and the
/// last lifecycle state this handle observed
#[derive(Debug)]
pub struct ProcessCore {
    spec: ProcessSpec,
    context: ProcessContext,
    state: Mutex<ProcessState>,
}

impl ProcessCore {
    pub fn new(spec: ProcessSpec, context: ProcessContext) -> Self {
        Self {
            spec,
            context,
            state: Mutex::new(ProcessState::Undeployed),
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.context.config
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub(crate) fn transition(&self, to: ProcessState) {
        let mut state = self.state.lock();
        if *state != to {
            debug!(
                instance = %self.spec,
                from = ?*state,
                to = ?to,
                "State transition"
            );
            *state = to;
        }
    }

    /// Run a command through the shared executor
    pub async fn run(&self, command: &str) -> Result<CommandOutput> {
        let output = self.context.executor.run(command).await?;
        debug!(
            instance = %self.spec,
            exit_code = ?output.exit_code,
            len = output.stdout.len() + output.stderr.len(),
            "Command returned"
        );
        Ok(output)
    }
}

/// Outcome of a start or stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The process was already in the requested state; nothing was issued
    Unchanged,
    /// The control command was issued and the liveness poll confirmed it
    Changed { elapsed: Duration },
}

/// A deployable, independently start/stop-able service instance
///
/// Implementors supply the liveness probe and the pre-deploy hook; the
/// lifecycle operations are provided.
#[async_trait]
pub trait ManagedProcess: Send + Sync {
    fn core(&self) -> &ProcessCore;

    /// Protocol-specific probe. Failures to reach the process mean "not alive".
    async fn is_alive(&self) -> bool;

    /// Install binaries and write the service's own configuration
    async fn pre_deploy(&self) -> Result<()>;

    /// Report health; the default knows nothing about the process
    async fn status(&self) -> HealthStatus {
        warn!(instance = %self.spec(), "status: not implemented");
        HealthStatus::Unknown
    }

    fn spec(&self) -> &ProcessSpec {
        self.core().spec()
    }

    /// Last state this handle drove the process into
    fn state(&self) -> ProcessState {
        self.core().state()
    }

    /// Create the directory tree, run the pre-deploy hook and write the
    /// control script. Re-running rewrites everything and does not restart.
    async fn deploy(&self) -> Result<()> {
        lifecycle::deploy(self).await
    }

    async fn start(&self) -> Result<LifecycleOutcome> {
        lifecycle::start(self).await
    }

    async fn stop(&self) -> Result<LifecycleOutcome> {
        lifecycle::stop(self).await
    }

    /// Tail of the process log file
    async fn log(&self) -> Result<String> {
        lifecycle::tail_log(self).await
    }

    /// Probe the host for the current state instead of trusting [`state`](Self::state)
    async fn probe_state(&self) -> ProcessState {
        lifecycle::probe_state(self).await
    }
}
