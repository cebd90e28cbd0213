use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use super::{LifecycleOutcome, ManagedProcess, ProcessCore, ProcessSpec, SUBDIRECTORIES};
use crate::execution::ConfigRenderer;
use crate::logging;
use crate::metrics;
use crate::types::{
    CommandOutput, DeployStep, Error, LifecycleAction, ProcessState, Result,
};

pub(crate) async fn deploy<P>(process: &P) -> Result<()>
where
    P: ManagedProcess + ?Sized,
{
    let core = process.core();
    let spec = core.spec();

    async move {
        info!(path = %spec.path().display(), "Deploying");
        let started = Instant::now();

        for dir in SUBDIRECTORIES {
            tokio::fs::create_dir_all(spec.path().join(dir))
                .await
                .map_err(|e| deploy_error(spec, DeployStep::CreateDirectories, e.into()))?;
        }

        process.pre_deploy().await?;
        let script = write_control_script(core).await?;

        if core.state() == ProcessState::Undeployed {
            core.transition(ProcessState::Deployed);
        }

        let elapsed = started.elapsed();
        metrics::record_lifecycle(spec.name(), LifecycleAction::Deploy, elapsed);
        info!(
            control_script = %script.display(),
            elapsed_secs = %format_secs(elapsed),
            "Deploy completed"
        );
        Ok(())
    }
    .instrument(instance_span(spec))
    .await
}

pub(crate) async fn start<P>(process: &P) -> Result<LifecycleOutcome>
where
    P: ManagedProcess + ?Sized,
{
    let core = process.core();
    let spec = core.spec();

    async move {
        if process.is_alive().await {
            warn!("Already running");
            core.transition(ProcessState::Running);
            return Ok(LifecycleOutcome::Unchanged);
        }

        debug!("Starting");
        let policy = &core.context().policy;
        let started = Instant::now();

        let output = core.run(&spec.control_command("start")).await?;
        warn_on_failure(&output, LifecycleAction::Start);

        let mut backoff = policy.start_backoff();
        while !probe(process).await {
            let delay = backoff.next().unwrap_or(policy.start_max);
            sleep_within_deadline(spec, LifecycleAction::Start, policy.timeout, started, delay)
                .await?;
            if delay >= policy.start_max {
                warn!("Still not alive");
            }
        }

        let elapsed = started.elapsed();
        core.transition(ProcessState::Running);
        metrics::record_lifecycle(spec.name(), LifecycleAction::Start, elapsed);
        info!(elapsed_secs = %format_secs(elapsed), "Start completed");
        Ok(LifecycleOutcome::Changed { elapsed })
    }
    .instrument(instance_span(spec))
    .await
}

pub(crate) async fn stop<P>(process: &P) -> Result<LifecycleOutcome>
where
    P: ManagedProcess + ?Sized,
{
    let core = process.core();
    let spec = core.spec();

    async move {
        if !process.is_alive().await {
            warn!("Already stopped");
            if core.state() == ProcessState::Running {
                core.transition(ProcessState::Stopped);
            }
            return Ok(LifecycleOutcome::Unchanged);
        }

        let policy = &core.context().policy;
        let output = core.run(&spec.control_command("stop")).await?;
        warn_on_failure(&output, LifecycleAction::Stop);

        let started = Instant::now();
        while probe(process).await {
            sleep_within_deadline(
                spec,
                LifecycleAction::Stop,
                policy.timeout,
                started,
                policy.stop_interval,
            )
            .await?;
        }

        let elapsed = started.elapsed();
        core.transition(ProcessState::Stopped);
        metrics::record_lifecycle(spec.name(), LifecycleAction::Stop, elapsed);
        info!(elapsed_secs = %format_secs(elapsed), "Stop completed");
        Ok(LifecycleOutcome::Changed { elapsed })
    }
    .instrument(instance_span(spec))
    .await
}

pub(crate) async fn tail_log<P>(process: &P) -> Result<String>
where
    P: ManagedProcess + ?Sized,
{
    let core = process.core();
    let spec = core.spec();
    info!(instance = %spec, log_file = %spec.log_file(), "Reading log");

    let command = ConfigRenderer::render("tail $logfile", spec.args());
    let output = core.run(&command).await?;
    Ok(output.combined())
}

pub(crate) async fn probe_state<P>(process: &P) -> ProcessState
where
    P: ManagedProcess + ?Sized,
{
    let script = process.spec().control_script();
    let installed = tokio::fs::try_exists(&script).await.unwrap_or(false);
    if !installed {
        ProcessState::Undeployed
    } else if process.is_alive().await {
        ProcessState::Running
    } else {
        ProcessState::Stopped
    }
}

/// Copy pre-built executables into `<path>/bin/`
pub(crate) async fn copy_binaries(core: &ProcessCore, source: &str) -> Result<()> {
    let spec = core.spec();
    let args = spec.args().clone().with("BINS", source);
    let command = ConfigRenderer::render("cp $BINS $path/bin/", &args);

    core.run(&command)
        .await
        .and_then(CommandOutput::into_checked)
        .map_err(|e| deploy_error(spec, DeployStep::CopyBinaries, e))?;
    Ok(())
}

/// Write a rendered service config into `<path>/conf/<file_name>`
pub(crate) async fn write_config(
    core: &ProcessCore,
    file_name: &str,
    content: &str,
) -> Result<PathBuf> {
    let spec = core.spec();
    let target = spec.path().join("conf").join(file_name);

    tokio::fs::write(&target, content)
        .await
        .map_err(|e| deploy_error(spec, DeployStep::WriteConfig, e.into()))?;
    debug!(file = %target.display(), bytes = content.len(), "Wrote config");
    Ok(target)
}

/// Render a deploy-time template against the instance arguments, warning
/// about placeholders nothing fills in
pub(crate) fn render_template(spec: &ProcessSpec, file_name: &str, template: &str) -> String {
    let missing = ConfigRenderer::unresolved(template, spec.args());
    if !missing.is_empty() {
        warn!(
            instance = %spec,
            file = %file_name,
            placeholders = ?missing,
            "Template has unresolved placeholders, writing them verbatim"
        );
    }
    ConfigRenderer::render(template, spec.args())
}

async fn write_control_script(core: &ProcessCore) -> Result<PathBuf> {
    let spec = core.spec();
    let target = spec.control_script();
    let template = &core.context().templates.control_script;
    let content = render_template(spec, "control script", template);

    tokio::fs::write(&target, content)
        .await
        .map_err(|e| deploy_error(spec, DeployStep::WriteControlScript, e.into()))?;
    make_executable(&target)
        .await
        .map_err(|e| deploy_error(spec, DeployStep::WriteControlScript, e.into()))?;
    Ok(target)
}

#[cfg(unix)]
async fn make_executable(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn make_executable(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

async fn probe<P>(process: &P) -> bool
where
    P: ManagedProcess + ?Sized,
{
    let alive = process.is_alive().await;
    metrics::record_liveness_check(process.spec().name(), alive);
    alive
}

/// Sleep for `delay`, or fail if the poll deadline has already passed
async fn sleep_within_deadline(
    spec: &ProcessSpec,
    action: LifecycleAction,
    timeout: Option<Duration>,
    started: Instant,
    delay: Duration,
) -> Result<()> {
    let delay = match timeout {
        Some(timeout) => {
            let waited = started.elapsed();
            if waited >= timeout {
                warn!(
                    action = %action,
                    waited_ms = waited.as_millis() as u64,
                    "Gave up waiting for liveness change"
                );
                return Err(Error::LivenessTimeout {
                    instance: spec.to_string(),
                    action,
                    waited_ms: waited.as_millis() as u64,
                });
            }
            delay.min(timeout - waited)
        }
        None => delay,
    };
    tokio::time::sleep(delay).await;
    Ok(())
}

fn warn_on_failure(output: &CommandOutput, action: LifecycleAction) {
    if !output.success() {
        warn!(
            action = %action,
            exit_code = ?output.exit_code,
            stderr = %output.stderr.trim(),
            "Control script returned a failure, polling liveness anyway"
        );
    }
}

fn deploy_error(spec: &ProcessSpec, step: DeployStep, source: Error) -> Error {
    Error::Deploy {
        instance: spec.to_string(),
        step,
        source: Box::new(source),
    }
}

fn instance_span(spec: &ProcessSpec) -> tracing::Span {
    logging::instance_span(spec.name(), spec.host(), spec.port())
}

fn format_secs(elapsed: Duration) -> String {
    format!("{:.2}", elapsed.as_secs_f64())
}
