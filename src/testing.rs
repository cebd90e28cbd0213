//! Scripted executor for lifecycle tests
//!
//! Simulates a single remote process: the control script's `start`/`stop`
//! toggle it, `PING` answers `PONG` while it is up, `INFO` returns canned
//! text. Boot and shutdown delays are counted in liveness checks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::{BinariesConfig, ClusterConfig};
use crate::execution::Executor;
use crate::process::{PollPolicy, ProcessContext};
use crate::types::{CommandOutput, Result};

#[derive(Debug, Default)]
struct FakeProcess {
    running: bool,
    boot_checks: usize,
    shutdown_checks: usize,
    pending_up: usize,
    pending_down: Option<usize>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeExecutor {
    commands: Mutex<Vec<String>>,
    process: Mutex<FakeProcess>,
    info: Mutex<String>,
    failing: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Liveness checks that fail after `start` before the process is up
    pub fn with_boot_delay(self, checks: usize) -> Self {
        self.process.lock().boot_checks = checks;
        self
    }

    /// Liveness checks that still succeed after `stop`
    pub fn with_shutdown_delay(self, checks: usize) -> Self {
        self.process.lock().shutdown_checks = checks;
        self
    }

    pub fn set_running(&self, running: bool) {
        let mut process = self.process.lock();
        process.running = running;
        process.pending_up = 0;
        process.pending_down = None;
    }

    pub fn set_info(&self, info: &str) {
        *self.info.lock() = info.to_string();
    }

    /// Commands containing `pattern` exit with status 1
    pub fn fail_commands_containing(&self, pattern: &str) {
        self.failing.lock().push(pattern.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    /// One liveness observation of the simulated process
    pub fn alive_check(&self) -> bool {
        let mut process = self.process.lock();
        if !process.running {
            return false;
        }
        if process.pending_up > 0 {
            process.pending_up -= 1;
            return false;
        }
        if let Some(remaining) = process.pending_down {
            if remaining == 0 {
                process.running = false;
                process.pending_down = None;
                return false;
            }
            process.pending_down = Some(remaining - 1);
        }
        true
    }

    fn control(&self, command: &str) {
        let mut process = self.process.lock();
        if command.ends_with("_control start") {
            process.running = true;
            process.pending_up = process.boot_checks;
            process.pending_down = None;
        } else if command.ends_with("_control stop") {
            process.pending_down = Some(process.shutdown_checks);
        }
    }
}

fn output(command: &str, exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        command: command.to_string(),
        exit_code: Some(exit_code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        duration_ms: 0,
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.commands.lock().push(command.to_string());

        if self.failing.lock().iter().any(|p| command.contains(p.as_str())) {
            return Ok(output(command, 1, "", "fake failure"));
        }

        if command.contains("_control ") {
            self.control(command);
            return Ok(output(command, 0, "", ""));
        }
        if command.ends_with(" PING") {
            return Ok(if self.alive_check() {
                output(command, 0, "PONG\n", "")
            } else {
                output(command, 1, "", "Could not connect to Redis: Connection refused\n")
            });
        }
        if command.ends_with(" INFO") {
            return Ok(output(command, 0, &self.info.lock(), ""));
        }
        if command.starts_with("tail ") {
            let tail = "1:M 01 Jan 00:00:00.000 * Ready to accept connections\n";
            return Ok(output(command, 0, tail, ""));
        }
        Ok(output(command, 0, "", ""))
    }
}

pub(crate) fn test_config() -> ClusterConfig {
    ClusterConfig::with_binaries(BinariesConfig {
        store_server: "/opt/bins/redis-server".to_string(),
        store_cli: "/opt/bins/redis-cli".to_string(),
        proxy_server: "/opt/bins/nutcracker".to_string(),
    })
}

/// Context over `executor` with millisecond polling so tests stay fast
pub(crate) fn test_context(executor: Arc<FakeExecutor>) -> ProcessContext {
    let policy = PollPolicy {
        start_initial: std::time::Duration::from_millis(1),
        start_max: std::time::Duration::from_millis(8),
        stop_interval: std::time::Duration::from_millis(1),
        timeout: None,
    };
    ProcessContext::new(executor, Arc::new(test_config()))
        .expect("builtin templates load")
        .with_policy(policy)
}
