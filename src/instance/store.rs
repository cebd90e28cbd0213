//! Key-value store node
//!
//! Administrative commands go through the store's CLI binary via the shared
//! executor: `<cli> -h <host> -p <port> <command>`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, error, info};

use crate::execution::{ConfigRenderer, TemplateArgs};
use crate::process::{
    copy_binaries, render_template, write_config, ManagedProcess, ProcessContext, ProcessCore,
    ProcessSpec,
};
use crate::types::{CommandOutput, HealthStatus, Result};

/// Process name, also the prefix of the control script
pub const STORE_PROCESS_NAME: &str = "redis";

/// Config file written into `<path>/conf/`
pub const STORE_CONFIG_FILE: &str = "redis.conf";

/// Token a live store answers PING with
const PING_ACK: &str = "PONG";

/// Parsed INFO reply
///
/// Lookups of absent keys yield an empty string rather than failing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoMap {
    entries: HashMap<String, String>,
}

impl InfoMap {
    /// Parse `key:value` lines, skipping `#` comment lines and lines without
    /// a colon. Only the first colon separates key from value.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self { entries }
    }

    /// Value for `key`, or `""` when the key is absent
    pub fn get(&self, key: &str) -> &str {
        self.entries.get(key).map(String::as_str).unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Positive `uptime_in_seconds`, if reported
    pub fn uptime(&self) -> Option<u64> {
        self.get("uptime_in_seconds")
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|uptime| *uptime > 0)
    }

    pub fn role(&self) -> &str {
        self.get("role")
    }
}

/// A single key-value store node
#[derive(Debug)]
pub struct StoreInstance {
    core: ProcessCore,
}

impl StoreInstance {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        path: impl Into<PathBuf>,
        cluster_name: &str,
        server_name: &str,
        context: ProcessContext,
    ) -> Self {
        let mut spec = ProcessSpec::new(STORE_PROCESS_NAME, host, port, path);

        spec.derive("startcmd", "bin/redis-server conf/redis.conf");
        spec.derive("runcmd", r"redis-server \*:$port");
        spec.derive("conf", "$path/conf/redis.conf");
        spec.derive("pidfile", "$path/log/redis.pid");
        spec.derive("logfile", "$path/log/redis.log");
        spec.derive("dir", "$path/data");
        spec.set("REDIS_CLI", &context.config.binaries.store_cli);
        spec.set("cluster_name", cluster_name);
        spec.set("server_name", server_name);

        Self {
            core: ProcessCore::new(spec, context),
        }
    }

    pub fn host(&self) -> &str {
        self.spec().host()
    }

    pub fn port(&self) -> u16 {
        self.spec().port()
    }

    pub fn cluster_name(&self) -> &str {
        self.spec().args().get("cluster_name").unwrap_or_default()
    }

    pub fn server_name(&self) -> &str {
        self.spec().args().get("server_name").unwrap_or_default()
    }

    /// Issue an administrative command and return its raw output
    pub async fn command(&self, cmd: &str) -> Result<CommandOutput> {
        let args = self.spec().args().clone().with("cmd", cmd);
        let command = ConfigRenderer::render("$REDIS_CLI -h $host -p $port $cmd", &args);
        info!(instance = %self.spec(), command = %command, "Store command");
        self.core.run(&command).await
    }

    pub async fn ping(&self) -> Result<String> {
        let command =
            ConfigRenderer::render("$REDIS_CLI -h $host -p $port PING", self.spec().args());
        Ok(self.core.run(&command).await?.combined())
    }

    /// Query INFO; an unreachable store yields an empty map
    pub async fn info(&self) -> InfoMap {
        let command =
            ConfigRenderer::render("$REDIS_CLI -h $host -p $port INFO", self.spec().args());
        match self.core.run(&command).await {
            Ok(output) if output.success() => InfoMap::parse(&output.stdout),
            Ok(output) => {
                debug!(
                    instance = %self.spec(),
                    exit_code = ?output.exit_code,
                    "INFO failed"
                );
                InfoMap::default()
            }
            Err(e) => {
                debug!(instance = %self.spec(), error = %e, "INFO could not be issued");
                InfoMap::default()
            }
        }
    }

    /// True when the store reports replicating from `master_host:master_port`
    pub async fn is_replica_of(&self, master_host: &str, master_port: u16) -> bool {
        let info = self.info().await;
        let port_matches = info
            .get("master_port")
            .trim()
            .parse::<u16>()
            .map(|port| port == master_port)
            .unwrap_or(false);

        if info.get("master_host") == master_host && port_matches {
            debug!(
                instance = %self.spec(),
                master = %format!("{}:{}", master_host, master_port),
                "Already replica"
            );
            return true;
        }
        false
    }

    /// Ask the store to replicate from `master_host:master_port`
    ///
    /// Success is not verified; poll [`is_replica_of`](Self::is_replica_of)
    /// for confirmation.
    pub async fn make_replica_of(
        &self,
        master_host: &str,
        master_port: u16,
    ) -> Result<CommandOutput> {
        self.command(&format!("SLAVEOF {} {}", master_host, master_port))
            .await
    }

    /// The store config file rendered from the template set
    pub fn render_config(&self) -> String {
        ConfigRenderer::render(&self.core.context().templates.store_config, self.spec().args())
    }

    /// Template arguments for this node's line in a proxy backend list
    pub(crate) fn backend_args(&self) -> &TemplateArgs {
        self.spec().args()
    }
}

#[async_trait]
impl ManagedProcess for StoreInstance {
    fn core(&self) -> &ProcessCore {
        &self.core
    }

    async fn is_alive(&self) -> bool {
        match self.ping().await {
            Ok(reply) => reply.contains(PING_ACK),
            Err(e) => {
                debug!(instance = %self.spec(), error = %e, "PING could not be issued");
                false
            }
        }
    }

    async fn pre_deploy(&self) -> Result<()> {
        copy_binaries(&self.core, &self.core.config().binaries.store_server).await?;
        let template = &self.core.context().templates.store_config;
        let content = render_template(self.spec(), STORE_CONFIG_FILE, template);
        write_config(&self.core, STORE_CONFIG_FILE, &content).await?;
        Ok(())
    }

    async fn status(&self) -> HealthStatus {
        match self.info().await.uptime() {
            Some(uptime) => {
                info!(instance = %self.spec(), uptime_secs = uptime, "Uptime");
                HealthStatus::Healthy
            }
            None => {
                error!(instance = %self.spec(), "Down");
                HealthStatus::Unhealthy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::LifecycleOutcome;
    use crate::testing::{test_context, FakeExecutor};
    use crate::types::{DeployStep, Error, ProcessState};
    use std::sync::Arc;

    fn store(executor: &Arc<FakeExecutor>, path: impl Into<PathBuf>) -> StoreInstance {
        StoreInstance::new(
            "10.0.0.1",
            6379,
            path,
            "cluster0",
            "redis-6379",
            test_context(executor.clone()),
        )
    }

    #[test]
    fn test_info_map_parse() {
        let info = InfoMap::parse("uptime_in_seconds:120\r\n#comment\r\nrole:master\r\n");

        assert_eq!(info.get("uptime_in_seconds"), "120");
        assert_eq!(info.get("role"), "master");
        assert_eq!(info.get("master_host"), "");
        assert!(!info.contains("#comment"));
        assert_eq!(info.uptime(), Some(120));
        assert_eq!(info.role(), "master");
    }

    #[test]
    fn test_info_map_splits_on_first_colon() {
        let info = InfoMap::parse("# Clients\r\nexecutable:/opt/svc/bin/redis-server\r\nslave0:ip=10.0.0.3,port=6379\r\nnocolon\r\n");

        assert_eq!(info.get("executable"), "/opt/svc/bin/redis-server");
        assert_eq!(info.get("slave0"), "ip=10.0.0.3,port=6379");
        assert!(!info.contains("nocolon"));
    }

    #[test]
    fn test_info_map_zero_uptime_is_down() {
        assert_eq!(InfoMap::parse("uptime_in_seconds:0\r\n").uptime(), None);
        assert_eq!(InfoMap::parse("").uptime(), None);
        assert!(InfoMap::parse("").is_empty());
    }

    #[test]
    fn test_derived_args() {
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, "/opt/svc");
        let spec = store.spec();

        assert_eq!(spec.start_cmd(), "bin/redis-server conf/redis.conf");
        assert_eq!(spec.run_cmd(), r"redis-server \*:6379");
        assert_eq!(spec.log_file(), "/opt/svc/log/redis.log");
        assert_eq!(spec.args().get("pidfile"), Some("/opt/svc/log/redis.pid"));
        assert_eq!(spec.args().get("dir"), Some("/opt/svc/data"));
        assert_eq!(store.cluster_name(), "cluster0");
        assert_eq!(store.server_name(), "redis-6379");
        assert_eq!(spec.to_string(), "[redis:10.0.0.1:6379]");
    }

    #[test]
    fn test_render_config_is_deterministic() {
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, "/opt/svc");

        let config = store.render_config();
        assert_eq!(config, store.render_config());
        assert!(config.contains("port 6379"));
        assert!(config.contains("pidfile /opt/svc/log/redis.pid"));
        assert!(config.contains("logfile /opt/svc/log/redis.log"));
        assert!(config.contains("dir /opt/svc/data"));
    }

    #[tokio::test]
    async fn test_deploy_creates_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("svc");
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, &path);

        store.deploy().await.unwrap();

        for dir in ["bin", "conf", "log", "data"] {
            assert!(path.join(dir).is_dir(), "missing {}", dir);
        }
        let conf = std::fs::read_to_string(path.join("conf/redis.conf")).unwrap();
        assert!(conf.contains("port 6379"));

        let script_path = path.join("redis_control");
        let script = std::fs::read_to_string(&script_path).unwrap();
        assert!(script.contains("bin/redis-server conf/redis.conf"));
        assert!(script.contains(r#"pkill -f "redis-server \*:6379""#));
        assert!(script.contains("case \"$1\" in"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&script_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        let copy = format!("cp /opt/bins/redis-server {}/bin/", path.display());
        assert_eq!(executor.count(&copy), 1);
        assert_eq!(store.state(), ProcessState::Deployed);
    }

    #[tokio::test]
    async fn test_deploy_is_idempotent_and_does_not_restart() {
        let temp_dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, temp_dir.path());

        store.deploy().await.unwrap();
        std::fs::write(temp_dir.path().join("conf/redis.conf"), "stale").unwrap();
        store.deploy().await.unwrap();

        let conf = std::fs::read_to_string(temp_dir.path().join("conf/redis.conf")).unwrap();
        assert!(conf.contains("port 6379"));
        assert_eq!(executor.count("_control"), 0);
    }

    #[tokio::test]
    async fn test_deploy_fails_fast_on_copy() {
        let temp_dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::new());
        executor.fail_commands_containing("cp ");
        let store = store(&executor, temp_dir.path());

        match store.deploy().await {
            Err(Error::Deploy { step, .. }) => assert_eq!(step, DeployStep::CopyBinaries),
            other => panic!("Expected Deploy error, got: {:?}", other),
        }
        // Directories exist, nothing after the failed step was written
        assert!(temp_dir.path().join("bin").is_dir());
        assert!(!temp_dir.path().join("conf/redis.conf").exists());
        assert!(!temp_dir.path().join("redis_control").exists());
        assert_eq!(store.state(), ProcessState::Undeployed);
    }

    #[tokio::test]
    async fn test_deploy_fails_on_unwritable_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, blocker.join("svc"));

        match store.deploy().await {
            Err(Error::Deploy { step, .. }) => assert_eq!(step, DeployStep::CreateDirectories),
            other => panic!("Expected Deploy error, got: {:?}", other),
        }
        assert!(executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let temp_dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::new().with_boot_delay(3).with_shutdown_delay(2));
        let store = store(&executor, temp_dir.path());

        store.deploy().await.unwrap();
        assert!(matches!(
            store.start().await.unwrap(),
            LifecycleOutcome::Changed { .. }
        ));
        assert_eq!(store.state(), ProcessState::Running);
        assert_eq!(executor.count("_control start"), 1);
        assert_eq!(store.probe_state().await, ProcessState::Running);

        assert!(matches!(
            store.stop().await.unwrap(),
            LifecycleOutcome::Changed { .. }
        ));
        assert_eq!(store.state(), ProcessState::Stopped);
        assert_eq!(executor.count("_control stop"), 1);
        assert_eq!(store.probe_state().await, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_start_when_alive_is_noop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::new());
        executor.set_running(true);
        let store = store(&executor, temp_dir.path());

        assert_eq!(store.start().await.unwrap(), LifecycleOutcome::Unchanged);
        assert_eq!(store.start().await.unwrap(), LifecycleOutcome::Unchanged);
        assert_eq!(executor.count("_control"), 0);
        assert_eq!(store.state(), ProcessState::Running);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, temp_dir.path());

        assert_eq!(store.stop().await.unwrap(), LifecycleOutcome::Unchanged);
        assert_eq!(executor.count("_control"), 0);
        assert_eq!(store.state(), ProcessState::Undeployed);
    }

    #[tokio::test]
    async fn test_probe_state_undeployed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, temp_dir.path().join("never-deployed"));

        assert_eq!(store.probe_state().await, ProcessState::Undeployed);
    }

    #[tokio::test]
    async fn test_is_alive_requires_ack_token() {
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, "/opt/svc");

        assert!(!store.is_alive().await);
        executor.set_running(true);
        assert!(store.is_alive().await);
        assert_eq!(
            executor.count("/opt/bins/redis-cli -h 10.0.0.1 -p 6379 PING"),
            2
        );
    }

    #[tokio::test]
    async fn test_is_replica_of() {
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, "/opt/svc");

        executor.set_info("# Replication\r\nrole:slave\r\nmaster_host:10.0.0.2\r\nmaster_port:6379\r\n");
        assert!(store.is_replica_of("10.0.0.2", 6379).await);
        assert!(!store.is_replica_of("10.0.0.2", 6380).await);
        assert!(!store.is_replica_of("10.0.0.3", 6379).await);

        executor.set_info("role:master\r\n");
        assert!(!store.is_replica_of("10.0.0.2", 6379).await);
    }

    #[tokio::test]
    async fn test_is_replica_of_unreachable() {
        let executor = Arc::new(FakeExecutor::new());
        executor.fail_commands_containing(" INFO");
        let store = store(&executor, "/opt/svc");

        assert!(!store.is_replica_of("10.0.0.2", 6379).await);
    }

    #[tokio::test]
    async fn test_make_replica_of_issues_command() {
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, "/opt/svc");

        let output = store.make_replica_of("10.0.0.2", 6379).await.unwrap();
        assert!(output.success());
        assert_eq!(
            executor.commands(),
            vec!["/opt/bins/redis-cli -h 10.0.0.1 -p 6379 SLAVEOF 10.0.0.2 6379".to_string()]
        );
    }

    #[tokio::test]
    async fn test_status_reports_uptime() {
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, "/opt/svc");

        executor.set_info("uptime_in_seconds:120\r\n");
        assert_eq!(store.status().await, HealthStatus::Healthy);

        executor.set_info("");
        assert_eq!(store.status().await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_log_tails_log_file() {
        let executor = Arc::new(FakeExecutor::new());
        let store = store(&executor, "/opt/svc");

        let log = store.log().await.unwrap();
        assert!(log.contains("Ready to accept connections"));
        assert_eq!(executor.commands(), vec!["tail /opt/svc/log/redis.log".to_string()]);
    }
}
