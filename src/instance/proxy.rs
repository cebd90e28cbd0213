//! Sharding proxy fronting a set of store nodes
//!
//! The proxy's backend list lives only in its config file, so changing the
//! topology means regenerating the config and restarting the proxy. See
//! [`ProxyInstance::reconfig`].

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, Instrument};

use super::store::StoreInstance;
use crate::execution::ConfigRenderer;
use crate::logging;
use crate::metrics;
use crate::process::{
    copy_binaries, write_config, ManagedProcess, ProcessContext, ProcessCore, ProcessSpec,
};
use crate::types::{Error, HealthStatus, Result};

/// Process name, also the prefix of the control script
pub const PROXY_PROCESS_NAME: &str = "nutcracker";

/// Config file written into `<path>/conf/`
pub const PROXY_CONFIG_FILE: &str = "nutcracker.conf";

/// The status port is always the listen port plus this offset
pub const STATUS_PORT_OFFSET: u16 = 1000;

/// Upper bound for connecting to and reading the status port
const STATUS_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Pool-level policy; everything but the name and listen port is fixed
const POOL_TEMPLATE: &str = "
$cluster_name:
  listen: 0.0.0.0:$port
  hash: fnv1a_64
  distribution: modula
  preconnect: true
  auto_eject_hosts: false
  redis: true
  backlog: 512
  timeout: 400
  client_connections: 0
  server_connections: 1
  server_retry_timeout: 2000
  server_failure_limit: 2
  servers:
";

/// One backend per line, weight fixed at 1
const BACKEND_TEMPLATE: &str = "    - $host:$port:1 $server_name";

/// A sharding proxy and the store nodes it currently routes to
///
/// The proxy reads its backends' host, port and server name but does not
/// manage their lifecycle.
#[derive(Debug)]
pub struct ProxyInstance {
    core: ProcessCore,
    backends: Vec<Arc<StoreInstance>>,
}

impl ProxyInstance {
    /// Proxy using the buffer size and verbosity defaults from configuration
    pub fn new(
        host: impl Into<String>,
        port: u16,
        path: impl Into<PathBuf>,
        cluster_name: &str,
        backends: Vec<Arc<StoreInstance>>,
        context: ProcessContext,
    ) -> Result<Self> {
        let mbuf = context.config.proxy.mbuf;
        let verbose = context.config.proxy.verbose;
        Self::with_tuning(host, port, path, cluster_name, backends, mbuf, verbose, context)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_tuning(
        host: impl Into<String>,
        port: u16,
        path: impl Into<PathBuf>,
        cluster_name: &str,
        backends: Vec<Arc<StoreInstance>>,
        mbuf: u32,
        verbose: u8,
        context: ProcessContext,
    ) -> Result<Self> {
        let status_port = port
            .checked_add(STATUS_PORT_OFFSET)
            .ok_or_else(|| Error::Validation {
                field: "port".to_string(),
                message: format!(
                    "Proxy port {} leaves no room for the status port (port + {})",
                    port, STATUS_PORT_OFFSET
                ),
            })?;

        let mut spec = ProcessSpec::new(PROXY_PROCESS_NAME, host, port, path);
        spec.set("mbuf", mbuf);
        spec.set("verbose", verbose);
        spec.derive("conf", "$path/conf/nutcracker.conf");
        spec.derive("pidfile", "$path/log/nutcracker.pid");
        spec.derive("logfile", "$path/log/nutcracker.log");
        spec.set("status_port", status_port);
        spec.derive(
            "startcmd",
            "bin/nutcracker -d -c $conf -o $logfile -p $pidfile -s $status_port -v $verbose -m $mbuf",
        );
        spec.derive(
            "runcmd",
            "bin/nutcracker -d -c $conf -o $logfile -p $pidfile -s $status_port",
        );
        spec.set("cluster_name", cluster_name);

        Ok(Self {
            core: ProcessCore::new(spec, context),
            backends,
        })
    }

    pub fn host(&self) -> &str {
        self.spec().host()
    }

    pub fn port(&self) -> u16 {
        self.spec().port()
    }

    pub fn status_port(&self) -> u16 {
        // Checked at construction
        self.spec().port() + STATUS_PORT_OFFSET
    }

    pub fn cluster_name(&self) -> &str {
        self.spec().args().get("cluster_name").unwrap_or_default()
    }

    pub fn backends(&self) -> &[Arc<StoreInstance>] {
        &self.backends
    }

    /// Backend lines for the current backend collection, in order
    pub fn render_backends(&self) -> String {
        self.backends
            .iter()
            .map(|backend| ConfigRenderer::render(BACKEND_TEMPLATE, backend.backend_args()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Full proxy config: pool policy followed by the backend list
    pub fn render_config(&self) -> String {
        let mut content = ConfigRenderer::render(POOL_TEMPLATE, self.spec().args());
        content.push_str(&self.render_backends());
        content
    }

    /// Read the status document from the status port
    ///
    /// Connection, read and parse failures all yield `None`.
    pub async fn stats(&self) -> Option<Value> {
        let address = (self.host(), self.status_port());
        match timeout(STATUS_QUERY_TIMEOUT, read_status(address)).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                debug!(
                    instance = %self.spec(),
                    status_port = self.status_port(),
                    error = %e,
                    "Cannot read proxy status"
                );
                None
            }
            Err(_elapsed) => {
                debug!(
                    instance = %self.spec(),
                    status_port = self.status_port(),
                    "Proxy status query timed out"
                );
                None
            }
        }
    }

    /// Replace the backend set and apply it by stop, deploy, start
    ///
    /// The proxy is unavailable from the stop until the start's liveness poll
    /// succeeds. The steps are not atomic: a failure leaves the proxy in
    /// whatever state the failing step reached, with the new backend set
    /// already held in memory.
    pub async fn reconfig(&mut self, backends: Vec<Arc<StoreInstance>>) -> Result<()> {
        let span = logging::reconfig_span(self.cluster_name(), backends.len());
        self.backends = backends;

        let this = &*self;
        async move {
            let started = Instant::now();
            this.stop().await?;
            this.deploy().await?;
            this.start().await?;

            metrics::record_reconfig(this.cluster_name(), started.elapsed());
            info!("proxy {}:{} is updated", this.host(), this.port());
            Ok(())
        }
        .instrument(span)
        .await
    }
}

async fn read_status(address: (&str, u16)) -> Result<Value> {
    let mut stream = TcpStream::connect(address).await?;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    Ok(serde_json::from_slice(&raw)?)
}

#[async_trait]
impl ManagedProcess for ProxyInstance {
    fn core(&self) -> &ProcessCore {
        &self.core
    }

    async fn is_alive(&self) -> bool {
        self.stats().await.is_some()
    }

    async fn pre_deploy(&self) -> Result<()> {
        copy_binaries(&self.core, &self.core.config().binaries.proxy_server).await?;
        write_config(&self.core, PROXY_CONFIG_FILE, &self.render_config()).await?;
        Ok(())
    }

    async fn status(&self) -> HealthStatus {
        match self.stats().await {
            Some(stats) => {
                let uptime = stats.get("uptime").and_then(Value::as_u64).unwrap_or(0);
                info!(
                    instance = %self.spec(),
                    uptime_secs = uptime,
                    backends = self.backends.len(),
                    "Uptime"
                );
                HealthStatus::Healthy
            }
            None => {
                error!(instance = %self.spec(), "Down");
                HealthStatus::Unhealthy
            }
        }
    }
}
