//! Logging setup for shardctl
//!
//! This module provides structured logging functionality with support for:
//! - JSON and pretty format output
//! - Log levels from the environment, an explicit override or configuration
//! - Instance and reconfiguration spans that tag every lifecycle record
//!
//! # Usage
//!
//! ```rust,no_run
//! use shardctl::config::ClusterConfig;
//! use shardctl::logging;
//!
//! let config = ClusterConfig::load_from_file("/etc/shardctl/cluster.toml")?;
//! logging::init(None, None, Some(&config))?;
//! # Ok::<(), shardctl::Error>(())
//! ```

use tracing::{info_span, Span};
use tracing_subscriber::{fmt::time::ChronoLocal, EnvFilter};

use crate::config::ClusterConfig;
use crate::types::Result;

/// Span wrapping every record of a lifecycle operation on one instance
pub fn instance_span(name: &str, host: &str, port: u16) -> Span {
    info_span!("instance", name = name, host = host, port = port)
}

/// Span wrapping a proxy reconfiguration
pub fn reconfig_span(cluster: &str, backends: usize) -> Span {
    info_span!("reconfig", cluster = cluster, backends = backends)
}

/// Log level values accepted in configuration
pub mod level {
    pub const TRACE: &str = "trace";
    pub const DEBUG: &str = "debug";
    pub const INFO: &str = "info";
    pub const WARN: &str = "warn";
    pub const ERROR: &str = "error";
}

/// Log format values accepted in configuration
pub mod format {
    pub const JSON: &str = "json";
    pub const PRETTY: &str = "pretty";
}

/// Install the global tracing subscriber
///
/// # Precedence
///
/// 1. `RUST_LOG` environment filter
/// 2. Explicit overrides
/// 3. Cluster configuration
/// 4. Defaults (`info`, pretty)
///
/// Must be called at most once per process.
pub fn init(
    log_level_override: Option<&str>,
    log_format_override: Option<&str>,
    config: Option<&ClusterConfig>,
) -> Result<()> {
    let log_level = if let Some(level) = log_level_override {
        level
    } else if let Some(config) = config {
        &config.logging.level
    } else {
        level::INFO
    };

    let log_format = if let Some(fmt) = log_format_override {
        fmt
    } else if let Some(config) = config {
        &config.logging.format
    } else {
        format::PRETTY
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string());

    match log_format {
        format::JSON => {
            tracing_subscriber::fmt()
                .json()
                .with_timer(timer)
                .with_env_filter(env_filter)
                .with_target(false)
                .with_current_span(true)
                .with_span_list(false)
                .init();
        }
        format::PRETTY => {
            tracing_subscriber::fmt()
                .pretty()
                .with_timer(timer)
                .with_env_filter(env_filter)
                .with_target(false)
                .with_file(false)
                .with_line_number(false)
                .init();
        }
        _ => {
            // Unknown formats fall back to the compact default
            tracing_subscriber::fmt()
                .with_timer(timer)
                .with_env_filter(env_filter)
                .with_target(false)
                .with_file(false)
                .with_line_number(false)
                .init();
        }
    }

    Ok(())
}
