use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{ConfigError, Result};

/// Cluster configuration structure
///
/// Injected into every instance at construction; nothing in the crate reads
/// binary locations or template paths from ambient process state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub binaries: BinariesConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub proxy: ProxyDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Locations of the pre-built executables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinariesConfig {
    /// Files copied into a store instance's `bin/` (shell glob allowed)
    pub store_server: String,
    /// Client used for administrative commands against a store
    pub store_cli: String,
    /// Files copied into a proxy instance's `bin/`
    pub proxy_server: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TemplatesConfig {
    /// Directory holding `control.sh` and `redis.conf`; built-in templates are
    /// used when unset
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_start_initial_interval_ms")]
    pub start_initial_interval_ms: u64,
    #[serde(default = "default_start_max_interval_ms")]
    pub start_max_interval_ms: u64,
    #[serde(default = "default_stop_interval_ms")]
    pub stop_interval_ms: u64,
    /// Overall deadline for a start/stop poll. Absent means wait forever.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyDefaults {
    #[serde(default = "default_mbuf")]
    pub mbuf: u32,
    #[serde(default = "default_verbose")]
    pub verbose: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl ClusterConfig {
    /// Load cluster configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let content = std::fs::read_to_string(&path)
            .map_err(|_| ConfigError::FileNotFound { path: path_str })?;

        let config: ClusterConfig = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Configuration with the given binaries and defaults everywhere else
    pub fn with_binaries(binaries: BinariesConfig) -> Self {
        Self {
            binaries,
            templates: TemplatesConfig::default(),
            polling: PollingConfig::default(),
            executor: ExecutorConfig::default(),
            proxy: ProxyDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PollingConfig {
    pub fn start_initial_interval(&self) -> Duration {
        Duration::from_millis(self.start_initial_interval_ms)
    }

    pub fn start_max_interval(&self) -> Duration {
        Duration::from_millis(self.start_max_interval_ms)
    }

    pub fn stop_interval(&self) -> Duration {
        Duration::from_millis(self.stop_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            start_initial_interval_ms: default_start_initial_interval_ms(),
            start_max_interval_ms: default_start_max_interval_ms(),
            stop_interval_ms: default_stop_interval_ms(),
            timeout_secs: None,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            command_timeout: default_command_timeout(),
        }
    }
}

impl Default for ProxyDefaults {
    fn default() -> Self {
        Self {
            mbuf: default_mbuf(),
            verbose: default_verbose(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_start_initial_interval_ms() -> u64 {
    100
}

fn default_start_max_interval_ms() -> u64 {
    5000
}

fn default_stop_interval_ms() -> u64 {
    1000
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_command_timeout() -> u64 {
    60
}

fn default_mbuf() -> u32 {
    512
}

fn default_verbose() -> u8 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
