//! Lifecycle controller for a sharded key-value store cluster
//!
//! Store nodes and the proxy that shards across them are installed under a
//! root path on their host, started and stopped through a generated control
//! script, and probed for liveness with their own protocols. All remote work
//! goes through an [`execution::Executor`].

pub mod config;
pub mod execution;
pub mod instance;
pub mod logging;
pub mod metrics;
pub mod process;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::ClusterConfig;
pub use instance::{ProxyInstance, StoreInstance};
pub use process::{LifecycleOutcome, ManagedProcess, ProcessContext, ProcessSpec};
pub use types::{Error, HealthStatus, ProcessState, Result};
