//! Concrete managed process types
//!
//! - [`StoreInstance`]: a key-value store node, probed over its CLI client
//! - [`ProxyInstance`]: a sharding proxy, probed over its status port

pub mod proxy;
pub mod store;

pub use proxy::{ProxyInstance, STATUS_PORT_OFFSET};
pub use store::{InfoMap, StoreInstance};
