//! Liveness polling schedules
//!
//! Starting a process polls with exponential backoff (0.1s doubling, capped
//! at 5s by default). Stopping polls at a fixed interval. Both can be bounded
//! by an overall deadline; without one they wait forever.

use std::time::Duration;

use crate::config::PollingConfig;

/// Polling schedule for start/stop liveness loops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub start_initial: Duration,
    pub start_max: Duration,
    pub stop_interval: Duration,
    /// `None` keeps polling until the process changes state
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            start_initial: config.start_initial_interval(),
            start_max: config.start_max_interval(),
            stop_interval: config.stop_interval(),
            timeout: config.timeout(),
        }
    }

    /// Builder pattern: bound every poll loop by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn start_backoff(&self) -> Backoff {
        Backoff::new(self.start_initial, self.start_max)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}

/// Doubling delay sequence capped at a maximum
///
/// Yields `initial, 2*initial, 4*initial, ...` until a doubled value would
/// exceed `max`, then yields `max` forever.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    /// True once the delay has stopped growing
    pub fn is_capped(&self) -> bool {
        self.next >= self.max
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}
