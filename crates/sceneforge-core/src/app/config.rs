//! Typed configuration for the processor and the stream gateway.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Skip `startup_delay` and poll right away.
    pub start_immediately: bool,

    /// Wait before the first poll, e.g. while dependencies warm up.
    pub startup_delay: Duration,

    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            start_immediately: false,
            startup_delay: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl ProcessorConfig {
    /// Fast settings for tests and local runs.
    pub fn immediate() -> Self {
        Self {
            start_immediately: true,
            startup_delay: Duration::ZERO,
            heartbeat_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// How often an open stream re-checks whether its task has ended.
    pub status_poll_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            status_poll_interval: Duration::from_secs(5),
        }
    }
}
