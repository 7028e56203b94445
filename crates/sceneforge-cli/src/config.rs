//! Command line / environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sceneforge_core::app::{GatewayConfig, ProcessorConfig, RetryPolicy};

#[derive(Debug, Clone, Parser)]
#[command(name = "sceneforge", version, about = "Prompt-to-component worker with a task event stream")]
pub struct Config {
    /// Address the HTTP server listens on.
    #[arg(long, env = "SCENEFORGE_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    #[arg(long, env = "SCENEFORGE_POLL_INTERVAL_MS", default_value_t = 1_000)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "SCENEFORGE_HEARTBEAT_INTERVAL_MS", default_value_t = 30_000)]
    pub heartbeat_interval_ms: u64,

    /// Delay before the first poll. 0 starts immediately.
    #[arg(long, env = "SCENEFORGE_STARTUP_DELAY_MS", default_value_t = 2_000)]
    pub startup_delay_ms: u64,

    /// Consecutive build failures after which auto-retry stops.
    #[arg(long, env = "SCENEFORGE_MAX_BUILD_FAILURES", default_value_t = 3)]
    pub max_build_failures: u32,

    #[arg(long, env = "SCENEFORGE_RETRY_BASE_DELAY_MS", default_value_t = 2_000)]
    pub retry_base_delay_ms: u64,

    /// How often open streams re-check their task.
    #[arg(long, env = "SCENEFORGE_STREAM_POLL_INTERVAL_MS", default_value_t = 5_000)]
    pub stream_poll_interval_ms: u64,

    /// Directory for compiled scripts. In-memory storage when unset.
    #[arg(long, env = "SCENEFORGE_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Base URL under which `storage_dir` is served.
    #[arg(long, env = "SCENEFORGE_PUBLIC_BASE_URL", default_value = "http://localhost:8080/static")]
    pub public_base_url: String,

    #[arg(long, env = "SCENEFORGE_NODE_BIN", default_value = "node")]
    pub node_bin: PathBuf,

    #[arg(long, env = "SCENEFORGE_SANDBOX_TIMEOUT_MS", default_value_t = 5_000)]
    pub sandbox_timeout_ms: u64,
}

impl Config {
    pub fn processor(&self) -> ProcessorConfig {
        ProcessorConfig {
            start_immediately: self.startup_delay_ms == 0,
            startup_delay: Duration::from_millis(self.startup_delay_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms.max(1)),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            status_poll_interval: Duration::from_millis(self.stream_poll_interval_ms.max(1)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_consecutive_failures: self.max_build_failures,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_to_core_configs() {
        let config = Config::try_parse_from(["sceneforge"]).unwrap();
        assert_eq!(config.bind.port(), 8080);

        let processor = config.processor();
        assert!(!processor.start_immediately);
        assert_eq!(processor.poll_interval, Duration::from_secs(1));
        assert_eq!(config.gateway().status_poll_interval, Duration::from_secs(5));
        assert_eq!(config.retry_policy().max_consecutive_failures, 3);
        assert!(config.storage_dir.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "sceneforge",
            "--startup-delay-ms",
            "0",
            "--max-build-failures",
            "5",
            "--retry-base-delay-ms",
            "250",
        ])
        .unwrap();
        assert!(config.processor().start_immediately);
        let retry = config.retry_policy();
        assert_eq!(retry.max_consecutive_failures, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(250));
    }
}
