//! App - application layer.
//!
//! Combines the ports, the pipeline and the agents into a running system.
//!
//! # Main components
//! - **AppBuilder**: wiring and fail-fast validation
//! - **TaskManager**: task lifecycle and update fan-out
//! - **MessageBus**: agent-addressed publish/subscribe
//! - **TaskProcessor**: polling loop that routes messages to agents
//! - **StreamGateway**: per-client task event streams

pub mod builder;
pub mod config;
pub mod message_bus;
pub mod processor;
pub mod retry;
pub mod status;
pub mod stream_gateway;
pub mod subscription;
pub mod task_manager;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::config::{GatewayConfig, ProcessorConfig};
pub use self::message_bus::{Delivery, MessageBus};
pub use self::processor::{ProcessorError, ProcessorHandle, TaskProcessor};
pub use self::retry::RetryPolicy;
pub use self::status::Heartbeat;
pub use self::stream_gateway::{OpenError, StreamEvent, StreamEventKind, StreamGateway, StreamSession};
pub use self::subscription::Subscription;
pub use self::task_manager::TaskManager;
