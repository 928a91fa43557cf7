//! # mbroker-server
//!
//! TCP server for mbroker.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - The connection and topic registries
//! - Dispatch of decoded envelopes and per-format fan-out
//! - YAML/environment configuration
//! - Optional Prometheus metrics

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod topics;

pub use config::{BrokerConfig, Config, ConfigError, MetricsConfig, NetworkConfig};
pub use dispatcher::Dispatcher;
pub use error::ServerError;
pub use metrics::{run_metrics_server, Metrics};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionState};
pub use server::{BrokerEvent, Server, ServerConfig, ServerStats};
pub use topics::{Delivery, Subscriber, TopicRegistry};
