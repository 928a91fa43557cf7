//! # mbroker-client
//!
//! Client library for mbroker.
//!
//! This crate provides:
//! - Async TCP connection that performs the format handshake
//! - `Queue`, a topic-bound producer or consumer

pub mod client;
pub mod connection;
pub mod error;

pub use client::{Queue, Role};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
pub use mbroker_protocol::WireFormat;
