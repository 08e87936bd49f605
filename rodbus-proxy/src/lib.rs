//! A register proxy for a single [Modbus](http://modbus.org/) TCP device built on
//! [rodbus](https://docs.rs/rodbus) and [Tokio](https://docs.rs/tokio).
//!
//! Home-automation clients talk to a local Modbus TCP server. The proxy mirrors a configurable
//! set of register blocks from the upstream device (typically a solar inverter data logger)
//! into that server and forwards writes made by local clients back to the device.
//!
//! # Features
//!
//! * Round-robin polling of register blocks with at most one upstream request in flight
//! * Post-connect grace period and paced reconnects for slow embedded devices
//! * Soft recovery of stuck requests that keeps the TCP session alive
//! * Block-granular write detection with a bounded, deduplicated write queue
//! * Non-blocking core driven by an explicit `tick`, testable without any I/O
//!
//! # Example
//!
//! ```no_run
//! use std::time::Instant;
//!
//! use rodbus::DecodeLevel;
//! use rodbus::server::RequestHandler;
//! use rodbus_proxy::config::ProxyConfig;
//! use rodbus_proxy::transport::client::RodbusUpstream;
//! use rodbus_proxy::transport::server::{lock, spawn_proxy_server, ProxyRegisters};
//! use rodbus_proxy::Gateway;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProxyConfig::default();
//!     let timing = config.timing.to_timing();
//!
//!     let registers = ProxyRegisters::new(config.proxy.register_count).wrap();
//!     let _server =
//!         spawn_proxy_server(&config.proxy, registers.clone(), DecodeLevel::default()).await?;
//!
//!     let upstream = RodbusUpstream::spawn(
//!         &config.device,
//!         config.timing.response_timeout(),
//!         timing.reconnect_delay,
//!         DecodeLevel::default(),
//!     );
//!     let mut gateway = Gateway::new(upstream, config.block_table()?, timing, &**lock(&registers));
//!
//!     let mut ticker = tokio::time::interval(config.timing.tick());
//!     loop {
//!         ticker.tick().await;
//!         gateway.tick(Instant::now(), &mut **lock(&registers));
//!     }
//! }
//! ```

/// register block table
pub mod block;
/// configuration file format
pub mod config;
/// proxy-facing register storage
pub mod store;
/// timing parameters
pub mod timing;
/// transport adapters built on rodbus
pub mod transport;
/// the upstream collaborator
pub mod upstream;

mod connection;
mod gateway;
mod outcome;
mod queue;
mod scheduler;
mod shadow;

#[cfg(test)]
mod mock;

pub use crate::block::{BlockError, BlockTable, RegisterBlock};
pub use crate::gateway::{Gateway, Statistics};
pub use crate::outcome::{Outcome, TransactionId, TransactionResult};
pub use crate::store::{HoldingRegisters, RegisterStore};
pub use crate::timing::Timing;
pub use crate::upstream::Upstream;
