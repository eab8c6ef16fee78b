//! # Envoy Fleet - polling driver for Enphase IQ microinverters
//!
//! Keeps a fleet of logical devices, one per IQ microinverter, in sync with
//! the Envoy gateways that report them. Gateways are discovered statically or
//! over mDNS, authenticated once per gateway, and polled on a single shared
//! interval while at least one device is managed.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `gateway`: Gateway client contract, sessions and the Envoy client
//! - `discovery`: Discovery sources and the endpoint/session registry
//! - `scheduler`: The single recurring poll timer
//! - `device`: Managed devices and their energy accumulators
//! - `host`: Device/persistence host boundary
//! - `persistence`: JSON state file behind the host
//! - `driver`: Lifecycle, reconciliation and the main loop
//! - `pairing`: Login and inventory listing for new devices
//! - `web`: HTTP status and control API

pub mod config;
pub mod device;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod host;
pub mod logging;
pub mod pairing;
pub mod persistence;
pub mod scheduler;
#[cfg(feature = "web")]
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use driver::{DriverHandle, FleetDriver};
pub use error::{FleetError, Result};
