//! LoRaWAN stack operator core.
//!
//! Shared library behind the `lwstack` CLI: configuration, credentials,
//! the authenticated RPC client, field-mask routing across the Identity,
//! Network, Application and Join Servers, the end device orchestrator, the
//! LoRaWAN frame codec and the gateway simulator.

pub mod access;
pub mod api;
pub mod auth;
pub mod config;
pub mod devices;
pub mod error;
pub mod events;
pub mod fieldmask;
pub mod ids;
pub mod integrations;
pub mod io;
pub mod lorawan;
pub mod packetbroker;
pub mod registry;
pub mod schema;
pub mod simulate;
pub mod storage;

pub use api::{ApiClient, HttpTransport, Transport};
pub use config::{Config, ServiceAddresses, ServiceRole};
pub use error::{ApiError, CoreError, ErrorKind};
pub use fieldmask::FieldMask;
