//! Command implementations.

pub mod access;
pub mod auth_info;
pub mod end_devices;
pub mod entities;
pub mod events;
pub mod integrations;
pub mod login;
pub mod logout;
pub mod lorawan;
pub mod packet_broker;
pub mod simulate;
pub mod use_config;
pub mod version;

pub use auth_info::run_auth_info;
pub use end_devices::run_end_devices;
pub use entities::run_entity;
pub use events::run_events;
pub use login::run_login;
pub use logout::run_logout;
pub use lorawan::run_lorawan;
pub use packet_broker::run_packet_broker;
pub use simulate::run_simulate;
pub use use_config::run_use;
pub use version::run_version;
