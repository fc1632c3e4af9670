//! lxd-site-manager: provision sites backed by LXD containers.
//!
//! This library talks to the LXD control plane over its Unix socket and
//! uses the resulting container records to set up nginx vhosts, xinetd SSH
//! forwarders and TLS certificates.

// Control plane
pub mod container;
pub mod lxd;
pub mod repository;

// Host side
pub mod cli;
pub mod config;
pub mod error;
pub mod ports;
pub mod provision;

// Re-export commonly used error types
pub use error::{ConfigError, LxdError, PortError, ProvisionError};
