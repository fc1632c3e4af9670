//! Error types for lxd-site-manager operations.
//!
//! Defines error types for all major subsystems:
//! - Control-plane socket I/O and HTTP framing
//! - Persisted manager configuration
//! - Host port probing
//! - Site provisioning (containers, proxy configs, certificates)

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while talking to the control plane.
///
/// All of these are fatal for the call that produced them: the socket or the
/// control plane is presumed unusable and nothing is retried.
#[derive(Debug, Error)]
pub enum LxdError {
    #[error("Cannot connect to {}: {source}", path.display())]
    Connection {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to decode JSON answer: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors that can occur while loading or saving the manager configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors that can occur while looking for a free host port.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("Failed to run port probe '{command}': {source}")]
    ProbeSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Port probe '{command}' exited with status {status}: {stderr}")]
    ProbeFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("No free port at or above {0}")]
    Exhausted(u16),
}

/// Errors that can occur while provisioning a site.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Control plane error: {0}")]
    Lxd(#[from] LxdError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Port allocation error: {0}")]
    Port(#[from] PortError),

    #[error("No image with alias '{0}'")]
    ImageNotFound(String),

    #[error("Failed to create container '{name}': {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to start container '{name}': {reason}")]
    StartFailed { name: String, reason: String },

    #[error("Container '{name}' got no inet address after {attempts} attempts")]
    NoAddress { name: String, attempts: u32 },

    #[error("Container '{0}' has no local address")]
    MissingAddress(String),

    #[error("Config file already exists: {}", .0.display())]
    ConfigExists(PathBuf),

    #[error("Invalid host name '{0}'")]
    InvalidHost(String),

    #[error("Certificate command failed for '{host}': {reason}")]
    Certificate { host: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
