//! Command-line interface for lxd-site-manager.
//!
//! Provides commands for inspecting the control plane, managing containers
//! and provisioning sites.

mod commands;

pub use commands::{load_config, parse_cli, run_with_cli, Cli, Commands};
