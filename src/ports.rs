//! Allocation of host ports for SSH forwarders.
//!
//! The allocator asks the host which TCP ports are already listening and
//! skips them. The chosen port is written back to the configuration document
//! before anything that depends on it is generated, so a crash in between
//! cannot hand the same port out twice.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{ManagerConfig, DEFAULT_FIRST_PORT};
use crate::error::{PortError, ProvisionError};

/// Source of the set of host TCP ports that are currently listening.
#[async_trait]
pub trait BoundPorts: Send + Sync {
    async fn listening_ports(&self) -> Result<HashSet<u16>, PortError>;
}

/// Reads listening TCP sockets with `ss -tln`.
#[derive(Debug, Clone)]
pub struct SsProbe {
    program: String,
}

impl SsProbe {
    pub fn new() -> Self {
        Self {
            program: "ss".to_string(),
        }
    }

    /// Uses another `ss`-compatible binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BoundPorts for SsProbe {
    async fn listening_ports(&self) -> Result<HashSet<u16>, PortError> {
        let command = format!("{} -tln", self.program);
        let output = Command::new(&self.program)
            .arg("-tln")
            .output()
            .await
            .map_err(|source| PortError::ProbeSpawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(PortError::ProbeFailed {
                command,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let ports = parse_ss_output(&String::from_utf8_lossy(&output.stdout));
        debug!(count = ports.len(), "Listening ports probed");
        Ok(ports)
    }
}

/// Extracts local ports from `ss -tln` output.
///
/// The local address is the fourth column (`0.0.0.0:22`, `[::]:80`,
/// `127.0.0.53%lo:53`); the header and unparsable lines are skipped.
pub fn parse_ss_output(output: &str) -> HashSet<u16> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(3))
        .filter_map(|local| local.rsplit_once(':'))
        .filter_map(|(_, port)| port.parse().ok())
        .collect()
}

/// Picks SSH forwarding ports that nothing on the host listens on.
#[derive(Debug, Clone)]
pub struct PortAllocator<P = SsProbe> {
    probe: P,
}

impl PortAllocator<SsProbe> {
    /// Allocator probing the host with `ss`.
    pub fn new() -> Self {
        Self {
            probe: SsProbe::new(),
        }
    }
}

impl Default for PortAllocator<SsProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: BoundPorts> PortAllocator<P> {
    pub fn with_probe(probe: P) -> Self {
        Self { probe }
    }

    /// Returns `candidate`, or the first port above it that is not listening.
    pub async fn next_free_port(&self, candidate: u16) -> Result<u16, PortError> {
        let bound = self.probe.listening_ports().await?;

        let mut port = candidate;
        while bound.contains(&port) {
            port = port.checked_add(1).ok_or(PortError::Exhausted(candidate))?;
        }

        if port != candidate {
            debug!(candidate, port, "Skipped ports already in use");
        }
        Ok(port)
    }

    /// Allocates the next free port and persists the advanced counter.
    ///
    /// `config.next_port` is moved past the returned port (back to
    /// [`DEFAULT_FIRST_PORT`] after 65535) and the document at `config_path`
    /// is saved before this returns.
    pub async fn allocate(
        &self,
        config: &mut ManagerConfig,
        config_path: &Path,
    ) -> Result<u16, ProvisionError> {
        let port = self.next_free_port(config.next_port).await?;

        // Past the top of the range the counter starts over.
        let next = port.checked_add(1).unwrap_or(DEFAULT_FIRST_PORT);
        let previous = std::mem::replace(&mut config.next_port, next);
        if let Err(e) = config.save(config_path) {
            config.next_port = previous;
            return Err(e.into());
        }

        info!(port, next_port = next, "Allocated SSH forwarding port");
        Ok(port)
    }
}
