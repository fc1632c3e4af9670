//! Persisted manager configuration.
//!
//! The configuration is a flat key/value YAML document. It is loaded at
//! startup (command-line flags override individual keys) and rewritten after
//! every port allocation.
//!
//! ```yaml
//! socket_path: /var/snap/lxd/common/lxd/unix.socket
//! collection: containers
//! next_port: 22222
//! nginx_dir: /etc/nginx
//! nginx_template: /etc/nginx/site-template
//! xinetd_dir: /etc/xinetd.d
//! xinetd_template: /etc/xinetd_ssh_template
//! acme_dir: /root/.acme.sh
//! cert_dir: /etc/ssl/certs
//! debug: false
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::lxd::DEFAULT_SOCKET_PATH;
use crate::repository::ResourceCollection;

/// Default location of the configuration document.
pub const DEFAULT_CONFIG_PATH: &str = "/root/ssl-sites.yml";

/// First port handed out for SSH forwarding when nothing is persisted yet.
pub const DEFAULT_FIRST_PORT: u16 = 22222;

/// Default number of state polls while waiting for a container address.
pub const DEFAULT_ADDRESS_ATTEMPTS: u32 = 150;

/// Settings of the site manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Control-plane socket.
    pub socket_path: PathBuf,
    /// `containers` or `instances`, depending on the control-plane API.
    pub collection: ResourceCollection,
    /// Next candidate port for SSH forwarding. The only key normally
    /// rewritten by the manager.
    #[serde(alias = "last_port")]
    pub next_port: u16,
    /// nginx configuration root; sites go to `sites-available/`.
    pub nginx_dir: PathBuf,
    /// Template for nginx site configs.
    pub nginx_template: PathBuf,
    /// xinetd service directory.
    pub xinetd_dir: PathBuf,
    /// Template for xinetd SSH forwarder configs.
    pub xinetd_template: PathBuf,
    /// acme.sh installation directory.
    pub acme_dir: PathBuf,
    /// Where issued certificates are installed.
    pub cert_dir: PathBuf,
    /// File receiving acme.sh output.
    pub log_file: PathBuf,
    /// State polls before giving up on a container address.
    pub address_attempts: u32,
    /// Log wire traffic.
    pub debug: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            collection: ResourceCollection::Containers,
            next_port: DEFAULT_FIRST_PORT,
            nginx_dir: PathBuf::from("/etc/nginx"),
            nginx_template: PathBuf::from("/etc/nginx/site-template"),
            xinetd_dir: PathBuf::from("/etc/xinetd.d"),
            xinetd_template: PathBuf::from("/etc/xinetd_ssh_template"),
            acme_dir: PathBuf::from("/root/.acme.sh"),
            cert_dir: PathBuf::from("/etc/ssl/certs"),
            log_file: std::env::temp_dir().join("lxd-site-manager.log"),
            address_attempts: DEFAULT_ADDRESS_ATTEMPTS,
            debug: false,
        }
    }
}

impl ManagerConfig {
    /// Loads the document at `path`, falling back to defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parses a YAML document; an empty document yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that YAML typing cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.next_port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "next_port".to_string(),
                message: "port 0 cannot be allocated".to_string(),
            });
        }
        if self.address_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "address_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Writes the document to `path`, replacing the old file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self)?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| ConfigError::Io(e.error))?;

        debug!(path = %path.display(), next_port = self.next_port, "Config saved");
        Ok(())
    }
}
