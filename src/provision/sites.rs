//! nginx site and xinetd forwarder config files.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::ManagerConfig;
use crate::container::Container;
use crate::error::ProvisionError;
use crate::provision::template::{render, TemplateVars};

/// Locations of the config templates and of the generated files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteFiles {
    pub nginx_dir: PathBuf,
    pub nginx_template: PathBuf,
    pub xinetd_dir: PathBuf,
    pub xinetd_template: PathBuf,
}

impl SiteFiles {
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            nginx_dir: config.nginx_dir.clone(),
            nginx_template: config.nginx_template.clone(),
            xinetd_dir: config.xinetd_dir.clone(),
            xinetd_template: config.xinetd_template.clone(),
        }
    }

    /// `{nginx_dir}/sites-available/{host}.conf`
    pub fn nginx_conf(&self, host: &str) -> PathBuf {
        self.nginx_dir
            .join("sites-available")
            .join(format!("{host}.conf"))
    }

    /// `{xinetd_dir}/{host}.conf`
    pub fn xinetd_conf(&self, host: &str) -> PathBuf {
        self.xinetd_dir.join(format!("{host}.conf"))
    }

    /// Fails with `ConfigExists` if either config for `host` is already present.
    pub fn ensure_absent(&self, host: &str) -> Result<(), ProvisionError> {
        for path in [self.nginx_conf(host), self.xinetd_conf(host)] {
            if path.exists() {
                return Err(ProvisionError::ConfigExists(path));
            }
        }
        Ok(())
    }

    /// Writes the nginx vhost proxying `host` to the container.
    ///
    /// Returns `false` without touching anything if the file already exists.
    pub async fn write_nginx_site(
        &self,
        host: &str,
        full_host: Option<&str>,
        container: &Container,
    ) -> Result<bool, ProvisionError> {
        let mut vars = TemplateVars::new(host, local_address(container)?);
        if let Some(full_host) = full_host {
            vars = vars.with_full_host(full_host);
        }
        self.write_rendered(&self.nginx_template, &self.nginx_conf(host), &vars)
            .await
    }

    /// Writes the xinetd service forwarding `port` to the container's SSH.
    ///
    /// Returns `false` without touching anything if the file already exists.
    pub async fn write_xinetd_service(
        &self,
        host: &str,
        container: &Container,
        port: u16,
    ) -> Result<bool, ProvisionError> {
        let vars = TemplateVars::new(host, local_address(container)?).with_port(port);
        self.write_rendered(&self.xinetd_template, &self.xinetd_conf(host), &vars)
            .await
    }

    async fn write_rendered(
        &self,
        template: &Path,
        target: &Path,
        vars: &TemplateVars,
    ) -> Result<bool, ProvisionError> {
        let text = tokio::fs::read_to_string(template).await?;
        let rendered = render(&text, vars);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target)
            .await;
        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(path = %target.display(), "Config already exists, not overwriting");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        file.write_all(rendered.as_bytes()).await?;
        file.flush().await?;

        info!(path = %target.display(), "Config written");
        Ok(true)
    }
}

fn local_address(container: &Container) -> Result<&str, ProvisionError> {
    container
        .local_address()
        .ok_or_else(|| ProvisionError::MissingAddress(container.name().to_string()))
}
