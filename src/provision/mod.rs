//! Site provisioning on top of the container repository.
//!
//! A site is a container reachable through an nginx vhost, an xinetd SSH
//! forwarder on a dedicated host port and, optionally, a TLS certificate.
//!
//! # Flow
//!
//! ```text
//! resolve image ─► create container ─► start ─► await inet address
//!        ─► allocate + persist port ─► nginx config ─► xinetd config ─► certificate
//! ```
//!
//! # Example
//!
//! ```ignore
//! use lxd_site_manager::config::ManagerConfig;
//! use lxd_site_manager::provision::{ImageRef, Provisioner, SiteRequest};
//!
//! let config = ManagerConfig::load("/root/ssl-sites.yml")?;
//! let mut provisioner = Provisioner::new(config, "/root/ssl-sites.yml");
//! let request = SiteRequest::new("site1.example.org", "site1", ImageRef::Alias("a1".into()));
//! let report = provisioner.create_site(&request).await?;
//! println!("ssh on port {}", report.ssh_port);
//! ```

pub mod certs;
pub mod sites;
pub mod template;

pub use certs::{validate_host, CertIssuer};
pub use sites::SiteFiles;
pub use template::{render, TemplateVars};

use std::path::PathBuf;

use tracing::info;

use crate::config::ManagerConfig;
use crate::container::{Container, ContainerSpec};
use crate::error::ProvisionError;
use crate::lxd::LxdClient;
use crate::ports::{BoundPorts, PortAllocator, SsProbe};
use crate::repository::{
    operation_succeeded, ContainerRepository, StateAction, StateChange,
};

/// Image to build a site container from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Looked up in the image catalog by alias.
    Alias(String),
    /// Used as given.
    Fingerprint(String),
}

/// What to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRequest {
    /// Host name used for config file names and `{host}`.
    pub host: String,
    /// Value for `{fullhost}`, defaults to `host`.
    pub full_host: Option<String>,
    pub container: String,
    pub image: ImageRef,
    pub profiles: Vec<String>,
    pub issue_certificate: bool,
}

impl SiteRequest {
    pub fn new(host: impl Into<String>, container: impl Into<String>, image: ImageRef) -> Self {
        Self {
            host: host.into(),
            full_host: None,
            container: container.into(),
            image,
            profiles: Vec::new(),
            issue_certificate: false,
        }
    }

    pub fn with_full_host(mut self, full_host: impl Into<String>) -> Self {
        self.full_host = Some(full_host.into());
        self
    }

    pub fn with_profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_certificate(mut self, issue: bool) -> Self {
        self.issue_certificate = issue;
        self
    }
}

/// Outcome of a successful [`Provisioner::create_site`].
#[derive(Debug, Clone)]
pub struct SiteReport {
    /// The new container, with its local address set.
    pub container: Container,
    pub ssh_port: u16,
    pub nginx_conf: PathBuf,
    pub xinetd_conf: PathBuf,
    /// Exit status of certificate issuance, `None` if not requested.
    pub certificate_issued: Option<bool>,
}

/// Creates sites end to end.
#[derive(Debug)]
pub struct Provisioner<P = SsProbe> {
    repo: ContainerRepository,
    config: ManagerConfig,
    config_path: PathBuf,
    allocator: PortAllocator<P>,
    files: SiteFiles,
    issuer: CertIssuer,
}

impl Provisioner<SsProbe> {
    /// Provisioner talking to the socket named in `config`.
    pub fn new(config: ManagerConfig, config_path: impl Into<PathBuf>) -> Self {
        Self::with_allocator(config, config_path, PortAllocator::new())
    }
}

impl<P: BoundPorts> Provisioner<P> {
    pub fn with_allocator(
        config: ManagerConfig,
        config_path: impl Into<PathBuf>,
        allocator: PortAllocator<P>,
    ) -> Self {
        let repo = ContainerRepository::new(
            LxdClient::new(config.socket_path.clone()),
            config.collection,
        );
        Self {
            repo,
            files: SiteFiles::from_config(&config),
            issuer: CertIssuer::from_config(&config),
            config,
            config_path: config_path.into(),
            allocator,
        }
    }

    /// Replaces the repository, e.g. to change its poll interval.
    pub fn with_repository(mut self, repo: ContainerRepository) -> Self {
        self.repo = repo;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn repository(&self) -> &ContainerRepository {
        &self.repo
    }

    pub fn issuer(&self) -> &CertIssuer {
        &self.issuer
    }

    /// Provisions a complete site.
    ///
    /// Existing config files for the host abort the run before the control
    /// plane is touched. Steps already performed are not rolled back on error.
    pub async fn create_site(&mut self, request: &SiteRequest) -> Result<SiteReport, ProvisionError> {
        validate_host(&request.host)?;
        self.files.ensure_absent(&request.host)?;

        let fingerprint = match &request.image {
            ImageRef::Fingerprint(fp) => fp.clone(),
            ImageRef::Alias(alias) => self
                .repo
                .find_fingerprint_by_image_alias(alias)
                .await?
                .ok_or_else(|| ProvisionError::ImageNotFound(alias.clone()))?,
        };

        let spec = ContainerSpec::new(&request.container, fingerprint)
            .with_profiles(request.profiles.clone());
        let Some(mut container) = self.repo.create(&spec).await? else {
            let reason = self
                .repo
                .last_error()
                .map(|answer| answer.describe_failure())
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(ProvisionError::CreateFailed {
                name: request.container.clone(),
                reason,
            });
        };

        let started = self
            .repo
            .set_state(&request.container, &StateChange::new(StateAction::Start))
            .await?;
        if let Some(answer) = started.filter(|a| !operation_succeeded(a)) {
            return Err(ProvisionError::StartFailed {
                name: request.container.clone(),
                reason: answer.describe_failure(),
            });
        }

        let attempts = self.config.address_attempts;
        let address = self
            .repo
            .await_network_address(&request.container, attempts)
            .await?
            .ok_or_else(|| ProvisionError::NoAddress {
                name: request.container.clone(),
                attempts,
            })?;
        container.set_local_address(address);

        let ssh_port = self
            .allocator
            .allocate(&mut self.config, &self.config_path)
            .await?;

        let nginx_conf = self.files.nginx_conf(&request.host);
        if !self
            .files
            .write_nginx_site(&request.host, request.full_host.as_deref(), &container)
            .await?
        {
            return Err(ProvisionError::ConfigExists(nginx_conf));
        }

        let xinetd_conf = self.files.xinetd_conf(&request.host);
        if !self
            .files
            .write_xinetd_service(&request.host, &container, ssh_port)
            .await?
        {
            return Err(ProvisionError::ConfigExists(xinetd_conf));
        }

        let certificate_issued = if request.issue_certificate {
            Some(self.issuer.issue(&request.host).await?)
        } else {
            None
        };

        info!(
            host = %request.host,
            container = %request.container,
            ssh_port,
            "Site provisioned"
        );

        Ok(SiteReport {
            container,
            ssh_port,
            nginx_conf,
            xinetd_conf,
            certificate_issued,
        })
    }
}
