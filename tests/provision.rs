//! End-to-end site provisioning against a scripted control plane.

mod common;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use common::{operation_done, operation_handle, reply, state_with_addresses, sync, MockLxd};
use lxd_site_manager::config::ManagerConfig;
use lxd_site_manager::lxd::LxdClient;
use lxd_site_manager::ports::{BoundPorts, PortAllocator};
use lxd_site_manager::provision::{ImageRef, Provisioner, SiteRequest};
use lxd_site_manager::repository::ContainerRepository;
use lxd_site_manager::{PortError, ProvisionError};
use serde_json::json;
use tempfile::TempDir;

const NGINX_TEMPLATE: &str = "server {\n    server_name {fullhost};\n    location / { proxy_pass http://{local_ip}; }\n}\n";
const XINETD_TEMPLATE: &str = "service {host}\n{\n    port = {port}\n    redirect = {local_ip} 22\n}\n";

struct Listening(HashSet<u16>);

#[async_trait]
impl BoundPorts for Listening {
    async fn listening_ports(&self) -> Result<HashSet<u16>, PortError> {
        Ok(self.0.clone())
    }
}

fn site_config(dir: &Path, socket: &Path) -> ManagerConfig {
    let nginx_template = dir.join("nginx-template");
    let xinetd_template = dir.join("xinetd-template");
    std::fs::write(&nginx_template, NGINX_TEMPLATE).unwrap();
    std::fs::write(&xinetd_template, XINETD_TEMPLATE).unwrap();

    ManagerConfig {
        socket_path: socket.to_path_buf(),
        nginx_dir: dir.join("nginx"),
        nginx_template,
        xinetd_dir: dir.join("xinetd.d"),
        xinetd_template,
        acme_dir: dir.join("acme"),
        cert_dir: dir.join("certs"),
        log_file: dir.join("acme.log"),
        address_attempts: 5,
        ..ManagerConfig::default()
    }
}

fn provisioner(
    config: ManagerConfig,
    config_path: &Path,
    bound: &[u16],
) -> Provisioner<Listening> {
    let repo = ContainerRepository::new(
        LxdClient::new(config.socket_path.clone()),
        config.collection,
    )
    .with_poll_interval(Duration::from_millis(1));
    let allocator = PortAllocator::with_probe(Listening(bound.iter().copied().collect()));

    Provisioner::with_allocator(config, config_path, allocator).with_repository(repo)
}

#[tokio::test]
async fn test_create_site_end_to_end() {
    let mock = MockLxd::start(vec![
        sync(json!(["/1.0/images/abc123"])),
        sync(json!({"fingerprint": "abc123", "aliases": [{"name": "a1"}]})),
        operation_handle("create"),
        operation_done("create", 200, ""),
        operation_handle("start"),
        operation_done("start", 200, ""),
        state_with_addresses(json!([])),
        state_with_addresses(json!([{"family": "inet", "address": "10.0.3.15"}])),
    ]);
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("ssl-sites.yml");
    let config = site_config(dir.path(), mock.socket_path());
    let mut provisioner = provisioner(config, &config_path, &[22222]);

    let request = SiteRequest::new("site1", "site1", ImageRef::Alias("a1".into()))
        .with_full_host("site1.example.org")
        .with_profiles(vec!["default".into()]);
    let report = provisioner.create_site(&request).await.unwrap();

    assert_eq!(report.ssh_port, 22223);
    assert_eq!(report.container.local_address(), Some("10.0.3.15"));
    assert_eq!(report.certificate_issued, None);

    let persisted = ManagerConfig::load(&config_path).unwrap();
    assert_eq!(persisted.next_port, 22224);
    assert_eq!(provisioner.config().next_port, 22224);

    let nginx = std::fs::read_to_string(&report.nginx_conf).unwrap();
    assert!(report.nginx_conf.ends_with("nginx/sites-available/site1.conf"));
    assert!(nginx.contains("server_name site1.example.org;"));
    assert!(nginx.contains("proxy_pass http://10.0.3.15;"));

    let xinetd = std::fs::read_to_string(&report.xinetd_conf).unwrap();
    assert!(xinetd.starts_with("service site1\n"));
    assert!(xinetd.contains("port = 22223"));
    assert!(xinetd.contains("redirect = 10.0.3.15 22"));

    assert_eq!(
        mock.request_lines(),
        vec![
            "GET /1.0/images",
            "GET /1.0/images/abc123",
            "POST /1.0/containers",
            "GET /1.0/operations/create/wait",
            "PUT /1.0/containers/site1/state",
            "GET /1.0/operations/start/wait",
            "GET /1.0/containers/site1/state",
            "GET /1.0/containers/site1/state",
        ]
    );
    let requests = mock.requests();
    assert_eq!(requests[2].json()["source"]["fingerprint"], "abc123");
    assert_eq!(requests[4].json()["action"], "start");
}

#[tokio::test]
async fn test_create_failure_stops_before_port_allocation() {
    let mock = MockLxd::start(vec![
        operation_handle("create"),
        operation_done("create", 400, "Image not found"),
    ]);
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("ssl-sites.yml");
    let config = site_config(dir.path(), mock.socket_path());
    let mut provisioner = provisioner(config, &config_path, &[]);

    let request = SiteRequest::new("site2", "site2", ImageRef::Fingerprint("deadbeef".into()));
    let err = provisioner.create_site(&request).await.unwrap_err();

    match err {
        ProvisionError::CreateFailed { name, reason } => {
            assert_eq!(name, "site2");
            assert!(reason.contains("Image not found"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!config_path.exists());
    assert_eq!(mock.requests().len(), 2);
}

#[tokio::test]
async fn test_unknown_alias_is_reported() {
    let mock = MockLxd::start(vec![sync(json!([]))]);
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("ssl-sites.yml");
    let config = site_config(dir.path(), mock.socket_path());
    let mut provisioner = provisioner(config, &config_path, &[]);

    let request = SiteRequest::new("site3", "site3", ImageRef::Alias("nope".into()));
    let err = provisioner.create_site(&request).await.unwrap_err();

    assert!(matches!(err, ProvisionError::ImageNotFound(alias) if alias == "nope"));
}

#[tokio::test]
async fn test_existing_config_aborts_before_any_request() {
    let mock = MockLxd::start(vec![reply(500, "")]);
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("ssl-sites.yml");
    let config = site_config(dir.path(), mock.socket_path());

    let existing = config.xinetd_dir.join("site4.conf");
    std::fs::create_dir_all(&config.xinetd_dir).unwrap();
    std::fs::write(&existing, "service site4 {}\n").unwrap();

    let mut provisioner = provisioner(config, &config_path, &[]);
    let request = SiteRequest::new("site4", "site4", ImageRef::Fingerprint("fp".into()));
    let err = provisioner.create_site(&request).await.unwrap_err();

    assert!(matches!(err, ProvisionError::ConfigExists(path) if path == existing));
    assert!(mock.requests().is_empty());
}
