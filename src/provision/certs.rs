//! TLS certificates through acme.sh.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::ManagerConfig;
use crate::error::ProvisionError;

/// Runs acme.sh to issue, renew and install certificates.
///
/// Only the exit status is observed; the tool's output is appended to the
/// log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertIssuer {
    acme_dir: PathBuf,
    cert_dir: PathBuf,
    log_file: PathBuf,
}

impl CertIssuer {
    pub fn new(
        acme_dir: impl Into<PathBuf>,
        cert_dir: impl Into<PathBuf>,
        log_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            acme_dir: acme_dir.into(),
            cert_dir: cert_dir.into(),
            log_file: log_file.into(),
        }
    }

    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::new(&config.acme_dir, &config.cert_dir, &config.log_file)
    }

    fn script(&self) -> PathBuf {
        self.acme_dir.join("acme.sh")
    }

    /// Issues a new certificate for `host`.
    pub async fn issue(&self, host: &str) -> Result<bool, ProvisionError> {
        validate_host(host)?;
        self.run(host, &["--issue", "-d", host]).await
    }

    /// Renews the certificate for `host` and installs it into the cert dir.
    ///
    /// Installation is skipped if renewal fails.
    pub async fn renew(&self, host: &str) -> Result<bool, ProvisionError> {
        validate_host(host)?;
        if !self.run(host, &["--renew", "-d", host]).await? {
            return Ok(false);
        }

        let cert = self.cert_path(host, "crt");
        let key = self.cert_path(host, "key");
        let full = self.cert_path(host, "full");
        self.run(
            host,
            &[
                "--install-cert",
                "-d",
                host,
                "--cert-file",
                &cert,
                "--key-file",
                &key,
                "--fullchain-file",
                &full,
            ],
        )
        .await
    }

    fn cert_path(&self, host: &str, extension: &str) -> String {
        self.cert_dir
            .join(format!("{host}.{extension}"))
            .display()
            .to_string()
    }

    async fn run(&self, host: &str, args: &[&str]) -> Result<bool, ProvisionError> {
        let log = open_log(&self.log_file)?;
        let stderr = log.try_clone()?;
        let script = self.script();

        let status = Command::new("sh")
            .arg(&script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .status()
            .await
            .map_err(|e| ProvisionError::Certificate {
                host: host.to_string(),
                reason: format!("failed to run {}: {e}", script.display()),
            })?;

        if status.success() {
            info!(host, action = args[0], "acme.sh succeeded");
        } else {
            warn!(
                host,
                action = args[0],
                code = status.code().unwrap_or(-1),
                log = %self.log_file.display(),
                "acme.sh failed"
            );
        }
        Ok(status.success())
    }
}

fn open_log(path: &Path) -> Result<std::fs::File, ProvisionError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Accepts DNS-style host names only.
pub fn validate_host(host: &str) -> Result<(), ProvisionError> {
    let valid = !host.is_empty()
        && host.len() <= 253
        && !host.starts_with(|c: char| c == '-' || c == '.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');

    if valid {
        Ok(())
    } else {
        Err(ProvisionError::InvalidHost(host.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_acme(dir: &Path, exit_code: i32) -> CertIssuer {
        let acme_dir = dir.join("acme");
        std::fs::create_dir_all(&acme_dir).unwrap();
        std::fs::write(
            acme_dir.join("acme.sh"),
            format!("echo \"$@\" >> \"{}\"\nexit {exit_code}\n", dir.join("calls").display()),
        )
        .unwrap();
        CertIssuer::new(acme_dir, dir.join("certs"), dir.join("acme.log"))
    }

    #[test]
    fn test_validate_host() {
        assert!(validate_host("site1.example.org").is_ok());
        assert!(validate_host("").is_err());
        assert!(validate_host("-rf").is_err());
        assert!(validate_host("a b").is_err());
        assert!(validate_host("a;rm").is_err());
    }

    #[tokio::test]
    async fn test_issue_runs_acme() {
        let dir = TempDir::new().unwrap();
        let issuer = fake_acme(dir.path(), 0);

        assert!(issuer.issue("site1.example.org").await.unwrap());

        let calls = std::fs::read_to_string(dir.path().join("calls")).unwrap();
        assert_eq!(calls, "--issue -d site1.example.org\n");
    }

    #[tokio::test]
    async fn test_renew_installs_certificate() {
        let dir = TempDir::new().unwrap();
        let issuer = fake_acme(dir.path(), 0);

        assert!(issuer.renew("site1").await.unwrap());

        let calls = std::fs::read_to_string(dir.path().join("calls")).unwrap();
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "--renew -d site1");
        assert!(lines[1].starts_with("--install-cert -d site1 --cert-file "));
        assert!(lines[1].contains("site1.crt"));
        assert!(lines[1].contains("site1.full"));
    }

    #[tokio::test]
    async fn test_failed_renew_skips_install() {
        let dir = TempDir::new().unwrap();
        let issuer = fake_acme(dir.path(), 3);

        assert!(!issuer.renew("site1").await.unwrap());

        let calls = std::fs::read_to_string(dir.path().join("calls")).unwrap();
        assert_eq!(calls.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_host_is_rejected_before_running() {
        let dir = TempDir::new().unwrap();
        let issuer = fake_acme(dir.path(), 0);

        assert!(matches!(
            issuer.issue("bad host").await,
            Err(ProvisionError::InvalidHost(_))
        ));
        assert!(!dir.path().join("calls").exists());
    }
}
