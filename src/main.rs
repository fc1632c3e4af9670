//! lxd-site-manager CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first to get log_level
    let cli = lxd_site_manager::cli::parse_cli();
    let config = lxd_site_manager::cli::load_config(&cli)?;

    // Priority: RUST_LOG env var > --debug / config debug > --log-level
    let log_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| cli.effective_log_level(&config));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    lxd_site_manager::cli::run_with_cli(cli, config).await
}
