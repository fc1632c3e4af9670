//! CLI command definitions for lxd-site-manager.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{ManagerConfig, DEFAULT_CONFIG_PATH};
use crate::container::ContainerSpec;
use crate::lxd::LxdClient;
use crate::ports::PortAllocator;
use crate::provision::{CertIssuer, ImageRef, Provisioner, SiteRequest};
use crate::repository::{resource_name, ContainerRepository, ResourceCollection, StateAction, StateChange};

/// Manage LXD-backed sites: containers, nginx vhosts, SSH forwarders and certificates.
#[derive(Parser, Debug)]
#[command(name = "lxd-site-manager")]
#[command(version)]
#[command(
    long_about = "lxd-site-manager talks to LXD over its Unix socket and provisions sites around containers.\n\nExample usage:\n  lxd-site-manager site site1.example.org --container site1 --image a1 --profile disk-local --ssl"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration document (YAML).
    #[arg(short, long, env = "LXD_SITE_MANAGER_CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Override the LXD socket path.
    #[arg(short, long, global = true)]
    pub socket: Option<PathBuf>,

    /// Override the resource collection (containers or instances).
    #[arg(long, value_enum, global = true)]
    pub collection: Option<ResourceCollection>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Log control-plane traffic.
    #[arg(short, long, global = true)]
    pub debug: bool,
}

impl Cli {
    /// Log filter from `--debug`, the config `debug` flag and `--log-level`.
    pub fn effective_log_level(&self, config: &ManagerConfig) -> String {
        if self.debug || config.debug {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// List containers.
    #[command(alias = "ls")]
    Containers(ListArgs),

    /// List images.
    Images(ListArgs),

    /// List profiles.
    Profiles(ListArgs),

    /// Show one container.
    Show(NameArgs),

    /// Show the runtime state of a container.
    State(NameArgs),

    /// Change the state of a container.
    SetState(SetStateArgs),

    /// Create a container from an image.
    Create(CreateArgs),

    /// Delete a container.
    Delete(NameArgs),

    /// Wait until a container has an inet address on eth0.
    WaitIp(WaitIpArgs),

    /// Print the next free SSH forwarding port.
    NextPort(NextPortArgs),

    /// Provision a complete site.
    Site(SiteArgs),

    /// Issue a TLS certificate with acme.sh.
    IssueSsl(HostArgs),

    /// Renew and install a TLS certificate with acme.sh.
    RenewSsl(HostArgs),
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Print full resource URLs as JSON instead of names.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct NameArgs {
    /// Container name.
    pub name: String,
}

#[derive(Parser, Debug)]
pub struct HostArgs {
    /// Host name.
    pub host: String,
}

#[derive(Parser, Debug)]
pub struct SetStateArgs {
    /// Container name.
    pub name: String,

    /// Requested action.
    #[arg(value_enum)]
    pub action: StateAction,

    /// Seconds the control plane waits before giving up.
    #[arg(long, default_value = "30")]
    pub timeout: u32,

    /// Do not force the transition.
    #[arg(long)]
    pub no_force: bool,

    /// Keep runtime state (checkpoint/restore).
    #[arg(long)]
    pub stateful: bool,
}

/// Image selection shared by `create` and `site`.
#[derive(Parser, Debug)]
pub struct ImageArgs {
    /// Image alias looked up in the image catalog.
    #[arg(short, long, conflicts_with = "fingerprint", required_unless_present = "fingerprint")]
    pub image: Option<String>,

    /// Image fingerprint used as given.
    #[arg(long)]
    pub fingerprint: Option<String>,

    /// Profiles to apply, in order.
    #[arg(short, long = "profile")]
    pub profiles: Vec<String>,
}

impl ImageArgs {
    fn image_ref(&self) -> anyhow::Result<ImageRef> {
        match (&self.image, &self.fingerprint) {
            (Some(alias), None) => Ok(ImageRef::Alias(alias.clone())),
            (None, Some(fp)) => Ok(ImageRef::Fingerprint(fp.clone())),
            _ => bail!("exactly one of --image or --fingerprint is required"),
        }
    }
}

#[derive(Parser, Debug)]
pub struct CreateArgs {
    /// Container name.
    pub name: String,

    #[command(flatten)]
    pub image: ImageArgs,
}

#[derive(Parser, Debug)]
pub struct WaitIpArgs {
    /// Container name.
    pub name: String,

    /// Number of state polls (default from config).
    #[arg(short, long)]
    pub attempts: Option<u32>,
}

#[derive(Parser, Debug)]
pub struct NextPortArgs {
    /// Start searching here instead of the persisted next port.
    #[arg(long)]
    pub candidate: Option<u16>,

    /// Reserve the port by persisting the advanced counter.
    #[arg(long)]
    pub commit: bool,
}

#[derive(Parser, Debug)]
pub struct SiteArgs {
    /// Site host name.
    pub host: String,

    /// Container name (defaults to the first label of the host name).
    #[arg(long)]
    pub container: Option<String>,

    /// Fully qualified host name for `{fullhost}`.
    #[arg(long)]
    pub full_host: Option<String>,

    #[command(flatten)]
    pub image: ImageArgs,

    /// Issue a TLS certificate once the configs are written.
    #[arg(long)]
    pub ssl: bool,
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Loads the config document and applies command-line overrides.
pub fn load_config(cli: &Cli) -> anyhow::Result<ManagerConfig> {
    let mut config = ManagerConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    if let Some(socket) = &cli.socket {
        config.socket_path = socket.clone();
    }
    if let Some(collection) = cli.collection {
        config.collection = collection;
    }
    if cli.debug {
        config.debug = true;
    }
    Ok(config)
}

/// Run the CLI with parsed arguments and a loaded configuration.
pub async fn run_with_cli(cli: Cli, config: ManagerConfig) -> anyhow::Result<()> {
    let config_path = cli.config.clone();
    let mut repo = ContainerRepository::new(
        LxdClient::new(config.socket_path.clone()),
        config.collection,
    );

    match cli.command {
        Commands::Containers(args) => {
            if args.json {
                print_list(repo.list().await?, true)?;
            } else {
                for name in repo.names().await? {
                    println!("{name}");
                }
            }
        }
        Commands::Images(args) => print_list(repo.images().await?, args.json)?,
        Commands::Profiles(args) => print_list(repo.profiles().await?, args.json)?,
        Commands::Show(args) => match repo.get(&args.name).await? {
            Some(container) => print_json(container.raw().as_value())?,
            None => bail!("container '{}' not found", args.name),
        },
        Commands::State(args) => {
            let state = repo.get_state(&args.name).await?;
            print_json(state.metadata().unwrap_or(state.as_value()))?;
        }
        Commands::SetState(args) => {
            let change = StateChange::new(args.action)
                .with_timeout(args.timeout)
                .with_force(!args.no_force)
                .with_stateful(args.stateful);
            if let Some(answer) = repo.set_state(&args.name, &change).await? {
                print_json(answer.as_value())?;
            }
        }
        Commands::Create(args) => {
            let fingerprint = resolve_fingerprint(&repo, &args.image).await?;
            let spec = ContainerSpec::new(&args.name, fingerprint)
                .with_profiles(args.image.profiles.clone());
            match repo.create(&spec).await? {
                Some(container) => {
                    info!(container = container.name(), "Created");
                    println!("{}", container.name());
                }
                None => {
                    let reason = repo
                        .last_error()
                        .map(|a| a.describe_failure())
                        .unwrap_or_default();
                    bail!("failed to create '{}': {reason}", args.name);
                }
            }
        }
        Commands::Delete(args) => {
            let answer = repo.delete(&args.name).await?;
            print_json(answer.as_value())?;
        }
        Commands::WaitIp(args) => {
            let attempts = args.attempts.unwrap_or(config.address_attempts);
            match repo.await_network_address(&args.name, attempts).await? {
                Some(address) => println!("{address}"),
                None => bail!("'{}' has no inet address after {attempts} attempts", args.name),
            }
        }
        Commands::NextPort(args) => {
            let allocator = PortAllocator::new();
            if args.commit {
                let mut config = config;
                if let Some(candidate) = args.candidate {
                    config.next_port = candidate;
                }
                let port = allocator.allocate(&mut config, &config_path).await?;
                println!("{port}");
            } else {
                let port = allocator
                    .next_free_port(args.candidate.unwrap_or(config.next_port))
                    .await?;
                println!("{port}");
            }
        }
        Commands::Site(args) => {
            let container = match &args.container {
                Some(name) => name.clone(),
                None => default_container_name(&args.host),
            };
            let mut request = SiteRequest::new(&args.host, container, args.image.image_ref()?)
                .with_profiles(args.image.profiles.clone())
                .with_certificate(args.ssl);
            if let Some(full_host) = &args.full_host {
                request = request.with_full_host(full_host);
            }

            let mut provisioner = Provisioner::new(config, config_path);
            let report = provisioner.create_site(&request).await?;

            println!("container:  {}", report.container.name());
            println!(
                "address:    {}",
                report.container.local_address().unwrap_or_default()
            );
            println!("ssh port:   {}", report.ssh_port);
            println!("nginx:      {}", report.nginx_conf.display());
            println!("xinetd:     {}", report.xinetd_conf.display());
            match report.certificate_issued {
                Some(true) => println!("certificate: issued"),
                Some(false) => warn!(host = %args.host, "Certificate was not issued"),
                None => {}
            }
        }
        Commands::IssueSsl(args) => {
            if !CertIssuer::from_config(&config).issue(&args.host).await? {
                bail!("acme.sh --issue failed for {}", args.host);
            }
        }
        Commands::RenewSsl(args) => {
            if !CertIssuer::from_config(&config).renew(&args.host).await? {
                bail!("acme.sh --renew failed for {}", args.host);
            }
        }
    }

    Ok(())
}

async fn resolve_fingerprint(repo: &ContainerRepository, args: &ImageArgs) -> anyhow::Result<String> {
    match args.image_ref()? {
        ImageRef::Fingerprint(fp) => Ok(fp),
        ImageRef::Alias(alias) => repo
            .find_fingerprint_by_image_alias(&alias)
            .await?
            .with_context(|| format!("no image with alias '{alias}'")),
    }
}

/// First DNS label of `host`, which is a valid container name.
fn default_container_name(host: &str) -> String {
    host.split('.').next().unwrap_or(host).to_string()
}

fn print_list(items: Vec<Value>, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&Value::Array(items));
    }
    for item in &items {
        match item.as_str() {
            Some(url) => println!("{}", resource_name(url)),
            None => println!("{item}"),
        }
    }
    Ok(())
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
