use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use partition_store::client::{ClientSession, DownloadOutcome};
use partition_store::config::Config;
use partition_store::coordinator::service::Coordinator;
use partition_store::events::EventBus;
use partition_store::membership::discovery::DiscoveryBeacon;
use partition_store::storage::service::StorageNodeService;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "partition-store")]
#[command(about = "Partitioned file storage over broadcast-discovered storage nodes")]
struct Cli {
    #[command(flatten)]
    network: NetworkArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct NetworkArgs {
    /// Coordinator port for client commands
    #[arg(long, global = true)]
    client_port: Option<u16>,
    /// Storage node port for coordinator commands
    #[arg(long, global = true)]
    node_port: Option<u16>,
    /// UDP port for announcements
    #[arg(long, global = true)]
    broadcast_port: Option<u16>,
    #[arg(long, global = true)]
    broadcast_addr: Option<IpAddr>,
    #[arg(long, global = true)]
    bind_addr: Option<IpAddr>,
    /// Transfer chunk size in bytes
    #[arg(long, global = true)]
    buffer_size: Option<usize>,
    /// Per socket operation timeout in seconds
    #[arg(long, global = true)]
    io_timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator
    Coordinator {
        /// Seconds of silence before a storage node is evicted
        #[arg(long)]
        node_timeout_secs: Option<u64>,
        #[arg(long)]
        health_check_secs: Option<u64>,
        #[arg(long)]
        discovery_interval_ms: Option<u64>,
        /// Do not send DISCOVER probes
        #[arg(long)]
        no_probe: bool,
    },
    /// Run a storage node
    Node {
        /// Directory holding partition files
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        broadcast_interval_ms: Option<u64>,
    },
    /// Upload a local file
    Upload {
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        coordinator: IpAddr,
        path: PathBuf,
    },
    /// Download a file
    Download {
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        coordinator: IpAddr,
        name: String,
        /// Defaults to the file name in the current directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List stored files
    List {
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        coordinator: IpAddr,
    },
    /// Delete a file
    Delete {
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        coordinator: IpAddr,
        name: String,
    },
}

impl NetworkArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.client_port {
            config.client_port = port;
        }
        if let Some(port) = self.node_port {
            config.node_port = port;
        }
        if let Some(port) = self.broadcast_port {
            config.broadcast_port = port;
        }
        if let Some(addr) = self.broadcast_addr {
            config.broadcast_addr = addr;
        }
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        if let Some(size) = self.buffer_size {
            config.buffer_size = size;
        }
        if let Some(secs) = self.io_timeout_secs {
            config.io_timeout = Duration::from_secs(secs);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "partition_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::default();
    cli.network.apply(&mut config);

    match cli.command {
        Commands::Coordinator {
            node_timeout_secs,
            health_check_secs,
            discovery_interval_ms,
            no_probe,
        } => {
            if let Some(secs) = node_timeout_secs {
                config.node_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = health_check_secs {
                config.health_check_interval = Duration::from_secs(secs);
            }
            if let Some(ms) = discovery_interval_ms {
                config.discovery_interval = Duration::from_millis(ms);
                config.discovery_window = Duration::from_millis(ms);
            }
            config.discovery_probe = !no_probe;
            config.validate()?;
            run_coordinator(config).await
        }
        Commands::Node {
            data_dir,
            broadcast_interval_ms,
        } => {
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            if let Some(ms) = broadcast_interval_ms {
                config.broadcast_interval = Duration::from_millis(ms);
            }
            config.validate()?;
            run_node(config).await
        }
        Commands::Upload { coordinator, path } => {
            let session = session(&config, coordinator);
            let size = session
                .upload_file(&path)
                .await
                .with_context(|| format!("uploading {}", path.display()))?;
            println!("Uploaded {} ({} bytes)", path.display(), size);
            Ok(())
        }
        Commands::Download {
            coordinator,
            name,
            output,
        } => {
            let session = session(&config, coordinator);
            let output = output.unwrap_or_else(|| PathBuf::from(&name));
            download(&session, &name, output).await
        }
        Commands::List { coordinator } => {
            let files = session(&config, coordinator).list_files().await?;
            if files.is_empty() {
                println!("No files stored");
            }
            for name in files {
                println!("{}", name);
            }
            Ok(())
        }
        Commands::Delete { coordinator, name } => {
            if session(&config, coordinator).delete_file(&name).await? {
                println!("Deleted {}", name);
                Ok(())
            } else {
                anyhow::bail!("{} is not stored", name)
            }
        }
    }
}

fn session(config: &Config, coordinator: IpAddr) -> ClientSession {
    ClientSession::new(
        SocketAddr::new(coordinator, config.client_port),
        config.io_timeout,
        config.buffer_size,
    )
}

async fn run_coordinator(config: Config) -> anyhow::Result<()> {
    let events = EventBus::new();
    spawn_observer(&events);

    let coordinator = Coordinator::bind(config, events).await?;
    coordinator.clone().start().await?;

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    coordinator.stop();
    Ok(())
}

async fn run_node(config: Config) -> anyhow::Result<()> {
    let events = EventBus::new();
    spawn_observer(&events);

    let node = StorageNodeService::bind(&config, events).await?;
    node.clone().start().await;

    let beacon = DiscoveryBeacon::bind(
        SocketAddr::new(config.broadcast_addr, config.broadcast_port),
        node.local_addr().port(),
        config.broadcast_interval,
        config.beacon_retry_backoff,
    )
    .await?;
    tokio::spawn(beacon.run(node.shutdown_signal()));

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    node.stop();
    Ok(())
}

/// Logs every cluster snapshot as JSON, standing in for a front-end.
fn spawn_observer(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!("Cluster update: {}", json),
                    Err(e) => tracing::warn!("Failed to render cluster update: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Observer skipped {} updates", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Downloads into `<output>.partial` and only renames once every byte arrived.
async fn download(session: &ClientSession, name: &str, output: PathBuf) -> anyhow::Result<()> {
    let mut partial = output.clone().into_os_string();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("creating {}", partial.display()))?;
    let outcome = session.download(name, &mut file).await;
    drop(file);

    match outcome {
        Ok(DownloadOutcome::Downloaded(size)) => {
            tokio::fs::rename(&partial, &output).await?;
            println!("Downloaded {} to {} ({} bytes)", name, output.display(), size);
            Ok(())
        }
        Ok(DownloadOutcome::NotFound) => {
            tokio::fs::remove_file(&partial).await?;
            anyhow::bail!("{} is not stored", name)
        }
        Ok(DownloadOutcome::Unavailable) => {
            tokio::fs::remove_file(&partial).await?;
            anyhow::bail!("{} exists but a storage node holding it is unavailable", name)
        }
        Err(e) => {
            tokio::fs::remove_file(&partial).await?;
            Err(e).with_context(|| format!("downloading {}", name))
        }
    }
}
