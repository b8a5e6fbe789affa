use super::download::DownloadCoordinator;
use super::node_client::NodeClient;
use super::placement::Placement;
use super::upload::UploadCoordinator;
use crate::catalog::catalog::PartitionCatalog;
use crate::config::Config;
use crate::error::{ErrorKind, Result};
use crate::events::EventBus;
use crate::membership::discovery::DiscoveryListener;
use crate::membership::registry::NodeRegistry;
use crate::protocol::codec::{WireStream, with_timeout};
use crate::protocol::types::{ClientCommand, ERROR, SIZE_UNAVAILABLE, SUCCESS, validate_file_name};
use crate::shutdown::stopped;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// The coordinator process: client-facing listener plus the registry, catalog
/// and the background discovery and health tasks that keep them current.
pub struct Coordinator {
    config: Config,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<NodeRegistry>,
    catalog: Arc<PartitionCatalog>,
    uploads: UploadCoordinator,
    downloads: DownloadCoordinator,
    client: NodeClient,
    shutdown: watch::Sender<bool>,
}

impl Coordinator {
    pub async fn bind(config: Config, events: EventBus) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(SocketAddr::new(config.bind_addr, config.client_port)).await?;
        let local_addr = listener.local_addr()?;

        let catalog = PartitionCatalog::new(events.clone());
        let registry = NodeRegistry::new(catalog.clone(), events);
        let client = NodeClient::new(config.io_timeout, config.buffer_size);

        let uploads = UploadCoordinator::new(Placement::new(registry.clone()), catalog.clone(), client);
        let downloads = DownloadCoordinator::new(registry.clone(), catalog.clone(), client);
        let (shutdown, _) = watch::channel(false);

        tracing::info!("Coordinator bound to {}", local_addr);

        Ok(Arc::new(Self {
            config,
            listener,
            local_addr,
            registry,
            catalog,
            uploads,
            downloads,
            client,
            shutdown,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<PartitionCatalog> {
        &self.catalog
    }

    /// Binds the discovery socket and spawns the accept loop, the health
    /// monitor and the discovery listener.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let discovery = DiscoveryListener::bind(
            SocketAddr::new(self.config.bind_addr, self.config.broadcast_port),
            self.registry.clone(),
            self.catalog.clone(),
            self.client,
            self.config.discovery_window,
        )
        .await?;
        let discovery = if self.config.discovery_probe {
            discovery.with_probe(
                SocketAddr::new(self.config.broadcast_addr, self.config.broadcast_port),
                self.local_addr.port(),
            )
        } else {
            discovery
        };

        tokio::spawn(discovery.run(self.config.discovery_interval, self.shutdown.subscribe()));

        tokio::spawn(self.registry.clone().health_monitor_loop(
            self.config.health_check_interval,
            self.config.node_timeout,
            self.shutdown.subscribe(),
        ));

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.accept_loop().await;
        });

        tracing::info!("Coordinator accepting clients on {}", self.local_addr);
        Ok(())
    }

    /// Stops every background task and forgets all nodes and files.
    pub fn stop(&self) {
        tracing::info!("Stopping coordinator");
        self.shutdown.send_replace(true);
        self.registry.clear();
        self.catalog.clear();
    }

    async fn accept_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => {
                    tracing::info!("Coordinator stopped accepting");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let coordinator = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = coordinator.handle_client(stream).await {
                                match e.kind() {
                                    ErrorKind::NotFound => tracing::debug!("Client {}: {}", peer, e),
                                    _ => tracing::warn!("Client {} request failed: {}", peer, e),
                                }
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept client: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let mut wire = WireStream::new(stream, self.config.io_timeout);
        let command: ClientCommand = wire.read_string().await?.parse()?;
        tracing::debug!("Client command {}", command.as_str());

        match command {
            ClientCommand::Upload => self.handle_upload(&mut wire).await?,
            ClientCommand::Download => self.handle_download(&mut wire).await?,
            ClientCommand::ListFiles => {
                wire.write_list(self.catalog.list_files()).await?;
            }
            ClientCommand::DeleteFile => {
                let name = wire.read_string().await?;
                let reply = if self.delete_file(&name).await { SUCCESS } else { ERROR };
                wire.write_string(reply).await?;
            }
        }

        wire.flush().await?;
        wire.shutdown().await
    }

    async fn handle_upload(&self, wire: &mut WireStream<TcpStream>) -> Result<()> {
        let name = wire.read_string().await?;
        let size = wire.read_size().await?;

        match self.uploads.upload(&name, size, wire.get_mut()).await {
            Ok(_) => wire.write_string(SUCCESS).await,
            Err(e) => {
                tracing::warn!("Upload of {} rejected: {}", name, e);
                wire.write_string(&e.to_string()).await?;
                wire.flush().await?;

                // Unread payload would turn our close into a reset and lose the reply
                let io_timeout = wire.io_timeout();
                let drained =
                    with_timeout(io_timeout, tokio::io::copy(wire.get_mut(), &mut tokio::io::sink()))
                        .await;
                if let Err(e) = drained {
                    tracing::debug!("Stopped draining rejected upload of {}: {}", name, e);
                }
                Ok(())
            }
        }
    }

    async fn handle_download(&self, wire: &mut WireStream<TcpStream>) -> Result<()> {
        let name = wire.read_string().await?;

        let plan = match self.downloads.prepare(&name).await {
            Ok(plan) => plan,
            Err(e) if e.is_not_found() => {
                tracing::debug!("Download of unknown file {}", name);
                return wire.write_bool(false).await;
            }
            Err(e) => {
                tracing::warn!("Download of {} unavailable: {}", name, e);
                wire.write_bool(true).await?;
                return wire.write_i64(SIZE_UNAVAILABLE).await;
            }
        };

        wire.write_bool(true).await?;
        wire.write_size(plan.total_size).await?;

        // Any failure from here on drops the connection short of the declared size
        self.downloads.stream(&plan, wire.get_mut()).await?;
        Ok(())
    }

    /// Removes `name` from the catalog, then deletes its partitions on their
    /// owners best-effort. Returns `false` if the file was not catalogued or an
    /// upload of the same name is still running.
    pub async fn delete_file(&self, name: &str) -> bool {
        if validate_file_name(name).is_err() {
            return false;
        }
        // Held until every partition delete has been sent, so no upload of
        // this name can write partitions the deletes would remove
        let _guard = match self.uploads.claim(name) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("Delete of {} refused: {}", name, e);
                return false;
            }
        };
        let Some(entry) = self.catalog.remove(name) else {
            tracing::debug!("Delete of unknown file {}", name);
            return false;
        };

        let mut deletes = JoinSet::new();
        for record in &entry.partitions {
            let Some(node) = record.owner.addr() else {
                tracing::warn!("Partition {} of {} has no owner, leaving it", record.index, name);
                continue;
            };
            let id = entry.partition_id(record.index);
            let client = self.client;
            deletes.spawn(async move {
                let outcome = client.delete_partition(node, &id).await;
                (id, node, outcome)
            });
        }

        while let Some(joined) = deletes.join_next().await {
            match joined {
                Ok((id, node, Ok(()))) => tracing::debug!("Deleted {} on {}", id, node),
                Ok((id, node, Err(e))) => {
                    tracing::warn!("Could not delete {} on {}: {}", id, node, e)
                }
                Err(e) => tracing::error!("Partition delete task failed: {}", e),
            }
        }

        tracing::info!("File {} deleted", name);
        true
    }
}
