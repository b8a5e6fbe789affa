use super::partition_store::PartitionStore;
use crate::config::Config;
use crate::error::{ErrorKind, PartitionStoreError, Result};
use crate::events::{ClusterEvent, EventBus};
use crate::protocol::codec::{WireStream, copy_exact};
use crate::protocol::types::{NodeCommand, PartitionId, SIZE_UNAVAILABLE, SUCCESS};
use crate::shutdown::stopped;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// TCP endpoint of a storage node. Persists, serves and deletes partitions and
/// reports capacity to the coordinator.
pub struct StorageNodeService {
    /// Random identity used only to tell nodes apart in logs.
    pub node_id: String,
    store: Arc<PartitionStore>,
    listener: TcpListener,
    local_addr: SocketAddr,
    buffer_size: usize,
    io_timeout: Duration,
    events: EventBus,
    shutdown: watch::Sender<bool>,
}

impl StorageNodeService {
    pub async fn bind(config: &Config, events: EventBus) -> Result<Arc<Self>> {
        let store = PartitionStore::new(config.data_dir.clone())?;
        let listener = TcpListener::bind(SocketAddr::new(config.bind_addr, config.node_port)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = watch::channel(false);

        let node_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            "Storage node {} bound to {} (data dir {})",
            node_id,
            local_addr,
            store.base_path().display()
        );

        Ok(Arc::new(Self {
            node_id,
            store: Arc::new(store),
            listener,
            local_addr,
            buffer_size: config.buffer_size,
            io_timeout: config.io_timeout,
            events,
            shutdown,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    /// Stop flag shared with companion tasks such as the discovery beacon.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn stop(&self) {
        tracing::info!("Stopping storage node {}", self.node_id);
        self.shutdown.send_replace(true);
    }

    /// Spawns the accept loop and returns immediately.
    pub async fn start(self: Arc<Self>) {
        self.publish_holdings().await;

        let service = self.clone();
        tokio::spawn(async move {
            service.accept_loop().await;
        });

        tracing::info!("Storage node {} accepting on {}", self.node_id, self.local_addr);
    }

    async fn accept_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_signal();

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => {
                    tracing::info!("Storage node {} stopped accepting", self.node_id);
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let service = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = service.handle_connection(stream).await {
                                log_failure(peer, &e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let mut wire = WireStream::new(stream, self.io_timeout);
        let command: NodeCommand = wire.read_string().await?.parse()?;
        tracing::debug!("Received {}", command.as_str());

        match command {
            NodeCommand::StorePartition => self.handle_store(&mut wire).await?,
            NodeCommand::RetrievePartition => self.handle_retrieve(&mut wire).await?,
            NodeCommand::GetPartitionSize => self.handle_size(&mut wire).await?,
            NodeCommand::GetSpace => self.handle_space(&mut wire).await?,
            NodeCommand::ListPartitions => {
                let names = self.store.list().await?;
                wire.write_list(&names).await?;
            }
            NodeCommand::DeletePartition => self.handle_delete(&mut wire).await?,
        }

        wire.flush().await?;
        wire.shutdown().await
    }

    async fn handle_store(&self, wire: &mut WireStream<TcpStream>) -> Result<()> {
        let id = read_partition_id(wire).await?;
        let size = wire.read_size().await?;
        let io_timeout = wire.io_timeout();

        self.store
            .store(&id, wire.get_mut(), size, self.buffer_size, io_timeout)
            .await?;

        wire.write_string(SUCCESS).await?;
        tracing::info!("Partition {} stored ({} bytes)", id, size);

        self.publish_holdings().await;
        Ok(())
    }

    async fn handle_retrieve(&self, wire: &mut WireStream<TcpStream>) -> Result<()> {
        let id = read_partition_id(wire).await?;

        let Some((mut file, size)) = self.store.open(&id).await? else {
            tracing::debug!("Retrieve requested for missing partition {}", id);
            return wire.write_bool(false).await;
        };

        wire.write_bool(true).await?;
        wire.write_size(size).await?;

        let io_timeout = wire.io_timeout();
        let sent = copy_exact(&mut file, wire.get_mut(), size, self.buffer_size, io_timeout).await?;
        if sent < size {
            return Err(PartitionStoreError::Integrity {
                expected: size,
                actual: sent,
            });
        }

        tracing::debug!("Partition {} served ({} bytes)", id, size);
        Ok(())
    }

    async fn handle_size(&self, wire: &mut WireStream<TcpStream>) -> Result<()> {
        let id = read_partition_id(wire).await?;

        let reply = match self.store.size(&id).await {
            Ok(Some(size)) => size as i64,
            Ok(None) => {
                tracing::debug!("Size requested for missing partition {}", id);
                SIZE_UNAVAILABLE
            }
            Err(e) => {
                tracing::warn!("Failed to read size of {}: {}", id, e);
                SIZE_UNAVAILABLE
            }
        };

        wire.write_i64(reply).await
    }

    async fn handle_space(&self, wire: &mut WireStream<TcpStream>) -> Result<()> {
        let reply = match self.store.available_space() {
            Ok(space) => space as i64,
            Err(e) => {
                tracing::warn!("Failed to read free space: {}", e);
                SIZE_UNAVAILABLE
            }
        };

        wire.write_i64(reply).await
    }

    async fn handle_delete(&self, wire: &mut WireStream<TcpStream>) -> Result<()> {
        let id = read_partition_id(wire).await?;

        match self.store.delete(&id).await {
            Ok(true) => tracing::info!("Partition {} deleted", id),
            Ok(false) => tracing::debug!("Partition {} already absent", id),
            Err(e) => tracing::warn!("Failed to delete partition {}: {}", id, e),
        }

        wire.write_string(SUCCESS).await?;
        self.publish_holdings().await;
        Ok(())
    }

    /// Rescans the directory and publishes the result.
    async fn publish_holdings(&self) {
        match self.store.list().await {
            Ok(names) => {
                tracing::debug!("Storage node {} holds {} partitions", self.node_id, names.len());
                self.events.publish(ClusterEvent::PartitionsChanged(names));
            }
            Err(e) => tracing::warn!("Failed to scan partitions: {}", e),
        }
    }
}

async fn read_partition_id(wire: &mut WireStream<TcpStream>) -> Result<PartitionId> {
    let file = wire.read_string().await?;
    let index = wire.read_index().await?;
    let id = PartitionId::new(file, index);
    crate::protocol::types::validate_file_name(&id.file)?;
    Ok(id)
}

fn log_failure(peer: SocketAddr, e: &PartitionStoreError) {
    match e.kind() {
        ErrorKind::NotFound => tracing::debug!("Request from {}: {}", peer, e),
        ErrorKind::Protocol => tracing::warn!("Protocol error from {}: {}", peer, e),
        _ => tracing::error!("Request from {} failed: {}", peer, e),
    }
}
