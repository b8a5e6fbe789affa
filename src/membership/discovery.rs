use super::registry::NodeRegistry;
use super::types::{Announcement, DISCOVER_MESSAGE, Registration};
use crate::catalog::catalog::PartitionCatalog;
use crate::coordinator::node_client::NodeClient;
use crate::error::Result;
use crate::shutdown::stopped;

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

const MAX_DATAGRAM: usize = 1024;

/// Storage node side of discovery: announces the node's TCP port on a fixed
/// period until stopped.
pub struct DiscoveryBeacon {
    socket: UdpSocket,
    target: SocketAddr,
    announcement_port: u16,
    interval: Duration,
    retry_backoff: Duration,
}

impl DiscoveryBeacon {
    pub async fn bind(
        target: SocketAddr,
        announcement_port: u16,
        interval: Duration,
        retry_backoff: Duration,
    ) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;

        Ok(Self {
            socket,
            target,
            announcement_port,
            interval,
            retry_backoff,
        })
    }

    /// Sends one announcement.
    pub async fn announce(&self) -> Result<()> {
        let message = Announcement::new(self.announcement_port).encode();
        self.socket.send_to(message.as_bytes(), self.target).await?;
        tracing::trace!("Announced {} to {}", message, self.target);
        Ok(())
    }

    /// Announces until `shutdown` flips to `true`. The socket is closed when the
    /// loop returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Discovery beacon announcing port {} to {} every {:?}",
            self.announcement_port,
            self.target,
            self.interval
        );

        loop {
            let pause = match self.announce().await {
                Ok(()) => self.interval,
                Err(e) => {
                    tracing::warn!("Failed to send announcement: {}", e);
                    self.retry_backoff
                }
            };

            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("Discovery beacon stopped");
    }
}

/// Coordinator side of discovery.
///
/// Owns one UDP socket for its whole life; announcements arriving between
/// collection windows wait in the socket buffer for the next window.
pub struct DiscoveryListener {
    socket: UdpSocket,
    registry: Arc<NodeRegistry>,
    catalog: Arc<PartitionCatalog>,
    client: NodeClient,
    probe_target: Option<SocketAddr>,
    probe_port: u16,
    window: Duration,
}

impl DiscoveryListener {
    pub async fn bind(
        bind: SocketAddr,
        registry: Arc<NodeRegistry>,
        catalog: Arc<PartitionCatalog>,
        client: NodeClient,
        window: Duration,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(bind).await?;
        socket.set_broadcast(true)?;
        tracing::info!("Discovery listener bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            registry,
            catalog,
            client,
            probe_target: None,
            probe_port: 0,
            window,
        })
    }

    /// Sends `DISCOVER:<client-port>` to `target` at the start of each window.
    pub fn with_probe(mut self, target: SocketAddr, client_port: u16) -> Self {
        self.probe_target = Some(target);
        self.probe_port = client_port;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = interval.tick() => {}
            }

            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                found = self.discovery_pass() => {
                    tracing::debug!("Discovery pass heard {} storage nodes", found);
                }
            }
        }

        tracing::info!("Discovery listener stopped");
    }

    /// One probe, collect, register and refresh cycle. Returns how many distinct
    /// nodes were heard.
    pub async fn discovery_pass(&self) -> usize {
        if let Some(target) = self.probe_target {
            let probe = format!("{}:{}", DISCOVER_MESSAGE, self.probe_port);
            if let Err(e) = self.socket.send_to(probe.as_bytes(), target).await {
                tracing::warn!("Failed to send discovery probe: {}", e);
            }
        }

        let heard = self.collect_announcements().await;
        for (addr, announced_at) in &heard {
            if self.registry.register_or_refresh(*addr, *announced_at) == Registration::Added {
                tracing::debug!("Registered {} (announced at {})", addr, announced_at);
            }
        }

        let mut refreshes = JoinSet::new();
        for addr in heard.keys().copied() {
            let registry = self.registry.clone();
            let catalog = self.catalog.clone();
            let client = self.client;
            refreshes.spawn(async move {
                if let Err(e) = refresh_node(&client, &registry, &catalog, addr).await {
                    tracing::warn!("Failed to query storage node {}: {}", addr, e);
                }
            });
        }
        while let Some(joined) = refreshes.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Node refresh task failed: {}", e);
            }
        }

        heard.len()
    }

    /// Collects announcements for one window, keyed by node address. Later
    /// announcements from the same node overwrite earlier ones.
    async fn collect_announcements(&self) -> HashMap<SocketAddr, u64> {
        let deadline = Instant::now() + self.window;
        let mut heard = HashMap::new();
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            let received = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await;
            let (len, sender) = match received {
                Err(_) => break,
                Ok(Ok(datagram)) => datagram,
                Ok(Err(e)) => {
                    tracing::warn!("Failed to receive announcement: {}", e);
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&buf[..len]);
            match Announcement::parse(&text) {
                Some(announcement) => {
                    let addr = SocketAddr::new(sender.ip(), announcement.port);
                    heard.insert(addr, announcement.timestamp);
                }
                None => tracing::debug!("Ignoring datagram {:?} from {}", text, sender),
            }
        }

        heard
    }
}

/// Queries a node's holdings and free space, re-attaching unowned catalog
/// records it still holds.
async fn refresh_node(
    client: &NodeClient,
    registry: &NodeRegistry,
    catalog: &PartitionCatalog,
    addr: SocketAddr,
) -> Result<()> {
    let held = client.list_partitions(addr).await?;
    let adopted = catalog.adopt(addr, &held);
    if adopted > 0 {
        tracing::info!("Storage node {} re-adopted {} partitions", addr, adopted);
    }
    let names: BTreeSet<String> = held.iter().map(|id| id.to_string()).collect();
    registry.record_partitions(addr, names);

    let space = client.free_space(addr).await?;
    registry.record_space(addr, space);
    Ok(())
}
