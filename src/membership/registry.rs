use super::types::{Registration, StorageNode};
use crate::catalog::catalog::PartitionCatalog;
use crate::events::{ClusterEvent, EventBus};
use crate::shutdown::stopped;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Coordinator-side table of known storage nodes.
///
/// The registry is the only component that adds, refreshes or removes nodes.
/// Eviction also orphans the evicted node's catalog records, which is why the
/// registry holds the catalog.
pub struct NodeRegistry {
    nodes: DashMap<SocketAddr, StorageNode>,
    catalog: Arc<PartitionCatalog>,
    events: EventBus,
}

impl NodeRegistry {
    pub fn new(catalog: Arc<PartitionCatalog>, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            catalog,
            events,
        })
    }

    /// Adds a node on its first announcement, otherwise marks it as seen now.
    pub fn register_or_refresh(&self, addr: SocketAddr, announced_at: u64) -> Registration {
        let registration = match self.nodes.entry(addr) {
            Entry::Occupied(mut existing) => {
                let node = existing.get_mut();
                node.last_seen = Instant::now();
                node.announced_at = announced_at;
                Registration::Refreshed
            }
            Entry::Vacant(slot) => {
                slot.insert(StorageNode::new(addr, announced_at));
                Registration::Added
            }
        };

        match registration {
            Registration::Added => {
                tracing::info!("Discovered storage node {}", addr);
                tracing::info!("Cluster size now: {} storage nodes", self.nodes.len());
                self.publish_nodes();
            }
            Registration::Refreshed => {
                tracing::trace!("Refreshed storage node {}", addr);
            }
        }

        registration
    }

    /// Snapshot of every registered node, sorted by address.
    pub fn list_active(&self) -> Vec<StorageNode> {
        let mut nodes: Vec<StorageNode> = self
            .nodes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by_key(|node| node.addr);
        nodes
    }

    pub fn is_active(&self, addr: SocketAddr) -> bool {
        self.nodes.contains_key(&addr)
    }

    pub fn get(&self, addr: SocketAddr) -> Option<StorageNode> {
        self.nodes.get(&addr).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Caches a `GET_SPACE` answer. Unknown nodes are ignored.
    pub fn record_space(&self, addr: SocketAddr, free_space: Option<u64>) {
        if let Some(mut node) = self.nodes.get_mut(&addr) {
            node.free_space = free_space;
            node.last_seen = Instant::now();
        }
    }

    /// Caches a `LIST_PARTITIONS` answer. Unknown nodes are ignored.
    pub fn record_partitions(&self, addr: SocketAddr, partitions: BTreeSet<String>) {
        if let Some(mut node) = self.nodes.get_mut(&addr) {
            node.partitions = partitions;
            node.last_seen = Instant::now();
        }
    }

    /// Removes every node silent for longer than `timeout` and orphans the
    /// partitions it owned.
    ///
    /// The records are orphaned while the node's entry is still locked, so a
    /// re-registration of the same address cannot slip in between and lose
    /// its partitions until the next discovery pass.
    pub fn evict_stale(&self, now: Instant, timeout: Duration) -> Vec<SocketAddr> {
        let is_stale =
            |node: &StorageNode| now.saturating_duration_since(node.last_seen) > timeout;

        let candidates: Vec<SocketAddr> = self
            .nodes
            .iter()
            .filter(|entry| is_stale(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        let mut evicted = Vec::new();
        for addr in candidates {
            // Re-checked under the shard lock: an announcement may have arrived
            let Entry::Occupied(existing) = self.nodes.entry(addr) else {
                continue;
            };
            if !is_stale(existing.get()) {
                continue;
            }

            let orphaned = self.catalog.orphan_owner(addr);
            let node = existing.remove();
            tracing::warn!(
                "Storage node {} evicted (no contact for {:?}), {} partitions now unowned",
                addr,
                now.saturating_duration_since(node.last_seen),
                orphaned
            );
            evicted.push(addr);
        }

        if !evicted.is_empty() {
            tracing::info!("Cluster size now: {} storage nodes", self.nodes.len());
            self.publish_nodes();
        }

        evicted
    }

    /// Drops every node without touching the catalog. Used when the
    /// coordinator stops.
    pub fn clear(&self) {
        self.nodes.clear();
        self.publish_nodes();
    }

    /// Periodic eviction, independent of request traffic.
    pub async fn health_monitor_loop(
        self: Arc<Self>,
        check_interval: Duration,
        timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = interval.tick() => {
                    let evicted = self.evict_stale(Instant::now(), timeout);
                    tracing::debug!(
                        "Health check: {} active, {} evicted",
                        self.nodes.len(),
                        evicted.len()
                    );
                }
            }
        }

        tracing::info!("Health monitor stopped");
    }

    fn publish_nodes(&self) {
        self.events
            .publish(ClusterEvent::NodesChanged(self.list_active()));
    }
}
