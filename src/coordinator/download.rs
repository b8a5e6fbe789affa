use super::node_client::NodeClient;
use crate::catalog::catalog::PartitionCatalog;
use crate::error::{PartitionStoreError, Result};
use crate::membership::registry::NodeRegistry;
use crate::protocol::types::PartitionId;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// A verified partition source: who serves it and how many bytes it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSource {
    pub id: PartitionId,
    pub node: SocketAddr,
    pub size: u64,
}

/// Everything needed to stream a file, resolved before the first byte is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub name: String,
    pub total_size: u64,
    pub sources: Vec<PartitionSource>,
}

pub struct DownloadCoordinator {
    registry: Arc<NodeRegistry>,
    catalog: Arc<PartitionCatalog>,
    client: NodeClient,
}

impl DownloadCoordinator {
    pub fn new(registry: Arc<NodeRegistry>, catalog: Arc<PartitionCatalog>, client: NodeClient) -> Self {
        Self {
            registry,
            catalog,
            client,
        }
    }

    /// Resolves every partition of `name` to a live owner and asks it for the
    /// partition's current size.
    pub async fn prepare(&self, name: &str) -> Result<DownloadPlan> {
        let entry = self
            .catalog
            .get(name)
            .ok_or_else(|| PartitionStoreError::FileNotFound(name.to_string()))?;

        // An owner missing from the registry is as good as unowned
        if let Some(index) = entry.first_unavailable(|addr| self.registry.is_active(addr)) {
            return Err(PartitionStoreError::PartitionUnavailable { index });
        }

        let mut sources = Vec::with_capacity(entry.partitions.len());
        for record in &entry.partitions {
            let index = record.index;
            let node = record
                .owner
                .addr()
                .ok_or(PartitionStoreError::PartitionUnavailable { index })?;

            let id = entry.partition_id(index);
            let size = self.client.partition_size(node, &id).await.map_err(|e| {
                tracing::warn!("Size query for {} on {} failed: {}", id, node, e);
                PartitionStoreError::PartitionUnavailable { index }
            })?;
            if size <= 0 {
                return Err(PartitionStoreError::SizeMismatch { index, size });
            }

            let size = size as u64;
            self.catalog.update_size(name, index, size);
            sources.push(PartitionSource { id, node, size });
        }

        let total_size = sources.iter().map(|source| source.size).sum();
        Ok(DownloadPlan {
            name: entry.name,
            total_size,
            sources,
        })
    }

    /// Streams the partitions of `plan` into `sink` in index order.
    pub async fn stream<W>(&self, plan: &DownloadPlan, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut sent = 0;
        for source in &plan.sources {
            sent += self
                .client
                .retrieve_partition(source.node, &source.id, sink, source.size)
                .await?;
            tracing::debug!("Forwarded {} from {}", source.id, source.node);
        }

        tracing::info!("Download of {} complete ({} bytes)", plan.name, sent);
        Ok(sent)
    }
}
