use super::node_client::NodeClient;
use super::placement::{PartitionAssignment, Placement};
use crate::catalog::catalog::PartitionCatalog;
use crate::catalog::types::{FileCatalogEntry, PartitionOwner, PartitionRecord};
use crate::error::{PartitionStoreError, Result};
use crate::protocol::types::{PartitionId, validate_file_name};

use dashmap::DashSet;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Splits an incoming stream into partitions, writes them to storage nodes and
/// commits the file to the catalog once every partition is acknowledged.
pub struct UploadCoordinator {
    placement: Placement,
    catalog: Arc<PartitionCatalog>,
    client: NodeClient,
    in_flight: Arc<DashSet<String>>,
}

/// Holds a file name in the in-flight set until dropped. Uploads and deletes
/// of the same name exclude each other through it.
pub(crate) struct InFlightGuard {
    name: String,
    in_flight: Arc<DashSet<String>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.name);
    }
}

impl UploadCoordinator {
    pub fn new(placement: Placement, catalog: Arc<PartitionCatalog>, client: NodeClient) -> Self {
        Self {
            placement,
            catalog,
            client,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Claims `name` for the caller, failing if an upload or delete of the
    /// same name is already running.
    pub(crate) fn claim(&self, name: &str) -> Result<InFlightGuard> {
        if !self.in_flight.insert(name.to_string()) {
            return Err(PartitionStoreError::UploadInProgress(name.to_string()));
        }
        Ok(InFlightGuard {
            name: name.to_string(),
            in_flight: self.in_flight.clone(),
        })
    }

    /// Reads exactly `size` bytes from `source` and stores them as `name`.
    ///
    /// Partitions are written in index order. Nothing becomes visible in the
    /// catalog unless every partition was acknowledged; on failure the
    /// partitions already written are deleted again.
    pub async fn upload<R>(&self, name: &str, size: u64, source: &mut R) -> Result<FileCatalogEntry>
    where
        R: AsyncRead + Unpin,
    {
        validate_file_name(name)?;
        let _guard = self.claim(name)?;

        let plan = self.placement.plan(size)?;
        tracing::info!(
            "Uploading {} ({} bytes) as {} partitions",
            name,
            size,
            plan.len()
        );

        let mut written: Vec<PartitionAssignment> = Vec::with_capacity(plan.len());
        for assignment in &plan {
            let id = PartitionId::new(name, assignment.index);
            // Counted before the attempt: the node may have renamed the file
            // even if its acknowledgement never arrived.
            written.push(*assignment);

            if let Err(e) = self
                .client
                .store_partition(assignment.node, &id, source, assignment.len)
                .await
            {
                tracing::error!("Upload of {} failed at partition {}: {}", name, assignment.index, e);
                self.roll_back(name, &written).await;
                return Err(e);
            }

            tracing::debug!(
                "Partition {} ({} bytes) stored on {}",
                id,
                assignment.len,
                assignment.node
            );
        }

        let records = plan
            .iter()
            .map(|assignment| {
                let mut record = PartitionRecord::new(assignment.index, assignment.node, assignment.len);
                if !self.placement.is_active(assignment.node) {
                    tracing::warn!(
                        "Storage node {} left during upload of {}, partition {} is unowned",
                        assignment.node,
                        name,
                        assignment.index
                    );
                    record.owner = PartitionOwner::Unowned;
                }
                record
            })
            .collect();
        let entry = FileCatalogEntry::new(name, size, records);
        let previous = self.catalog.insert(entry.clone());

        // An eviction that ran between the check above and the insert has
        // already orphaned its records, so it cannot have seen this entry
        let mut departed: Vec<SocketAddr> = plan
            .iter()
            .map(|assignment| assignment.node)
            .filter(|node| !self.placement.is_active(*node))
            .collect();
        departed.sort();
        departed.dedup();
        for node in departed {
            self.catalog.orphan_owner(node);
        }

        if let Some(previous) = previous {
            let kept: HashSet<(u32, SocketAddr)> =
                plan.iter().map(|a| (a.index, a.node)).collect();
            self.delete_superseded(&previous, &kept).await;
        }

        tracing::info!("Upload of {} complete", name);
        Ok(entry)
    }

    /// Best-effort removal of partitions written by a failed upload.
    ///
    /// If any of them overwrote a partition of the catalogued version of the
    /// same file, that version is no longer intact and is dropped as well.
    async fn roll_back(&self, name: &str, written: &[PartitionAssignment]) {
        if let Some(existing) = self.catalog.get(name) {
            let overwritten = written.iter().any(|assignment| {
                existing.record(assignment.index).and_then(|r| r.owner.addr())
                    == Some(assignment.node)
            });

            if overwritten && self.catalog.remove(name).is_some() {
                tracing::warn!(
                    "Previous version of {} was partially overwritten and has been dropped",
                    name
                );
                let kept: HashSet<(u32, SocketAddr)> =
                    written.iter().map(|a| (a.index, a.node)).collect();
                self.delete_superseded(&existing, &kept).await;
            }
        }

        for assignment in written {
            let id = PartitionId::new(name, assignment.index);
            if let Err(e) = self.client.delete_partition(assignment.node, &id).await {
                tracing::warn!("Rollback could not delete {} on {}: {}", id, assignment.node, e);
            }
        }
    }

    /// Deletes partitions of `previous` except those at `(index, node)` pairs
    /// in `kept`, which hold new content under the same name.
    async fn delete_superseded(&self, previous: &FileCatalogEntry, kept: &HashSet<(u32, SocketAddr)>) {
        for record in &previous.partitions {
            let Some(node) = record.owner.addr() else {
                continue;
            };
            if kept.contains(&(record.index, node)) {
                continue;
            }

            let id = previous.partition_id(record.index);
            match self.client.delete_partition(node, &id).await {
                Ok(()) => tracing::debug!("Deleted superseded partition {} on {}", id, node),
                Err(e) => tracing::warn!("Could not delete superseded {} on {}: {}", id, node, e),
            }
        }
    }
}
