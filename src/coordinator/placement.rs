use crate::error::{PartitionStoreError, Result};
use crate::membership::registry::NodeRegistry;
use crate::membership::types::StorageNode;
use std::net::SocketAddr;
use std::sync::Arc;

/// Where one partition of an upload goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionAssignment {
    /// 1-based.
    pub index: u32,
    pub node: SocketAddr,
    pub len: u64,
}

/// Splits `size` bytes into `count` contiguous lengths. Every partition gets
/// `size / count` bytes and the last one also takes the remainder.
pub fn partition_lengths(size: u64, count: u64) -> Vec<u64> {
    if count == 0 {
        return Vec::new();
    }

    let base = size / count;
    let mut lengths = vec![base; count as usize];
    if let Some(last) = lengths.last_mut() {
        *last += size % count;
    }
    lengths
}

/// Computes the placement of a `size`-byte file over `nodes`.
///
/// Nodes are taken in address order. The partition count is the number of
/// usable nodes, capped at `size` so that no partition is empty. A node whose
/// known free space is smaller than its share is dropped and the plan is
/// recomputed over the rest.
pub fn plan_for(nodes: &[StorageNode], size: u64) -> Result<Vec<PartitionAssignment>> {
    let mut candidates: Vec<&StorageNode> = nodes.iter().collect();
    candidates.sort_by_key(|node| node.addr);

    loop {
        if candidates.is_empty() {
            return Err(PartitionStoreError::NoStorageAvailable);
        }
        if size == 0 {
            return Ok(Vec::new());
        }

        let count = (candidates.len() as u64).min(size);
        let plan: Vec<PartitionAssignment> = partition_lengths(size, count)
            .into_iter()
            .zip(candidates.iter())
            .enumerate()
            .map(|(i, (len, node))| PartitionAssignment {
                index: i as u32 + 1,
                node: node.addr,
                len,
            })
            .collect();

        let too_small: Vec<SocketAddr> = plan
            .iter()
            .zip(candidates.iter())
            .filter(|(assignment, node)| node.free_space.is_some_and(|free| free < assignment.len))
            .map(|(_, node)| node.addr)
            .collect();

        if too_small.is_empty() {
            return Ok(plan);
        }

        for addr in &too_small {
            tracing::warn!("Storage node {} lacks space for its share, skipping", addr);
        }
        candidates.retain(|node| !too_small.contains(&node.addr));
    }
}

/// Places uploads over the currently registered storage nodes.
pub struct Placement {
    registry: Arc<NodeRegistry>,
}

impl Placement {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Whether `addr` is still registered.
    pub fn is_active(&self, addr: SocketAddr) -> bool {
        self.registry.is_active(addr)
    }

    pub fn plan(&self, size: u64) -> Result<Vec<PartitionAssignment>> {
        let nodes = self.registry.list_active();
        let plan = plan_for(&nodes, size)?;
        tracing::debug!(
            "Placing {} bytes as {} partitions over {} active nodes",
            size,
            plan.len(),
            nodes.len()
        );
        Ok(plan)
    }
}
