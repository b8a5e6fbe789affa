use crate::protocol::types::PartitionId;
use std::net::SocketAddr;

/// Who currently holds a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOwner {
    Assigned(SocketAddr),
    /// The owning node was evicted. The partition cannot be served until the
    /// node returns and reports it again.
    Unowned,
}

impl PartitionOwner {
    pub fn addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Assigned(addr) => Some(*addr),
            Self::Unowned => None,
        }
    }
}

/// One placed partition of a catalogued file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    /// 1-based position within the file.
    pub index: u32,
    pub owner: PartitionOwner,
    /// Last size seen for this partition. The owning node is authoritative.
    pub size: u64,
}

impl PartitionRecord {
    pub fn new(index: u32, owner: SocketAddr, size: u64) -> Self {
        Self {
            index,
            owner: PartitionOwner::Assigned(owner),
            size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCatalogEntry {
    pub name: String,
    /// Declared size of the whole file at upload time.
    pub size: u64,
    /// Ordered by index, `partitions[i].index == i + 1`.
    pub partitions: Vec<PartitionRecord>,
}

impl FileCatalogEntry {
    pub fn new(name: impl Into<String>, size: u64, mut partitions: Vec<PartitionRecord>) -> Self {
        partitions.sort_by_key(|record| record.index);
        Self {
            name: name.into(),
            size,
            partitions,
        }
    }

    pub fn total_partitions(&self) -> u32 {
        self.partitions.len() as u32
    }

    pub fn record(&self, index: u32) -> Option<&PartitionRecord> {
        self.partitions.iter().find(|record| record.index == index)
    }

    pub fn partition_id(&self, index: u32) -> PartitionId {
        PartitionId::new(self.name.clone(), index)
    }

    /// Lowest index whose owner is missing or rejected by `is_active`.
    pub fn first_unavailable(&self, is_active: impl Fn(SocketAddr) -> bool) -> Option<u32> {
        self.partitions
            .iter()
            .find(|record| !record.owner.addr().is_some_and(&is_active))
            .map(|record| record.index)
    }

    /// Retrievable iff every partition has an owner that `is_active` accepts.
    pub fn is_retrievable(&self, is_active: impl Fn(SocketAddr) -> bool) -> bool {
        self.first_unavailable(is_active).is_none()
    }
}
