use super::types::{FileCatalogEntry, PartitionOwner};
use crate::events::{ClusterEvent, EventBus};
use crate::protocol::types::PartitionId;

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Concurrency-safe file catalog. Every mutation touches exactly one file entry,
/// so unrelated uploads, downloads and deletes never wait on each other.
pub struct PartitionCatalog {
    files: DashMap<String, FileCatalogEntry>,
    events: EventBus,
}

impl PartitionCatalog {
    pub fn new(events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            files: DashMap::new(),
            events,
        })
    }

    /// Commits a fully uploaded file, returning the entry it replaced.
    pub fn insert(&self, entry: FileCatalogEntry) -> Option<FileCatalogEntry> {
        let name = entry.name.clone();
        let previous = self.files.insert(name.clone(), entry);

        tracing::info!("Catalogued file {}", name);
        self.publish_files();
        previous
    }

    pub fn get(&self, name: &str) -> Option<FileCatalogEntry> {
        self.files.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<FileCatalogEntry> {
        let removed = self.files.remove(name).map(|(_, entry)| entry);
        if removed.is_some() {
            tracing::info!("Removed file {} from catalog", name);
            self.publish_files();
        }
        removed
    }

    /// Catalogued file names, sorted.
    pub fn list_files(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Drops every file. Used when the coordinator stops.
    pub fn clear(&self) {
        self.files.clear();
        self.publish_files();
    }

    /// Marks every partition owned by `addr` as unowned. Returns how many
    /// records changed.
    pub fn orphan_owner(&self, addr: SocketAddr) -> usize {
        let mut orphaned = 0;

        for mut entry in self.files.iter_mut() {
            for record in entry.value_mut().partitions.iter_mut() {
                if record.owner == PartitionOwner::Assigned(addr) {
                    record.owner = PartitionOwner::Unowned;
                    orphaned += 1;
                }
            }
        }

        orphaned
    }

    /// Re-attaches unowned records to `addr` for every partition the node
    /// reports holding. Records that still have an owner are left alone, and
    /// partitions of files the catalog does not know are ignored.
    pub fn adopt(&self, addr: SocketAddr, held: &[PartitionId]) -> usize {
        let mut adopted = 0;

        for id in held {
            if let Some(mut entry) = self.files.get_mut(&id.file)
                && let Some(record) = entry
                    .partitions
                    .iter_mut()
                    .find(|record| record.index == id.index)
                && record.owner == PartitionOwner::Unowned
            {
                record.owner = PartitionOwner::Assigned(addr);
                adopted += 1;
                tracing::info!("Partition {} re-attached to {}", id, addr);
            }
        }

        adopted
    }

    /// Refreshes the cached size of one partition.
    pub fn update_size(&self, name: &str, index: u32, size: u64) {
        if let Some(mut entry) = self.files.get_mut(name)
            && let Some(record) = entry
                .partitions
                .iter_mut()
                .find(|record| record.index == index)
        {
            record.size = size;
        }
    }

    fn publish_files(&self) {
        self.events
            .publish(ClusterEvent::FilesChanged(self.list_files()));
    }
}
