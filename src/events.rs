//! Observer channel for front-ends.
//!
//! The core never calls into a UI. Every change to the file list, the node list
//! or a storage node's local holdings is published as a [`ClusterEvent`] carrying
//! the full current snapshot; observers subscribe and render it however they like.

use crate::membership::types::StorageNode;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "snapshot")]
pub enum ClusterEvent {
    /// Catalogued file names, sorted.
    FilesChanged(Vec<String>),
    /// Active storage nodes, sorted by address.
    NodesChanged(Vec<StorageNode>),
    /// Partition identifiers held on a storage node's disk.
    PartitionsChanged(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClusterEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.tx.subscribe()
    }

    /// Publishing without subscribers is not an error.
    pub fn publish(&self, event: ClusterEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_snapshot() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ClusterEvent::FilesChanged(vec!["a.bin".to_string()]));

        match rx.recv().await.unwrap() {
            ClusterEvent::FilesChanged(files) => assert_eq!(files, vec!["a.bin".to_string()]),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(ClusterEvent::PartitionsChanged(vec![]));
    }

    #[test]
    fn test_event_json_shape() {
        let event = ClusterEvent::FilesChanged(vec!["x".to_string()]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "FilesChanged");
        assert_eq!(json["snapshot"][0], "x");
    }
}
