//! Partition Store Library
//!
//! Splits files into partitions, scatters them across a pool of storage nodes that
//! announce themselves over UDP broadcast, and reassembles them on demand.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`protocol`**: The length-prefixed wire format and partition naming shared by every peer.
//! - **`storage`**: The storage node. Persists, serves and deletes partition files and
//!   reports free space.
//! - **`membership`**: Broadcast discovery, the coordinator's node registry and the
//!   health monitor that evicts silent nodes.
//! - **`catalog`**: File name to ordered partitions and their owning nodes.
//! - **`coordinator`**: Placement, upload, download and delete orchestration behind the
//!   client port.
//! - **`client`**: A programmatic client for the coordinator.
//! - **`events`**: Snapshot notifications for front-ends.
//! - **`shutdown`**: The stop flag shared by background loops.

pub mod catalog;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod membership;
pub mod protocol;
pub mod shutdown;
pub mod storage;
