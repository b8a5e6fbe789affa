//! Storage Node Module
//!
//! The storage-node side of the system: partitions persisted as plain files in
//! a local directory and served over the node-facing TCP port.
//!
//! ## Core Concepts
//! - **Partition files**: `<file>.part<index>`, written through a temporary file and
//!   renamed into place only after every byte is synced to disk.
//! - **One command per connection**: store, retrieve, size, space, list or delete.
//! - **Disk is the truth**: enumeration rescans the directory on every request.

pub mod partition_store;
pub mod service;
