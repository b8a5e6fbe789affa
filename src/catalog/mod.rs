//! Partition Catalog
//!
//! Coordinator-side mapping from file name to its ordered partitions and the
//! storage node owning each one.
//!
//! ## Core Concepts
//! - **Single owner**: every partition lives on exactly one storage node.
//! - **Explicit orphaning**: when a node is evicted its records stay in place with
//!   [`types::PartitionOwner::Unowned`], making the file visibly unavailable rather
//!   than silently pointing at a dead address.
//! - **Cache, not truth**: sizes are refreshed from the owning node on every download.

pub mod catalog;
pub mod types;
