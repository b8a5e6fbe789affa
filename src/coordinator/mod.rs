//! Coordinator Module
//!
//! The client-facing side of the cluster. Accepts uploads, downloads, listings and
//! deletes on the client port and turns them into partition traffic with the
//! storage nodes.
//!
//! ## Core Concepts
//! - **Placement**: a file of `size` bytes over `k` usable nodes becomes
//!   `min(k, size)` contiguous partitions, one per node in address order, with the
//!   last partition absorbing the remainder.
//! - **Upload**: partitions are written in order and acknowledged one by one. The
//!   catalog only learns about a file once every partition is on disk; a failed
//!   upload rolls back what it already wrote.
//! - **Download**: every partition is resolved to a live owner and sized before the
//!   first byte goes out, so an unavailable file is reported up front instead of
//!   being cut short.
//! - **Node Client**: one short-lived connection per storage node command.

pub mod download;
pub mod node_client;
pub mod placement;
pub mod service;
pub mod upload;

#[cfg(test)]
mod tests;
