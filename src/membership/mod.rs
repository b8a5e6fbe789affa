//! Membership & Discovery Module
//!
//! Keeps the coordinator's view of which storage nodes exist, without any static
//! node list.
//!
//! ## Core Mechanisms
//! - **Beacon**: every storage node broadcasts `READY:<port>:<timestamp>` over UDP on a fixed period.
//! - **Listener**: the coordinator repeatedly collects announcements for a short window and
//!   registers every sender, so late starters are picked up without a restart.
//! - **Health Monitor**: nodes silent for longer than the timeout are evicted, and the
//!   partitions they owned become unowned in the same step.

pub mod discovery;
pub mod registry;
pub mod types;
