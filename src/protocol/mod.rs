//! Wire Protocol
//!
//! Byte-level framing shared by clients, the coordinator and storage nodes.
//! Every TCP connection carries exactly one command and its response.
//!
//! ## Framing
//! - **Strings**: `u16` big-endian byte length followed by UTF-8 bytes (commands, names, replies).
//! - **Flags**: a single byte, `0` or `1`.
//! - **Counts / indexes**: `i32` big-endian.
//! - **Sizes**: `i64` big-endian; `-1` is the "absent or unreadable" sentinel.
//! - **Payloads**: raw bytes, exactly as many as the preceding size announced.
//! - **Enumerations**: one string per item, closed by [`types::END_OF_LIST`].

pub mod codec;
pub mod types;
