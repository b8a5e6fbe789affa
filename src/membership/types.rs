use serde::Serialize;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Instant;

/// Prefix of a storage node announcement.
pub const READY_MESSAGE: &str = "READY";
/// Prefix of the coordinator's optional discovery probe.
pub const DISCOVER_MESSAGE: &str = "DISCOVER";

/// A storage node as seen by the coordinator.
///
/// Identity is the socket address: the announcing host plus the TCP port it
/// advertised.
#[derive(Debug, Clone, Serialize)]
pub struct StorageNode {
    pub addr: SocketAddr,

    #[serde(skip)]
    pub last_seen: Instant,

    /// Sender clock (ms since epoch) carried by the latest announcement.
    pub announced_at: u64,
    /// `None` until the node answers a `GET_SPACE` query.
    pub free_space: Option<u64>,
    /// Partition identifiers from the node's latest `LIST_PARTITIONS` reply.
    pub partitions: BTreeSet<String>,
}

impl StorageNode {
    pub fn new(addr: SocketAddr, announced_at: u64) -> Self {
        Self {
            addr,
            last_seen: Instant::now(),
            announced_at,
            free_space: None,
            partitions: BTreeSet::new(),
        }
    }
}

/// Outcome of [`super::registry::NodeRegistry::register_or_refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Refreshed,
}

/// The UDP datagram a storage node broadcasts: `READY:<port>:<timestamp>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub port: u16,
    pub timestamp: u64,
}

impl Announcement {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            timestamp: now_ms(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}:{}", READY_MESSAGE, self.port, self.timestamp)
    }

    /// Returns `None` for anything that is not a well-formed announcement.
    /// A missing timestamp is tolerated.
    pub fn parse(text: &str) -> Option<Self> {
        let mut fields = text.trim().split(':');
        if fields.next()? != READY_MESSAGE {
            return None;
        }

        let port: u16 = fields.next()?.parse().ok()?;
        if port == 0 {
            return None;
        }

        let timestamp = match fields.next() {
            Some(raw) => raw.parse().ok()?,
            None => 0,
        };

        Some(Self { port, timestamp })
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
