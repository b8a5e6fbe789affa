//! Runtime Configuration
//!
//! Ports, intervals, timeouts and storage paths shared by the coordinator and the
//! storage nodes. Defaults match a LAN deployment where storage nodes announce
//! themselves every 2.5 seconds and are forgotten after a minute of silence.

use crate::error::{PartitionStoreError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CLIENT_PORT: u16 = 5000;
pub const DEFAULT_NODE_PORT: u16 = 5001;
pub const DEFAULT_BROADCAST_PORT: u16 = 7777;
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator port for client commands.
    pub client_port: u16,
    /// Storage node port for coordinator commands.
    pub node_port: u16,
    /// UDP port announcements are sent to and listened on.
    pub broadcast_port: u16,
    /// Destination of announcements and discovery probes.
    pub broadcast_addr: IpAddr,
    /// Local interface the TCP listeners bind to.
    pub bind_addr: IpAddr,
    /// Directory a storage node keeps its partitions in.
    pub data_dir: PathBuf,
    /// Chunk size for every streamed transfer.
    pub buffer_size: usize,
    /// Upper bound for any single socket operation.
    pub io_timeout: Duration,
    pub broadcast_interval: Duration,
    pub beacon_retry_backoff: Duration,
    pub discovery_interval: Duration,
    pub discovery_window: Duration,
    /// Send a `DISCOVER` probe at the start of each discovery window.
    pub discovery_probe: bool,
    pub health_check_interval: Duration,
    /// Silence after which a storage node is evicted.
    pub node_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_port: DEFAULT_CLIENT_PORT,
            node_port: DEFAULT_NODE_PORT,
            broadcast_port: DEFAULT_BROADCAST_PORT,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            data_dir: PathBuf::from("./slaveStorage"),
            buffer_size: DEFAULT_BUFFER_SIZE,
            io_timeout: Duration::from_secs(30),
            broadcast_interval: Duration::from_millis(2500),
            beacon_retry_backoff: Duration::from_secs(1),
            discovery_interval: Duration::from_millis(2500),
            discovery_window: Duration::from_millis(2500),
            discovery_probe: true,
            health_check_interval: Duration::from_secs(30),
            node_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(config_error("buffer_size must be greater than zero"));
        }

        for (name, port) in [
            ("client_port", self.client_port),
            ("node_port", self.node_port),
            ("broadcast_port", self.broadcast_port),
        ] {
            if port == 0 {
                return Err(config_error(&format!("{} must not be zero", name)));
            }
        }

        for (name, duration) in [
            ("io_timeout", self.io_timeout),
            ("broadcast_interval", self.broadcast_interval),
            ("discovery_interval", self.discovery_interval),
            ("discovery_window", self.discovery_window),
            ("health_check_interval", self.health_check_interval),
            ("node_timeout", self.node_timeout),
        ] {
            if duration.is_zero() {
                return Err(config_error(&format!("{} must not be zero", name)));
            }
        }

        Ok(())
    }
}

fn config_error(message: &str) -> PartitionStoreError {
    PartitionStoreError::Config(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client_port, 5000);
        assert_eq!(config.node_port, 5001);
        assert_eq!(config.broadcast_port, 7777);
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.node_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = Config {
            buffer_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            node_port: 0,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("node_port"));

        let config = Config {
            discovery_window: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
