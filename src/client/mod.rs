//! Client Session
//!
//! Programmatic client for the coordinator's client port. Every call opens its
//! own connection, sends one command and reads the reply.

use crate::error::{PartitionStoreError, Result};
use crate::protocol::codec::{WireStream, copy_exact};
use crate::protocol::types::{ClientCommand, SIZE_UNAVAILABLE, SUCCESS};

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Result of a download request that reached the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Every byte was received.
    Downloaded(u64),
    NotFound,
    /// The file is catalogued but a partition cannot be served right now.
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct ClientSession {
    addr: SocketAddr,
    io_timeout: Duration,
    buffer_size: usize,
}

impl ClientSession {
    pub fn new(addr: SocketAddr, io_timeout: Duration, buffer_size: usize) -> Self {
        Self {
            addr,
            io_timeout,
            buffer_size,
        }
    }

    async fn open(&self, command: ClientCommand) -> Result<WireStream<TcpStream>> {
        let mut wire = WireStream::connect(self.addr, self.io_timeout).await?;
        wire.write_string(command.as_str()).await?;
        Ok(wire)
    }

    /// Sends `size` bytes read from `source` as file `name`.
    pub async fn upload<R>(&self, name: &str, size: u64, source: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut wire = self.open(ClientCommand::Upload).await?;
        wire.write_string(name).await?;
        wire.write_size(size).await?;

        let sent = copy_exact(source, wire.get_mut(), size, self.buffer_size, self.io_timeout).await?;
        if sent < size {
            return Err(PartitionStoreError::IncompleteUpload {
                expected: size,
                received: sent,
            });
        }

        let reply = wire.read_string().await?;
        if reply != SUCCESS {
            return Err(PartitionStoreError::Rejected(reply));
        }

        tracing::info!("Uploaded {} ({} bytes)", name, size);
        Ok(())
    }

    /// Uploads a local file under its own file name. Returns the size sent.
    pub async fn upload_file(&self, path: &Path) -> Result<u64> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PartitionStoreError::InvalidName(path.display().to_string()))?;

        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        self.upload(name, size, &mut file).await?;
        Ok(size)
    }

    /// Streams `name` into `sink`.
    ///
    /// A stream that ends before the announced size is an `Integrity` error;
    /// whatever reached `sink` must then be discarded.
    pub async fn download<W>(&self, name: &str, sink: &mut W) -> Result<DownloadOutcome>
    where
        W: AsyncWrite + Unpin,
    {
        let mut wire = self.open(ClientCommand::Download).await?;
        wire.write_string(name).await?;
        wire.flush().await?;

        if !wire.read_bool().await? {
            return Ok(DownloadOutcome::NotFound);
        }

        let size = match wire.read_i64().await? {
            SIZE_UNAVAILABLE => return Ok(DownloadOutcome::Unavailable),
            size if size < 0 => {
                return Err(PartitionStoreError::Protocol(format!(
                    "invalid file size {}",
                    size
                )));
            }
            size => size as u64,
        };

        let received = copy_exact(wire.get_mut(), sink, size, self.buffer_size, self.io_timeout).await?;
        if received < size {
            return Err(PartitionStoreError::Integrity {
                expected: size,
                actual: received,
            });
        }

        Ok(DownloadOutcome::Downloaded(received))
    }

    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut wire = self.open(ClientCommand::ListFiles).await?;
        wire.flush().await?;
        wire.read_list().await
    }

    /// Returns `false` when the coordinator did not know the file.
    pub async fn delete_file(&self, name: &str) -> Result<bool> {
        let mut wire = self.open(ClientCommand::DeleteFile).await?;
        wire.write_string(name).await?;
        wire.flush().await?;
        Ok(wire.read_string().await? == SUCCESS)
    }
}
