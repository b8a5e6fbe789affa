use crate::error::{PartitionStoreError, Result};
use crate::protocol::codec::{WireStream, copy_exact};
use crate::protocol::types::{NodeCommand, PartitionId, SIZE_UNAVAILABLE, SUCCESS};

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Coordinator side of the storage node protocol. Opens one connection per
/// command.
#[derive(Debug, Clone, Copy)]
pub struct NodeClient {
    io_timeout: Duration,
    buffer_size: usize,
}

impl NodeClient {
    pub fn new(io_timeout: Duration, buffer_size: usize) -> Self {
        Self {
            io_timeout,
            buffer_size,
        }
    }

    async fn open(&self, addr: SocketAddr, command: NodeCommand) -> Result<WireStream<TcpStream>> {
        let mut wire = WireStream::connect(addr, self.io_timeout).await?;
        wire.write_string(command.as_str()).await?;
        Ok(wire)
    }

    async fn open_for(
        &self,
        addr: SocketAddr,
        command: NodeCommand,
        id: &PartitionId,
    ) -> Result<WireStream<TcpStream>> {
        let mut wire = self.open(addr, command).await?;
        wire.write_string(&id.file).await?;
        wire.write_index(id.index).await?;
        Ok(wire)
    }

    /// Streams `len` bytes from `source` into a partition on `addr` and waits
    /// for the node's acknowledgement.
    ///
    /// A source that ends early is `IncompleteUpload`; every other failure is
    /// reported as `PartitionWriteFailed` for that node.
    pub async fn store_partition<R>(
        &self,
        addr: SocketAddr,
        id: &PartitionId,
        source: &mut R,
        len: u64,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let write_failed = |e: PartitionStoreError| match e {
            e @ PartitionStoreError::IncompleteUpload { .. } => e,
            other => PartitionStoreError::PartitionWriteFailed {
                node: addr,
                cause: other.to_string(),
            },
        };

        let mut wire = self
            .open_for(addr, NodeCommand::StorePartition, id)
            .await
            .map_err(write_failed)?;
        wire.write_size(len).await.map_err(write_failed)?;

        let copied = copy_exact(source, wire.get_mut(), len, self.buffer_size, self.io_timeout)
            .await
            .map_err(write_failed)?;
        if copied < len {
            return Err(PartitionStoreError::IncompleteUpload {
                expected: len,
                received: copied,
            });
        }

        let ack = wire.read_string().await.map_err(write_failed)?;
        if ack != SUCCESS {
            return Err(write_failed(PartitionStoreError::Rejected(ack)));
        }

        tracing::debug!("Partition {} ({} bytes) acknowledged by {}", id, len, addr);
        Ok(())
    }

    /// Streams a partition from `addr` into `sink`. The node must report and
    /// deliver exactly `expected` bytes.
    pub async fn retrieve_partition<W>(
        &self,
        addr: SocketAddr,
        id: &PartitionId,
        sink: &mut W,
        expected: u64,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut wire = self.open_for(addr, NodeCommand::RetrievePartition, id).await?;
        wire.flush().await?;

        if !wire.read_bool().await? {
            return Err(PartitionStoreError::PartitionNotFound(id.to_string()));
        }

        let size = wire.read_size().await?;
        if size != expected {
            return Err(PartitionStoreError::Integrity {
                expected,
                actual: size,
            });
        }

        let received = copy_exact(wire.get_mut(), sink, size, self.buffer_size, self.io_timeout).await?;
        if received < size {
            return Err(PartitionStoreError::Integrity {
                expected: size,
                actual: received,
            });
        }

        Ok(received)
    }

    /// Raw `GET_PARTITION_SIZE` answer, `-1` meaning absent or unreadable.
    pub async fn partition_size(&self, addr: SocketAddr, id: &PartitionId) -> Result<i64> {
        let mut wire = self.open_for(addr, NodeCommand::GetPartitionSize, id).await?;
        wire.flush().await?;
        wire.read_i64().await
    }

    pub async fn free_space(&self, addr: SocketAddr) -> Result<Option<u64>> {
        let mut wire = self.open(addr, NodeCommand::GetSpace).await?;
        wire.flush().await?;

        let space = wire.read_i64().await?;
        if space == SIZE_UNAVAILABLE {
            return Ok(None);
        }
        Ok(u64::try_from(space).ok())
    }

    /// Identifiers held by `addr`. Entries that are not partition names are
    /// skipped.
    pub async fn list_partitions(&self, addr: SocketAddr) -> Result<Vec<PartitionId>> {
        let mut wire = self.open(addr, NodeCommand::ListPartitions).await?;
        wire.flush().await?;

        let names = wire.read_list().await?;
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            match PartitionId::parse(&name) {
                Some(id) => ids.push(id),
                None => tracing::debug!("Ignoring unrecognised entry {:?} from {}", name, addr),
            }
        }

        Ok(ids)
    }

    pub async fn delete_partition(&self, addr: SocketAddr, id: &PartitionId) -> Result<()> {
        let mut wire = self.open_for(addr, NodeCommand::DeletePartition, id).await?;
        wire.flush().await?;

        let ack = wire.read_string().await?;
        if ack != SUCCESS {
            return Err(PartitionStoreError::Rejected(ack));
        }
        Ok(())
    }
}
