use crate::error::{PartitionStoreError, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Runs a socket operation under a deadline. Expiry is a transfer failure.
pub async fn with_timeout<T, F>(io_timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(io_timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(PartitionStoreError::Timeout(io_timeout)),
    }
}

/// A framed, deadline-bound view over one connection.
pub struct WireStream<S> {
    inner: S,
    io_timeout: Duration,
}

impl WireStream<TcpStream> {
    pub async fn connect(addr: SocketAddr, io_timeout: Duration) -> Result<Self> {
        let stream = with_timeout(io_timeout, TcpStream::connect(addr)).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, io_timeout))
    }
}

impl<S> WireStream<S> {
    pub fn new(inner: S, io_timeout: Duration) -> Self {
        Self { inner, io_timeout }
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> WireStream<S> {
    pub async fn read_string(&mut self) -> Result<String> {
        let len = with_timeout(self.io_timeout, self.inner.read_u16()).await?;
        let mut buf = vec![0u8; len as usize];
        with_timeout(self.io_timeout, self.inner.read_exact(&mut buf)).await?;
        String::from_utf8(buf)
            .map_err(|e| PartitionStoreError::Protocol(format!("string is not UTF-8: {}", e)))
    }

    pub async fn read_bool(&mut self) -> Result<bool> {
        match with_timeout(self.io_timeout, self.inner.read_u8()).await? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(PartitionStoreError::Protocol(format!(
                "invalid boolean byte {}",
                other
            ))),
        }
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        with_timeout(self.io_timeout, self.inner.read_i32()).await
    }

    pub async fn read_i64(&mut self) -> Result<i64> {
        with_timeout(self.io_timeout, self.inner.read_i64()).await
    }

    /// Reads a 1-based partition index.
    pub async fn read_index(&mut self) -> Result<u32> {
        let raw = self.read_i32().await?;
        if raw < 1 {
            return Err(PartitionStoreError::Protocol(format!(
                "invalid partition index {}",
                raw
            )));
        }
        Ok(raw as u32)
    }

    /// Reads a non-negative byte count.
    pub async fn read_size(&mut self) -> Result<u64> {
        let raw = self.read_i64().await?;
        u64::try_from(raw)
            .map_err(|_| PartitionStoreError::Protocol(format!("invalid size {}", raw)))
    }

    /// Collects strings until the end-of-list marker.
    pub async fn read_list(&mut self) -> Result<Vec<String>> {
        let mut items = Vec::new();
        loop {
            let item = self.read_string().await?;
            if item == super::types::END_OF_LIST {
                return Ok(items);
            }
            items.push(item);
        }
    }
}

impl<S: AsyncWrite + Unpin> WireStream<S> {
    pub async fn write_string(&mut self, value: &str) -> Result<()> {
        let bytes = value.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| {
            PartitionStoreError::Protocol(format!("string of {} bytes too long", bytes.len()))
        })?;

        let mut frame = Vec::with_capacity(2 + bytes.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(bytes);
        with_timeout(self.io_timeout, self.inner.write_all(&frame)).await
    }

    pub async fn write_bool(&mut self, value: bool) -> Result<()> {
        with_timeout(self.io_timeout, self.inner.write_u8(value as u8)).await
    }

    pub async fn write_i32(&mut self, value: i32) -> Result<()> {
        with_timeout(self.io_timeout, self.inner.write_i32(value)).await
    }

    pub async fn write_i64(&mut self, value: i64) -> Result<()> {
        with_timeout(self.io_timeout, self.inner.write_i64(value)).await
    }

    pub async fn write_index(&mut self, index: u32) -> Result<()> {
        let raw = i32::try_from(index).map_err(|_| {
            PartitionStoreError::Protocol(format!("partition index {} out of range", index))
        })?;
        self.write_i32(raw).await
    }

    pub async fn write_size(&mut self, size: u64) -> Result<()> {
        let raw = i64::try_from(size)
            .map_err(|_| PartitionStoreError::Protocol(format!("size {} out of range", size)))?;
        self.write_i64(raw).await
    }

    /// Writes every item followed by the end-of-list marker.
    pub async fn write_list<I, T>(&mut self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        for item in items {
            self.write_string(item.as_ref()).await?;
        }
        self.write_string(super::types::END_OF_LIST).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        with_timeout(self.io_timeout, self.inner.flush()).await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        with_timeout(self.io_timeout, self.inner.shutdown()).await
    }
}

/// Copies up to `len` bytes in `buffer_size` chunks.
///
/// Returns the number of bytes copied; less than `len` means the reader hit
/// end of stream first. Each read and write is individually bounded by
/// `io_timeout`.
pub async fn copy_exact<R, W>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
    buffer_size: usize,
    io_timeout: Duration,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut remaining = len;

    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let read = with_timeout(io_timeout, reader.read(&mut buf[..want])).await?;
        if read == 0 {
            break;
        }
        with_timeout(io_timeout, writer.write_all(&buf[..read])).await?;
        remaining -= read as u64;
    }

    with_timeout(io_timeout, writer.flush()).await?;
    Ok(len - remaining)
}
