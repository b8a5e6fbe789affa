use crate::error::{PartitionStoreError, Result};
use crate::protocol::codec::copy_exact;
use crate::protocol::types::{PartitionId, validate_file_name};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncRead;

/// On-disk partition files of one storage node:
/// `{base_path}/{file}.part{index}`.
///
/// The directory is the only source of truth. Nothing is cached in memory, so
/// enumeration can never drift from what is actually stored.
pub struct PartitionStore {
    base_path: PathBuf,
}

impl PartitionStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn partition_path(&self, id: &PartitionId) -> Result<PathBuf> {
        validate_file_name(&id.file)?;
        Ok(self.base_path.join(id.to_string()))
    }

    /// Streams exactly `size` bytes from `reader` into the partition file,
    /// replacing any previous content only once every byte is on disk.
    pub async fn store<R>(
        &self,
        id: &PartitionId,
        reader: &mut R,
        size: u64,
        buffer_size: usize,
        io_timeout: Duration,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let part_path = self.partition_path(id)?;
        let tmp_path = self
            .base_path
            .join(format!("{}.{}.tmp", id, uuid::Uuid::new_v4()));

        let mut file = fs::File::create(&tmp_path).await?;
        let copied = match copy_exact(reader, &mut file, size, buffer_size, io_timeout).await {
            Ok(copied) => copied,
            Err(e) => {
                drop(file);
                discard(&tmp_path).await;
                return Err(e);
            }
        };

        if copied < size {
            drop(file);
            discard(&tmp_path).await;
            return Err(PartitionStoreError::IncompleteUpload {
                expected: size,
                received: copied,
            });
        }

        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &part_path).await?;

        tracing::debug!("Stored {} ({} bytes)", id, size);
        Ok(())
    }

    /// Opens a partition for reading together with its current length.
    pub async fn open(&self, id: &PartitionId) -> Result<Option<(fs::File, u64)>> {
        let part_path = self.partition_path(id)?;
        match fs::File::open(&part_path).await {
            Ok(file) => {
                let len = file.metadata().await?.len();
                Ok(Some((file, len)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn size(&self, id: &PartitionId) -> Result<Option<u64>> {
        let part_path = self.partition_path(id)?;
        match fs::metadata(&part_path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns whether a file was actually removed. A missing partition is not
    /// an error.
    pub async fn delete(&self, id: &PartitionId) -> Result<bool> {
        let part_path = self.partition_path(id)?;
        match fs::remove_file(&part_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Scans the directory for partition files, sorted and deduplicated.
    /// In-flight temporary files are never reported.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        let mut entries = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if PartitionId::parse(&name).is_some() {
                names.insert(name);
            }
        }

        Ok(names.into_iter().collect())
    }

    /// Free bytes on the volume holding the partitions.
    pub fn available_space(&self) -> Result<u64> {
        Ok(fs2::available_space(&self.base_path)?)
    }
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        tracing::warn!("Failed to remove temporary file {}: {}", path.display(), e);
    }
}
