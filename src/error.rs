use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PartitionStoreError>;

#[derive(Error, Debug)]
pub enum PartitionStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("No storage node available")]
    NoStorageAvailable,

    #[error("An upload or delete of {0} is already in progress")]
    UploadInProgress(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Failed to write partition to {node}: {cause}")]
    PartitionWriteFailed { node: SocketAddr, cause: String },

    #[error("Upload incomplete: expected {expected} bytes, received {received}")]
    IncompleteUpload { expected: u64, received: u64 },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    #[error("Partition {index} unavailable")]
    PartitionUnavailable { index: u32 },

    #[error("Partition {index} reported invalid size {size}")]
    SizeMismatch { index: u32, size: i64 },

    #[error("Integrity error: expected {expected} bytes, got {actual}")]
    Integrity { expected: u64, actual: u64 },
}

/// Coarse classification used for logging and response decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Peer unreachable, reset or stalled. Aborts the single operation.
    Connection,
    /// Malformed or unexpected message. Aborts the connection.
    Protocol,
    /// No active storage nodes at upload time.
    Capacity,
    /// Declared size does not match the bytes actually transferred.
    Integrity,
    /// File or partition absent. Expected outcome, not logged as an error.
    NotFound,
}

impl PartitionStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_)
            | Self::Timeout(_)
            | Self::PartitionWriteFailed { .. }
            | Self::PartitionUnavailable { .. }
            | Self::Rejected(_) => ErrorKind::Connection,
            Self::Config(_) | Self::Protocol(_) | Self::InvalidName(_) => ErrorKind::Protocol,
            Self::NoStorageAvailable | Self::UploadInProgress(_) => ErrorKind::Capacity,
            Self::IncompleteUpload { .. } | Self::SizeMismatch { .. } | Self::Integrity { .. } => {
                ErrorKind::Integrity
            }
            Self::FileNotFound(_) | Self::PartitionNotFound(_) => ErrorKind::NotFound,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
