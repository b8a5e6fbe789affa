use crate::error::{PartitionStoreError, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

// --- Replies & markers ---

/// Closes every enumeration.
pub const END_OF_LIST: &str = "END_OF_LIST";
/// Positive acknowledgement.
pub const SUCCESS: &str = "SUCCESS";
/// Generic failure reply for `DELETE_FILE`.
pub const ERROR: &str = "ERROR";
/// Size sentinel for an absent, unreadable or unavailable partition or file.
pub const SIZE_UNAVAILABLE: i64 = -1;

static PARTITION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<file>.+)\.part(?P<index>[0-9]+)$").unwrap());

/// Commands a client sends to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Upload,
    Download,
    ListFiles,
    DeleteFile,
}

impl ClientCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "UPLOAD",
            Self::Download => "DOWNLOAD",
            Self::ListFiles => "LIST_FILES",
            Self::DeleteFile => "DELETE_FILE",
        }
    }
}

impl FromStr for ClientCommand {
    type Err = PartitionStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UPLOAD" => Ok(Self::Upload),
            "DOWNLOAD" => Ok(Self::Download),
            "LIST_FILES" => Ok(Self::ListFiles),
            "DELETE_FILE" => Ok(Self::DeleteFile),
            other => Err(PartitionStoreError::Protocol(format!(
                "unknown client command {:?}",
                other
            ))),
        }
    }
}

/// Commands the coordinator sends to a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCommand {
    StorePartition,
    RetrievePartition,
    GetPartitionSize,
    GetSpace,
    ListPartitions,
    DeletePartition,
}

impl NodeCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StorePartition => "STORE_PARTITION",
            Self::RetrievePartition => "RETRIEVE_PARTITION",
            Self::GetPartitionSize => "GET_PARTITION_SIZE",
            Self::GetSpace => "GET_SPACE",
            Self::ListPartitions => "LIST_PARTITIONS",
            Self::DeletePartition => "DELETE_PARTITION",
        }
    }
}

impl FromStr for NodeCommand {
    type Err = PartitionStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STORE_PARTITION" => Ok(Self::StorePartition),
            "RETRIEVE_PARTITION" => Ok(Self::RetrievePartition),
            "GET_PARTITION_SIZE" => Ok(Self::GetPartitionSize),
            "GET_SPACE" => Ok(Self::GetSpace),
            "LIST_PARTITIONS" => Ok(Self::ListPartitions),
            "DELETE_PARTITION" => Ok(Self::DeletePartition),
            other => Err(PartitionStoreError::Protocol(format!(
                "unknown node command {:?}",
                other
            ))),
        }
    }
}

/// Identity of one partition: `(file name, 1-based index)`.
///
/// Rendered as `<file>.part<index>`, which is both the on-disk file name on a
/// storage node and the identifier reported by `LIST_PARTITIONS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId {
    pub file: String,
    pub index: u32,
}

impl PartitionId {
    pub fn new(file: impl Into<String>, index: u32) -> Self {
        Self {
            file: file.into(),
            index,
        }
    }

    /// Parses an on-disk identifier. Returns `None` for anything that is not a
    /// valid partition name.
    pub fn parse(name: &str) -> Option<Self> {
        let caps = PARTITION_NAME.captures(name)?;
        let index: u32 = caps["index"].parse().ok()?;
        if index == 0 {
            return None;
        }
        Some(Self::new(&caps["file"], index))
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.part{}", self.file, self.index)
    }
}

/// Rejects names that could escape a storage directory or break framing.
pub fn validate_file_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.len() > u16::MAX as usize - 16;

    if invalid {
        return Err(PartitionStoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
