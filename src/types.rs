use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed segment name '{0}'")]
    MalformedName(String),
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
    #[error("no segment with index {0}")]
    SegmentNotFound(i64),
    #[error("wal is not open")]
    NotOpen,
}

/// A single key/value change handed to [`WalWriter::set`]. Keys and values
/// are opaque byte strings; `deleted` marks the record as a tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub deleted: bool,
}

impl Mutation {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            deleted: false,
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            deleted: true,
        }
    }
}

/// A record decoded back out of a segment, header fields included.
///
/// `crc` covers the value bytes only and `timestamp` is the unix time in
/// seconds at which the record was encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub crc: u32,
    pub timestamp: u64,
    pub deleted: bool,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

pub trait Wal: WalReader + WalWriter + Send + Sync {}
impl<W> Wal for W where W: WalReader + WalWriter + Send + Sync {}

#[async_trait::async_trait]
pub trait WalCommon: Send + Sync {
    /// Flush the tail segment's mapped bytes to durable storage.
    async fn io_sync(&self) -> Result<(), WalError>;
}

#[async_trait::async_trait]
pub trait WalReader: WalCommon + Send + Sync {
    /// Return the raw bytes of the segment holding `index`.
    ///
    /// Indices at or above the tail index resolve to the tail segment and
    /// are served from its memory map; sealed segments are served from the
    /// read cache or a full file read.
    async fn read(&self, index: i64) -> Result<Vec<u8>, WalError>;

    /// Like [`WalReader::read`], but decodes the bytes into records.
    async fn read_converted(&self, index: i64) -> Result<Vec<Entry>, WalError>;
}

#[async_trait::async_trait]
pub trait WalWriter: WalCommon + Send + Sync {
    /// Durably append a batch of mutations as one contiguous region of the
    /// tail segment.
    async fn set(&self, batch: &[Mutation]) -> Result<(), WalError>;
}
