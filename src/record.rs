//! Binary record codec.
//!
//! Every record is a fixed 29-byte header followed by the key and value
//! bytes, all integers little-endian:
//!
//! ```text
//! +----------+----------------+--------------+-------------+---------------+-----+-------+
//! | CRC (4B) | Timestamp (8B) | Tombstone(1B)| KeySize (8B)| ValueSize (8B)| Key | Value |
//! +----------+----------------+--------------+-------------+---------------+-----+-------+
//! ```
//!
//! The CRC is CRC-32 (IEEE) over the value bytes only. This leaves the
//! header and key unprotected; the format is kept as-is for compatibility
//! with existing segment files, so corruption there surfaces as a length or
//! tombstone check failure rather than a checksum mismatch.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{Entry, WalError};

const CRC_SIZE: usize = 4;
const TIMESTAMP_SIZE: usize = 8;
const TOMBSTONE_SIZE: usize = 1;
const LEN_SIZE: usize = 8;

/// Fixed byte length of the record header preceding the key/value payload.
pub const HEADER_SIZE: usize = CRC_SIZE + TIMESTAMP_SIZE + TOMBSTONE_SIZE + 2 * LEN_SIZE;

const TIMESTAMP_OFFSET: usize = CRC_SIZE;
const TOMBSTONE_OFFSET: usize = TIMESTAMP_OFFSET + TIMESTAMP_SIZE;
const KEY_LEN_OFFSET: usize = TOMBSTONE_OFFSET + TOMBSTONE_SIZE;
const VALUE_LEN_OFFSET: usize = KEY_LEN_OFFSET + LEN_SIZE;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Encode one record into a fresh buffer.
pub fn encode(key: &[u8], value: &[u8], deleted: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + key.len() + value.len());
    encode_into(&mut buf, key, value, deleted);
    buf
}

/// Encode one record onto the end of `buf`. Batches concatenate records by
/// calling this repeatedly on a single buffer.
pub fn encode_into(buf: &mut Vec<u8>, key: &[u8], value: &[u8], deleted: bool) {
    buf.extend_from_slice(&crc32fast::hash(value).to_le_bytes());
    buf.extend_from_slice(&unix_now().to_le_bytes());
    buf.push(deleted as u8);
    buf.extend_from_slice(&(key.len() as u64).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}

/// Decode a full segment's byte stream into records.
///
/// An empty input yields an empty vec. Any truncated header or payload,
/// CRC mismatch, or invalid tombstone byte fails the whole call with
/// [`WalError::CorruptRecord`]; use [`records`] directly to salvage the
/// records that precede the corruption.
pub fn decode(data: &[u8]) -> Result<Vec<Entry>, WalError> {
    records(data).collect()
}

/// Streaming decoder over a segment's byte stream. Yields records front to
/// back and stops after the first error.
pub fn records(data: &[u8]) -> RecordIter<'_> {
    RecordIter {
        data,
        pos: 0,
        failed: false,
    }
}

pub struct RecordIter<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> RecordIter<'a> {
    fn next_entry(&mut self) -> Result<Entry, WalError> {
        let rec = &self.data[self.pos..];
        if rec.len() < HEADER_SIZE {
            return Err(WalError::CorruptRecord(format!(
                "truncated header at offset {} ({} of {HEADER_SIZE} bytes)",
                self.pos,
                rec.len(),
            )));
        }

        let crc = u32::from_le_bytes(rec[..CRC_SIZE].try_into().unwrap());
        let timestamp =
            u64::from_le_bytes(rec[TIMESTAMP_OFFSET..TOMBSTONE_OFFSET].try_into().unwrap());
        let tombstone = rec[TOMBSTONE_OFFSET];
        let key_len = u64::from_le_bytes(rec[KEY_LEN_OFFSET..VALUE_LEN_OFFSET].try_into().unwrap());
        let value_len =
            u64::from_le_bytes(rec[VALUE_LEN_OFFSET..HEADER_SIZE].try_into().unwrap());

        let deleted = match tombstone {
            0 => false,
            1 => true,
            other => {
                return Err(WalError::CorruptRecord(format!(
                    "invalid tombstone byte {other} at offset {}",
                    self.pos + TOMBSTONE_OFFSET,
                )));
            }
        };

        let payload = &rec[HEADER_SIZE..];
        let payload_len = key_len
            .checked_add(value_len)
            .filter(|n| *n <= payload.len() as u64)
            .ok_or_else(|| {
                WalError::CorruptRecord(format!(
                    "truncated payload at offset {}: header claims {key_len}+{value_len} bytes, {} remain",
                    self.pos,
                    payload.len(),
                ))
            })?;

        let key = &payload[..key_len as usize];
        let value = &payload[key_len as usize..payload_len as usize];
        if crc32fast::hash(value) != crc {
            return Err(WalError::CorruptRecord(format!(
                "CRC mismatch at offset {}",
                self.pos,
            )));
        }

        self.pos += HEADER_SIZE + payload_len as usize;
        Ok(Entry {
            crc,
            timestamp,
            deleted,
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<Entry, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        let res = self.next_entry();
        if res.is_err() {
            self.failed = true;
        }
        Some(res)
    }
}
