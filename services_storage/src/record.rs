//! Record keys, the store contract and on-disk framing

use core_types::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Name of one durable record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    /// Policy snapshot of one user
    User(UserId),
    /// Device and profile owner state
    Owners,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::User(user) => write!(f, "{}", user),
            RecordKey::Owners => write!(f, "owners"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("record {key} not found")]
    NotFound { key: RecordKey },

    #[error("record {key} is corrupt: {detail}")]
    Corrupt { key: RecordKey, detail: String },

    #[error("I/O failure on record {key}: {detail}")]
    Io { key: RecordKey, detail: String },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Whole-record durable storage
///
/// A successful `write` is durable and atomic: a later `read`, including one
/// after a crash, returns either these bytes or the previous ones. A failed
/// `write` leaves the previous record readable.
pub trait RecordStore: Send + Sync {
    fn write(&self, key: RecordKey, bytes: &[u8]) -> Result<(), StorageError>;

    /// Reads the newest valid copy; `NotFound` when no copy exists
    fn read(&self, key: RecordKey) -> Result<Vec<u8>, StorageError>;

    /// Removes every copy; deleting an absent record succeeds
    fn delete(&self, key: RecordKey) -> Result<(), StorageError>;
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn write(&self, key: RecordKey, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).write(key, bytes)
    }

    fn read(&self, key: RecordKey) -> Result<Vec<u8>, StorageError> {
        (**self).read(key)
    }

    fn delete(&self, key: RecordKey) -> Result<(), StorageError> {
        (**self).delete(key)
    }
}

impl<S: RecordStore + ?Sized> RecordStore for Box<S> {
    fn write(&self, key: RecordKey, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).write(key, bytes)
    }

    fn read(&self, key: RecordKey) -> Result<Vec<u8>, StorageError> {
        (**self).read(key)
    }

    fn delete(&self, key: RecordKey) -> Result<(), StorageError> {
        (**self).delete(key)
    }
}

const FRAME_MAGIC: &[u8; 4] = b"DPJ1";
const FRAME_HEADER_LEN: usize = 12;

/// Wraps a payload as `magic | len | crc32 | payload`
pub(crate) fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(FRAME_MAGIC);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Validates a frame and returns its payload
pub(crate) fn decode_frame(frame: &[u8]) -> Result<&[u8], String> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(format!("truncated header ({} bytes)", frame.len()));
    }
    if &frame[0..4] != FRAME_MAGIC {
        return Err("bad magic".to_string());
    }
    let len = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
    let crc = u32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]);
    let payload = &frame[FRAME_HEADER_LEN..];
    if payload.len() != len {
        return Err(format!(
            "length mismatch (header {}, actual {})",
            len,
            payload.len()
        ));
    }
    if crc32fast::hash(payload) != crc {
        return Err("checksum mismatch".to_string());
    }
    Ok(payload)
}
