//! WAL file and record format.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Header: "EVWL" + ver (8) │
//! ├──────────────────────────┤
//! │ Record 1                 │
//! ├──────────────────────────┤
//! │ Record 2                 │
//! └──────────────────────────┘
//! ```
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! `Length` counts every byte after itself. The CRC covers the format version
//! and the payload. The payload is a MessagePack-encoded [`CommitBatch`].

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher;
use evstore_core::{Record, RecordKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic bytes identifying a WAL file
pub const WAL_MAGIC: [u8; 4] = *b"EVWL";

/// Current WAL file format version
pub const WAL_FILE_VERSION: u32 = 1;

/// Size of the file header in bytes
pub const WAL_HEADER_SIZE: usize = 8;

/// Current WAL record format version
pub const WAL_RECORD_FORMAT_VERSION: u8 = 1;

/// Bytes of framing around a payload: length + version + crc
pub const RECORD_OVERHEAD: usize = 4 + 1 + 4;

/// Errors decoding a WAL record
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WalRecordError {
    /// Fewer bytes than the record claims
    #[error("Insufficient data for WAL record")]
    InsufficientData,

    /// Framing is structurally invalid
    #[error("Invalid WAL record format")]
    InvalidFormat,

    /// Stored checksum does not match the content
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// CRC stored in the record
        expected: u32,
        /// CRC computed over the record content
        computed: u32,
    },

    /// Record written by an unknown format version
    #[error("Unsupported WAL record format version: {0}")]
    UnsupportedVersion(u8),

    /// Payload passed the checksum but could not be decoded
    #[error("Failed to decode WAL payload: {0}")]
    Payload(String),
}

/// One committed batch of row writes, the unit of WAL replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBatch {
    /// Commit version assigned by the table
    pub version: u64,
    /// Rows written by the commit, in application order
    pub writes: Vec<(RecordKey, Record)>,
}

impl CommitBatch {
    /// Encode as a framed WAL record
    pub fn to_bytes(&self) -> Result<Vec<u8>, WalRecordError> {
        let payload =
            rmp_serde::to_vec(self).map_err(|e| WalRecordError::Payload(e.to_string()))?;

        let body_len = 1 + payload.len() + 4;
        let length = u32::try_from(body_len).map_err(|_| WalRecordError::InvalidFormat)?;

        let mut buf = vec![0u8; 4 + body_len];
        LittleEndian::write_u32(&mut buf[0..4], length);
        buf[4] = WAL_RECORD_FORMAT_VERSION;
        buf[5..5 + payload.len()].copy_from_slice(&payload);
        let crc = compute_crc(&buf[4..5 + payload.len()]);
        LittleEndian::write_u32(&mut buf[5 + payload.len()..], crc);
        Ok(buf)
    }

    /// Decode one framed record from the front of `bytes`
    ///
    /// Returns the batch and the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), WalRecordError> {
        if bytes.len() < 4 {
            return Err(WalRecordError::InsufficientData);
        }
        let length = LittleEndian::read_u32(&bytes[0..4]) as usize;
        if length < 1 + 4 {
            return Err(WalRecordError::InvalidFormat);
        }
        let total = 4 + length;
        if bytes.len() < total {
            return Err(WalRecordError::InsufficientData);
        }

        let body = &bytes[4..total];
        let (content, crc_bytes) = body.split_at(length - 4);
        let expected = LittleEndian::read_u32(crc_bytes);
        let computed = compute_crc(content);
        if expected != computed {
            return Err(WalRecordError::ChecksumMismatch { expected, computed });
        }

        let version = content[0];
        if version != WAL_RECORD_FORMAT_VERSION {
            return Err(WalRecordError::UnsupportedVersion(version));
        }

        let batch: CommitBatch = rmp_serde::from_slice(&content[1..])
            .map_err(|e| WalRecordError::Payload(e.to_string()))?;
        Ok((batch, total))
    }
}

/// Declared total size of the record at the front of `bytes`, if readable
pub fn declared_record_size(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < 4 {
        return None;
    }
    Some(4 + LittleEndian::read_u32(&bytes[0..4]) as usize)
}

/// Encode the file header
pub fn header_bytes() -> [u8; WAL_HEADER_SIZE] {
    let mut bytes = [0u8; WAL_HEADER_SIZE];
    bytes[0..4].copy_from_slice(&WAL_MAGIC);
    LittleEndian::write_u32(&mut bytes[4..8], WAL_FILE_VERSION);
    bytes
}

/// Check a file header
pub fn is_valid_header(bytes: &[u8]) -> bool {
    bytes.len() >= WAL_HEADER_SIZE
        && bytes[0..4] == WAL_MAGIC
        && LittleEndian::read_u32(&bytes[4..8]) == WAL_FILE_VERSION
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
