//! Segment header and record frame format.
//!
//! # Segment Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Segment Header (16 bytes)          │
//! ├────────────────────────────────────┤
//! │ Record frame 1                     │
//! ├────────────────────────────────────┤
//! │ Record frame 2                     │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! # Record Frame Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬──────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ MessagePack Record (var) │ CRC32 (4)│
//! └─────────────────┴──────────────────┴──────────────────────────┴──────────┘
//! ```
//!
//! The length covers version + payload + CRC. The CRC covers version + payload.

use super::segment_name::SegmentKind;
use crc32fast::Hasher;
use doclog_core::Record;

/// Magic bytes identifying a segment file: "DLOG"
pub const SEGMENT_MAGIC: [u8; 4] = *b"DLOG";

/// Current segment format version
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of segment header in bytes
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Current record frame format version
pub const RECORD_FORMAT_VERSION: u8 = 1;

/// Frames larger than this are treated as corruption rather than data.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Segment header (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes: "DLOG"
    pub magic: [u8; 4],

    /// Format version for forward compatibility
    pub format_version: u32,

    /// Kind of segment this file holds
    pub kind: SegmentKind,
}

impl SegmentHeader {
    /// Create a header for a new segment.
    pub fn new(kind: SegmentKind) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            kind,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8] = self.kind.tag();
        bytes
    }

    /// Deserialize and validate a header.
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Result<Self, FrameError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if magic != SEGMENT_MAGIC {
            return Err(FrameError::BadMagic);
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..8]);
        let format_version = u32::from_le_bytes(version);
        if format_version != SEGMENT_FORMAT_VERSION {
            return Err(FrameError::UnsupportedSegmentVersion(format_version));
        }

        let kind = SegmentKind::from_tag(bytes[8]).ok_or(FrameError::UnknownKind(bytes[8]))?;

        Ok(SegmentHeader {
            magic,
            format_version,
            kind,
        })
    }
}

/// Serialize a record into a self-delimiting, checksummed frame.
pub fn encode_record(record: &Record) -> Result<Vec<u8>, FrameError> {
    let body = rmp_serde::to_vec(record).map_err(|e| FrameError::Encode(e.to_string()))?;

    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(RECORD_FORMAT_VERSION);
    payload.extend_from_slice(&body);

    let crc = compute_crc(&payload);

    let total_len = payload.len() + 4;
    if total_len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(total_len));
    }

    let mut frame = Vec::with_capacity(4 + total_len);
    frame.extend_from_slice(&(total_len as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Decode one frame from the front of `bytes`.
///
/// Returns `(record, bytes_consumed)`. A frame cut short by the end of the
/// buffer yields [`FrameError::InsufficientData`].
pub fn decode_record(bytes: &[u8]) -> Result<(Record, usize), FrameError> {
    let length = frame_len(bytes)?;

    if length < 5 || length > MAX_FRAME_LEN {
        return Err(FrameError::InvalidFormat);
    }

    if bytes.len() < 4 + length {
        return Err(FrameError::InsufficientData);
    }

    let payload = &bytes[4..4 + length - 4];
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&bytes[4 + length - 4..4 + length]);
    let stored_crc = u32::from_le_bytes(stored);

    let computed_crc = compute_crc(payload);
    if computed_crc != stored_crc {
        return Err(FrameError::ChecksumMismatch {
            expected: stored_crc,
            computed: computed_crc,
        });
    }

    if payload[0] != RECORD_FORMAT_VERSION {
        return Err(FrameError::UnsupportedVersion(payload[0]));
    }

    let record: Record =
        rmp_serde::from_slice(&payload[1..]).map_err(|e| FrameError::Decode(e.to_string()))?;

    Ok((record, 4 + length))
}

/// Read the length prefix of a frame.
pub fn frame_len(bytes: &[u8]) -> Result<usize, FrameError> {
    if bytes.len() < 4 {
        return Err(FrameError::InsufficientData);
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&bytes[0..4]);
    Ok(u32::from_le_bytes(len) as usize)
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Segment header and frame errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Not enough data to parse a frame
    #[error("Insufficient data to parse record frame")]
    InsufficientData,

    /// Frame length field is nonsensical
    #[error("Invalid record frame format")]
    InvalidFormat,

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum from frame
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported record format version
    #[error("Unsupported record format version: {0}")]
    UnsupportedVersion(u8),

    /// Unsupported segment format version
    #[error("Unsupported segment format version: {0}")]
    UnsupportedSegmentVersion(u32),

    /// Segment header magic mismatch
    #[error("Invalid segment magic bytes")]
    BadMagic,

    /// Segment header carries an unknown kind tag
    #[error("Unknown segment kind tag: {0}")]
    UnknownKind(u8),

    /// Frame exceeds the maximum size
    #[error("Record frame too large: {0} bytes")]
    TooLarge(usize),

    /// Record could not be encoded
    #[error("Record encode failed: {0}")]
    Encode(String),

    /// Checksum was valid but the payload could not be decoded
    #[error("Record decode failed: {0}")]
    Decode(String),
}

impl From<FrameError> for doclog_core::Error {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Encode(msg) | FrameError::Decode(msg) => {
                doclog_core::Error::Serialization(msg)
            }
            other => doclog_core::Error::Corruption(other.to_string()),
        }
    }
}
