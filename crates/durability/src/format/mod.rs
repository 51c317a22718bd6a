//! On-disk byte formats for segments.
//!
//! - `frame`: segment header and CRC-framed record encoding
//! - `segment_name`: file-name encoding of segment kind, timestamp and count

pub mod frame;
pub mod segment_name;

pub use frame::{
    decode_record, encode_record, FrameError, SegmentHeader, MAX_FRAME_LEN,
    RECORD_FORMAT_VERSION, SEGMENT_FORMAT_VERSION, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC,
};
pub use segment_name::{
    format_timestamp, SegmentKind, SegmentName, SegmentNameError, MAX_SEGMENT_TIMESTAMP,
};
