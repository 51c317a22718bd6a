//! Segment reader.
//!
//! Streams records from a segment starting at any frame boundary. A reader
//! may follow a RAW write head that is still being appended to: a partially
//! written trailing frame reads as end-of-segment and the position stays on
//! the frame boundary, so a later call (or a later reader opened at the same
//! position) picks the record up once it is complete.

use super::Segment;
use crate::format::{decode_record, FrameError, SegmentHeader, MAX_FRAME_LEN, SEGMENT_HEADER_SIZE};
use doclog_core::{Error, Record, Result};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use tracing::warn;

/// Sequential reader over one segment file.
pub struct SegmentReader {
    segment: Segment,
    reader: BufReader<File>,
    /// Offset of the next frame to read
    position: u64,
    /// Frames skipped because of checksum mismatches
    skipped: u64,
}

impl SegmentReader {
    /// Open a segment at its first record.
    pub fn open(segment: &Segment) -> Result<Self> {
        Self::open_at(segment, SEGMENT_HEADER_SIZE as u64)
    }

    /// Open a segment at byte `position`, which must be a frame boundary
    /// previously reported by [`SegmentReader::position`].
    pub fn open_at(segment: &Segment, position: u64) -> Result<Self> {
        let path = segment.path();
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::vanished(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut header = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::corruption(format!("{}: segment header truncated", path.display()))
            } else {
                e.into()
            }
        })?;
        let header = SegmentHeader::from_bytes(&header)?;
        if header.kind != segment.kind() {
            return Err(Error::corruption(format!(
                "{}: header says {} but name says {}",
                path.display(),
                header.kind,
                segment.kind()
            )));
        }

        if position < SEGMENT_HEADER_SIZE as u64 {
            return Err(Error::invalid_token(format!(
                "position {} inside segment header",
                position
            )));
        }
        file.seek(SeekFrom::Start(position))?;

        Ok(SegmentReader {
            segment: segment.clone(),
            reader: BufReader::new(file),
            position,
            skipped: 0,
        })
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` at the end of the segment or at a partially written
    /// trailing frame. Frames with a bad checksum are skipped with a warning;
    /// an implausible length prefix is reported as corruption.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            let mut len_buf = [0u8; 4];
            if !self.fill(&mut len_buf)? {
                return Ok(None);
            }
            let length = u32::from_le_bytes(len_buf) as usize;
            if !(5..=MAX_FRAME_LEN).contains(&length) {
                return Err(Error::corruption(format!(
                    "{}: invalid frame length {} at offset {}",
                    self.segment.path().display(),
                    length,
                    self.position
                )));
            }

            let mut frame = vec![0u8; 4 + length];
            frame[..4].copy_from_slice(&len_buf);
            if !self.fill(&mut frame[4..])? {
                return Ok(None);
            }

            let offset = self.position;
            self.position += frame.len() as u64;
            match decode_record(&frame) {
                Ok((record, _)) => return Ok(Some(record)),
                Err(FrameError::ChecksumMismatch { expected, computed }) => {
                    self.skipped += 1;
                    warn!(
                        target: "doclog::segment",
                        segment = %self.segment.name(),
                        offset,
                        expected,
                        computed,
                        "Skipping frame with checksum mismatch"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Offset of the next frame; a valid resume point for [`open_at`](Self::open_at).
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Segment being read
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Frames skipped so far because of checksum mismatches
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Read every record of a segment.
    pub fn read_all(segment: &Segment) -> Result<Vec<Record>> {
        let mut reader = Self::open(segment)?;
        let mut records = Vec::new();
        while let Some(record) = reader.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    /// Fill `buf` completely. On a short read, rewind to the current frame
    /// boundary and report `false`.
    fn fill(&mut self, buf: &mut [u8]) -> Result<bool> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.reader.seek(SeekFrom::Start(self.position))?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Iterator for SegmentReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{encode_record, SegmentKind, SegmentName};
    use crate::segment::writer::{write_segment, SegmentWriter};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new("t", format!("doc-{:03}", i)).with_field("n", i.to_string()))
            .collect()
    }

    #[test]
    fn test_reads_all_records_in_order() {
        let dir = tempdir().unwrap();
        let input = records(10);
        let segment = write_segment(dir.path(), SegmentKind::Sorted, 1, &input).unwrap();
        assert_eq!(SegmentReader::read_all(&segment).unwrap(), input);
    }

    #[test]
    fn test_resume_from_position() {
        let dir = tempdir().unwrap();
        let input = records(6);
        let segment = write_segment(dir.path(), SegmentKind::Sorted, 1, &input).unwrap();

        let mut reader = SegmentReader::open(&segment).unwrap();
        for _ in 0..3 {
            reader.next_record().unwrap().unwrap();
        }
        let position = reader.position();

        let resumed: Vec<Record> = SegmentReader::open_at(&segment, position)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(resumed, input[3..].to_vec());
    }

    #[test]
    fn test_truncated_tail_reads_as_end() {
        let dir = tempdir().unwrap();
        let mut head = SegmentWriter::create_raw(dir.path(), 1).unwrap();
        head.append(&Record::new("t", "a")).unwrap();
        head.flush().unwrap();
        let segment = Segment::new(dir.path(), SegmentName::raw(1).unwrap());

        // Half a frame on disk, as after a crash mid-append.
        let frame = encode_record(&Record::new("t", "b")).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(segment.path()).unwrap();
            file.write_all(&frame[..frame.len() / 2]).unwrap();
        }

        let mut reader = SegmentReader::open(&segment).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        let boundary = reader.position();
        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.position(), boundary);

        // The rest of the frame arrives; the same reader now sees it.
        {
            let mut file = OpenOptions::new().append(true).open(segment.path()).unwrap();
            file.write_all(&frame[frame.len() / 2..]).unwrap();
        }
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.docid.as_deref(), Some("b"));
        drop(head);
    }

    #[test]
    fn test_checksum_mismatch_is_skipped() {
        let dir = tempdir().unwrap();
        let input = records(3);
        let segment = write_segment(dir.path(), SegmentKind::Unsorted, 1, &input).unwrap();

        let mut bytes = std::fs::read(segment.path()).unwrap();
        let first_len = encode_record(&input[0]).unwrap().len();
        bytes[SEGMENT_HEADER_SIZE + first_len - 6] ^= 0xFF;
        std::fs::write(segment.path(), &bytes).unwrap();

        let mut reader = SegmentReader::open(&segment).unwrap();
        let mut read = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            read.push(record);
        }
        assert_eq!(read, input[1..].to_vec());
        assert_eq!(reader.skipped(), 1);
    }

    #[test]
    fn test_kind_mismatch_is_corruption() {
        let dir = tempdir().unwrap();
        let segment = write_segment(dir.path(), SegmentKind::Sorted, 1, &records(1)).unwrap();
        let renamed = Segment::new(
            dir.path(),
            SegmentName::tenant(SegmentKind::Optimized, 1, 1).unwrap(),
        );
        std::fs::rename(segment.path(), renamed.path()).unwrap();
        assert!(matches!(
            SegmentReader::open(&renamed),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_missing_segment_is_vanished() {
        let dir = tempdir().unwrap();
        let segment = Segment::new(
            dir.path(),
            SegmentName::tenant(SegmentKind::Sorted, 1, 1).unwrap(),
        );
        assert!(matches!(
            SegmentReader::open(&segment),
            Err(Error::SegmentVanished(_))
        ));
    }
}
