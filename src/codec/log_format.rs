//! Binary encoding of `.crdtlog` headers, records and the termination
//! sentinel (§4.1, §4.3, §4.4).
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! header:    b"CLOG" (4) | version: u8 (1) | reserved: [u8; 11] = 16 bytes
//! record:    marker 0x01 (1) | timestamp: i64 (8) | sequence: i64 (8)
//!            | len: u32 (4) | data: [u8; len]
//! sentinel:  marker 0x00 (1)
//! ```
//!
//! A record is distinguished from the sentinel by its leading marker byte,
//! so a reader never has to guess based on remaining file length.

use std::path::Path;

use crate::error::{Result, StoreError};

const MAGIC: &[u8; 4] = b"CLOG";
const HEADER_VERSION: u8 = 1;
/// Total header size in bytes.
pub const HEADER_LEN: usize = 16;

const RECORD_MARKER: u8 = 0x01;
const SENTINEL_MARKER: u8 = 0x00;

/// Build the fixed 16-byte log header.
pub fn write_log_header() -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4] = HEADER_VERSION;
    header
}

/// Parse and validate the fixed log header.
pub fn parse_log_header(path: &Path, bytes: &[u8]) -> Result<()> {
    if bytes.len() < HEADER_LEN {
        return Err(StoreError::CorruptHeader {
            path: path.to_path_buf(),
            message: format!("header too short: {} bytes", bytes.len()),
        });
    }
    if &bytes[0..4] != MAGIC {
        return Err(StoreError::CorruptHeader {
            path: path.to_path_buf(),
            message: "bad magic".to_string(),
        });
    }
    if bytes[4] != HEADER_VERSION {
        return Err(StoreError::FormatVersion {
            path: path.to_path_buf(),
            found: bytes[4] as u32,
            expected: HEADER_VERSION as u32,
        });
    }
    Ok(())
}

/// One decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Wall-clock write time, milliseconds.
    pub timestamp: i64,
    /// Sequence number within (instance, document).
    pub sequence: i64,
    /// Opaque CRDT update bytes.
    pub data: Vec<u8>,
}

/// Encode one record (without the file header).
pub fn write_log_record(timestamp: i64, sequence: i64, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 8 + 8 + 4 + data.len());
    buf.push(RECORD_MARKER);
    buf.extend_from_slice(&timestamp.to_le_bytes());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Encode the termination sentinel.
pub fn write_termination_sentinel() -> [u8; 1] {
    [SENTINEL_MARKER]
}

/// Outcome of decoding the next item in a record stream.
pub enum ReadOutcome {
    /// A complete record was read; `consumed` bytes were used.
    Record { record: LogRecord, consumed: usize },
    /// The termination sentinel was read; the stream has ended cleanly.
    Finalized { consumed: usize },
    /// Fewer bytes remain than a full record header/body requires. This is
    /// the "invalid trailing partial record" the reader must skip silently.
    Truncated,
}

/// Decode exactly one record (or the sentinel) from the start of `buf`,
/// which holds the file's bytes starting immediately after the header.
pub fn read_log_record(buf: &[u8]) -> ReadOutcome {
    if buf.is_empty() {
        return ReadOutcome::Finalized { consumed: 0 };
    }
    match buf[0] {
        SENTINEL_MARKER => ReadOutcome::Finalized { consumed: 1 },
        RECORD_MARKER => {
            const FIXED_LEN: usize = 1 + 8 + 8 + 4;
            if buf.len() < FIXED_LEN {
                return ReadOutcome::Truncated;
            }
            let timestamp = i64::from_le_bytes(buf[1..9].try_into().unwrap());
            let sequence = i64::from_le_bytes(buf[9..17].try_into().unwrap());
            let len = u32::from_le_bytes(buf[17..21].try_into().unwrap()) as usize;
            if buf.len() < FIXED_LEN + len {
                return ReadOutcome::Truncated;
            }
            let data = buf[FIXED_LEN..FIXED_LEN + len].to_vec();
            ReadOutcome::Record {
                record: LogRecord {
                    timestamp,
                    sequence,
                    data,
                },
                consumed: FIXED_LEN + len,
            }
        }
        _ => ReadOutcome::Truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = write_log_header();
        parse_log_header(Path::new("x.crdtlog"), &header).unwrap();
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut header = write_log_header();
        header[0] = b'X';
        assert!(matches!(
            parse_log_header(Path::new("x.crdtlog"), &header),
            Err(StoreError::CorruptHeader { .. })
        ));
    }

    #[test]
    fn record_round_trip() {
        let encoded = write_log_record(1000, 7, b"hello");
        match read_log_record(&encoded) {
            ReadOutcome::Record { record, consumed } => {
                assert_eq!(consumed, encoded.len());
                assert_eq!(record.timestamp, 1000);
                assert_eq!(record.sequence, 7);
                assert_eq!(record.data, b"hello");
            }
            _ => panic!("expected a record"),
        }
    }

    #[test]
    fn sentinel_terminates_stream() {
        let sentinel = write_termination_sentinel();
        match read_log_record(&sentinel) {
            ReadOutcome::Finalized { consumed } => assert_eq!(consumed, 1),
            _ => panic!("expected finalized"),
        }
    }

    #[test]
    fn truncated_trailing_record_is_detected() {
        let mut encoded = write_log_record(1000, 7, b"hello world");
        encoded.truncate(encoded.len() - 3);
        assert!(matches!(read_log_record(&encoded), ReadOutcome::Truncated));
    }

    #[test]
    fn empty_buffer_is_finalized() {
        assert!(matches!(read_log_record(&[]), ReadOutcome::Finalized { consumed: 0 }));
    }
}
