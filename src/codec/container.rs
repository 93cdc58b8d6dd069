//! Self-describing containers for pack and snapshot file bodies (§4.1, §6).
//!
//! Both containers carry a mandatory format version; an unsupported version
//! fails the decode with [`StoreError::FormatVersion`] rather than attempting
//! a best-effort read. The container leaves room for an optional compression
//! hook on the payload (see the design notes on snapshot compression) —
//! `compressed` simply travels with the container so a future codec revision
//! can start writing compressed bodies without breaking old readers.

use std::path::Path;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, StoreError};

/// Format version this codec writes and the only one it accepts on read.
pub const FORMAT_VERSION: u32 = 1;

/// One opaque update blob inside a pack, tagged with its origin coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackEntry {
    /// Wall-clock write time, milliseconds.
    pub timestamp: i64,
    /// Sequence number within (instance, document).
    pub sequence: i64,
    /// Opaque CRDT update bytes, preserved verbatim.
    pub data: Vec<u8>,
}

/// Decoded pack file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackFile {
    /// Instance that produced the pack.
    pub instance_id: String,
    /// First sequence contained in the pack.
    pub start_seq: i64,
    /// Last sequence contained in the pack.
    pub end_seq: i64,
    /// Entries in sequence order: `entries[i].sequence == start_seq + i`.
    pub entries: Vec<PackEntry>,
}

#[derive(Serialize, Deserialize)]
struct PackContainerOnDisk {
    version: u32,
    instance_id: String,
    start_seq: i64,
    end_seq: i64,
    entries: Vec<PackEntry>,
}

/// Validate a pack's internal invariants (§4.1, invariant 3 in §8).
pub fn validate_pack_data(pack: &PackFile) -> Result<()> {
    if pack.start_seq < 0 || pack.end_seq < pack.start_seq {
        return Err(StoreError::InvalidRange {
            start_seq: pack.start_seq,
            end_seq: pack.end_seq,
        });
    }
    let expected_count = (pack.end_seq - pack.start_seq + 1) as usize;
    if pack.entries.len() != expected_count {
        return Err(StoreError::CountMismatch {
            expected: expected_count,
            found: pack.entries.len(),
        });
    }
    for (i, entry) in pack.entries.iter().enumerate() {
        let expected = pack.start_seq + i as i64;
        if entry.sequence != expected {
            return Err(StoreError::NonContiguous {
                index: i,
                expected,
                found: entry.sequence,
            });
        }
    }
    Ok(())
}

/// Encode a pack file to its on-disk byte representation.
pub fn encode_pack_file(pack: &PackFile) -> Result<Vec<u8>> {
    let on_disk = PackContainerOnDisk {
        version: FORMAT_VERSION,
        instance_id: pack.instance_id.clone(),
        start_seq: pack.start_seq,
        end_seq: pack.end_seq,
        entries: pack.entries.clone(),
    };
    Ok(serde_json::to_vec(&on_disk)?)
}

/// Decode a pack file from bytes. Does not re-validate invariants; callers
/// that need validated data should follow with [`validate_pack_data`].
pub fn decode_pack_file(path: &Path, bytes: &[u8]) -> Result<PackFile> {
    let on_disk: PackContainerOnDisk = serde_json::from_slice(bytes).map_err(|e| {
        StoreError::CorruptRecord {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;
    if on_disk.version != FORMAT_VERSION {
        return Err(StoreError::FormatVersion {
            path: path.to_path_buf(),
            found: on_disk.version,
            expected: FORMAT_VERSION,
        });
    }
    Ok(PackFile {
        instance_id: on_disk.instance_id,
        start_seq: on_disk.start_seq,
        end_seq: on_disk.end_seq,
        entries: on_disk.entries,
    })
}

/// Decoded snapshot file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Instance that produced the snapshot.
    pub instance_id: String,
    /// Document the snapshot is for (note id or SD id, by context).
    pub document_id: String,
    /// Wall-clock time the snapshot was taken, milliseconds.
    pub timestamp: i64,
    /// Vector clock: instance -> highest sequence already incorporated.
    pub max_sequences: BTreeMap<String, i64>,
    /// Encoded full CRDT document state.
    pub state: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotContainerOnDisk {
    version: u32,
    instance_id: String,
    document_id: String,
    timestamp: i64,
    max_sequences: BTreeMap<String, i64>,
    /// Whether `state` has been run through a compression hook. This codec
    /// never writes `true`; readers tolerate it so a future revision can.
    compressed: bool,
    state: Vec<u8>,
}

/// `totalChanges = Σ (maxSequences[i] + 1)`.
pub fn total_changes(max_sequences: &BTreeMap<String, i64>) -> i64 {
    max_sequences.values().map(|&seq| seq + 1).sum()
}

/// Encode a snapshot file to its on-disk byte representation.
pub fn encode_snapshot_file(snapshot: &SnapshotFile) -> Result<Vec<u8>> {
    let on_disk = SnapshotContainerOnDisk {
        version: FORMAT_VERSION,
        instance_id: snapshot.instance_id.clone(),
        document_id: snapshot.document_id.clone(),
        timestamp: snapshot.timestamp,
        max_sequences: snapshot.max_sequences.clone(),
        compressed: false,
        state: snapshot.state.clone(),
    };
    Ok(serde_json::to_vec(&on_disk)?)
}

/// Decode a snapshot file from bytes. The `compressed` flag is accepted but
/// not acted on: no compression codec is wired up in this core, so bodies
/// are always treated as raw bytes regardless of the flag.
pub fn decode_snapshot_file(path: &Path, bytes: &[u8]) -> Result<SnapshotFile> {
    let on_disk: SnapshotContainerOnDisk =
        serde_json::from_slice(bytes).map_err(|e| StoreError::CorruptRecord {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if on_disk.version != FORMAT_VERSION {
        return Err(StoreError::FormatVersion {
            path: path.to_path_buf(),
            found: on_disk.version,
            expected: FORMAT_VERSION,
        });
    }
    Ok(SnapshotFile {
        instance_id: on_disk.instance_id,
        document_id: on_disk.document_id,
        timestamp: on_disk.timestamp,
        max_sequences: on_disk.max_sequences,
        state: on_disk.state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pack() -> PackFile {
        PackFile {
            instance_id: "inst-1".into(),
            start_seq: 0,
            end_seq: 2,
            entries: vec![
                PackEntry { timestamp: 1000, sequence: 0, data: vec![1] },
                PackEntry { timestamp: 1001, sequence: 1, data: vec![2] },
                PackEntry { timestamp: 1002, sequence: 2, data: vec![3] },
            ],
        }
    }

    #[test]
    fn pack_encode_decode_round_trip() {
        let pack = sample_pack();
        validate_pack_data(&pack).unwrap();
        let bytes = encode_pack_file(&pack).unwrap();
        let decoded = decode_pack_file(Path::new("x.yjson"), &bytes).unwrap();
        assert_eq!(decoded, pack);
    }

    #[test]
    fn pack_rejects_invalid_range() {
        let mut pack = sample_pack();
        pack.end_seq = -1;
        assert!(matches!(
            validate_pack_data(&pack),
            Err(StoreError::InvalidRange { .. })
        ));
    }

    #[test]
    fn pack_rejects_count_mismatch() {
        let mut pack = sample_pack();
        pack.entries.pop();
        assert!(matches!(
            validate_pack_data(&pack),
            Err(StoreError::CountMismatch { .. })
        ));
    }

    #[test]
    fn pack_rejects_non_contiguous() {
        let mut pack = sample_pack();
        pack.entries[1].sequence = 5;
        assert!(matches!(
            validate_pack_data(&pack),
            Err(StoreError::NonContiguous { index: 1, .. })
        ));
    }

    #[test]
    fn pack_decode_rejects_unsupported_version() {
        let pack = sample_pack();
        let on_disk = PackContainerOnDisk {
            version: 99,
            instance_id: pack.instance_id,
            start_seq: pack.start_seq,
            end_seq: pack.end_seq,
            entries: pack.entries,
        };
        let bytes = serde_json::to_vec(&on_disk).unwrap();
        let err = decode_pack_file(Path::new("x.yjson"), &bytes).unwrap_err();
        assert!(matches!(err, StoreError::FormatVersion { found: 99, .. }));
    }

    #[test]
    fn snapshot_encode_decode_round_trip() {
        let mut max_sequences = BTreeMap::new();
        max_sequences.insert("inst-1".to_string(), 99);
        let snapshot = SnapshotFile {
            instance_id: "inst-1".into(),
            document_id: "note-1".into(),
            timestamp: 5000,
            max_sequences,
            state: vec![9, 9, 9],
        };
        let bytes = encode_snapshot_file(&snapshot).unwrap();
        let decoded = decode_snapshot_file(Path::new("x.yjson"), &bytes).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn total_changes_sums_max_plus_one() {
        let mut max_sequences = BTreeMap::new();
        max_sequences.insert("a".to_string(), 99);
        max_sequences.insert("b".to_string(), 199);
        assert_eq!(total_changes(&max_sequences), 300);
    }
}
