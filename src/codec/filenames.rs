//! Filename grammars for update, pack, snapshot and log files (§4.1).
//!
//! Instance ids are assumed underscore-free (this crate mints them as
//! [`uuid::Uuid`] v4 strings, which are hyphen-separated); that is what makes
//! splitting these underscore-delimited filenames unambiguous even though
//! `docId`/`sdId` may themselves contain underscores.

use std::path::Path;

/// What kind of document an update filename names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentScope {
    /// A per-note update, keyed by note id.
    Note(String),
    /// A folder-tree update, keyed by SD id.
    FolderTree(String),
}

/// A parsed update filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUpdateFilename {
    /// Instance that wrote the file.
    pub instance_id: String,
    /// Which document the update belongs to.
    pub scope: DocumentScope,
    /// Wall-clock write time, milliseconds.
    pub timestamp: i64,
    /// Sequence number, absent only for legacy files.
    pub sequence: Option<i64>,
}

const FOLDER_TREE_TOKEN: &str = "folder-tree";

fn split_trailing_timestamp_seq(segment: &str) -> Option<(&str, i64, Option<i64>)> {
    let last_underscore = segment.rfind('_')?;
    let (left, tail) = (&segment[..last_underscore], &segment[last_underscore + 1..]);
    if left.is_empty() {
        return None;
    }
    let (ts_str, seq_str) = match tail.find('-') {
        Some(dash) => (&tail[..dash], Some(&tail[dash + 1..])),
        None => (tail, None),
    };
    if ts_str.is_empty() || !ts_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let timestamp: i64 = ts_str.parse().ok()?;
    let sequence = match seq_str {
        Some(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            Some(s.parse::<i64>().ok()?)
        }
        Some(_) => return None,
        None => None,
    };
    Some((left, timestamp, sequence))
}

/// Parse an update filename (note or folder-tree form).
pub fn parse_update_filename(filename: &str) -> Option<ParsedUpdateFilename> {
    let stem = filename.strip_suffix(".yjson")?;
    let first_underscore = stem.find('_')?;
    let instance_id = &stem[..first_underscore];
    if instance_id.is_empty() {
        return None;
    }
    let rest = &stem[first_underscore + 1..];

    if let Some(after_token) = rest.strip_prefix(FOLDER_TREE_TOKEN).and_then(|r| r.strip_prefix('_')) {
        let (sd_id, timestamp, sequence) = split_trailing_timestamp_seq(after_token)?;
        return Some(ParsedUpdateFilename {
            instance_id: instance_id.to_string(),
            scope: DocumentScope::FolderTree(sd_id.to_string()),
            timestamp,
            sequence,
        });
    }

    let (doc_id, timestamp, sequence) = split_trailing_timestamp_seq(rest)?;
    Some(ParsedUpdateFilename {
        instance_id: instance_id.to_string(),
        scope: DocumentScope::Note(doc_id.to_string()),
        timestamp,
        sequence,
    })
}

/// Generate an update filename. Newly written files always carry a
/// sequence, zero-padded to at least 4 digits.
pub fn generate_update_filename(
    instance_id: &str,
    scope: &DocumentScope,
    timestamp: i64,
    sequence: i64,
) -> String {
    match scope {
        DocumentScope::Note(doc_id) => {
            format!("{instance_id}_{doc_id}_{timestamp}-{sequence:04}.yjson")
        }
        DocumentScope::FolderTree(sd_id) => {
            format!(
                "{instance_id}_{FOLDER_TREE_TOKEN}_{sd_id}_{timestamp}-{sequence:04}.yjson"
            )
        }
    }
}

/// A parsed pack filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPackFilename {
    /// Instance that produced the pack.
    pub instance_id: String,
    /// First sequence contained in the pack.
    pub start_seq: i64,
    /// Last sequence contained in the pack.
    pub end_seq: i64,
}

/// Parse a pack filename of the form `<instanceId>_pack_<start>-<end>.yjson`.
pub fn parse_pack_filename(filename: &str) -> Option<ParsedPackFilename> {
    let stem = filename.strip_suffix(".yjson")?;
    let first_underscore = stem.find('_')?;
    let instance_id = &stem[..first_underscore];
    if instance_id.is_empty() {
        return None;
    }
    let rest = stem[first_underscore + 1..].strip_prefix("pack_")?;
    let dash = rest.find('-')?;
    let (start_str, end_str) = (&rest[..dash], &rest[dash + 1..]);
    if start_str.is_empty() || end_str.is_empty() {
        return None;
    }
    if !start_str.bytes().all(|b| b.is_ascii_digit()) || !end_str.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let start_seq: i64 = start_str.parse().ok()?;
    let end_seq: i64 = end_str.parse().ok()?;
    Some(ParsedPackFilename {
        instance_id: instance_id.to_string(),
        start_seq,
        end_seq,
    })
}

/// Generate a pack filename.
pub fn generate_pack_filename(instance_id: &str, start_seq: i64, end_seq: i64) -> String {
    format!("{instance_id}_pack_{start_seq}-{end_seq}.yjson")
}

/// A parsed snapshot filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSnapshotFilename {
    /// `Σ (maxSequences[i] + 1)` at the time the snapshot was taken.
    pub total_changes: i64,
    /// Instance that produced the snapshot.
    pub instance_id: String,
}

/// Parse a snapshot filename of the form `snapshot_<totalChanges>_<instanceId>.yjson`.
pub fn parse_snapshot_filename(filename: &str) -> Option<ParsedSnapshotFilename> {
    let stem = filename.strip_suffix(".yjson")?;
    let rest = stem.strip_prefix("snapshot_")?;
    let underscore = rest.find('_')?;
    let (total_str, instance_id) = (&rest[..underscore], &rest[underscore + 1..]);
    if total_str.is_empty() || instance_id.is_empty() {
        return None;
    }
    if !total_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let total_changes: i64 = total_str.parse().ok()?;
    Some(ParsedSnapshotFilename {
        total_changes,
        instance_id: instance_id.to_string(),
    })
}

/// Generate a snapshot filename.
pub fn generate_snapshot_filename(total_changes: i64, instance_id: &str) -> String {
    format!("snapshot_{total_changes}_{instance_id}.yjson")
}

/// A parsed log filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogFilename {
    /// Instance that wrote the log.
    pub instance_id: String,
    /// Timestamp disambiguating multiple log files of the same instance.
    pub timestamp: i64,
}

/// Parse a log filename of the form `<instanceId>_<timestamp>.crdtlog`.
pub fn parse_log_filename(filename: &str) -> Option<ParsedLogFilename> {
    let stem = filename.strip_suffix(".crdtlog")?;
    let underscore = stem.find('_')?;
    let (instance_id, ts_str) = (&stem[..underscore], &stem[underscore + 1..]);
    if instance_id.is_empty() || ts_str.is_empty() {
        return None;
    }
    if !ts_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let timestamp: i64 = ts_str.parse().ok()?;
    Some(ParsedLogFilename {
        instance_id: instance_id.to_string(),
        timestamp,
    })
}

/// Generate a log filename.
pub fn generate_log_filename(instance_id: &str, timestamp: i64) -> String {
    format!("{instance_id}_{timestamp}.crdtlog")
}

/// Extract the filename component of a path, if any.
pub fn file_name_of(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_update_round_trip() {
        let scope = DocumentScope::Note("note_with_underscore".to_string());
        let name = generate_update_filename("inst-1", &scope, 1000, 7);
        assert_eq!(name, "inst-1_note_with_underscore_1000-0007.yjson");
        let parsed = parse_update_filename(&name).unwrap();
        assert_eq!(parsed.instance_id, "inst-1");
        assert_eq!(parsed.scope, scope);
        assert_eq!(parsed.timestamp, 1000);
        assert_eq!(parsed.sequence, Some(7));
    }

    #[test]
    fn folder_tree_update_round_trip() {
        let scope = DocumentScope::FolderTree("sd_one".to_string());
        let name = generate_update_filename("inst-2", &scope, 2000, 42);
        assert_eq!(name, "inst-2_folder-tree_sd_one_2000-0042.yjson");
        let parsed = parse_update_filename(&name).unwrap();
        assert_eq!(parsed.scope, scope);
        assert_eq!(parsed.sequence, Some(42));
    }

    #[test]
    fn legacy_update_without_sequence_parses() {
        let parsed = parse_update_filename("inst-1_mynote_1000.yjson").unwrap();
        assert_eq!(parsed.instance_id, "inst-1");
        assert_eq!(parsed.scope, DocumentScope::Note("mynote".to_string()));
        assert_eq!(parsed.timestamp, 1000);
        assert_eq!(parsed.sequence, None);
    }

    #[test]
    fn malformed_update_filenames_parse_to_absent() {
        assert!(parse_update_filename("not-a-log.txt").is_none());
        assert!(parse_update_filename("inst-1_1000.yjson").is_none());
        assert!(parse_update_filename("inst-1_note_abc.yjson").is_none());
        assert!(parse_update_filename(".yjson").is_none());
    }

    #[test]
    fn pack_filename_round_trip() {
        let name = generate_pack_filename("inst-1", 0, 49);
        assert_eq!(name, "inst-1_pack_0-49.yjson");
        let parsed = parse_pack_filename(&name).unwrap();
        assert_eq!(parsed.instance_id, "inst-1");
        assert_eq!(parsed.start_seq, 0);
        assert_eq!(parsed.end_seq, 49);
    }

    #[test]
    fn snapshot_filename_round_trip() {
        let name = generate_snapshot_filename(300, "inst-1");
        assert_eq!(name, "snapshot_300_inst-1.yjson");
        let parsed = parse_snapshot_filename(&name).unwrap();
        assert_eq!(parsed.total_changes, 300);
        assert_eq!(parsed.instance_id, "inst-1");
    }

    #[test]
    fn log_filename_round_trip() {
        let name = generate_log_filename("inst-1", 123456);
        assert_eq!(name, "inst-1_123456.crdtlog");
        let parsed = parse_log_filename(&name).unwrap();
        assert_eq!(parsed.instance_id, "inst-1");
        assert_eq!(parsed.timestamp, 123456);
    }
}
