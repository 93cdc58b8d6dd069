//! Update/pack/snapshot store: the stateful façade bound to an `instanceId`
//! and a set of registered SDs (§4.5).

pub mod sequence;

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::codec::{
    self, decode_pack_file, decode_snapshot_file, encode_pack_file, encode_snapshot_file,
    parse_pack_filename, parse_snapshot_filename, parse_update_filename, total_changes,
    validate_pack_data, DocumentScope, PackEntry, PackFile, SnapshotFile,
};
use crate::error::{Result, StoreError};
use crate::layout::SdLayout;
use crate::store::sequence::{ScopeKind, SequenceAllocator, SequenceKey};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One entry returned by `list*UpdateFiles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFileEntry {
    /// Bare filename.
    pub filename: String,
    /// Full path.
    pub path: PathBuf,
    /// Instance that wrote the file.
    pub instance_id: String,
    /// Note id (or SD id, for folder-tree entries).
    pub document_id: String,
    /// Wall-clock write time, milliseconds.
    pub timestamp: i64,
    /// Sequence, absent only for legacy files.
    pub sequence: Option<i64>,
}

/// Stateful façade over one instance's view of a set of registered SDs.
pub struct UpdateStore {
    instance_id: String,
    sds: RwLock<std::collections::HashMap<String, SdLayout>>,
    sequences: SequenceAllocator,
}

impl UpdateStore {
    /// Construct a store bound to `instance_id`, with no SDs registered yet.
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            sds: RwLock::new(std::collections::HashMap::new()),
            sequences: SequenceAllocator::new(),
        }
    }

    /// This store's instance id.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Register (or replace) the path for a given SD.
    pub async fn register_sd(&self, sd_id: impl Into<String>, path: impl Into<PathBuf>) {
        let mut sds = self.sds.write().await;
        sds.insert(sd_id.into(), SdLayout::new(path.into()));
    }

    async fn layout(&self, sd_id: &str) -> Result<SdLayout> {
        let sds = self.sds.read().await;
        sds.get(sd_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(PathBuf::from(sd_id)))
    }

    async fn write_atomic(&self, path: &PathBuf, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension(format!(
            "{}.tmp-{}",
            path.extension().and_then(|e| e.to_str()).unwrap_or(""),
            now_ms()
        ));
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            file.write_all(bytes).await?;
            file.flush().await?;
        }
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn scan_max_sequence(&self, dir: &PathBuf, scope_filter: impl Fn(&DocumentScope) -> bool) -> Result<i64> {
        let mut max_seq: Option<i64> = None;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(parsed) = parse_update_filename(name) else { continue };
            if parsed.instance_id != self.instance_id || !scope_filter(&parsed.scope) {
                continue;
            }
            if let Some(seq) = parsed.sequence {
                max_seq = Some(max_seq.map_or(seq, |m: i64| m.max(seq)));
            }
        }
        Ok(max_seq.map_or(0, |m| m + 1))
    }

    /// Write one note update, allocating its sequence.
    pub async fn write_note_update(&self, sd_id: &str, note_id: &str, data: &[u8]) -> Result<String> {
        let layout = self.layout(sd_id).await?;
        let dir = layout.note_updates_dir(note_id);
        let key = SequenceKey {
            sd_id: sd_id.to_string(),
            scope: ScopeKind::Note(note_id.to_string()),
        };
        let note_id_owned = note_id.to_string();
        let dir_for_scan = dir.clone();
        let sequence = self
            .sequences
            .allocate_next(key, || async move {
                self.scan_max_sequence(&dir_for_scan, |s| matches!(s, DocumentScope::Note(n) if n == &note_id_owned)).await
            })
            .await?;
        let timestamp = now_ms();
        let filename = codec::generate_update_filename(
            &self.instance_id,
            &DocumentScope::Note(note_id.to_string()),
            timestamp,
            sequence,
        );
        let path = dir.join(&filename);
        self.write_atomic(&path, data).await?;
        Ok(filename)
    }

    /// Write one folder-tree update, allocating its sequence.
    pub async fn write_folder_update(&self, sd_id: &str, data: &[u8]) -> Result<String> {
        let layout = self.layout(sd_id).await?;
        let dir = layout.folder_updates_dir();
        let key = SequenceKey {
            sd_id: sd_id.to_string(),
            scope: ScopeKind::FolderTree,
        };
        let dir_for_scan = dir.clone();
        let sequence = self
            .sequences
            .allocate_next(key, || async move {
                self.scan_max_sequence(&dir_for_scan, |s| matches!(s, DocumentScope::FolderTree(_))).await
            })
            .await?;
        let timestamp = now_ms();
        let filename = codec::generate_update_filename(
            &self.instance_id,
            &DocumentScope::FolderTree(sd_id.to_string()),
            timestamp,
            sequence,
        );
        let path = dir.join(&filename);
        self.write_atomic(&path, data).await?;
        Ok(filename)
    }

    async fn list_update_files(
        &self,
        dir: &PathBuf,
        is_match: impl Fn(&DocumentScope) -> Option<String>,
    ) -> Result<Vec<UpdateFileEntry>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(parsed) = parse_update_filename(name) else { continue };
            let Some(document_id) = is_match(&parsed.scope) else { continue };
            out.push(UpdateFileEntry {
                filename: name.to_string(),
                path: entry.path(),
                instance_id: parsed.instance_id,
                document_id,
                timestamp: parsed.timestamp,
                sequence: parsed.sequence,
            });
        }
        out.sort_by_key(|e| e.timestamp);
        Ok(out)
    }

    /// List update files for one note, sorted by timestamp ascending.
    pub async fn list_note_update_files(&self, sd_id: &str, note_id: &str) -> Result<Vec<UpdateFileEntry>> {
        let layout = self.layout(sd_id).await?;
        let dir = layout.note_updates_dir(note_id);
        let note_id = note_id.to_string();
        self.list_update_files(&dir, |scope| match scope {
            DocumentScope::Note(n) if n == &note_id => Some(n.clone()),
            _ => None,
        })
        .await
    }

    /// List folder-tree update files for one SD, sorted by timestamp ascending.
    pub async fn list_folder_update_files(&self, sd_id: &str) -> Result<Vec<UpdateFileEntry>> {
        let layout = self.layout(sd_id).await?;
        let dir = layout.folder_updates_dir();
        self.list_update_files(&dir, |scope| match scope {
            DocumentScope::FolderTree(sd) => Some(sd.clone()),
            _ => None,
        })
        .await
    }

    /// Read and decode every update blob for a note, in timestamp order.
    pub async fn read_note_updates(&self, sd_id: &str, note_id: &str) -> Result<Vec<Vec<u8>>> {
        let files = self.list_note_update_files(sd_id, note_id).await?;
        let mut out = Vec::with_capacity(files.len());
        for file in files {
            out.push(tokio::fs::read(&file.path).await?);
        }
        Ok(out)
    }

    /// Write a snapshot for a document, computing `totalChanges` from the
    /// supplied vector clock.
    pub async fn write_snapshot(
        &self,
        sd_id: &str,
        note_id: &str,
        document_state: Vec<u8>,
        max_sequences: BTreeMap<String, i64>,
    ) -> Result<String> {
        let layout = self.layout(sd_id).await?;
        let dir = layout.note_snapshots_dir(note_id);
        let changes = total_changes(&max_sequences);
        let filename = codec::generate_snapshot_filename(changes, &self.instance_id);
        let snapshot = SnapshotFile {
            instance_id: self.instance_id.clone(),
            document_id: note_id.to_string(),
            timestamp: now_ms(),
            max_sequences,
            state: document_state,
        };
        let bytes = encode_snapshot_file(&snapshot)?;
        let path = dir.join(&filename);
        self.write_atomic(&path, &bytes).await?;
        Ok(filename)
    }

    /// List snapshot files for a note, sorted by `totalChanges` descending.
    pub async fn list_snapshot_files(&self, sd_id: &str, note_id: &str) -> Result<Vec<String>> {
        let layout = self.layout(sd_id).await?;
        let dir = layout.note_snapshots_dir(note_id);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(parsed) = parse_snapshot_filename(name) {
                out.push((parsed.total_changes, name.to_string()));
            }
        }
        out.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(out.into_iter().map(|(_, name)| name).collect())
    }

    /// Read and decode one snapshot file by name.
    pub async fn read_snapshot(&self, sd_id: &str, note_id: &str, filename: &str) -> Result<SnapshotFile> {
        let layout = self.layout(sd_id).await?;
        let path = layout.note_snapshots_dir(note_id).join(filename);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.clone())
            } else {
                StoreError::IOError(e)
            }
        })?;
        decode_snapshot_file(&path, &bytes)
    }

    /// List pack files for a note, sorted by `startSeq` ascending.
    pub async fn list_pack_files(&self, sd_id: &str, note_id: &str) -> Result<Vec<String>> {
        let layout = self.layout(sd_id).await?;
        let dir = layout.note_packs_dir(note_id);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(parsed) = parse_pack_filename(name) {
                out.push((parsed.start_seq, name.to_string()));
            }
        }
        out.sort_by_key(|(start, _)| *start);
        Ok(out.into_iter().map(|(_, name)| name).collect())
    }

    /// Resolve the on-disk path of a snapshot file, without reading it.
    pub async fn snapshot_path(&self, sd_id: &str, note_id: &str, filename: &str) -> Result<PathBuf> {
        let layout = self.layout(sd_id).await?;
        Ok(layout.note_snapshots_dir(note_id).join(filename))
    }

    /// Resolve the on-disk path of a pack file, without reading it.
    pub async fn pack_path(&self, sd_id: &str, note_id: &str, filename: &str) -> Result<PathBuf> {
        let layout = self.layout(sd_id).await?;
        Ok(layout.note_packs_dir(note_id).join(filename))
    }

    /// Read, decode and validate one pack file by name.
    pub async fn read_pack_file(&self, sd_id: &str, note_id: &str, filename: &str) -> Result<PackFile> {
        let layout = self.layout(sd_id).await?;
        let path = layout.note_packs_dir(note_id).join(filename);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.clone())
            } else {
                StoreError::IOError(e)
            }
        })?;
        let pack = decode_pack_file(&path, &bytes)?;
        validate_pack_data(&pack)?;
        Ok(pack)
    }

    /// Consume a contiguous run of update files into a single pack file.
    ///
    /// Order is strict: read all source data, validate, write the pack
    /// atomically, then delete the source files. A failure before the pack
    /// is durably written leaves state unchanged.
    pub async fn create_pack(&self, sd_id: &str, note_id: &str, update_files: &[String]) -> Result<String> {
        let layout = self.layout(sd_id).await?;
        let updates_dir = layout.note_updates_dir(note_id);

        let mut parsed_entries = Vec::with_capacity(update_files.len());
        for filename in update_files {
            let parsed = parse_update_filename(filename).ok_or_else(|| StoreError::CorruptRecord {
                path: updates_dir.join(filename),
                message: "update filename is not parseable".to_string(),
            })?;
            let sequence = parsed.sequence.ok_or_else(|| StoreError::CorruptRecord {
                path: updates_dir.join(filename),
                message: "update file has no sequence, cannot be packed".to_string(),
            })?;
            let path = updates_dir.join(filename);
            let data = tokio::fs::read(&path).await?;
            parsed_entries.push((parsed.instance_id, parsed.timestamp, sequence, data, path));
        }

        let Some((first_instance, ..)) = parsed_entries.first().cloned() else {
            return Err(StoreError::CorruptRecord {
                path: updates_dir.clone(),
                message: "createPack called with no update files".to_string(),
            });
        };
        if parsed_entries.iter().any(|(instance, ..)| instance != &first_instance) {
            return Err(StoreError::CorruptRecord {
                path: updates_dir.clone(),
                message: "update files do not share a single instance id".to_string(),
            });
        }

        parsed_entries.sort_by_key(|(_, _, seq, _, _)| *seq);
        let start_seq = parsed_entries.first().unwrap().2;
        let end_seq = parsed_entries.last().unwrap().2;
        let entries: Vec<PackEntry> = parsed_entries
            .iter()
            .map(|(_, ts, seq, data, _)| PackEntry {
                timestamp: *ts,
                sequence: *seq,
                data: data.clone(),
            })
            .collect();
        let pack = PackFile {
            instance_id: first_instance.clone(),
            start_seq,
            end_seq,
            entries,
        };
        validate_pack_data(&pack)?;

        let filename = codec::generate_pack_filename(&first_instance, start_seq, end_seq);
        let pack_path = layout.note_packs_dir(note_id).join(&filename);
        let bytes = encode_pack_file(&pack)?;
        self.write_atomic(&pack_path, &bytes).await?;

        for (_, _, _, _, path) in &parsed_entries {
            let _ = tokio::fs::remove_file(path).await;
        }

        Ok(filename)
    }

    /// Scan update filenames and return `instance -> max(sequence)`.
    pub async fn build_vector_clock(&self, sd_id: &str, note_id: &str) -> Result<BTreeMap<String, i64>> {
        let files = self.list_note_update_files(sd_id, note_id).await?;
        let mut clock = BTreeMap::new();
        for file in files {
            if let Some(seq) = file.sequence {
                clock
                    .entry(file.instance_id)
                    .and_modify(|m: &mut i64| *m = (*m).max(seq))
                    .or_insert(seq);
            }
        }
        Ok(clock)
    }

    /// Whether a note has accumulated enough uncovered updates to warrant a
    /// new snapshot.
    pub async fn should_create_snapshot(&self, sd_id: &str, note_id: &str, threshold: usize) -> Result<bool> {
        let files = self.list_note_update_files(sd_id, note_id).await?;
        let sequenced: Vec<&UpdateFileEntry> = files.iter().filter(|f| f.sequence.is_some()).collect();

        let snapshots = self.list_snapshot_files(sd_id, note_id).await?;
        let Some(newest) = snapshots.first() else {
            return Ok(sequenced.len() >= threshold);
        };

        let snapshot = match self.read_snapshot(sd_id, note_id, newest).await {
            Ok(s) => s,
            Err(_) => return Ok(sequenced.len() >= threshold),
        };

        let uncovered = sequenced
            .iter()
            .filter(|f| {
                let seq = f.sequence.unwrap();
                let covered = snapshot
                    .max_sequences
                    .get(&f.instance_id)
                    .is_some_and(|&max| max >= seq);
                !covered
            })
            .count();
        Ok(uncovered >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_sd() -> (tempfile::TempDir, UpdateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UpdateStore::new("inst-1");
        store.register_sd("sd1", dir.path()).await;
        (dir, store)
    }

    #[tokio::test]
    async fn write_and_list_note_updates() {
        let (_dir, store) = store_with_sd().await;
        let f0 = store.write_note_update("sd1", "note-1", b"a").await.unwrap();
        let f1 = store.write_note_update("sd1", "note-1", b"b").await.unwrap();
        assert_ne!(f0, f1);
        let files = store.list_note_update_files("sd1", "note-1").await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].sequence, Some(0));
        assert_eq!(files[1].sequence, Some(1));

        let updates = store.read_note_updates("sd1", "note-1").await.unwrap();
        assert_eq!(updates, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn sequence_allocator_resumes_after_restart() {
        let (_dir, store) = store_with_sd().await;
        store.write_note_update("sd1", "note-1", b"a").await.unwrap();
        store.write_note_update("sd1", "note-1", b"b").await.unwrap();

        let store2 = UpdateStore::new("inst-1");
        let sds = store.sds.read().await;
        let layout = sds.get("sd1").unwrap().root().to_path_buf();
        drop(sds);
        store2.register_sd("sd1", layout).await;
        let f2 = store2.write_note_update("sd1", "note-1", b"c").await.unwrap();
        let parsed = parse_update_filename(&f2).unwrap();
        assert_eq!(parsed.sequence, Some(2));
    }

    #[tokio::test]
    async fn create_pack_e2e_1() {
        let (_dir, store) = store_with_sd().await;
        let mut filenames = Vec::new();
        for i in 0..100 {
            let name = store.write_note_update("sd1", "N", format!("u{i}").as_bytes()).await.unwrap();
            filenames.push(name);
        }
        let to_pack = filenames[0..50].to_vec();
        let pack_name = store.create_pack("sd1", "N", &to_pack).await.unwrap();
        assert_eq!(pack_name, "inst-1_pack_0-49.yjson");

        let pack = store.read_pack_file("sd1", "N", &pack_name).await.unwrap();
        assert_eq!(pack.entries.len(), 50);

        let remaining = store.list_note_update_files("sd1", "N").await.unwrap();
        assert_eq!(remaining.len(), 50);
        assert!(remaining.iter().all(|f| f.sequence.unwrap() >= 50));
    }

    #[tokio::test]
    async fn build_vector_clock_tracks_max_per_instance() {
        let (_dir, store) = store_with_sd().await;
        store.write_note_update("sd1", "N", b"a").await.unwrap();
        store.write_note_update("sd1", "N", b"b").await.unwrap();
        let clock = store.build_vector_clock("sd1", "N").await.unwrap();
        assert_eq!(clock.get("inst-1"), Some(&1));
    }

    #[tokio::test]
    async fn should_create_snapshot_without_existing_snapshot() {
        let (_dir, store) = store_with_sd().await;
        for i in 0..5 {
            store.write_note_update("sd1", "N", format!("u{i}").as_bytes()).await.unwrap();
        }
        assert!(!store.should_create_snapshot("sd1", "N", 10).await.unwrap());
        assert!(store.should_create_snapshot("sd1", "N", 5).await.unwrap());
    }

    #[tokio::test]
    async fn snapshot_write_list_read_round_trip() {
        let (_dir, store) = store_with_sd().await;
        let mut clock = BTreeMap::new();
        clock.insert("inst-1".to_string(), 99);
        let name = store
            .write_snapshot("sd1", "N", vec![1, 2, 3], clock.clone())
            .await
            .unwrap();
        assert_eq!(name, "snapshot_100_inst-1.yjson");
        let listed = store.list_snapshot_files("sd1", "N").await.unwrap();
        assert_eq!(listed, vec![name.clone()]);
        let read = store.read_snapshot("sd1", "N", &name).await.unwrap();
        assert_eq!(read.max_sequences, clock);
        assert_eq!(read.state, vec![1, 2, 3]);
    }
}
