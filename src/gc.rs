//! Garbage collector: prunes snapshots, then packs and updates whose
//! content is covered by the oldest kept snapshot and old enough (§4.7).
//!
//! GC tolerates per-file failures — it records them in `errors` and keeps
//! going, rather than aborting the whole run.

use std::collections::BTreeMap;

use crate::config::CompactionConfig;
use crate::error::Result;
use crate::store::UpdateStore;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Statistics returned by [`run_garbage_collection`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcStats {
    /// Number of snapshot files deleted.
    pub snapshots_deleted: usize,
    /// Number of pack files deleted.
    pub packs_deleted: usize,
    /// Number of update files deleted.
    pub updates_deleted: usize,
    /// Total bytes freed across all deletions.
    pub disk_space_freed: u64,
    /// Per-file errors encountered; GC continues past each of these.
    pub errors: Vec<String>,
}

async fn file_len(path: &std::path::Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Run one garbage collection pass for a single note.
pub async fn run_garbage_collection(
    store: &UpdateStore,
    sd_id: &str,
    note_id: &str,
    config: &CompactionConfig,
) -> Result<GcStats> {
    let mut stats = GcStats::default();
    let now = now_ms();

    let snapshot_names = store.list_snapshot_files(sd_id, note_id).await?;
    for name in snapshot_names.iter().skip(config.snapshot_retention_count) {
        match store.read_snapshot(sd_id, note_id, name).await {
            Ok(_) => {}
            Err(e) => {
                stats.errors.push(format!("read snapshot {name} before delete: {e}"));
            }
        }
        let path = store.snapshot_path(sd_id, note_id, name).await?;
        let freed = file_len(&path).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                stats.snapshots_deleted += 1;
                stats.disk_space_freed += freed;
            }
            Err(e) => stats.errors.push(format!("delete snapshot {name}: {e}")),
        }
    }

    let kept_index = config.snapshot_retention_count.saturating_sub(1).min(snapshot_names.len().saturating_sub(1));
    let cover_clock: BTreeMap<String, i64> = match snapshot_names.get(kept_index) {
        Some(name) => match store.read_snapshot(sd_id, note_id, name).await {
            Ok(snapshot) => snapshot.max_sequences,
            Err(e) => {
                stats.errors.push(format!("read oldest kept snapshot {name}: {e}"));
                BTreeMap::new()
            }
        },
        None => BTreeMap::new(),
    };

    let pack_names = store.list_pack_files(sd_id, note_id).await?;
    for name in pack_names {
        let pack = match store.read_pack_file(sd_id, note_id, &name).await {
            Ok(pack) => pack,
            Err(e) => {
                stats.errors.push(format!("read pack {name}: {e}"));
                continue;
            }
        };
        let covered = cover_clock.get(&pack.instance_id).is_some_and(|&max| max >= pack.end_seq);
        let newest_ts = pack.entries.iter().map(|e| e.timestamp).max().unwrap_or(i64::MAX);
        let old_enough = newest_ts < now - config.minimum_history_duration_ms;
        if covered && old_enough {
            let path = store.pack_path(sd_id, note_id, &name).await?;
            let freed = file_len(&path).await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    stats.packs_deleted += 1;
                    stats.disk_space_freed += freed;
                }
                Err(e) => stats.errors.push(format!("delete pack {name}: {e}")),
            }
        }
    }

    let update_files = store.list_note_update_files(sd_id, note_id).await?;
    for file in update_files {
        let Some(seq) = file.sequence else { continue };
        let covered = cover_clock.get(&file.instance_id).is_some_and(|&max| max >= seq);
        let old_enough = file.timestamp < now - config.minimum_history_duration_ms;
        if covered && old_enough {
            let freed = file_len(&file.path).await;
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {
                    stats.updates_deleted += 1;
                    stats.disk_space_freed += freed;
                }
                Err(e) => stats.errors.push(format!("delete update {}: {e}", file.filename)),
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    #[tokio::test]
    async fn e2e_2_snapshot_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = UpdateStore::new("inst-1");
        store.register_sd("sd1", dir.path()).await;
        for total in [100, 200, 300, 400, 500] {
            let mut clock = Map::new();
            clock.insert("inst-1".to_string(), total - 1);
            store.write_snapshot("sd1", "N", vec![0], clock).await.unwrap();
        }
        let mut config = CompactionConfig::default();
        config.snapshot_retention_count = 3;
        config.minimum_history_duration_ms = i64::MAX;
        let stats = super::run_garbage_collection(&store, "sd1", "N", &config).await.unwrap();
        assert_eq!(stats.snapshots_deleted, 2);
        let remaining = store.list_snapshot_files("sd1", "N").await.unwrap();
        assert_eq!(remaining.len(), 3);
    }
}
