//! Compactor: decides when to snapshot or pack, and performs the operation
//! (§4.6).
//!
//! Failure policy: any I/O failure aborts the current operation; the next
//! trigger (rotation, threshold crossing, or pack-window reachability)
//! retries. Inputs are never deleted before their output file is durably
//! written — `create_pack` on the store already enforces that ordering.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::warn;

use crate::config::CompactionConfig;
use crate::error::Result;
use crate::store::UpdateStore;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Snapshots and packs notes against a shared [`UpdateStore`].
pub struct Compactor {
    store: Arc<UpdateStore>,
    config: CompactionConfig,
}

impl Compactor {
    /// Construct a compactor over a store, with the given thresholds.
    pub fn new(store: Arc<UpdateStore>, config: CompactionConfig) -> Self {
        Self { store, config }
    }

    /// If the note has accumulated enough uncovered updates, materialize a
    /// snapshot from the caller-supplied document state and vector clock.
    pub async fn maybe_snapshot(
        &self,
        sd_id: &str,
        note_id: &str,
        document_state: impl FnOnce() -> Vec<u8>,
        max_sequences: impl FnOnce() -> BTreeMap<String, i64>,
    ) -> Result<Option<String>> {
        if !self
            .store
            .should_create_snapshot(sd_id, note_id, self.config.snapshot_threshold)
            .await?
        {
            return Ok(None);
        }
        match self
            .store
            .write_snapshot(sd_id, note_id, document_state(), max_sequences())
            .await
        {
            Ok(name) => Ok(Some(name)),
            Err(e) => {
                warn!("compactor: snapshot write failed for {sd_id}/{note_id}: {e}");
                Ok(None)
            }
        }
    }

    /// Select the longest contiguous run of same-instance updates whose
    /// newest entry is older than the aging window, and pack it if it meets
    /// the minimum pack window.
    pub async fn maybe_pack(&self, sd_id: &str, note_id: &str) -> Result<Option<String>> {
        let files = self.store.list_note_update_files(sd_id, note_id).await?;
        let cutoff = now_ms() - self.config.aging_window_ms;

        let mut by_instance: BTreeMap<String, Vec<(i64, i64)>> = BTreeMap::new();
        for f in &files {
            let Some(seq) = f.sequence else { continue };
            by_instance.entry(f.instance_id.clone()).or_default().push((seq, f.timestamp));
        }

        let mut best: Option<(String, Vec<i64>)> = None;
        for (instance_id, mut entries) in by_instance {
            entries.sort_by_key(|(seq, _)| *seq);
            let mut run_start = 0usize;
            for i in 1..=entries.len() {
                let run_breaks = i == entries.len() || entries[i].0 != entries[i - 1].0 + 1;
                if run_breaks {
                    let run = &entries[run_start..i];
                    let newest_ts = run.iter().map(|(_, ts)| *ts).max().unwrap_or(i64::MAX);
                    if newest_ts < cutoff {
                        let is_longer = best.as_ref().map(|(_, seqs)| run.len() > seqs.len()).unwrap_or(true);
                        if is_longer {
                            best = Some((instance_id.clone(), run.iter().map(|(seq, _)| *seq).collect()));
                        }
                    }
                    run_start = i;
                }
            }
        }

        let Some((instance_id, seqs)) = best else { return Ok(None) };
        if seqs.len() < self.config.pack_window {
            return Ok(None);
        }

        let seq_set: std::collections::HashSet<i64> = seqs.iter().copied().collect();
        let filenames: Vec<String> = files
            .iter()
            .filter(|f| f.instance_id == instance_id && f.sequence.map(|s| seq_set.contains(&s)).unwrap_or(false))
            .map(|f| f.filename.clone())
            .collect();

        match self.store.create_pack(sd_id, note_id, &filenames).await {
            Ok(name) => Ok(Some(name)),
            Err(e) => {
                warn!("compactor: pack creation failed for {sd_id}/{note_id}: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn maybe_pack_packs_aged_contiguous_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(UpdateStore::new("inst-1"));
        store.register_sd("sd1", dir.path()).await;
        for i in 0..60 {
            store.write_note_update("sd1", "N", format!("u{i}").as_bytes()).await.unwrap();
        }
        let mut config = CompactionConfig::default();
        config.pack_window = 50;
        config.aging_window_ms = -1;
        let compactor = Compactor::new(store.clone(), config);
        let pack_name = compactor.maybe_pack("sd1", "N").await.unwrap();
        assert!(pack_name.is_some());
        let remaining = store.list_note_update_files("sd1", "N").await.unwrap();
        assert_eq!(remaining.len(), 10);
    }

    #[tokio::test]
    async fn maybe_pack_is_none_below_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(UpdateStore::new("inst-1"));
        store.register_sd("sd1", dir.path()).await;
        for i in 0..10 {
            store.write_note_update("sd1", "N", format!("u{i}").as_bytes()).await.unwrap();
        }
        let mut config = CompactionConfig::default();
        config.pack_window = 50;
        config.aging_window_ms = -1;
        let compactor = Compactor::new(store.clone(), config);
        assert!(compactor.maybe_pack("sd1", "N").await.unwrap().is_none());
    }
}
