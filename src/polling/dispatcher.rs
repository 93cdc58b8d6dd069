//! Rate-budgeted, priority-reserving polling dispatcher (§4.11).
//!
//! Time is threaded in explicitly (`now_ms` parameters) rather than read
//! from the wall clock internally, since the rate budget and exit criteria
//! are the component's testable surface (§8 invariants 8, 9).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::config::PollingConfig;

/// Why a note was added to the poll queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollReason {
    /// The note is currently open in an editor window.
    OpenNote,
    /// The note appears in a visible notes list.
    NotesList,
    /// Another subsystem observed a filesystem event and wants sequence
    /// convergence confirmed before declaring sync complete.
    FastPathHandoff,
    /// The note was recently edited locally.
    RecentEdit,
    /// Periodic full re-scan.
    FullRepoll,
}

/// Dispatch priority: `High` entries are served from a reserved share of
/// every batch ahead of `Normal` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Open, listed, or fast-path-handoff entries.
    High,
    /// Everything else.
    Normal,
}

/// One in-memory polling record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingEntry {
    /// Storage directory this note lives in.
    pub sd_id: String,
    /// Note id.
    pub note_id: String,
    /// Why this entry exists.
    pub reason: PollReason,
    /// Per-instance sequence this entry is waiting to see.
    pub expected_sequences: BTreeMap<String, i64>,
    /// Instances whose expected sequence has been observed.
    pub caught_up_sequences: BTreeSet<String>,
    /// When this entry was added, milliseconds.
    pub added_at: i64,
    /// When this entry was last polled, milliseconds.
    pub last_polled_at: Option<i64>,
    /// Cached priority, recomputed after every window mutation.
    pub priority: Priority,
}

type EntryKey = (String, String);

struct WindowSets {
    by_window: HashMap<String, HashMap<String, HashSet<String>>>,
}

impl WindowSets {
    fn new() -> Self {
        Self { by_window: HashMap::new() }
    }

    fn set(&mut self, window_id: &str, sd_id: &str, notes: HashSet<String>) {
        self.by_window.entry(window_id.to_string()).or_default().insert(sd_id.to_string(), notes);
    }

    fn remove_window(&mut self, window_id: &str) {
        self.by_window.remove(window_id);
    }

    fn contains(&self, sd_id: &str, note_id: &str) -> bool {
        self.by_window.values().any(|sds| sds.get(sd_id).is_some_and(|notes| notes.contains(note_id)))
    }
}

struct TokenBucket {
    tokens: f64,
    last_refill_ms: i64,
    recent_hits: VecDeque<i64>,
}

/// Maintains polling entries and the per-SD open/listed-note windows, and
/// emits rate-budgeted, priority-reserved batches.
pub struct PollingDispatcher {
    config: PollingConfig,
    entries: Mutex<HashMap<EntryKey, PollingEntry>>,
    open_notes: Mutex<WindowSets>,
    notes_in_lists: Mutex<WindowSets>,
    bucket: Mutex<TokenBucket>,
}

impl PollingDispatcher {
    /// Construct a dispatcher with the given configuration, starting at
    /// `now_ms` with a full token bucket.
    pub fn new(config: PollingConfig, now_ms: i64) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket {
                tokens: config.max_burst_per_second,
                last_refill_ms: now_ms,
                recent_hits: VecDeque::new(),
            }),
            config,
            entries: Mutex::new(HashMap::new()),
            open_notes: Mutex::new(WindowSets::new()),
            notes_in_lists: Mutex::new(WindowSets::new()),
        }
    }

    fn is_high_priority(&self, sd_id: &str, note_id: &str, reason: PollReason) -> bool {
        reason == PollReason::OpenNote
            || self.open_notes.lock().unwrap().contains(sd_id, note_id)
            || self.notes_in_lists.lock().unwrap().contains(sd_id, note_id)
    }

    fn recompute_priorities(&self) {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.values_mut() {
            entry.priority = if self.is_high_priority(&entry.sd_id, &entry.note_id, entry.reason) {
                Priority::High
            } else {
                Priority::Normal
            };
        }
    }

    /// Add or merge a polling entry: `expectedSequences` are merged by
    /// per-instance max; the reason and addedAt of an existing entry are
    /// left untouched by a re-upsert with a lower-priority reason.
    pub fn upsert(
        &self,
        sd_id: &str,
        note_id: &str,
        reason: PollReason,
        expected_sequences: BTreeMap<String, i64>,
        now_ms: i64,
    ) {
        let key = (sd_id.to_string(), note_id.to_string());
        let priority = if self.is_high_priority(sd_id, note_id, reason) { Priority::High } else { Priority::Normal };
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(key)
            .and_modify(|entry| {
                for (instance, seq) in &expected_sequences {
                    entry
                        .expected_sequences
                        .entry(instance.clone())
                        .and_modify(|m| *m = (*m).max(*seq))
                        .or_insert(*seq);
                }
                entry.priority = priority;
            })
            .or_insert_with(|| PollingEntry {
                sd_id: sd_id.to_string(),
                note_id: note_id.to_string(),
                reason,
                expected_sequences,
                caught_up_sequences: BTreeSet::new(),
                added_at: now_ms,
                last_polled_at: None,
                priority,
            });
    }

    /// Mark an instance's expected sequence, keeping the max if already set.
    pub fn add_expected_sequence(&self, sd_id: &str, note_id: &str, instance: &str, seq: i64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&(sd_id.to_string(), note_id.to_string())) {
            entry
                .expected_sequences
                .entry(instance.to_string())
                .and_modify(|m| *m = (*m).max(seq))
                .or_insert(seq);
        }
    }

    /// Record that an instance's actual sequence has reached `actual_seq`;
    /// it counts as caught up iff this meets or exceeds the expected value.
    pub fn update_sequence(&self, sd_id: &str, note_id: &str, instance: &str, actual_seq: i64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&(sd_id.to_string(), note_id.to_string())) {
            let expected = entry.expected_sequences.get(instance).copied().unwrap_or(i64::MIN);
            if actual_seq >= expected {
                entry.caught_up_sequences.insert(instance.to_string());
            }
        }
    }

    fn refill(bucket: &mut TokenBucket, config: &PollingConfig, now_ms: i64) {
        while let Some(&front) = bucket.recent_hits.front() {
            if front <= now_ms - 1000 {
                bucket.recent_hits.pop_front();
            } else {
                break;
            }
        }
        let elapsed_secs = ((now_ms - bucket.last_refill_ms).max(0) as f64) / 1000.0;
        let base_rate = config.poll_rate_per_minute / 60.0;
        let accelerated = base_rate * (1.0 + config.hit_rate_multiplier * bucket.recent_hits.len() as f64);
        let rate = accelerated.min(config.max_burst_per_second);
        bucket.tokens = (bucket.tokens + elapsed_secs * rate).min(config.max_burst_per_second);
        bucket.last_refill_ms = now_ms;
    }

    /// Return up to `max_count` entries to poll next, respecting the rate
    /// budget and the normal-priority reservation.
    pub fn get_next_batch(&self, max_count: usize, now_ms: i64) -> Vec<PollingEntry> {
        if max_count == 0 {
            return Vec::new();
        }
        let mut bucket = self.bucket.lock().unwrap();
        Self::refill(&mut bucket, &self.config, now_ms);
        let available = bucket.tokens.floor().max(0.0) as usize;
        let budget = available.min(max_count);
        if budget == 0 {
            return Vec::new();
        }

        let entries = self.entries.lock().unwrap();
        let mut high: Vec<&PollingEntry> = entries
            .values()
            .filter(|e| e.priority == Priority::High)
            .filter(|e| !polled_this_second(e.last_polled_at, now_ms))
            .collect();
        let mut normal: Vec<&PollingEntry> = entries
            .values()
            .filter(|e| e.priority == Priority::Normal)
            .filter(|e| !polled_this_second(e.last_polled_at, now_ms))
            .collect();
        high.sort_by_key(|e| e.added_at);
        normal.sort_by_key(|e| e.added_at);

        let max_high = (budget as f64 * (1.0 - self.config.normal_priority_reserve)).ceil() as usize;
        let high_take = max_high.min(high.len()).min(budget);
        let mut selected: Vec<PollingEntry> = high[..high_take].iter().map(|e| (*e).clone()).collect();
        let remaining = budget - selected.len();
        let normal_take = remaining.min(normal.len());
        selected.extend(normal[..normal_take].iter().map(|e| (*e).clone()));

        bucket.tokens -= selected.len() as f64;
        selected
    }

    /// Stamp `lastPolledAt`, register a hit if `hit`, and evict the entry
    /// if its reason's exit criterion is now satisfied.
    pub fn mark_polled(&self, sd_id: &str, note_id: &str, hit: bool, now_ms: i64) {
        if hit {
            self.bucket.lock().unwrap().recent_hits.push_back(now_ms);
        }
        let key = (sd_id.to_string(), note_id.to_string());
        let mut entries = self.entries.lock().unwrap();
        let should_remove = if let Some(entry) = entries.get_mut(&key) {
            entry.last_polled_at = Some(now_ms);
            self.exit_criterion_met(entry, now_ms)
        } else {
            false
        };
        if should_remove {
            entries.remove(&key);
        }
    }

    fn exit_criterion_met(&self, entry: &PollingEntry, now_ms: i64) -> bool {
        match entry.reason {
            PollReason::FastPathHandoff => {
                !entry.expected_sequences.is_empty()
                    && entry.expected_sequences.keys().all(|i| entry.caught_up_sequences.contains(i))
            }
            PollReason::FullRepoll => entry.last_polled_at.is_some(),
            PollReason::OpenNote => !self.open_notes.lock().unwrap().contains(&entry.sd_id, &entry.note_id),
            PollReason::NotesList => !self.notes_in_lists.lock().unwrap().contains(&entry.sd_id, &entry.note_id),
            PollReason::RecentEdit => now_ms - entry.added_at > self.config.recent_edit_window_ms,
        }
    }

    /// Replace a window's open-notes set for one SD.
    pub fn set_open_notes_for_window(&self, window_id: &str, sd_id: &str, notes: HashSet<String>) {
        self.open_notes.lock().unwrap().set(window_id, sd_id, notes);
        self.recompute_priorities();
    }

    /// Replace a window's notes-in-lists set for one SD.
    pub fn set_notes_in_lists(&self, window_id: &str, sd_id: &str, notes: HashSet<String>) {
        self.notes_in_lists.lock().unwrap().set(window_id, sd_id, notes);
        self.recompute_priorities();
    }

    /// Drop every per-window set registered under `window_id`.
    pub fn remove_window(&self, window_id: &str) {
        self.open_notes.lock().unwrap().remove_window(window_id);
        self.notes_in_lists.lock().unwrap().remove_window(window_id);
        self.recompute_priorities();
    }

    /// Number of entries currently queued, for diagnostics/tests.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn polled_this_second(last_polled_at: Option<i64>, now_ms: i64) -> bool {
    last_polled_at.is_some_and(|t| now_ms - t < 1000)
}
