//! CRDT façade for a single note document (§3, §4.8).
//!
//! Thin wrapper around `yrs`, exposing a stable interface regardless of the
//! underlying CRDT library: `encode_state_as_update`, `apply_update`,
//! `observe_updates`. Metadata reads fall back to safe defaults per §4.8 and
//! §7 so a malformed document never trips a NOT-NULL-style failure
//! downstream. Comment threads, replies and reactions live as nested
//! maps/arrays inside the same document; every mutating method wraps its
//! writes in a single transaction so the emitted update is atomic.

use std::collections::BTreeMap;

use yrs::types::ToJson;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayPrelim, Doc, Map, MapPrelim, MapRef, ReadTxn, StateVector, Subscription,
    Text, TextRef, Transact, Update,
};

use crate::crdt::types::{MetadataPatch, NoteMetadata, UpdateOrigin};
use crate::error::{Result, StoreError};

const METADATA_MAP: &str = "metadata";
const CONTENT_TEXT: &str = "content";
const COMMENTS_MAP: &str = "comments";

const REPLIES_KEY: &str = "replies";
const REACTIONS_KEY: &str = "reactions";
const AUTHOR_KEY: &str = "author";
const TEXT_KEY: &str = "text";
const CREATED_KEY: &str = "created";
const PARENT_KEY: &str = "parent";

fn decode_error(message: impl Into<String>) -> StoreError {
    StoreError::CorruptRecord {
        path: std::path::PathBuf::new(),
        message: message.into(),
    }
}

/// One comment, with its replies (by id) and reactions (emoji -> authors),
/// as read back out of the nested CRDT structure.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentThread {
    /// Comment id.
    pub id: String,
    /// Author of the comment.
    pub author: String,
    /// Comment body text.
    pub text: String,
    /// Creation time, milliseconds.
    pub created: i64,
    /// Parent comment id, if this is a reply.
    pub parent: Option<String>,
    /// Reply comment ids, in insertion order.
    pub replies: Vec<String>,
    /// Reaction emoji -> authors who reacted with it.
    pub reactions: BTreeMap<String, Vec<String>>,
}

/// A CRDT-backed note document: metadata, rich text body, comment threads.
pub struct NoteDoc {
    id: String,
    doc: Doc,
    metadata: MapRef,
    content: TextRef,
    comments: MapRef,
}

impl NoteDoc {
    /// Create a brand-new, empty note document.
    pub fn new_note(id: impl Into<String>) -> Self {
        let doc = Doc::new();
        let metadata = doc.get_or_insert_map(METADATA_MAP);
        let content = doc.get_or_insert_text(CONTENT_TEXT);
        let comments = doc.get_or_insert_map(COMMENTS_MAP);
        Self {
            id: id.into(),
            doc,
            metadata,
            content,
            comments,
        }
    }

    /// Rebuild a note document from a base state and a list of incremental
    /// updates, tolerating per-update decode/apply failures (logged and
    /// skipped, per §4.10's replay policy).
    pub fn load(id: impl Into<String>, base_state: Option<&[u8]>, updates: &[Vec<u8>]) -> Self {
        let note = Self::new_note(id);
        if let Some(state) = base_state {
            if let Err(e) = note.apply_update(state, UpdateOrigin::Remote) {
                log::warn!("note_doc: failed to apply base snapshot state: {e}");
            }
        }
        for bytes in updates {
            if let Err(e) = note.apply_update(bytes, UpdateOrigin::Remote) {
                log::warn!("note_doc: failed to apply update during load: {e}");
            }
        }
        note
    }

    /// Note id this façade is bound to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set initial metadata in a single transaction, returning the encoded
    /// update produced.
    pub fn initialize(&self, folder_id: Option<&str>, created_ms: i64) -> Vec<u8> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            self.metadata.insert(&mut txn, "id", self.id.clone());
            self.metadata.insert(&mut txn, CREATED_KEY, created_ms);
            self.metadata.insert(&mut txn, "modified", created_ms);
            self.metadata.insert(&mut txn, "deleted", false);
            self.metadata.insert(&mut txn, "pinned", false);
            if let Some(folder_id) = folder_id {
                self.metadata.insert(&mut txn, "folder_id", folder_id.to_string());
            }
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }

    /// Read metadata, filling in the defensive defaults §4.8 mandates.
    pub fn get_metadata(&self, now_ms: i64) -> NoteMetadata {
        let txn = self.doc.transact();
        let id = self
            .metadata
            .get(&txn, "id")
            .and_then(|v| v.to_string(&txn).into());
        let created = self
            .metadata
            .get(&txn, CREATED_KEY)
            .and_then(|v| any_as_i64(&v.to_json(&txn)))
            .unwrap_or(now_ms);
        let modified = self
            .metadata
            .get(&txn, "modified")
            .and_then(|v| any_as_i64(&v.to_json(&txn)))
            .unwrap_or(now_ms);
        let folder_id = self.metadata.get(&txn, "folder_id").map(|v| v.to_string(&txn));
        let deleted = self
            .metadata
            .get(&txn, "deleted")
            .and_then(|v| any_as_bool(&v.to_json(&txn)))
            .unwrap_or(false);
        let pinned = self
            .metadata
            .get(&txn, "pinned")
            .and_then(|v| any_as_bool(&v.to_json(&txn)))
            .unwrap_or(false);
        NoteMetadata {
            id,
            created,
            modified,
            folder_id,
            deleted,
            pinned,
        }
    }

    /// Apply a partial metadata update in a single transaction.
    pub fn update_metadata(&self, patch: &MetadataPatch, modified_ms: i64) -> Vec<u8> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            if let Some(folder_id) = &patch.folder_id {
                match folder_id {
                    Some(id) => {
                        self.metadata.insert(&mut txn, "folder_id", id.clone());
                    }
                    None => {
                        self.metadata.remove(&mut txn, "folder_id");
                    }
                }
            }
            if let Some(deleted) = patch.deleted {
                self.metadata.insert(&mut txn, "deleted", deleted);
            }
            if let Some(pinned) = patch.pinned {
                self.metadata.insert(&mut txn, "pinned", pinned);
            }
            self.metadata.insert(&mut txn, "modified", modified_ms);
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }

    /// Current plain-text body.
    pub fn get_body(&self) -> String {
        let txn = self.doc.transact();
        self.content.get_string(&txn)
    }

    /// Replace the body, diffing against the current text so only the
    /// changed middle section is removed/inserted — this preserves op
    /// identity for the unchanged prefix/suffix instead of a delete-all.
    pub fn set_body(&self, new_text: &str) -> Vec<u8> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            let current = self.content.get_string(&txn);
            let (prefix_len, suffix_len) = common_prefix_suffix(&current, new_text);
            let current_len = current.chars().count();
            let new_len = new_text.chars().count();
            let remove_len = current_len - prefix_len - suffix_len;
            if remove_len > 0 {
                self.content.remove_range(&mut txn, prefix_len as u32, remove_len as u32);
            }
            let insert_len = new_len - prefix_len - suffix_len;
            if insert_len > 0 {
                let middle: String = new_text
                    .chars()
                    .skip(prefix_len)
                    .take(insert_len)
                    .collect();
                self.content.insert(&mut txn, prefix_len as u32, &middle);
            }
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }

    /// Insert text at a character index.
    pub fn insert_at(&self, index: u32, text: &str) -> Vec<u8> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            self.content.insert(&mut txn, index, text);
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }

    /// Delete a character range.
    pub fn delete_range(&self, index: u32, len: u32) -> Vec<u8> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            self.content.remove_range(&mut txn, index, len);
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }

    /// Add a top-level comment, returning its id and the encoded update.
    pub fn add_comment(&self, comment_id: &str, author: &str, text: &str, created_ms: i64) -> Vec<u8> {
        self.add_comment_inner(comment_id, author, text, created_ms, None)
    }

    /// Add a reply to an existing comment.
    pub fn add_reply(
        &self,
        reply_id: &str,
        parent_id: &str,
        author: &str,
        text: &str,
        created_ms: i64,
    ) -> Result<Vec<u8>> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            let parent = self
                .comments
                .get(&txn, parent_id)
                .and_then(|v| v.to_ymap())
                .ok_or_else(|| decode_error(format!("no such comment '{parent_id}'")))?;
            let replies = parent
                .get(&txn, REPLIES_KEY)
                .and_then(|v| v.to_yarray())
                .ok_or_else(|| decode_error("comment missing replies array"))?;
            replies.push_back(&mut txn, reply_id.to_string());
        }
        self.insert_comment_node(reply_id, author, text, created_ms, Some(parent_id));
        Ok(self.doc.transact().encode_state_as_update_v1(&before))
    }

    fn add_comment_inner(
        &self,
        comment_id: &str,
        author: &str,
        text: &str,
        created_ms: i64,
        parent: Option<&str>,
    ) -> Vec<u8> {
        let before = self.doc.transact().state_vector();
        self.insert_comment_node(comment_id, author, text, created_ms, parent);
        self.doc.transact().encode_state_as_update_v1(&before)
    }

    fn insert_comment_node(
        &self,
        comment_id: &str,
        author: &str,
        text: &str,
        created_ms: i64,
        parent: Option<&str>,
    ) {
        let mut txn = self.doc.transact_mut();
        let mut node = MapPrelim::default();
        node.insert(AUTHOR_KEY.to_string(), Any::from(author));
        node.insert(TEXT_KEY.to_string(), Any::from(text));
        node.insert(CREATED_KEY.to_string(), Any::from(created_ms));
        if let Some(parent) = parent {
            node.insert(PARENT_KEY.to_string(), Any::from(parent));
        }
        node.insert(REPLIES_KEY.to_string(), ArrayPrelim::default());
        node.insert(REACTIONS_KEY.to_string(), MapPrelim::default());
        self.comments.insert(&mut txn, comment_id.to_string(), node);
    }

    /// Add (or extend) a reaction: `emoji -> [authors]`.
    pub fn add_reaction(&self, comment_id: &str, emoji: &str, author: &str) -> Result<Vec<u8>> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            let comment = self
                .comments
                .get(&txn, comment_id)
                .and_then(|v| v.to_ymap())
                .ok_or_else(|| decode_error(format!("no such comment '{comment_id}'")))?;
            let reactions = comment
                .get(&txn, REACTIONS_KEY)
                .and_then(|v| v.to_ymap())
                .ok_or_else(|| decode_error("comment missing reactions map"))?;
            let authors = match reactions.get(&txn, emoji).and_then(|v| v.to_yarray()) {
                Some(existing) => existing,
                None => reactions.insert(&mut txn, emoji.to_string(), ArrayPrelim::default()),
            };
            authors.push_back(&mut txn, author.to_string());
        }
        Ok(self.doc.transact().encode_state_as_update_v1(&before))
    }

    /// Read back one comment thread by id, including its replies (shallow:
    /// reply ids only, call again to walk deeper) and reaction tally.
    pub fn get_comment_thread(&self, comment_id: &str) -> Option<CommentThread> {
        let txn = self.doc.transact();
        let node = self.comments.get(&txn, comment_id)?.to_ymap()?;
        Some(self.read_comment_node(&txn, comment_id, &node))
    }

    /// List every top-level (non-reply) comment.
    pub fn list_top_level_comments(&self) -> Vec<CommentThread> {
        let txn = self.doc.transact();
        let mut out = Vec::new();
        for id in self.comments.keys(&txn) {
            if let Some(node) = self.comments.get(&txn, id).and_then(|v| v.to_ymap()) {
                if node.get(&txn, PARENT_KEY).is_none() {
                    out.push(self.read_comment_node(&txn, id, &node));
                }
            }
        }
        out
    }

    fn read_comment_node<T: ReadTxn>(&self, txn: &T, id: &str, node: &MapRef) -> CommentThread {
        let author = node.get(txn, AUTHOR_KEY).map(|v| v.to_string(txn)).unwrap_or_default();
        let text = node.get(txn, TEXT_KEY).map(|v| v.to_string(txn)).unwrap_or_default();
        let created = node
            .get(txn, CREATED_KEY)
            .and_then(|v| any_as_i64(&v.to_json(txn)))
            .unwrap_or(0);
        let parent = node.get(txn, PARENT_KEY).map(|v| v.to_string(txn));
        let replies = node
            .get(txn, REPLIES_KEY)
            .and_then(|v| v.to_yarray())
            .map(|arr| arr.iter(txn).map(|v| v.to_string(txn)).collect())
            .unwrap_or_default();
        let mut reactions = BTreeMap::new();
        if let Some(reactions_map) = node.get(txn, REACTIONS_KEY).and_then(|v| v.to_ymap()) {
            for emoji in reactions_map.keys(txn) {
                if let Some(authors) = reactions_map.get(txn, emoji).and_then(|v| v.to_yarray()) {
                    reactions.insert(
                        emoji.to_string(),
                        authors.iter(txn).map(|v| v.to_string(txn)).collect(),
                    );
                }
            }
        }
        CommentThread {
            id: id.to_string(),
            author,
            text,
            created,
            parent,
            replies,
            reactions,
        }
    }

    /// Encode the full document state as a single update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&StateVector::default())
    }

    /// This document's state vector — the yrs-native notion of "what has
    /// been applied", distinct from the file-sequence vector clock the
    /// store maintains on disk.
    pub fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    /// Encode only the operations not yet covered by `known`.
    pub fn encode_diff(&self, known: &StateVector) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(known)
    }

    /// Apply an encoded update. `origin` travels with the call purely for
    /// the caller's own bookkeeping (e.g. deciding whether to persist) —
    /// the façade itself treats `Local` and `Remote` identically.
    pub fn apply_update(&self, bytes: &[u8], origin: UpdateOrigin) -> Result<()> {
        let _ = origin;
        let update = Update::decode_v1(bytes).map_err(|e| decode_error(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update).map_err(|e| decode_error(e.to_string()))?;
        Ok(())
    }

    /// Register a callback that fires synchronously on every committed
    /// mutation, receiving the encoded update bytes.
    pub fn observe_updates<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.doc
            .observe_update_v1(move |_txn, event| callback(&event.update))
            .expect("observe_update_v1 should not fail to register")
    }
}

fn any_as_i64(value: &Any) -> Option<i64> {
    match value {
        Any::BigInt(n) => Some(*n),
        Any::Number(n) => Some(*n as i64),
        _ => None,
    }
}

fn any_as_bool(value: &Any) -> Option<bool> {
    match value {
        Any::Bool(b) => Some(*b),
        _ => None,
    }
}

/// Count of common leading and trailing characters between two strings,
/// capped so they don't overlap.
fn common_prefix_suffix(a: &str, b: &str) -> (usize, usize) {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_common = a_chars.len().min(b_chars.len());

    let mut prefix = 0;
    while prefix < max_common && a_chars[prefix] == b_chars[prefix] {
        prefix += 1;
    }

    let mut suffix = 0;
    while suffix < max_common - prefix
        && a_chars[a_chars.len() - 1 - suffix] == b_chars[b_chars.len() - 1 - suffix]
    {
        suffix += 1;
    }

    (prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_then_get_metadata_round_trips() {
        let note = NoteDoc::new_note("n1");
        note.initialize(Some("folder-1"), 1000);
        let metadata = note.get_metadata(9999);
        assert_eq!(metadata.id.as_deref(), Some("n1"));
        assert_eq!(metadata.created, 1000);
        assert_eq!(metadata.folder_id.as_deref(), Some("folder-1"));
        assert!(!metadata.deleted);
        assert!(!metadata.pinned);
    }

    #[test]
    fn get_metadata_defaults_when_missing() {
        let note = NoteDoc::new_note("n1");
        let metadata = note.get_metadata(5000);
        assert_eq!(metadata.id, None);
        assert_eq!(metadata.created, 5000);
        assert!(!metadata.deleted);
    }

    #[test]
    fn update_metadata_applies_partial_patch() {
        let note = NoteDoc::new_note("n1");
        note.initialize(None, 1000);
        note.update_metadata(
            &MetadataPatch {
                deleted: Some(true),
                ..Default::default()
            },
            2000,
        );
        let metadata = note.get_metadata(0);
        assert!(metadata.deleted);
        assert!(!metadata.pinned);
        assert_eq!(metadata.modified, 2000);
    }

    #[test]
    fn set_body_then_get_body() {
        let note = NoteDoc::new_note("n1");
        note.set_body("Hello World");
        assert_eq!(note.get_body(), "Hello World");
        note.set_body("Hello Rust World");
        assert_eq!(note.get_body(), "Hello Rust World");
    }

    #[test]
    fn e2e_4_reconstruction_style_sequential_inserts() {
        let note = NoteDoc::new_note("n1");
        note.insert_at(0, "First");
        assert_eq!(note.get_body(), "First");
        note.insert_at(5, " World");
        assert_eq!(note.get_body(), "First World");
    }

    #[test]
    fn apply_update_converges_between_two_replicas() {
        let a = NoteDoc::new_note("n1");
        a.set_body("Hello");
        let b = NoteDoc::new_note("n1");
        let state_a = a.encode_state_as_update();
        b.apply_update(&state_a, UpdateOrigin::Remote).unwrap();
        assert_eq!(b.get_body(), "Hello");

        b.insert_at(5, " there");
        let diff_b = b.encode_diff(&a.state_vector());
        a.apply_update(&diff_b, UpdateOrigin::Remote).unwrap();
        assert_eq!(a.get_body(), "Hello there");
        assert_eq!(a.get_body(), b.get_body());
    }

    #[test]
    fn apply_update_twice_is_idempotent() {
        let a = NoteDoc::new_note("n1");
        a.set_body("Hello");
        let update = a.encode_state_as_update();
        let b = NoteDoc::new_note("n1");
        b.apply_update(&update, UpdateOrigin::Remote).unwrap();
        b.apply_update(&update, UpdateOrigin::Remote).unwrap();
        assert_eq!(b.get_body(), "Hello");
    }

    #[test]
    fn comment_thread_with_reply_and_reaction() {
        let note = NoteDoc::new_note("n1");
        note.add_comment("c1", "alice", "nice note", 1000);
        note.add_reply("c2", "c1", "bob", "agreed", 1001).unwrap();
        note.add_reaction("c1", "thumbsup", "bob").unwrap();

        let thread = note.get_comment_thread("c1").unwrap();
        assert_eq!(thread.author, "alice");
        assert_eq!(thread.replies, vec!["c2".to_string()]);
        assert_eq!(thread.reactions.get("thumbsup"), Some(&vec!["bob".to_string()]));

        let top_level = note.list_top_level_comments();
        assert_eq!(top_level.len(), 1);
        assert_eq!(top_level[0].id, "c1");
    }
}
