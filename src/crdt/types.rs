//! Shared CRDT façade types (§3, §4.8, design note on observation callbacks).

use serde::{Deserialize, Serialize};

/// Distinguishes where an applied update came from. The store uses this to
/// decide whether to persist: `Local` updates are written out, `Remote`
/// updates (already on disk, just being replayed into memory) are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOrigin {
    /// Produced by a mutation on this in-memory document.
    Local,
    /// Applied from bytes that arrived from elsewhere (disk replay, another
    /// instance's file).
    Remote,
}

/// One CRDT mutation, as pushed onto the façade's observation channel. This
/// is the "one-way channel" from the design notes: the façade only ever
/// emits bytes plus their origin tag, never a handle to itself.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    /// Where this update came from.
    pub origin: UpdateOrigin,
    /// The encoded CRDT update (opaque to everything but the CRDT library).
    pub bytes: Vec<u8>,
}

/// Note metadata with the defensive defaults §4.8 mandates: `created` and
/// `modified` default to "now" when absent, `deleted`/`pinned` default to
/// `false`. `id` has no default — `None` indicates malformed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteMetadata {
    /// Note id. Absent only when the document is malformed.
    pub id: Option<String>,
    /// Creation time, milliseconds.
    pub created: i64,
    /// Last modification time, milliseconds.
    pub modified: i64,
    /// Folder this note is assigned to, if any.
    pub folder_id: Option<String>,
    /// Soft-delete flag.
    pub deleted: bool,
    /// Pinned flag.
    pub pinned: bool,
}

/// A partial update to [`NoteMetadata`]; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    /// New folder assignment, if changing.
    pub folder_id: Option<Option<String>>,
    /// New deleted flag, if changing.
    pub deleted: Option<bool>,
    /// New pinned flag, if changing.
    pub pinned: Option<bool>,
}

/// Folder tree entry: `folder id -> { name, parentId, order, deleted }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderMetadata {
    /// Folder id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Parent folder id, `None` for a root-level folder.
    pub parent_id: Option<String>,
    /// Sibling order, ascending.
    pub order: i64,
    /// Soft-delete flag.
    pub deleted: bool,
}
