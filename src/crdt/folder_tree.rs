//! CRDT façade for the per-SD folder tree document (§3, §4.8).
//!
//! One `FolderTree` document per SD holds every folder as an entry in a
//! top-level map, keyed by folder id. Ordering is a plain integer field
//! renumbered on reorder rather than a fractional-index scheme, matching
//! the flat list semantics §4.8 describes.

use yrs::types::ToJson;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Any, Doc, Map, MapPrelim, MapRef, ReadTxn, StateVector, Subscription, Transact, Update};

use crate::crdt::types::FolderMetadata;
use crate::error::{Result, StoreError};

const FOLDERS_MAP: &str = "folders";

fn decode_error(message: impl Into<String>) -> StoreError {
    StoreError::CorruptRecord {
        path: std::path::PathBuf::new(),
        message: message.into(),
    }
}

/// A CRDT-backed folder tree, shared across every note in one SD.
pub struct FolderTree {
    doc: Doc,
    folders: MapRef,
}

impl FolderTree {
    /// Create a brand-new, empty folder tree.
    pub fn new() -> Self {
        let doc = Doc::new();
        let folders = doc.get_or_insert_map(FOLDERS_MAP);
        Self { doc, folders }
    }

    /// Rebuild a folder tree from a base state and incremental updates,
    /// tolerating per-update decode/apply failures.
    pub fn load(base_state: Option<&[u8]>, updates: &[Vec<u8>]) -> Self {
        let tree = Self::new();
        if let Some(state) = base_state {
            if let Err(e) = tree.apply_update(state) {
                log::warn!("folder_tree: failed to apply base snapshot state: {e}");
            }
        }
        for bytes in updates {
            if let Err(e) = tree.apply_update(bytes) {
                log::warn!("folder_tree: failed to apply update during load: {e}");
            }
        }
        tree
    }

    /// Create a folder at the end of its parent's sibling list.
    pub fn create_folder(&self, id: &str, name: &str, parent_id: Option<&str>) -> Vec<u8> {
        let before = self.doc.transact().state_vector();
        let order = self.next_sibling_order(parent_id);
        {
            let mut txn = self.doc.transact_mut();
            let mut node = MapPrelim::default();
            node.insert("name".to_string(), Any::from(name));
            match parent_id {
                Some(p) => {
                    node.insert("parent_id".to_string(), Any::from(p));
                }
                None => {
                    node.insert("parent_id".to_string(), Any::Null);
                }
            }
            node.insert("order".to_string(), Any::from(order));
            node.insert("deleted".to_string(), Any::from(false));
            self.folders.insert(&mut txn, id.to_string(), node);
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }

    fn next_sibling_order(&self, parent_id: Option<&str>) -> i64 {
        let txn = self.doc.transact();
        let mut max_order = -1i64;
        for id in self.folders.keys(&txn) {
            if let Some(node) = self.folders.get(&txn, id).and_then(|v| v.to_ymap()) {
                let node_parent = read_parent_id(&node, &txn);
                if node_parent.as_deref() == parent_id {
                    if let Some(order) = node
                        .get(&txn, "order")
                        .and_then(|v| any_as_i64(&v.to_json(&txn)))
                    {
                        max_order = max_order.max(order);
                    }
                }
            }
        }
        max_order + 1
    }

    /// Apply a partial update to an existing folder: rename, reparent, or
    /// (un)delete. Fields not named are left untouched.
    pub fn update_folder(
        &self,
        id: &str,
        name: Option<&str>,
        parent_id: Option<Option<&str>>,
        deleted: Option<bool>,
    ) -> Result<Vec<u8>> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            let node = self
                .folders
                .get(&txn, id)
                .and_then(|v| v.to_ymap())
                .ok_or_else(|| decode_error(format!("no such folder '{id}'")))?;
            if let Some(name) = name {
                node.insert(&mut txn, "name", name.to_string());
            }
            if let Some(parent_id) = parent_id {
                match parent_id {
                    Some(p) => {
                        node.insert(&mut txn, "parent_id", p.to_string());
                    }
                    None => {
                        node.insert(&mut txn, "parent_id", Any::Null);
                    }
                }
            }
            if let Some(deleted) = deleted {
                node.insert(&mut txn, "deleted", deleted);
            }
        }
        Ok(self.doc.transact().encode_state_as_update_v1(&before))
    }

    /// Renumber a folder's siblings so it sits at `new_index`, with the
    /// remaining siblings shifted and renumbered to consecutive `0..n-1`.
    pub fn reorder_folder(&self, id: &str, new_index: usize) -> Result<Vec<u8>> {
        let before = self.doc.transact().state_vector();
        let txn_read = self.doc.transact();
        let parent_id = self
            .folders
            .get(&txn_read, id)
            .and_then(|v| v.to_ymap())
            .and_then(|node| read_parent_id(&node, &txn_read));
        drop(txn_read);

        let mut siblings = self.sibling_ids(parent_id.as_deref());
        let Some(pos) = siblings.iter().position(|s| s == id) else {
            return Err(decode_error(format!("no such folder '{id}'")));
        };
        let entry = siblings.remove(pos);
        let new_index = new_index.min(siblings.len());
        siblings.insert(new_index, entry);

        {
            let mut txn = self.doc.transact_mut();
            for (order, sibling_id) in siblings.iter().enumerate() {
                if let Some(node) = self.folders.get(&txn, sibling_id).and_then(|v| v.to_ymap()) {
                    node.insert(&mut txn, "order", order as i64);
                }
            }
        }
        Ok(self.doc.transact().encode_state_as_update_v1(&before))
    }

    fn sibling_ids(&self, parent_id: Option<&str>) -> Vec<String> {
        let txn = self.doc.transact();
        let mut siblings: Vec<(i64, String)> = Vec::new();
        for id in self.folders.keys(&txn) {
            if let Some(node) = self.folders.get(&txn, id).and_then(|v| v.to_ymap()) {
                let node_parent = read_parent_id(&node, &txn);
                if node_parent.as_deref() == parent_id {
                    let order = node
                        .get(&txn, "order")
                        .and_then(|v| any_as_i64(&v.to_json(&txn)))
                        .unwrap_or(0);
                    siblings.push((order, id.to_string()));
                }
            }
        }
        siblings.sort_by_key(|(order, _)| *order);
        siblings.into_iter().map(|(_, id)| id).collect()
    }

    fn read_folder<T: ReadTxn>(&self, txn: &T, id: &str, node: &MapRef) -> FolderMetadata {
        let name = node.get(txn, "name").map(|v| v.to_string(txn)).unwrap_or_default();
        let parent_id = read_parent_id(node, txn);
        let order = node
            .get(txn, "order")
            .and_then(|v| any_as_i64(&v.to_json(txn)))
            .unwrap_or(0);
        let deleted = node
            .get(txn, "deleted")
            .and_then(|v| any_as_bool(&v.to_json(txn)))
            .unwrap_or(false);
        FolderMetadata {
            id: id.to_string(),
            name,
            parent_id,
            order,
            deleted,
        }
    }

    /// Every non-deleted folder, sorted by `order` ascending, then
    /// case-insensitive name.
    pub fn get_active_folders(&self) -> Vec<FolderMetadata> {
        let txn = self.doc.transact();
        let mut out: Vec<FolderMetadata> = self
            .folders
            .keys(&txn)
            .filter_map(|id| {
                let node = self.folders.get(&txn, id)?.to_ymap()?;
                let folder = self.read_folder(&txn, id, &node);
                (!folder.deleted).then_some(folder)
            })
            .collect();
        out.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase())));
        out
    }

    /// Active folders with no deleted ancestor anywhere up the chain.
    pub fn get_visible_folders(&self) -> Vec<FolderMetadata> {
        let active = self.get_active_folders();
        let by_id: std::collections::HashMap<&str, &FolderMetadata> =
            active.iter().map(|f| (f.id.as_str(), f)).collect();

        let txn = self.doc.transact();
        let is_visible = |folder: &FolderMetadata| -> bool {
            let mut current = folder.parent_id.clone();
            let mut hops = 0;
            while let Some(parent_id) = current {
                hops += 1;
                if hops > 10_000 {
                    return false;
                }
                match by_id.get(parent_id.as_str()) {
                    Some(parent) => current = parent.parent_id.clone(),
                    None => {
                        let exists_but_deleted = self
                            .folders
                            .get(&txn, &parent_id)
                            .and_then(|v| v.to_ymap())
                            .map(|node| {
                                any_as_bool(
                                    &node
                                        .get(&txn, "deleted")
                                        .map(|v| v.to_json(&txn))
                                        .unwrap_or(Any::Bool(false)),
                                )
                                .unwrap_or(false)
                            })
                            .unwrap_or(false);
                        return !exists_but_deleted;
                    }
                }
            }
            true
        };
        active.into_iter().filter(is_visible).collect()
    }

    /// Encode the full document state as a single update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&StateVector::default())
    }

    /// This document's yrs state vector.
    pub fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    /// Encode only the operations not yet covered by `known`.
    pub fn encode_diff(&self, known: &StateVector) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(known)
    }

    /// Apply an encoded update.
    pub fn apply_update(&self, bytes: &[u8]) -> Result<()> {
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

impl Default for FolderTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the `parent_id` field of a folder node as `None` for a root-level
/// folder (stored as `Any::Null`) rather than the literal string `"null"`.
fn read_parent_id<T: ReadTxn>(node: &MapRef, txn: &T) -> Option<String> {
    match node.get(txn, "parent_id")?.to_json(txn) {
        Any::Null => None,
        Any::String(s) => Some(s.to_string()),
        _ => None,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_list_active_folders() {
        let tree = FolderTree::new();
        tree.create_folder("f1", "Zebra", None);
        tree.create_folder("f2", "Apple", None);
        let active = tree.get_active_folders();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].order, 0);
        assert_eq!(active[1].order, 1);
    }

    #[test]
    fn deleted_folder_excluded_from_active() {
        let tree = FolderTree::new();
        tree.create_folder("f1", "Notes", None);
        tree.update_folder("f1", None, None, Some(true)).unwrap();
        assert!(tree.get_active_folders().is_empty());
    }

    #[test]
    fn reorder_folder_renumbers_siblings_consecutively() {
        let tree = FolderTree::new();
        tree.create_folder("f1", "A", None);
        tree.create_folder("f2", "B", None);
        tree.create_folder("f3", "C", None);
        tree.reorder_folder("f3", 0).unwrap();
        let active = tree.get_active_folders();
        assert_eq!(active.iter().map(|f| f.id.clone()).collect::<Vec<_>>(), vec!["f3", "f1", "f2"]);
        assert_eq!(active.iter().map(|f| f.order).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn visible_folders_excludes_children_of_deleted_ancestor() {
        let tree = FolderTree::new();
        tree.create_folder("parent", "Parent", None);
        tree.create_folder("child", "Child", Some("parent"));
        tree.update_folder("parent", None, None, Some(true)).unwrap();
        assert!(tree.get_visible_folders().is_empty());
        // the child itself is still "active" (not individually deleted)
        assert_eq!(tree.get_active_folders().len(), 1);
    }

    #[test]
    fn root_folder_parent_id_is_none_not_the_string_null() {
        let tree = FolderTree::new();
        tree.create_folder("f1", "Notes", None);
        let active = tree.get_active_folders();
        assert_eq!(active[0].parent_id, None);
    }

    #[test]
    fn folder_tree_converges_between_replicas() {
        let a = FolderTree::new();
        a.create_folder("f1", "A", None);
        let b = FolderTree::load(None, &[]);
        b.apply_update(&a.encode_state_as_update()).unwrap();
        assert_eq!(b.get_active_folders().len(), 1);
    }
}
