#![warn(missing_docs)]
//! Per-note storage and synchronization engine for an offline-first,
//! multi-device note-taking application.
//!
//! Many application instances share notes and a folder tree by reading and
//! writing files in a common storage directory (SD), typically mirrored by
//! an external sync service. There is no central server and no network
//! protocol: consistency comes entirely from CRDTs serialized to files plus
//! a disciplined on-disk layout. This crate is the per-note storage engine:
//! the append-only log, compaction, garbage collection, state
//! reconstruction, and polling dispatch that make that layout work.

/// Binary format codec: filenames, log records, pack/snapshot containers.
pub mod codec;

/// Compaction pipeline: decides when to snapshot or pack, and does it.
pub mod compactor;

/// Configuration types threaded through the store, compactor, GC and
/// polling dispatcher.
pub mod config;

/// CRDT façade: note documents and the folder tree.
pub mod crdt;

/// Error taxonomy for the storage engine.
pub mod error;

/// Garbage collector: prunes snapshots, packs and updates once subsumed.
pub mod gc;

/// SD path algebra: where notes, updates, packs, snapshots and the folder
/// tree live under a storage directory root.
pub mod layout;

/// Single-writer advisory profile lock.
pub mod lock;

/// The append-only update log: writer and reader.
pub mod log;

/// State reconstructor: snapshot selection plus bounded replay.
pub mod reconstruct;

/// Update/pack/snapshot store: the stateful façade over a set of SDs.
pub mod store;

/// Plain-text and snippet extraction from a document fragment.
pub mod text;

/// Timeline builder: groups updates into activity sessions.
pub mod timeline;

/// Polling dispatcher: rate-budgeted, priority-reserving note re-scan queue.
pub mod polling;

pub use codec::{DocumentScope, PackFile, SnapshotFile};
pub use compactor::Compactor;
pub use config::{CompactionConfig, EngineConfig, PollingConfig};
pub use crdt::{FolderTree, NoteDoc, UpdateEvent, UpdateOrigin};
pub use error::{Result, StoreError};
pub use gc::{run_garbage_collection, GcStats};
pub use layout::SdLayout;
pub use polling::PollingDispatcher;
pub use store::UpdateStore;
