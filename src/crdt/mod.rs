//! CRDT façade: note documents and the folder tree (§4.8), plus the shared
//! event/metadata types the rest of the engine exchanges with them.

pub mod folder_tree;
pub mod note_doc;
pub mod types;

pub use folder_tree::FolderTree;
pub use note_doc::{CommentThread, NoteDoc};
pub use types::{FolderMetadata, MetadataPatch, NoteMetadata, UpdateEvent, UpdateOrigin};
