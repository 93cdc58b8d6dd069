//! SD layout: pure path algebra over a storage directory root (§4.2).
//!
//! Directories are created lazily on first write; this module only computes
//! paths, it never touches the filesystem.

use std::path::{Path, PathBuf};

/// Resolved paths within one storage directory (SD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdLayout {
    root: PathBuf,
}

impl SdLayout {
    /// Root the layout on a given SD directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The SD root itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `notes/<noteId>/`
    pub fn note_dir(&self, note_id: &str) -> PathBuf {
        self.root.join("notes").join(note_id)
    }

    /// `notes/<noteId>/updates/`
    pub fn note_updates_dir(&self, note_id: &str) -> PathBuf {
        self.note_dir(note_id).join("updates")
    }

    /// `notes/<noteId>/packs/`
    pub fn note_packs_dir(&self, note_id: &str) -> PathBuf {
        self.note_dir(note_id).join("packs")
    }

    /// `notes/<noteId>/snapshots/`
    pub fn note_snapshots_dir(&self, note_id: &str) -> PathBuf {
        self.note_dir(note_id).join("snapshots")
    }

    /// `notes/<noteId>/logs/`
    pub fn note_logs_dir(&self, note_id: &str) -> PathBuf {
        self.note_dir(note_id).join("logs")
    }

    /// `folders/updates/`
    pub fn folder_updates_dir(&self) -> PathBuf {
        self.root.join("folders").join("updates")
    }

    /// `folders/packs/`
    pub fn folder_packs_dir(&self) -> PathBuf {
        self.root.join("folders").join("packs")
    }

    /// `folders/snapshots/`
    pub fn folder_snapshots_dir(&self) -> PathBuf {
        self.root.join("folders").join("snapshots")
    }

    /// `folders/logs/`
    pub fn folder_logs_dir(&self) -> PathBuf {
        self.root.join("folders").join("logs")
    }

    /// `profiles/<profileId>.json`
    pub fn profile_file(&self, profile_id: &str) -> PathBuf {
        self.root.join("profiles").join(format!("{profile_id}.json"))
    }

    /// `SD-TYPE`
    pub fn sd_type_file(&self) -> PathBuf {
        self.root.join("SD-TYPE")
    }
}

/// Per-profile lock file path: `<profileDir>/profile.lock`.
pub fn profile_lock_file(profile_dir: &Path) -> PathBuf {
    profile_dir.join("profile.lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_paths_are_nested_under_notes_id() {
        let layout = SdLayout::new("/sd");
        assert_eq!(
            layout.note_updates_dir("n1"),
            PathBuf::from("/sd/notes/n1/updates")
        );
        assert_eq!(
            layout.note_packs_dir("n1"),
            PathBuf::from("/sd/notes/n1/packs")
        );
        assert_eq!(
            layout.note_snapshots_dir("n1"),
            PathBuf::from("/sd/notes/n1/snapshots")
        );
        assert_eq!(
            layout.note_logs_dir("n1"),
            PathBuf::from("/sd/notes/n1/logs")
        );
    }

    #[test]
    fn folder_and_profile_paths() {
        let layout = SdLayout::new("/sd");
        assert_eq!(
            layout.folder_updates_dir(),
            PathBuf::from("/sd/folders/updates")
        );
        assert_eq!(
            layout.profile_file("p1"),
            PathBuf::from("/sd/profiles/p1.json")
        );
        assert_eq!(layout.sd_type_file(), PathBuf::from("/sd/SD-TYPE"));
    }
}
