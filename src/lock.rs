//! Single-writer advisory lock: one `profile.lock` file per profile,
//! containing the holder's PID (§4.12).
//!
//! Safety only — it does not prevent concurrent readers, and a violated
//! lock does not break CRDT convergence (§5).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::layout::profile_lock_file;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LockContents {
    pid: u32,
    timestamp: i64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    // signal 0 sends no signal; it only checks whether we could signal the
    // process, which fails with ESRCH if it's gone.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    // No portable liveness probe without an extra dependency; treat the
    // holder as alive so a concurrent writer fails closed instead of open.
    true
}

async fn read_lock(path: &Path) -> Result<Option<LockContents>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let parsed: LockContents = serde_json::from_str(&contents)?;
            Ok(Some(parsed))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// An acquired profile lock. Dropping it does NOT release the file — call
/// [`Guard::release`] explicitly, since release is fallible I/O.
pub struct Guard {
    path: PathBuf,
    pid: u32,
}

impl Guard {
    /// This lock's held path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the lock file.
    pub async fn release(self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Acquire the advisory lock for `profile_dir`. Succeeds if no lock file
/// exists, if it names this process's PID, or if it names a dead process
/// (overwritten). Fails with `LockHeld` if a live, different process holds
/// it.
pub async fn acquire(profile_dir: &Path) -> Result<Guard> {
    let path = profile_lock_file(profile_dir);
    let pid = std::process::id();

    if let Some(existing) = read_lock(&path).await? {
        if existing.pid != pid && process_is_alive(existing.pid) {
            return Err(StoreError::LockHeld { pid: existing.pid });
        }
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = LockContents { pid, timestamp: now_ms() };
    let json = serde_json::to_vec(&contents)?;
    tokio::fs::write(&path, json).await?;
    Ok(Guard { path, pid })
}

/// Whether a live process currently holds the lock for `profile_dir`.
pub async fn is_locked(profile_dir: &Path) -> Result<bool> {
    let path = profile_lock_file(profile_dir);
    match read_lock(&path).await? {
        Some(existing) => Ok(process_is_alive(existing.pid)),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_is_locked_then_release() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_locked(dir.path()).await.unwrap());
        let guard = acquire(dir.path()).await.unwrap();
        assert!(is_locked(dir.path()).await.unwrap());
        assert_eq!(guard.pid, std::process::id());
        guard.release().await.unwrap();
        assert!(!is_locked(dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn reacquire_by_same_process_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let first = acquire(dir.path()).await.unwrap();
        let second = acquire(dir.path()).await.unwrap();
        second.release().await.unwrap();
        let _ = first.path();
    }

    #[tokio::test]
    async fn stale_lock_from_dead_pid_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = profile_lock_file(dir.path());
        // PID 1 is reserved (init) and extremely unlikely to match this test
        // process; pick an implausibly large PID instead to simulate "dead".
        let stale = LockContents { pid: 999_999, timestamp: 0 };
        tokio::fs::write(&path, serde_json::to_vec(&stale).unwrap()).await.unwrap();
        let guard = acquire(dir.path()).await.unwrap();
        assert_eq!(guard.pid, std::process::id());
    }
}
