//! Mutual exclusion for stages and the worker.
//!
//! Pipeline stages take a [`ScopedLock`]: an advisory, non-blocking
//! exclusive lock on a file under `<private_root>/locks/`. If another
//! process already holds it, the caller is expected to log and return
//! cleanly rather than error (`lock_or_exit`'s behavior).
//!
//! The worker instead uses a [`PidLock`]: a single PID file per queue with
//! stale-PID reclamation, since a worker's lifetime spans many stage runs
//! and a dead worker must not wedge the next one out forever.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Holds an advisory exclusive lock for as long as it's alive; dropping it
/// releases the lock.
pub struct ScopedLock {
    _file: File,
    path: PathBuf,
}

impl ScopedLock {
    /// Attempts to acquire the lock at `path` without blocking. Returns
    /// `Ok(None)` (not an error) if it's already held - the caller should
    /// treat that as "another instance is already running this stage".
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                _file: file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self._file);
    }
}

/// PID-file lock for the long-running MQ worker. A stale PID (process no
/// longer alive) is reclaimed automatically instead of requiring manual
/// cleanup, matching `worker.py`'s `acquire_lock`.
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Acquires the lock at `path`, writing the current PID into it.
    /// Returns `Ok(None)` if another live process already holds it.
    pub fn acquire(path: &Path) -> io::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if let Some(existing_pid) = read_pid(path)? {
            if process_is_alive(existing_pid) {
                return Ok(None);
            }
        }

        std::fs::write(path, std::process::id().to_string())?;
        Ok(Some(Self {
            path: path.to_path_buf(),
        }))
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> io::Result<Option<u32>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse().ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Best-effort liveness check. On Linux this reads `/proc/<pid>`, which
/// exists for the lifetime of the process regardless of permissions. Off
/// Linux there's no portable equivalent without a new dependency, so a
/// PID found on disk is assumed live - a worse-but-safe default that only
/// risks a spurious "already running" rather than a double-run.
#[cfg(target_os = "linux")]
fn process_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_is_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_scoped_lock_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage.lock");

        let first = ScopedLock::try_acquire(&path).unwrap();
        assert!(first.is_some());

        let second = ScopedLock::try_acquire(&path).unwrap();
        assert!(second.is_none());

        drop(first);
        let third = ScopedLock::try_acquire(&path).unwrap();
        assert!(third.is_some());
    }

    #[test]
    fn pid_lock_is_reclaimed_once_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.pid");

        let lock = PidLock::acquire(&path).unwrap();
        assert!(lock.is_some());
        drop(lock);
        assert!(!path.exists());

        let reacquired = PidLock::acquire(&path).unwrap();
        assert!(reacquired.is_some());
    }

    #[test]
    fn pid_lock_reclaims_a_stale_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.pid");
        // PID 1 is init; on Linux it is always alive, so use an
        // out-of-range value that can never correspond to a live process.
        std::fs::write(&path, "4294967295").unwrap();

        let lock = PidLock::acquire(&path).unwrap();
        assert!(lock.is_some());
    }
}
