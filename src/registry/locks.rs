//! Advisory file locking for record backing files.
//!
//! Locks guard against a *second process* (or an external editor) racing
//! the same file; in-process serialization is the caller's single-threaded
//! command loop. All acquisition is try-lock, never blocking-wait, so one
//! unavailable file can never stall the load/save pipeline.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, warn};

use crate::registry::errors::RegistryError;

/// Process-wide locking mode, decided once by the startup probe (or forced
/// off by configuration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Advisory locks work on this filesystem; every live record holds one.
    Advisory,
    /// The probe failed or locking is disabled. Best effort only: deletion
    /// races with external processes are possible in this mode.
    Disabled,
}

/// An acquired lock. The open file keeps the OS lock alive until released
/// or dropped.
#[derive(Debug)]
pub struct LockHandle {
    file: File,
    path: PathBuf,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the OS lock and close the handle. Failures are logged, not
    /// returned: a broken handle must never block teardown.
    pub fn release(self) {
        if let Err(e) = self.file.unlock() {
            warn!("error releasing lock on {}: {}", self.path.display(), e);
        }
    }
}

/// Try-lock a file exclusively, outside any table bookkeeping. Used for
/// backing files and for edit-session backup copies alike.
pub fn lock_file(path: &Path) -> Result<LockHandle, RegistryError> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(LockHandle {
            file,
            path: path.to_path_buf(),
        }),
        Err(e)
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
                || e.kind() == std::io::ErrorKind::WouldBlock =>
        {
            Err(RegistryError::LockUnavailable(path.to_path_buf()))
        }
        Err(e) => Err(RegistryError::Io(e)),
    }
}

/// The lock table: canonical backing-file path -> held lock.
pub struct LockManager {
    mode: LockMode,
    table: HashMap<PathBuf, LockHandle>,
}

impl LockManager {
    pub fn new(mode: LockMode) -> Self {
        Self {
            mode,
            table: HashMap::new(),
        }
    }

    /// Probe, once at startup, whether the filesystem under `dir` supports
    /// the advisory locking primitive. Creates a throwaway file, takes and
    /// releases a shared lock, and deletes it again. Any failure degrades
    /// to [`LockMode::Disabled`] for the remainder of the run.
    pub fn probe_capability(dir: &Path) -> LockMode {
        let probe = dir.join(format!(
            "lock_probe-{}-{}.tmp",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        ));
        let outcome = (|| -> std::io::Result<()> {
            let file = OpenOptions::new()
                .create_new(true)
                .read(true)
                .write(true)
                .open(&probe)?;
            file.try_lock_shared()?;
            file.unlock()?;
            Ok(())
        })();
        let _ = std::fs::remove_file(&probe);
        match outcome {
            Ok(()) => LockMode::Advisory,
            Err(e) => {
                warn!(
                    "file locking unsupported under {} ({}); running without locks",
                    dir.display(),
                    e
                );
                LockMode::Disabled
            }
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.mode == LockMode::Advisory
    }

    /// True if the canonical path already holds a valid in-process lock.
    pub fn is_locked(&self, canonical: &Path) -> bool {
        self.table.contains_key(canonical)
    }

    /// Acquire an exclusive lock for a backing file and record it in the
    /// table. Fails with [`RegistryError::LockConflict`] if this process
    /// already holds one for the path, [`RegistryError::LockUnavailable`]
    /// if another process does.
    pub fn acquire(&mut self, path: &Path) -> Result<(), RegistryError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let canonical = path.canonicalize()?;
        if self.table.contains_key(&canonical) {
            return Err(RegistryError::LockConflict(canonical));
        }
        let handle = lock_file(&canonical)?;
        self.table.insert(canonical, handle);
        Ok(())
    }

    /// Release the lock for a path. Idempotent: an absent entry is logged
    /// and ignored, which is the expected case right after a reload.
    pub fn release(&mut self, canonical: &Path) {
        match self.table.remove(canonical) {
            Some(handle) => handle.release(),
            None => debug!(
                "no lock held for {}; fine if this record was just reloaded",
                canonical.display()
            ),
        }
    }

    /// Drop the table entry without releasing (ownership moves to the
    /// caller, e.g. when an edit session takes over the file).
    pub fn take(&mut self, canonical: &Path) -> Option<LockHandle> {
        self.table.remove(canonical)
    }

    pub fn held_paths(&self) -> Vec<PathBuf> {
        self.table.keys().cloned().collect()
    }

    /// Release every held lock, continuing past individual failures so one
    /// broken handle can never block teardown.
    pub fn release_all(&mut self) {
        for (_, handle) in self.table.drain() {
            handle.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).expect("create");
        f.write_all(b"{}").expect("write");
        path
    }

    #[test]
    fn probe_reports_advisory_on_tempdir() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(LockManager::probe_capability(dir.path()), LockMode::Advisory);
        // The throwaway probe file is cleaned up.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn double_acquire_is_a_conflict() {
        let dir = TempDir::new().expect("tempdir");
        let path = touch(&dir, "sword-item.json");
        let mut locks = LockManager::new(LockMode::Advisory);
        locks.acquire(&path).expect("first acquire");
        let err = locks.acquire(&path).unwrap_err();
        assert!(matches!(err, RegistryError::LockConflict(_)));
    }

    #[test]
    fn foreign_holder_means_unavailable() {
        let dir = TempDir::new().expect("tempdir");
        let path = touch(&dir, "sword-item.json");
        // Simulate another process: a separate open file description.
        let foreign = lock_file(&path).expect("foreign lock");
        let err = lock_file(&path).unwrap_err();
        assert!(matches!(err, RegistryError::LockUnavailable(_)));
        foreign.release();
        lock_file(&path).expect("free again").release();
    }

    #[test]
    fn release_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let path = touch(&dir, "sword-item.json");
        let canonical = path.canonicalize().expect("canonicalize");
        let mut locks = LockManager::new(LockMode::Advisory);
        locks.acquire(&path).expect("acquire");
        locks.release(&canonical);
        locks.release(&canonical); // absent entry: logged, not an error
        assert!(!locks.is_locked(&canonical));
    }

    #[test]
    fn disabled_mode_never_tracks() {
        let dir = TempDir::new().expect("tempdir");
        let path = touch(&dir, "sword-item.json");
        let mut locks = LockManager::new(LockMode::Disabled);
        locks.acquire(&path).expect("no-op acquire");
        locks.acquire(&path).expect("still no conflict");
        assert!(locks.held_paths().is_empty());
    }
}
