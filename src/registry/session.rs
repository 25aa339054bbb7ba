//! Edit sessions: the operator-mediated external-edit workflow.
//!
//! `unlock_and_backup` hands a record's backing file to an external editor:
//! the in-process lock is released, the current content is copied to a
//! locked, checksummed backup, and the record is marked unlocked.
//! `reload` reconciles afterwards: either the edited file loads (session
//! committed, backup discarded) or the backup is restored over it (session
//! recovered). A vanished file is treated as an intentional removal.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::registry::errors::RegistryError;
use crate::registry::locks::{lock_file, LockHandle};
use crate::registry::types::RecordKind;
use crate::registry::RecordStore;

/// How a `reload` resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The externally edited file parsed; the session was committed.
    Reloaded,
    /// The edited file was broken; the pre-edit backup was restored.
    RecoveredFromBackup,
    /// The backing file vanished; the record was dropped, no recovery.
    FileDeleted,
}

/// One open edit session: the pre-edit backup copy, the lock we hold on
/// it, and the checksum that guards the restore path.
pub struct EditSession {
    pub record_name: String,
    pub backup_path: PathBuf,
    pub checksum: String,
    pub opened_at: DateTime<Utc>,
    lock: Option<LockHandle>,
}

impl EditSession {
    fn release_lock(&mut self) {
        if let Some(handle) = self.lock.take() {
            handle.release();
        }
    }

    /// Commit: the session is over and the backup is no longer needed.
    pub(crate) fn discard(mut self) {
        self.release_lock();
        if let Err(e) = fs::remove_file(&self.backup_path) {
            warn!(
                "could not delete session backup {}: {}",
                self.backup_path.display(),
                e
            );
        }
    }

    /// Tear down the session but leave the backup file on disk.
    pub(crate) fn abandon(mut self) {
        self.release_lock();
    }
}

/// SHA-256 of a file's bytes, hex encoded.
fn sha256_file(path: &Path) -> std::io::Result<String> {
    use sha2::{Digest, Sha256};

    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

impl RecordStore {
    /// Open an edit session: release the record's in-process lock so an
    /// external editor can open the file, copy the current content to a
    /// fresh timestamped backup, and lock the backup instead. At most one
    /// session per record.
    pub fn unlock_and_backup(&mut self, key: &str) -> Result<PathBuf, RegistryError> {
        let (uid, name, file) = {
            let record = self
                .index
                .lookup(key)
                .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
            let name = record.name().to_string();
            let file = record.backing_file().map(Path::to_path_buf).ok_or_else(|| {
                RegistryError::Internal(format!("record '{}' has never been saved", name))
            })?;
            (record.uid(), name, file)
        };
        if self.sessions.contains_key(&uid) {
            return Err(RegistryError::EditSessionOpen(name));
        }

        let canonical = file.canonicalize()?;
        self.locks.release(&canonical);

        let backup = match self.copy_to_backup(&file) {
            Ok(b) => b,
            Err(e) => {
                error!("cannot create backup for '{}': {}", name, e);
                let _ = self.locks.acquire(&file);
                return Err(e);
            }
        };
        let checksum = match sha256_file(&backup) {
            Ok(c) => c,
            Err(e) => {
                error!("cannot checksum backup {}: {}", backup.display(), e);
                let _ = self.locks.acquire(&file);
                return Err(e.into());
            }
        };

        // If the backup cannot be locked, a concurrent editor could corrupt
        // it too; put the original lock back and refuse the session.
        let lock = if self.locks.is_enabled() {
            match lock_file(&backup) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("error locking backup {}: {}", backup.display(), e);
                    let _ = self.locks.acquire(&file);
                    return Err(RegistryError::Internal(format!(
                        "cannot lock backup {}: {}",
                        backup.display(),
                        e
                    )));
                }
            }
        } else {
            None
        };

        info!(
            "'{}' unlocked for editing; backup at {}",
            name,
            backup.display()
        );
        self.sessions.insert(
            uid,
            EditSession {
                record_name: name,
                backup_path: backup.clone(),
                checksum,
                opened_at: Utc::now(),
                lock,
            },
        );
        Ok(backup)
    }

    /// Reconcile a record with its (possibly externally edited) backing
    /// file. Requires an open edit session while locking is enabled.
    pub fn reload(&mut self, key: &str) -> Result<ReloadOutcome, RegistryError> {
        let (uid, kind, name, file) = {
            let record = self
                .index
                .lookup(key)
                .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
            let name = record.name().to_string();
            let file = record.backing_file().map(Path::to_path_buf).ok_or_else(|| {
                RegistryError::Internal(format!("record '{}' has never been saved", name))
            })?;
            (record.uid(), record.kind(), name, file)
        };
        let session = match self.sessions.remove(&uid) {
            Some(s) => Some(s),
            None if self.locks.is_enabled() => {
                return Err(RegistryError::NoEditSession(name));
            }
            None => None,
        };

        // Out of the registry first; the file stays untouched.
        match kind {
            RecordKind::Item => {
                self.index.remove_item(uid);
            }
            RecordKind::Group => {
                self.index.remove_group(uid);
            }
        }
        if let Ok(canonical) = file.canonicalize() {
            self.locks.release(&canonical);
        }

        if !file.exists() || file.is_dir() {
            // Intentional removal, not corruption: drop the record, keep
            // the backup for the operator, attempt nothing.
            if let Some(session) = session {
                session.abandon();
            }
            self.index.refresh_groups();
            info!("file for '{}' is gone; dropping the record", name);
            return Ok(ReloadOutcome::FileDeleted);
        }

        match self.load_file(&file) {
            Ok(loaded) => {
                if let Some(session) = session {
                    session.discard();
                }
                self.index.refresh_groups();
                info!("reloaded '{}' from {}", loaded.name, file.display());
                Ok(ReloadOutcome::Reloaded)
            }
            Err(load_err) => {
                error!(
                    "error reloading '{}' from {}: {}",
                    name,
                    file.display(),
                    load_err
                );
                let Some(session) = session else {
                    // Locking disabled and no backup taken: nothing to
                    // restore from.
                    return Err(load_err);
                };
                self.recover_from_session(name, &file, session)
            }
        }
    }

    /// Restore the pre-edit backup over a broken backing file and load the
    /// restored content. A second failure is unrecoverable in-process.
    fn recover_from_session(
        &mut self,
        name: String,
        file: &Path,
        session: EditSession,
    ) -> Result<ReloadOutcome, RegistryError> {
        // Keep the operator's broken edit around before overwriting it.
        match self.copy_to_backup(file) {
            Ok(edited) => info!(
                "recovering '{}'; the edited file was kept at {}",
                name,
                edited.display()
            ),
            Err(e) => warn!("could not preserve the edited file for '{}': {}", name, e),
        }

        let backup_path = session.backup_path.clone();
        let checksum_ok = match sha256_file(&backup_path) {
            Ok(actual) => actual == session.checksum,
            Err(e) => {
                error!("error reading backup {}: {}", backup_path.display(), e);
                false
            }
        };
        if !checksum_ok {
            error!(
                "backup {} failed its checksum; refusing to restore",
                backup_path.display()
            );
            session.abandon();
            return Err(RegistryError::RecoveryFailed {
                name,
                backup: backup_path,
            });
        }

        if let Err(e) = fs::copy(&backup_path, file) {
            error!(
                "error copying backup {} over {}: {}",
                backup_path.display(),
                file.display(),
                e
            );
            session.abandon();
            return Err(RegistryError::RecoveryFailed {
                name,
                backup: backup_path,
            });
        }

        match self.load_file(file) {
            Ok(loaded) => {
                session.discard();
                self.index.refresh_groups();
                info!("recovered '{}' from backup", loaded.name);
                Ok(ReloadOutcome::RecoveredFromBackup)
            }
            Err(e) => {
                error!("error loading restored {}: {}", file.display(), e);
                session.abandon();
                Err(RegistryError::RecoveryFailed {
                    name,
                    backup: backup_path,
                })
            }
        }
    }

    /// Delete every `.bak` file under the backup directory. Refuses to run
    /// while any edit session is open, since those backups are live state.
    pub fn clean_backups(&mut self) -> Result<usize, RegistryError> {
        if let Some(session) = self.sessions.values().next() {
            return Err(RegistryError::EditSessionOpen(session.record_name.clone()));
        }
        let mut removed = 0usize;
        let mut stack = vec![self.backups_dir.clone()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)?.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().and_then(|e| e.to_str()) == Some("bak") {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }
        info!("removed {} backup files", removed);
        Ok(removed)
    }
}
