use std::path::PathBuf;
use thiserror::Error;

/// Errors that can arise while interacting with the record registry and
/// its file-backed persistence layer.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An id, uid, or name collided with a live record during insertion.
    /// The registry indices are unchanged when this is returned.
    #[error("duplicate {kind}: {key}")]
    DuplicateKey { kind: &'static str, key: String },

    /// Attempt to load a file whose canonical path already holds a valid lock.
    #[error("already loaded: {}", .0.display())]
    AlreadyLoaded(PathBuf),

    /// The in-process lock table already has an entry for this path.
    #[error("lock already held for {}", .0.display())]
    LockConflict(PathBuf),

    /// The filesystem refused the lock, most likely because another process
    /// (or an external editor) holds it.
    #[error("file lock unavailable for {}", .0.display())]
    LockUnavailable(PathBuf),

    /// A just-written document failed to parse back. `recovered` tells the
    /// caller whether the previous on-disk content was restored.
    #[error("verification failed after saving '{name}' (recovered from backup: {recovered})")]
    CorruptWrite { name: String, recovered: bool },

    /// Restoring a backup over a broken file failed. Fatal for this record;
    /// manual intervention is required.
    #[error("recovery of '{name}' from backup {} failed", backup.display())]
    RecoveryFailed { name: String, backup: PathBuf },

    /// Malformed or semantically invalid record document.
    #[error("invalid document {}: {reason}", path.display())]
    InvalidDocument { path: PathBuf, reason: String },

    /// The record references a power that is not registered in the catalog.
    /// Expected to be transient (extension not yet loaded), so callers log
    /// this distinctly from corruption.
    #[error("record '{name}' references unknown power '{power}'")]
    MissingDependency { name: String, power: String },

    /// A second edit session was requested before the first was resolved.
    #[error("record '{0}' already has an open edit session")]
    EditSessionOpen(String),

    /// The operation requires an open edit session and there is none.
    #[error("record '{0}' is not unlocked for editing")]
    NoEditSession(String),

    /// Returned when a lookup by id, uid, or name matches nothing.
    #[error("record not found: {0}")]
    NotFound(String),

    /// The record name failed validation.
    #[error("invalid record name: {0}")]
    InvalidName(#[from] crate::validation::NameError),

    /// Wrapper around IO errors (copy, create, lock probe, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapper around serde_json serialization and deserialization errors.
    #[error("document error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (a record live without a lock, unexpected conditions).
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Fatal errors abort the surrounding command; everything else degrades
    /// to a reported, continue-processing outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RegistryError::RecoveryFailed { .. } | RegistryError::Internal(_)
        )
    }
}
