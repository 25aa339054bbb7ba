//! # Record Registry & File-Backed Persistence
//!
//! The authoritative in-memory registry of items and item groups, persisted
//! as one JSON document per record. The hard part this module owns is making
//! concurrent, crash-prone, externally-editable file storage safe:
//!
//! - **Indices** ([`index`]): dual-keyed maps (legacy id, uid, name) with a
//!   uniqueness invariant shared across both record kinds.
//! - **Locks** ([`locks`]): per-file advisory locks against other processes,
//!   with a startup capability probe and graceful degradation.
//! - **Persistence** ([`persist`]): bulk load with partial-failure isolation,
//!   legacy store migration, and the backup-verify-rollback save algorithm.
//! - **Edit sessions** ([`session`]): the unlock/edit/reload/recover workflow
//!   that lets an operator hand-edit a backing file while the process runs.
//! - **Powers** ([`powers`]): declared schemas for the effects items
//!   reference, validated at load time.
//!
//! Everything hangs off one owned [`RecordStore`] context: no process-wide
//! statics, so each test constructs a fresh store over a temp directory.

pub mod errors;
pub mod index;
pub mod locks;
pub mod persist;
pub mod powers;
pub mod session;
pub mod types;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::config::RegistryConfig;
use errors::RegistryError;
use index::RegistryIndex;
use locks::{LockManager, LockMode};
use powers::PowerCatalog;
use session::EditSession;
use types::{GroupRecord, ItemRecord, Record, RecordKind};

/// Directory under the data dir holding one document per record.
pub const RECORDS_DIR: &str = "records";
/// Sibling directory holding timestamped `.bak` copies.
pub const BACKUPS_DIR: &str = "backup";
/// Legacy single-file aggregate store, migrated on first load.
pub const LEGACY_STORE: &str = "records.json";

/// Owned context for the registry, lock table, and edit-session table.
/// All operations take `&mut self`; the surrounding command loop provides
/// the single logical thread of control.
pub struct RecordStore {
    data_dir: PathBuf,
    records_dir: PathBuf,
    backups_dir: PathBuf,
    index: RegistryIndex,
    locks: LockManager,
    sessions: HashMap<i32, EditSession>,
    catalog: PowerCatalog,
    show_loaded: bool,
    #[cfg(test)]
    pub(crate) fail_next_verify: bool,
}

/// Helper builder so tests can easily create throwaway stores with custom
/// locking and catalogs.
pub struct RecordStoreBuilder {
    data_dir: PathBuf,
    fs_lock: bool,
    show_loaded: bool,
    catalog: Option<PowerCatalog>,
}

impl RecordStoreBuilder {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            fs_lock: true,
            show_loaded: false,
            catalog: None,
        }
    }

    /// Opt out of file locking (useful for targeted tests).
    pub fn without_locks(mut self) -> Self {
        self.fs_lock = false;
        self
    }

    pub fn with_catalog(mut self, catalog: PowerCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn open(self) -> Result<RecordStore, RegistryError> {
        RecordStore::open_with_options(
            self.data_dir,
            self.fs_lock,
            self.show_loaded,
            self.catalog.unwrap_or_default(),
        )
    }
}

impl RecordStore {
    /// Open a store rooted at the configured data directory, creating the
    /// records and backup directories and probing lock support once.
    pub fn open(config: &RegistryConfig) -> Result<Self, RegistryError> {
        Self::open_with_options(
            PathBuf::from(&config.data_dir),
            config.fs_lock,
            config.show_loaded,
            PowerCatalog::builtin(),
        )
    }

    fn open_with_options(
        data_dir: PathBuf,
        fs_lock: bool,
        show_loaded: bool,
        catalog: PowerCatalog,
    ) -> Result<Self, RegistryError> {
        fs::create_dir_all(&data_dir)?;
        let records_dir = data_dir.join(RECORDS_DIR);
        let backups_dir = data_dir.join(BACKUPS_DIR);
        fs::create_dir_all(&records_dir)?;
        fs::create_dir_all(&backups_dir)?;

        // The capability probe runs once; its verdict is process-wide state
        // for the rest of the run.
        let mode = if fs_lock {
            LockManager::probe_capability(&data_dir)
        } else {
            LockMode::Disabled
        };

        Ok(Self {
            data_dir,
            records_dir,
            backups_dir,
            index: RegistryIndex::new(),
            locks: LockManager::new(mode),
            sessions: HashMap::new(),
            catalog,
            show_loaded,
            #[cfg(test)]
            fail_next_verify: false,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    pub fn lock_mode(&self) -> LockMode {
        self.locks.mode()
    }

    pub fn catalog(&self) -> &PowerCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut PowerCatalog {
        &mut self.catalog
    }

    // --- registry delegation -------------------------------------------------

    pub fn lookup(&self, key: &str) -> Option<Record<'_>> {
        self.index.lookup(key)
    }

    pub fn item(&self, uid: i32) -> Option<&ItemRecord> {
        self.index.item(uid)
    }

    pub fn group(&self, uid: i32) -> Option<&GroupRecord> {
        self.index.group(uid)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemRecord> {
        self.index.items()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupRecord> {
        self.index.groups()
    }

    pub fn names(&self) -> Vec<String> {
        self.index.names()
    }

    pub fn record_count(&self) -> usize {
        self.index.len()
    }

    /// True if the record currently has an open edit session.
    pub fn is_unlocked(&self, key: &str) -> bool {
        self.index
            .lookup(key)
            .map(|r| self.sessions.contains_key(&r.uid()))
            .unwrap_or(false)
    }

    /// Names of records with open edit sessions.
    pub fn unlocked_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .values()
            .map(|s| s.record_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Create a fresh item. The record exists in memory only until the
    /// first [`save`](RecordStore::save).
    pub fn new_item(&mut self, name: &str) -> Result<i32, RegistryError> {
        let uid = self.index.new_item(name)?;
        self.index.refresh_groups();
        Ok(uid)
    }

    pub fn new_group(&mut self, name: &str, regex: Option<String>) -> Result<i32, RegistryError> {
        self.index.new_group(name, regex)
    }

    pub fn clone_item(&mut self, source: &str, new_name: &str) -> Result<i32, RegistryError> {
        let uid = self.index.clone_item(source, new_name)?;
        self.index.refresh_groups();
        Ok(uid)
    }

    /// Rename a record in memory. A record locked for editing must not be
    /// mutated until its session is resolved.
    pub fn rename(&mut self, key: &str, new_name: &str) -> Result<(), RegistryError> {
        if let Some(record) = self.index.lookup(key) {
            if self.sessions.contains_key(&record.uid()) {
                return Err(RegistryError::EditSessionOpen(record.name().to_string()));
            }
        }
        self.index.rename(key, new_name)?;
        self.index.refresh_groups();
        Ok(())
    }

    /// Remove a record from the registry, optionally deleting its backing
    /// file (after a best-effort backup copy). Any open edit session is
    /// torn down; its backup copy stays on disk.
    pub fn delete(&mut self, key: &str, delete_file: bool) -> Result<String, RegistryError> {
        let (uid, kind, name, file) = {
            let record = self
                .index
                .lookup(key)
                .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
            (
                record.uid(),
                record.kind(),
                record.name().to_string(),
                record.backing_file().map(Path::to_path_buf),
            )
        };
        if let Some(session) = self.sessions.remove(&uid) {
            session.abandon();
        }
        match kind {
            RecordKind::Item => {
                self.index.remove_item(uid);
            }
            RecordKind::Group => {
                self.index.remove_group(uid);
            }
        }
        if let Some(file) = file {
            if let Ok(canonical) = file.canonicalize() {
                self.locks.release(&canonical);
            }
            if delete_file && file.exists() {
                if let Err(e) = self.copy_to_backup(&file) {
                    warn!("cannot create backup for '{}': {}", name, e);
                }
                if let Err(e) = fs::remove_file(&file) {
                    warn!("error deleting file {}: {}", file.display(), e);
                }
            }
        }
        self.index.refresh_groups();
        Ok(name)
    }

    /// Deinitialize every record, clear all indices, and release every lock
    /// held by the store, including edit-session backup locks. Used for
    /// full registry reload.
    pub fn unload_all(&mut self) {
        for (_, session) in self.sessions.drain() {
            session.abandon();
        }
        self.index.clear();
        self.locks.release_all();
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        // Locks are released by the OS when the handles close, but be
        // explicit so teardown order never depends on it.
        self.unload_all();
    }
}
