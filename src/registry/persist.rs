//! Moving records between disk and registry with crash safety.
//!
//! The save path is the critical sequence: serialize, back up the current
//! on-disk content, write, re-open and re-parse what was written, and only
//! then discard the backup. Any failure after the write restores the last
//! known-good bytes, so a backing file is never left in a state that fails
//! to parse back into a valid record (as long as the pre-save state was
//! valid and the recovery copy succeeds).

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{error, info, warn};
use rand::Rng;
use serde_json::Value;

use crate::registry::errors::RegistryError;
use crate::registry::powers::{PowerCatalog, PowerError};
use crate::registry::types::{
    kind_for_filename, GroupRecord, ItemRecord, RecordKind, DOCUMENT_SCHEMA_VERSION,
};
use crate::registry::{RecordStore, LEGACY_STORE};
use crate::validation::validate_record_name;

/// Summary of one successfully loaded record.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub name: String,
    pub uid: i32,
    pub kind: RecordKind,
}

/// Aggregate outcome of a bulk load. Bulk operations always finish
/// enumerating all inputs; per-file failures land here instead of aborting
/// the walk.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failures: Vec<(PathBuf, RegistryError)>,
    pub empty_dirs: Vec<PathBuf>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Aggregate outcome of saving many records.
#[derive(Debug, Default)]
pub struct SaveReport {
    pub saved: usize,
    pub failures: Vec<(String, RegistryError)>,
}

fn is_record_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

fn split_record_filename(name: &str) -> (&str, &str) {
    use crate::registry::types::{GROUP_FILE_SUFFIX, ITEM_FILE_SUFFIX};
    for suffix in [GROUP_FILE_SUFFIX, ITEM_FILE_SUFFIX, ".json"] {
        if let Some(stem) = name.strip_suffix(suffix) {
            return (stem, suffix);
        }
    }
    (name, "")
}

/// Pick a path in `dir` for `file_name`, appending random digits to the
/// stem until the name is free.
pub(crate) fn create_unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, suffix) = split_record_filename(file_name);
    let mut rng = rand::thread_rng();
    loop {
        let candidate = dir.join(format!("{}-{}{}", stem, rng.gen::<u32>(), suffix));
        if !candidate.exists() {
            return candidate;
        }
    }
}

fn has_record_files(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if has_record_files(&path) {
                return true;
            }
        } else if is_record_file(&path) {
            return true;
        }
    }
    false
}

/// Parse and semantically validate an item document. Documents must carry
/// a name and a uid from the reserved negative range; power entries must
/// match a registered schema.
pub(crate) fn parse_item_document(
    path: &Path,
    contents: &str,
    catalog: &PowerCatalog,
) -> Result<ItemRecord, RegistryError> {
    let mut item: ItemRecord =
        serde_json::from_str(contents).map_err(|e| RegistryError::InvalidDocument {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    validate_record_name(&item.name).map_err(|e| RegistryError::InvalidDocument {
        path: path.to_path_buf(),
        reason: format!("bad name: {}", e),
    })?;
    if item.uid >= 0 {
        return Err(RegistryError::InvalidDocument {
            path: path.to_path_buf(),
            reason: format!("uid {} is outside the reserved negative range", item.uid),
        });
    }
    for entry in &item.powers {
        match catalog.validate(entry) {
            Ok(()) => {}
            Err(PowerError::Unknown { power }) => {
                return Err(RegistryError::MissingDependency {
                    name: item.name.clone(),
                    power,
                })
            }
            Err(e) => {
                return Err(RegistryError::InvalidDocument {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }
    for entry in &mut item.powers {
        catalog.apply_defaults(entry);
    }
    item.resolved_powers = item.powers.iter().map(|p| p.power.clone()).collect();
    Ok(item)
}

pub(crate) fn parse_group_document(
    path: &Path,
    contents: &str,
) -> Result<GroupRecord, RegistryError> {
    let group: GroupRecord =
        serde_json::from_str(contents).map_err(|e| RegistryError::InvalidDocument {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    validate_record_name(&group.name).map_err(|e| RegistryError::InvalidDocument {
        path: path.to_path_buf(),
        reason: format!("bad name: {}", e),
    })?;
    if group.uid >= 0 {
        return Err(RegistryError::InvalidDocument {
            path: path.to_path_buf(),
            reason: format!("uid {} is outside the reserved negative range", group.uid),
        });
    }
    if let Some(pattern) = group.regex.as_deref() {
        regex::Regex::new(pattern).map_err(|e| RegistryError::InvalidDocument {
            path: path.to_path_buf(),
            reason: format!("bad regex: {}", e),
        })?;
    }
    Ok(group)
}

impl RecordStore {
    /// Bulk load: migrate the legacy aggregate store if present and the
    /// records directory has nothing yet, then walk the records directory
    /// recursively. One bad file never aborts its siblings.
    pub fn load_all(&mut self) -> LoadReport {
        let mut report = LoadReport::default();
        let legacy = self.data_dir.join(LEGACY_STORE);
        if legacy.exists() && !has_record_files(&self.records_dir) {
            warn!("loading records from legacy {}", legacy.display());
            self.migrate_legacy(&legacy, &mut report);
        } else {
            let root = self.records_dir.clone();
            self.load_path(&root, &mut report);
        }
        self.index.refresh_groups();
        report
    }

    /// Full registry reload: tear everything down, then bulk load again.
    pub fn reload_all(&mut self) -> LoadReport {
        self.unload_all();
        self.load_all()
    }

    /// Recursive walk of a file or directory. A directory with zero
    /// eligible files reports "empty, nothing loaded" without error.
    pub fn load_path(&mut self, path: &Path, report: &mut LoadReport) {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = match fs::read_dir(path) {
                Ok(rd) => rd
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_dir() || is_record_file(p))
                    .collect(),
                Err(e) => {
                    report.failures.push((path.to_path_buf(), e.into()));
                    return;
                }
            };
            if entries.is_empty() {
                info!("nothing to load from empty directory {}", path.display());
                report.empty_dirs.push(path.to_path_buf());
                return;
            }
            entries.sort();
            for entry in entries {
                self.load_path(&entry, report);
            }
            return;
        }
        match self.load_file(path) {
            Ok(loaded) => {
                if self.show_loaded {
                    info!("loaded {} '{}'", loaded.kind.as_str(), loaded.name);
                }
                report.loaded.push(loaded.name);
            }
            Err(e) => {
                match &e {
                    RegistryError::MissingDependency { .. } => {
                        warn!("missing dependency loading {}: {}", path.display(), e)
                    }
                    _ => error!("error loading {}: {}", path.display(), e),
                }
                report.failures.push((path.to_path_buf(), e));
            }
        }
    }

    /// Load one record file into the registry and lock it. A file outside
    /// the records directory is first copied in under a collision-avoided
    /// name (the original is untouched), so "import from elsewhere" and
    /// "load in place" share one code path.
    pub fn load_file(&mut self, path: &Path) -> Result<Loaded, RegistryError> {
        if !path.exists() {
            return Err(RegistryError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("trying to load {} which does not exist", path.display()),
            )));
        }
        let mut file = path.to_path_buf();
        let mut canonical = file.canonicalize()?;
        if self.locks.is_locked(&canonical) {
            return Err(RegistryError::AlreadyLoaded(canonical));
        }
        let records_root = self.records_dir.canonicalize()?;
        if !canonical.starts_with(&records_root) {
            let file_name = file
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("import.json")
                .to_string();
            let target = create_unique_path(&self.records_dir, &file_name);
            info!("copying {} to {}", file.display(), target.display());
            fs::copy(&file, &target)?;
            file = target;
            canonical = file.canonicalize()?;
        }
        let contents = fs::read_to_string(&file)?;
        let file_name = file
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        let loaded = match kind_for_filename(&file_name) {
            RecordKind::Group => {
                let mut group = parse_group_document(&file, &contents)?;
                group.backing_file = Some(canonical.clone());
                let name = group.name.clone();
                let uid = group.uid;
                self.index.add_group(group)?;
                Loaded {
                    name,
                    uid,
                    kind: RecordKind::Group,
                }
            }
            RecordKind::Item => {
                let mut item = parse_item_document(&file, &contents, &self.catalog)?;
                item.backing_file = Some(canonical.clone());
                let name = item.name.clone();
                let uid = item.uid;
                self.index.add_item(item)?;
                Loaded {
                    name,
                    uid,
                    kind: RecordKind::Item,
                }
            }
        };

        // A record must never be live without a lock while locking is
        // enabled, so a lock failure here un-does the insert and aborts.
        if let Err(e) = self.locks.acquire(&file) {
            match loaded.kind {
                RecordKind::Item => {
                    self.index.remove_item(loaded.uid);
                }
                RecordKind::Group => {
                    self.index.remove_group(loaded.uid);
                }
            }
            return Err(RegistryError::Internal(format!(
                "loaded '{}' but could not lock {}: {}",
                loaded.name,
                file.display(),
                e
            )));
        }
        Ok(loaded)
    }

    /// Save one record by id, uid, or name.
    pub fn save(&mut self, key: &str) -> Result<(), RegistryError> {
        let (uid, kind) = {
            let record = self
                .index
                .lookup(key)
                .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
            (record.uid(), record.kind())
        };
        self.save_uid(uid, kind)
    }

    /// Save every live record, continuing past individual failures.
    pub fn save_all(&mut self) -> SaveReport {
        let mut report = SaveReport::default();
        let mut work: Vec<(i32, RecordKind, String)> = self
            .index
            .items()
            .map(|i| (i.uid, RecordKind::Item, i.name.clone()))
            .chain(
                self.index
                    .groups()
                    .map(|g| (g.uid, RecordKind::Group, g.name.clone())),
            )
            .collect();
        work.sort_by(|a, b| a.2.cmp(&b.2));
        for (uid, kind, name) in work {
            match self.save_uid(uid, kind) {
                Ok(()) => report.saved += 1,
                Err(e) => {
                    error!("error saving '{}': {}", name, e);
                    report.failures.push((name, e));
                }
            }
        }
        report
    }

    /// The crash-safety core: backup-before-overwrite, write, verify,
    /// rollback on failure.
    pub(crate) fn save_uid(&mut self, uid: i32, kind: RecordKind) -> Result<(), RegistryError> {
        // A record locked for editing must not be mutated until the edit
        // session is resolved.
        if let Some(session) = self.sessions.get(&uid) {
            return Err(RegistryError::EditSessionOpen(session.record_name.clone()));
        }

        // Step 1: serialize to an in-memory document before touching disk.
        let (name, serialized, existing_target, filename) = match kind {
            RecordKind::Item => {
                let item = self
                    .index
                    .item_mut(uid)
                    .ok_or_else(|| RegistryError::NotFound(format!("uid {}", uid)))?;
                item.touch();
                item.schema_version = DOCUMENT_SCHEMA_VERSION;
                let doc = serde_json::to_string_pretty(item)?;
                (
                    item.name.clone(),
                    doc,
                    item.backing_file.clone(),
                    item.filename(),
                )
            }
            RecordKind::Group => {
                let group = self
                    .index
                    .group_mut(uid)
                    .ok_or_else(|| RegistryError::NotFound(format!("uid {}", uid)))?;
                group.touch();
                group.schema_version = DOCUMENT_SCHEMA_VERSION;
                let doc = serde_json::to_string_pretty(group)?;
                (
                    group.name.clone(),
                    doc,
                    group.backing_file.clone(),
                    group.filename(),
                )
            }
        };
        let target = match existing_target {
            Some(t) => t,
            None => create_unique_path(&self.records_dir, &filename),
        };
        let existed = target.exists();

        // Step 2: back up the *current* on-disk content before touching the
        // original. Our own lock has to go first so the rewrite can happen.
        let backup = if existed {
            if let Ok(canonical) = target.canonicalize() {
                self.locks.release(&canonical);
            }
            match self.copy_to_backup(&target) {
                Ok(b) => Some(b),
                Err(e) => {
                    // Nothing was written yet; put the lock back and refuse
                    // to overwrite without a backup.
                    let _ = self.locks.acquire(&target);
                    return Err(e);
                }
            }
        } else {
            None
        };

        // Steps 3-4: write, then re-open and re-parse what landed on disk.
        let written = fs::write(&target, serialized.as_bytes())
            .map_err(RegistryError::from)
            .and_then(|_| self.verify_on_disk(&target, kind));

        match written {
            Ok(()) => {
                // Step 5: the new content is good; the backup can go.
                if let Some(backup) = &backup {
                    if let Err(e) = fs::remove_file(backup) {
                        warn!("could not delete save backup {}: {}", backup.display(), e);
                    }
                }
                let canonical = target.canonicalize()?;
                match kind {
                    RecordKind::Item => {
                        self.index.item_mut(uid).expect("record present").backing_file =
                            Some(canonical)
                    }
                    RecordKind::Group => {
                        self.index.group_mut(uid).expect("record present").backing_file =
                            Some(canonical)
                    }
                }
                self.locks.acquire(&target).map_err(|e| {
                    RegistryError::Internal(format!(
                        "saved '{}' but could not lock {}: {}",
                        name,
                        target.display(),
                        e
                    ))
                })?;
                Ok(())
            }
            Err(e) => {
                error!("error saving '{}': {}", name, e);
                error!("dumping current record");
                error!("===============");
                for line in serialized.lines() {
                    error!("{}", line);
                }
                error!("===============");
                if let Some(backup) = backup {
                    // Step 6: restore the last known-good state.
                    error!("recovering backup: {}", backup.display());
                    match fs::copy(&backup, &target) {
                        Ok(_) => {
                            if let Err(le) = self.locks.acquire(&target) {
                                warn!(
                                    "could not re-lock {} after recovery: {}",
                                    target.display(),
                                    le
                                );
                            }
                            Err(RegistryError::CorruptWrite {
                                name,
                                recovered: true,
                            })
                        }
                        Err(rec) => {
                            error!("error recovering backup {}: {}", backup.display(), rec);
                            Err(RegistryError::RecoveryFailed { name, backup })
                        }
                    }
                } else {
                    // Fresh file with no prior state: remove the unreadable
                    // partial write so a later load cannot trip over it.
                    let _ = fs::remove_file(&target);
                    Err(RegistryError::CorruptWrite {
                        name,
                        recovered: false,
                    })
                }
            }
        }
    }

    /// Verification step of a save: re-open the just-written file and parse
    /// it the same way a load would, discarding the result.
    fn verify_on_disk(&mut self, path: &Path, kind: RecordKind) -> Result<(), RegistryError> {
        #[cfg(test)]
        if self.fail_next_verify {
            self.fail_next_verify = false;
            return Err(RegistryError::Internal(
                "injected verification failure".into(),
            ));
        }
        let reread = fs::read_to_string(path)?;
        match kind {
            RecordKind::Item => {
                parse_item_document(path, &reread, &self.catalog)?;
            }
            RecordKind::Group => {
                parse_group_document(path, &reread)?;
            }
        }
        Ok(())
    }

    /// Copy a record file to a fresh timestamped backup under `backup/`.
    pub(crate) fn copy_to_backup(&self, file: &Path) -> Result<PathBuf, RegistryError> {
        let name = file
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("record.json");
        let stem = name.strip_suffix(".json").unwrap_or(name);
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let mut backup = self.backups_dir.join(format!("{}.{}.bak", stem, stamp));
        let mut rng = rand::thread_rng();
        while backup.exists() {
            backup = self
                .backups_dir
                .join(format!("{}.{}-{}.bak", stem, stamp, rng.gen::<u16>()));
        }
        fs::copy(file, &backup)?;
        Ok(backup)
    }

    /// One-shot migration of the legacy aggregate store into the
    /// one-file-per-record layout. Each entry is parsed and inserted
    /// independently; the legacy file is moved aside as a dated backup only
    /// after every migrated record has been re-saved individually.
    fn migrate_legacy(&mut self, legacy: &Path, report: &mut LoadReport) {
        let contents = match fs::read_to_string(legacy) {
            Ok(c) => c,
            Err(e) => {
                error!("error opening {}: {}", legacy.display(), e);
                report.failures.push((legacy.to_path_buf(), e.into()));
                return;
            }
        };
        let doc: Value = match serde_json::from_str(&contents) {
            Ok(v) => v,
            Err(e) => {
                error!("error parsing {}: {}", legacy.display(), e);
                report.failures.push((
                    legacy.to_path_buf(),
                    RegistryError::InvalidDocument {
                        path: legacy.to_path_buf(),
                        reason: e.to_string(),
                    },
                ));
                return;
            }
        };
        let Some(entries) = doc.get("records").and_then(|v| v.as_object()) else {
            warn!("{} has no 'records' table; nothing to migrate", legacy.display());
            return;
        };

        for (key, value) in entries {
            let mut value = value.clone();
            // Legacy entries predate uids; draw one from the reserved range.
            let needs_uid = value
                .get("uid")
                .and_then(|u| u.as_i64())
                .map(|u| u >= 0)
                .unwrap_or(true);
            if needs_uid {
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("uid".into(), Value::from(self.index.next_free_uid()));
                }
            }
            let parsed = serde_json::from_value::<ItemRecord>(value).map_err(|e| {
                RegistryError::InvalidDocument {
                    path: legacy.to_path_buf(),
                    reason: format!("entry '{}': {}", key, e),
                }
            });
            let inserted = parsed.and_then(|item| self.index.add_item(item));
            match inserted {
                Ok(uid) => {
                    let name = self
                        .index
                        .item(uid)
                        .expect("just inserted")
                        .name
                        .clone();
                    info!("migrated legacy record '{}'", name);
                    report.loaded.push(name);
                }
                Err(e) => {
                    error!("error migrating legacy entry '{}': {}", key, e);
                    report.failures.push((legacy.to_path_buf(), e));
                }
            }
        }

        warn!("moving records to directory based storage");
        let save_report = self.save_all();
        let clean_saves = save_report.failures.is_empty();
        for (name, e) in save_report.failures {
            report.failures.push((self.records_dir.join(&name), e));
        }
        if clean_saves {
            let dated = self.data_dir.join(format!(
                "records.{}.bak",
                Utc::now().format("%Y%m%d_%H%M%S")
            ));
            match fs::rename(legacy, &dated) {
                Ok(()) => info!("legacy store moved aside to {}", dated.display()),
                Err(e) => warn!("error moving {} aside: {}", legacy.display(), e),
            }
        } else {
            warn!("legacy store left in place; some records failed to re-save");
        }
    }
}
