//! The unlock/edit/reload/recover workflow, end to end, including the
//! corrupted-edit recovery path.

use std::fs;
use std::path::PathBuf;

use armory::{Record, RecordStoreBuilder, RegistryError, ReloadOutcome};

fn seed_sword(data_dir: &std::path::Path) -> PathBuf {
    let records = data_dir.join("records");
    fs::create_dir_all(&records).unwrap();
    let doc = serde_json::json!({
        "name": "sword",
        "uid": -42,
        "display_name": "Longsword",
        "quality": "rare",
        "max_durability": 150
    });
    let path = records.join("sword-item.json");
    fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
    path
}

#[test]
fn corrupted_edit_recovers_from_backup() {
    let tmp = tempfile::tempdir().unwrap();
    seed_sword(tmp.path());

    let mut store = RecordStoreBuilder::new(tmp.path()).open().unwrap();
    let report = store.load_all();
    assert!(report.is_clean(), "failures: {:?}", report.failures);

    let file = match store.lookup("sword").expect("loaded") {
        Record::Item(item) => item.backing_file.clone().unwrap(),
        _ => panic!("expected an item"),
    };
    let pre_edit = fs::read_to_string(&file).unwrap();

    store.unlock_and_backup("sword").expect("unlock");
    // The external edit goes wrong.
    fs::write(&file, "{ definitely not a record").unwrap();

    let outcome = store.reload("sword").expect("reload");
    assert_eq!(outcome, ReloadOutcome::RecoveredFromBackup);

    // On-disk content equals the pre-edit state, byte for byte, and the
    // record is live again under its old identity.
    assert_eq!(fs::read_to_string(&file).unwrap(), pre_edit);
    let record = store.lookup("sword").expect("still present");
    assert_eq!(record.uid(), -42);
    match record {
        Record::Item(item) => {
            assert_eq!(item.max_durability, 150);
            assert_eq!(item.display_name, "Longsword");
        }
        _ => panic!("expected an item"),
    }
    assert!(!store.is_unlocked("sword"), "session is closed");
}

#[test]
fn valid_edit_commits_the_session() {
    let tmp = tempfile::tempdir().unwrap();
    let file = seed_sword(tmp.path());

    let mut store = RecordStoreBuilder::new(tmp.path()).open().unwrap();
    store.load_all();
    let backup = store.unlock_and_backup("sword").expect("unlock");
    assert!(backup.exists());

    let doc = serde_json::json!({ "name": "sword", "uid": -42, "max_durability": 60 });
    fs::write(&file, serde_json::to_string_pretty(&doc).unwrap()).unwrap();

    assert_eq!(store.reload("sword").unwrap(), ReloadOutcome::Reloaded);
    assert!(!backup.exists(), "committed session discards its backup");
    match store.lookup("sword").expect("present") {
        Record::Item(item) => assert_eq!(item.max_durability, 60),
        _ => panic!("expected an item"),
    }
}

#[test]
fn second_unlock_before_reload_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    seed_sword(tmp.path());
    let mut store = RecordStoreBuilder::new(tmp.path()).open().unwrap();
    store.load_all();

    store.unlock_and_backup("sword").expect("first");
    let err = store.unlock_and_backup("sword").unwrap_err();
    assert!(matches!(err, RegistryError::EditSessionOpen(_)));
}

#[test]
fn deleted_file_is_treated_as_intentional_removal() {
    let tmp = tempfile::tempdir().unwrap();
    let file = seed_sword(tmp.path());
    let mut store = RecordStoreBuilder::new(tmp.path()).open().unwrap();
    store.load_all();

    store.unlock_and_backup("sword").expect("unlock");
    fs::remove_file(&file).unwrap();

    assert_eq!(store.reload("sword").unwrap(), ReloadOutcome::FileDeleted);
    assert!(store.lookup("sword").is_none());
    assert!(!store.is_unlocked("sword"));
}

#[test]
fn clean_backups_waits_for_sessions_to_close() {
    let tmp = tempfile::tempdir().unwrap();
    let file = seed_sword(tmp.path());
    let mut store = RecordStoreBuilder::new(tmp.path()).open().unwrap();
    store.load_all();

    store.unlock_and_backup("sword").expect("unlock");
    assert!(matches!(
        store.clean_backups().unwrap_err(),
        RegistryError::EditSessionOpen(_)
    ));

    let doc = serde_json::json!({ "name": "sword", "uid": -42 });
    fs::write(&file, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
    store.reload("sword").expect("reload");

    // Session closed; pruning works again (the commit already removed its
    // own backup, so zero is acceptable here).
    let removed = store.clean_backups().expect("clean");
    assert_eq!(removed, 0);
}
