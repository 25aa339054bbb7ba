use std::fs;
use std::path::Path;

use armory::{RecordStoreBuilder, RegistryError};

fn write_item(dir: &Path, name: &str, uid: i32) {
    let doc = serde_json::json!({ "name": name, "uid": uid });
    fs::write(
        dir.join(format!("{}-item.json", name)),
        serde_json::to_string_pretty(&doc).unwrap(),
    )
    .unwrap();
}

#[test]
fn one_malformed_file_never_aborts_its_siblings() {
    let tmp = tempfile::tempdir().unwrap();
    let records = tmp.path().join("records");
    fs::create_dir_all(&records).unwrap();

    write_item(&records, "axe", -1);
    write_item(&records, "bow", -2);
    fs::write(records.join("cursed-item.json"), "{ this is not json").unwrap();
    write_item(&records, "dagger", -4);
    write_item(&records, "estoc", -5);

    let mut store = RecordStoreBuilder::new(tmp.path()).open().unwrap();
    let report = store.load_all();

    assert_eq!(report.loaded.len(), 4, "files 1,2,4,5 load");
    assert_eq!(report.failures.len(), 1, "exactly one failure for file 3");
    let (path, err) = &report.failures[0];
    assert!(path.ends_with("cursed-item.json"));
    assert!(matches!(err, RegistryError::InvalidDocument { .. }));

    for name in ["axe", "bow", "dagger", "estoc"] {
        assert!(store.lookup(name).is_some(), "{} should be loaded", name);
    }
    assert!(store.lookup("cursed").is_none());
}

#[test]
fn empty_directory_reports_nothing_loaded_without_error() {
    let tmp = tempfile::tempdir().unwrap();
    let mut store = RecordStoreBuilder::new(tmp.path()).open().unwrap();
    let report = store.load_all();
    assert!(report.is_clean());
    assert!(report.loaded.is_empty());
    assert_eq!(report.empty_dirs.len(), 1);
}

#[test]
fn subdirectories_are_walked_recursively() {
    let tmp = tempfile::tempdir().unwrap();
    let records = tmp.path().join("records");
    let nested = records.join("weapons").join("blades");
    fs::create_dir_all(&nested).unwrap();
    write_item(&records, "torch", -1);
    write_item(&nested, "katana", -2);

    let mut store = RecordStoreBuilder::new(tmp.path()).open().unwrap();
    let report = store.load_all();
    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert_eq!(report.loaded.len(), 2);
    assert!(store.lookup("katana").is_some());
}

#[test]
fn groups_load_by_suffix_and_resolve_members() {
    let tmp = tempfile::tempdir().unwrap();
    let records = tmp.path().join("records");
    fs::create_dir_all(&records).unwrap();
    write_item(&records, "fire-sword", -1);
    write_item(&records, "fire-axe", -2);
    write_item(&records, "bow", -3);
    let doc = serde_json::json!({ "name": "firearms", "uid": -50, "regex": "^fire-" });
    fs::write(
        records.join("firearms-group.json"),
        serde_json::to_string_pretty(&doc).unwrap(),
    )
    .unwrap();

    let mut store = RecordStoreBuilder::new(tmp.path()).open().unwrap();
    let report = store.load_all();
    assert!(report.is_clean(), "failures: {:?}", report.failures);

    let group = store.groups().next().expect("group loaded");
    assert_eq!(group.name, "firearms");
    assert_eq!(group.members.len(), 2, "regex selects the two fire- items");
}

#[test]
fn duplicate_uid_across_files_isolates_to_one_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let records = tmp.path().join("records");
    fs::create_dir_all(&records).unwrap();
    write_item(&records, "axe", -7);
    write_item(&records, "bow", -7); // same uid, loads second

    let mut store = RecordStoreBuilder::new(tmp.path()).open().unwrap();
    let report = store.load_all();
    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0].1,
        RegistryError::DuplicateKey { .. }
    ));
    // Exactly one of the two is live; the registry is never half-updated.
    assert_eq!(store.record_count(), 1);
}
