use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::validation::safe_filename;

pub const DOCUMENT_SCHEMA_VERSION: u8 = 1;

/// Filename suffix that marks a document as a group record. Everything else
/// ending in `.json` is an item.
pub const GROUP_FILE_SUFFIX: &str = "-group.json";
pub const ITEM_FILE_SUFFIX: &str = "-item.json";

/// The two record kinds sharing one identity namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Item,
    Group,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Item => "item",
            RecordKind::Group => "group",
        }
    }
}

/// Item quality tier, purely cosmetic to this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Trash,
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Common
    }
}

/// A power attached to an item: the power name plus its field values.
/// Field semantics are owned by the power catalog, not this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerEntry {
    pub power: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl PowerEntry {
    pub fn new(power: impl Into<String>) -> Self {
        Self {
            power: power.into(),
            fields: BTreeMap::new(),
        }
    }
}

fn default_schema_version() -> u8 {
    DOCUMENT_SCHEMA_VERSION
}

/// A single item record. Serialized 1:1 as the on-disk JSON document;
/// `backing_file` and other runtime state never leave the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Legacy stable id, zero when unset. Kept for backward-compatible lookups.
    #[serde(default)]
    pub id: i32,
    /// Synthetic unique id from the negative range. Immutable once assigned.
    pub uid: i32,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: Vec<String>,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub max_durability: i32,
    #[serde(default)]
    pub powers: Vec<PowerEntry>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u8,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
    /// Owned exclusively by this record while it is live; `None` until the
    /// first successful save or load.
    #[serde(skip)]
    pub backing_file: Option<PathBuf>,
    /// Power names resolved against the catalog at load time.
    #[serde(skip)]
    pub resolved_powers: Vec<String>,
}

impl ItemRecord {
    pub fn new(name: impl Into<String>, uid: i32) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: 0,
            uid,
            display_name: name.clone(),
            name,
            description: Vec::new(),
            quality: Quality::default(),
            max_durability: 0,
            powers: Vec::new(),
            schema_version: DOCUMENT_SCHEMA_VERSION,
            created_at: now,
            modified_at: now,
            backing_file: None,
            resolved_powers: Vec::new(),
        }
    }

    /// Preferred filename for this record inside the records directory.
    pub fn filename(&self) -> String {
        format!("{}{}", safe_filename(&self.name), ITEM_FILE_SUFFIX)
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    /// Drop runtime-resolved state. Called on unload and removal; the power
    /// system re-resolves on the next load.
    pub fn deinit(&mut self) {
        self.resolved_powers.clear();
    }
}

/// A named group of items, selected by explicit member names and/or a
/// regex over item names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    #[serde(default)]
    pub id: i32,
    pub uid: i32,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: Vec<String>,
    /// Regex over item names; `None` means explicit membership only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default)]
    pub item_names: Vec<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u8,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
    #[serde(skip)]
    pub backing_file: Option<PathBuf>,
    /// Member uids resolved against the registry; refreshed after bulk load.
    #[serde(skip)]
    pub members: Vec<i32>,
}

impl GroupRecord {
    pub fn new(name: impl Into<String>, uid: i32, regex: Option<String>) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: 0,
            uid,
            display_name: name.clone(),
            name,
            description: Vec::new(),
            regex,
            item_names: Vec::new(),
            schema_version: DOCUMENT_SCHEMA_VERSION,
            created_at: now,
            modified_at: now,
            backing_file: None,
            members: Vec::new(),
        }
    }

    pub fn filename(&self) -> String {
        format!("{}{}", safe_filename(&self.name), GROUP_FILE_SUFFIX)
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    pub fn deinit(&mut self) {
        self.members.clear();
    }
}

/// A borrowed view over either record kind, returned by registry lookups.
#[derive(Debug, Clone, Copy)]
pub enum Record<'a> {
    Item(&'a ItemRecord),
    Group(&'a GroupRecord),
}

impl<'a> Record<'a> {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Item(_) => RecordKind::Item,
            Record::Group(_) => RecordKind::Group,
        }
    }

    pub fn uid(&self) -> i32 {
        match self {
            Record::Item(i) => i.uid,
            Record::Group(g) => g.uid,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            Record::Item(i) => i.id,
            Record::Group(g) => g.id,
        }
    }

    pub fn name(&self) -> &'a str {
        match self {
            Record::Item(i) => &i.name,
            Record::Group(g) => &g.name,
        }
    }

    pub fn backing_file(&self) -> Option<&'a Path> {
        match self {
            Record::Item(i) => i.backing_file.as_deref(),
            Record::Group(g) => g.backing_file.as_deref(),
        }
    }
}

/// Kind dispatch follows the filename convention: `*-group.json` is a
/// group, any other `*.json` an item.
pub fn kind_for_filename(file_name: &str) -> RecordKind {
    if file_name.ends_with(GROUP_FILE_SUFFIX) {
        RecordKind::Group
    } else {
        RecordKind::Item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_document_round_trip() {
        let mut item = ItemRecord::new("longsword", -7);
        item.description.push("A plain longsword.".into());
        item.quality = Quality::Rare;
        item.max_durability = 120;
        let mut hurt = PowerEntry::new("hurt");
        hurt.fields.insert("damage".into(), serde_json::json!(6));
        item.powers.push(hurt);

        let doc = serde_json::to_string_pretty(&item).expect("serialize");
        let back: ItemRecord = serde_json::from_str(&doc).expect("parse");
        assert_eq!(back.name, "longsword");
        assert_eq!(back.uid, -7);
        assert_eq!(back.quality, Quality::Rare);
        assert_eq!(back.powers.len(), 1);
        assert_eq!(back.powers[0].power, "hurt");
        assert!(back.backing_file.is_none(), "runtime state must not persist");
    }

    #[test]
    fn group_suffix_dispatch() {
        assert_eq!(kind_for_filename("swords-group.json"), RecordKind::Group);
        assert_eq!(kind_for_filename("longsword-item.json"), RecordKind::Item);
        assert_eq!(kind_for_filename("odd.json"), RecordKind::Item);
    }

    #[test]
    fn missing_uid_is_rejected_by_codec() {
        let doc = r#"{ "name": "broken" }"#;
        assert!(serde_json::from_str::<ItemRecord>(doc).is_err());
    }
}
