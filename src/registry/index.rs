//! In-memory indices over items and groups. Items and groups share one
//! id/uid/name namespace: a collision across kinds is rejected exactly like
//! a collision within a kind. Ownership lives in the per-kind uid maps; the
//! id and name maps are aliases into them.

use std::collections::HashMap;

use log::warn;
use rand::Rng;
use regex::Regex;

use crate::registry::errors::RegistryError;
use crate::registry::types::{GroupRecord, ItemRecord, Record};
use crate::validation::validate_record_name;

#[derive(Default)]
pub struct RegistryIndex {
    items: HashMap<i32, ItemRecord>,
    item_by_id: HashMap<i32, i32>,
    item_by_name: HashMap<String, i32>,
    groups: HashMap<i32, GroupRecord>,
    group_by_id: HashMap<i32, i32>,
    group_by_name: HashMap<String, i32>,
}

impl RegistryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `id` is taken as a legacy id or uid by either kind.
    pub fn has_id(&self, id: i32) -> bool {
        self.items.contains_key(&id)
            || self.groups.contains_key(&id)
            || self.item_by_id.contains_key(&id)
            || self.group_by_id.contains_key(&id)
    }

    /// True if `name` is taken by either kind.
    pub fn has_name(&self, name: &str) -> bool {
        self.item_by_name.contains_key(name) || self.group_by_name.contains_key(name)
    }

    /// Insert an item, enforcing the cross-kind uniqueness invariant. All
    /// checks run before any index is touched, so a rejected insert leaves
    /// no partial state behind.
    pub fn add_item(&mut self, item: ItemRecord) -> Result<i32, RegistryError> {
        if item.id != 0 && self.has_id(item.id) {
            return Err(RegistryError::DuplicateKey {
                kind: "item id",
                key: item.id.to_string(),
            });
        }
        if self.has_id(item.uid) {
            return Err(RegistryError::DuplicateKey {
                kind: "item uid",
                key: item.uid.to_string(),
            });
        }
        if self.has_name(&item.name) {
            return Err(RegistryError::DuplicateKey {
                kind: "item name",
                key: item.name.clone(),
            });
        }
        let uid = item.uid;
        if item.id != 0 {
            self.item_by_id.insert(item.id, uid);
        }
        self.item_by_name.insert(item.name.clone(), uid);
        self.items.insert(uid, item);
        Ok(uid)
    }

    /// Insert a group under the same shared-namespace rules as [`add_item`].
    ///
    /// [`add_item`]: RegistryIndex::add_item
    pub fn add_group(&mut self, group: GroupRecord) -> Result<i32, RegistryError> {
        if group.id != 0 && self.has_id(group.id) {
            return Err(RegistryError::DuplicateKey {
                kind: "group id",
                key: group.id.to_string(),
            });
        }
        if self.has_id(group.uid) {
            return Err(RegistryError::DuplicateKey {
                kind: "group uid",
                key: group.uid.to_string(),
            });
        }
        if self.has_name(&group.name) {
            return Err(RegistryError::DuplicateKey {
                kind: "group name",
                key: group.name.clone(),
            });
        }
        let uid = group.uid;
        if group.id != 0 {
            self.group_by_id.insert(group.id, uid);
        }
        self.group_by_name.insert(group.name.clone(), uid);
        self.groups.insert(uid, group);
        Ok(uid)
    }

    /// Remove an item from the indices. Filesystem cleanup is the caller's
    /// responsibility.
    pub fn remove_item(&mut self, uid: i32) -> Option<ItemRecord> {
        let mut item = self.items.remove(&uid)?;
        if item.id != 0 {
            self.item_by_id.remove(&item.id);
        }
        self.item_by_name.remove(&item.name);
        item.deinit();
        Some(item)
    }

    pub fn remove_group(&mut self, uid: i32) -> Option<GroupRecord> {
        let mut group = self.groups.remove(&uid)?;
        if group.id != 0 {
            self.group_by_id.remove(&group.id);
        }
        self.group_by_name.remove(&group.name);
        group.deinit();
        Some(group)
    }

    /// Resolve a key that may be a legacy id, a uid, or a name, in that
    /// order. A key that fails numeric parsing falls through to name lookup.
    pub fn lookup(&self, key: &str) -> Option<Record<'_>> {
        if let Ok(n) = key.parse::<i32>() {
            if let Some(record) = self.lookup_numeric(n) {
                return Some(record);
            }
        }
        self.lookup_name(key)
    }

    pub fn lookup_numeric(&self, n: i32) -> Option<Record<'_>> {
        if let Some(uid) = self.item_by_id.get(&n) {
            return self.items.get(uid).map(Record::Item);
        }
        if let Some(uid) = self.group_by_id.get(&n) {
            return self.groups.get(uid).map(Record::Group);
        }
        if let Some(item) = self.items.get(&n) {
            return Some(Record::Item(item));
        }
        self.groups.get(&n).map(Record::Group)
    }

    pub fn lookup_name(&self, name: &str) -> Option<Record<'_>> {
        if let Some(uid) = self.item_by_name.get(name) {
            return self.items.get(uid).map(Record::Item);
        }
        self.group_by_name
            .get(name)
            .and_then(|uid| self.groups.get(uid))
            .map(Record::Group)
    }

    pub fn item(&self, uid: i32) -> Option<&ItemRecord> {
        self.items.get(&uid)
    }

    pub fn item_mut(&mut self, uid: i32) -> Option<&mut ItemRecord> {
        self.items.get_mut(&uid)
    }

    pub fn group(&self, uid: i32) -> Option<&GroupRecord> {
        self.groups.get(&uid)
    }

    pub fn group_mut(&mut self, uid: i32) -> Option<&mut GroupRecord> {
        self.groups.get_mut(&uid)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemRecord> {
        self.items.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupRecord> {
        self.groups.values()
    }

    /// All record names, sorted, for listings and completion.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .item_by_name
            .keys()
            .chain(self.group_by_name.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.items.len() + self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.groups.is_empty()
    }

    /// Draw a uid uniformly from the negative half of the i32 space,
    /// retrying until it is free in both kinds' id maps. The negative range
    /// is reserved for synthetic uids so it never collides with externally
    /// authored positive legacy ids.
    pub fn next_free_uid(&self) -> i32 {
        let mut rng = rand::thread_rng();
        loop {
            let uid = rng.gen_range(i32::MIN..0);
            if !self.has_id(uid) {
                return uid;
            }
        }
    }

    /// Create a fresh item with a synthetic uid.
    pub fn new_item(&mut self, name: &str) -> Result<i32, RegistryError> {
        validate_record_name(name)?;
        if self.has_name(name) {
            return Err(RegistryError::DuplicateKey {
                kind: "item name",
                key: name.to_string(),
            });
        }
        let uid = self.next_free_uid();
        self.add_item(ItemRecord::new(name, uid))
    }

    /// Create a fresh group with a synthetic uid and an optional name regex.
    pub fn new_group(&mut self, name: &str, regex: Option<String>) -> Result<i32, RegistryError> {
        validate_record_name(name)?;
        if self.has_name(name) {
            return Err(RegistryError::DuplicateKey {
                kind: "group name",
                key: name.to_string(),
            });
        }
        if let Some(pattern) = regex.as_deref() {
            Regex::new(pattern)
                .map_err(|e| RegistryError::Internal(format!("invalid group regex: {}", e)))?;
        }
        let uid = self.next_free_uid();
        let mut group = GroupRecord::new(name, uid, regex);
        self.refresh_group_members(&mut group);
        self.add_group(group)
    }

    /// Clone an item under a new name and fresh uid. The payload is copied
    /// through the document codec, the same round trip a save would take.
    pub fn clone_item(&mut self, source: &str, new_name: &str) -> Result<i32, RegistryError> {
        validate_record_name(new_name)?;
        if self.has_name(new_name) {
            return Err(RegistryError::DuplicateKey {
                kind: "item name",
                key: new_name.to_string(),
            });
        }
        let src = match self.lookup(source) {
            Some(Record::Item(item)) => item,
            Some(Record::Group(_)) => {
                return Err(RegistryError::NotFound(format!("item: {}", source)))
            }
            None => return Err(RegistryError::NotFound(source.to_string())),
        };
        let doc = serde_json::to_value(src)?;
        let mut copy: ItemRecord = serde_json::from_value(doc)?;
        copy.id = 0;
        copy.uid = self.next_free_uid();
        copy.name = new_name.to_string();
        copy.backing_file = None;
        copy.touch();
        self.add_item(copy)
    }

    /// Rename a record, re-validating name uniqueness across both kinds.
    pub fn rename(&mut self, key: &str, new_name: &str) -> Result<(), RegistryError> {
        validate_record_name(new_name)?;
        if self.has_name(new_name) {
            return Err(RegistryError::DuplicateKey {
                kind: "name",
                key: new_name.to_string(),
            });
        }
        let (uid, is_item) = {
            let record = self
                .lookup(key)
                .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
            (record.uid(), matches!(record, Record::Item(_)))
        };
        if is_item {
            let item = self.items.get_mut(&uid).expect("indexed item present");
            let old = std::mem::replace(&mut item.name, new_name.to_string());
            item.touch();
            self.item_by_name.remove(&old);
            self.item_by_name.insert(new_name.to_string(), uid);
        } else {
            let group = self.groups.get_mut(&uid).expect("indexed group present");
            let old = std::mem::replace(&mut group.name, new_name.to_string());
            group.touch();
            self.group_by_name.remove(&old);
            self.group_by_name.insert(new_name.to_string(), uid);
        }
        Ok(())
    }

    /// Items selected by a group: explicit members plus regex matches.
    pub fn group_items(&self, group: &GroupRecord) -> Vec<&ItemRecord> {
        group
            .members
            .iter()
            .filter_map(|uid| self.items.get(uid))
            .collect()
    }

    /// Re-resolve every group's member set against the current item names.
    /// Called after bulk load and after item create/delete/rename.
    pub fn refresh_groups(&mut self) {
        let mut groups: Vec<i32> = self.groups.keys().copied().collect();
        groups.sort_unstable();
        for uid in groups {
            let mut group = match self.groups.remove(&uid) {
                Some(g) => g,
                None => continue,
            };
            self.refresh_group_members(&mut group);
            self.groups.insert(uid, group);
        }
    }

    fn refresh_group_members(&self, group: &mut GroupRecord) {
        let mut members: Vec<i32> = Vec::new();
        for name in &group.item_names {
            match self.item_by_name.get(name) {
                Some(uid) => members.push(*uid),
                None => warn!(
                    "group '{}' lists unknown item '{}'",
                    group.name,
                    crate::logutil::escape_log(name)
                ),
            }
        }
        if let Some(pattern) = group.regex.as_deref() {
            match Regex::new(pattern) {
                Ok(re) => {
                    for (name, uid) in &self.item_by_name {
                        if re.is_match(name) && !members.contains(uid) {
                            members.push(*uid);
                        }
                    }
                }
                Err(e) => warn!("group '{}' has invalid regex: {}", group.name, e),
            }
        }
        members.sort_unstable();
        group.members = members;
    }

    /// Deinitialize every record and clear all indices.
    pub fn clear(&mut self) {
        for item in self.items.values_mut() {
            item.deinit();
        }
        for group in self.groups.values_mut() {
            group.deinit();
        }
        self.items.clear();
        self.item_by_id.clear();
        self.item_by_name.clear();
        self.groups.clear();
        self.group_by_id.clear();
        self.group_by_name.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::types::RecordKind;

    #[test]
    fn add_and_lookup_by_each_key() {
        let mut index = RegistryIndex::new();
        let mut item = ItemRecord::new("sword", -42);
        item.id = 7;
        index.add_item(item).expect("add");

        assert_eq!(index.lookup("7").map(|r| r.uid()), Some(-42));
        assert_eq!(index.lookup("-42").map(|r| r.uid()), Some(-42));
        assert_eq!(index.lookup("sword").map(|r| r.uid()), Some(-42));
        assert!(index.lookup("axe").is_none());
    }

    #[test]
    fn numeric_parse_failure_falls_through_to_name() {
        let mut index = RegistryIndex::new();
        index.add_item(ItemRecord::new("13a", -1)).expect("add");
        assert_eq!(index.lookup("13a").map(|r| r.uid()), Some(-1));
    }

    #[test]
    fn cross_kind_name_collision_rejected() {
        let mut index = RegistryIndex::new();
        index.add_item(ItemRecord::new("sword", -1)).expect("add");
        let err = index
            .add_group(GroupRecord::new("sword", -2, None))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKey { .. }));
        // The failed insert left nothing behind.
        assert!(index.lookup_numeric(-2).is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn cross_kind_uid_collision_rejected() {
        let mut index = RegistryIndex::new();
        index.add_group(GroupRecord::new("melee", -5, None)).expect("add");
        let err = index.add_item(ItemRecord::new("axe", -5)).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DuplicateKey { kind: "item uid", .. }
        ));
    }

    #[test]
    fn next_free_uid_is_negative_and_free() {
        let mut index = RegistryIndex::new();
        index.add_item(ItemRecord::new("sword", -42)).expect("add");
        for _ in 0..64 {
            let uid = index.next_free_uid();
            assert!(uid < 0);
            assert!(!index.has_id(uid));
        }
    }

    #[test]
    fn rename_revalidates_uniqueness() {
        let mut index = RegistryIndex::new();
        index.add_item(ItemRecord::new("sword", -1)).expect("add");
        index.add_item(ItemRecord::new("axe", -2)).expect("add");
        assert!(index.rename("axe", "sword").is_err());
        index.rename("axe", "battleaxe").expect("rename");
        assert_eq!(index.lookup("battleaxe").map(|r| r.uid()), Some(-2));
        assert!(index.lookup("axe").is_none());
    }

    #[test]
    fn clone_gets_fresh_identity_and_same_payload() {
        let mut index = RegistryIndex::new();
        let mut item = ItemRecord::new("sword", -1);
        item.max_durability = 99;
        index.add_item(item).expect("add");
        let uid = index.clone_item("sword", "sword2").expect("clone");
        let copy = index.item(uid).expect("present");
        assert_ne!(copy.uid, -1);
        assert_eq!(copy.id, 0);
        assert_eq!(copy.max_durability, 99);
        assert!(copy.backing_file.is_none());
    }

    #[test]
    fn groups_resolve_members_by_regex() {
        let mut index = RegistryIndex::new();
        index.add_item(ItemRecord::new("fire-sword", -1)).expect("add");
        index.add_item(ItemRecord::new("fire-axe", -2)).expect("add");
        index.add_item(ItemRecord::new("bow", -3)).expect("add");
        let uid = index
            .new_group("fire", Some("^fire-".to_string()))
            .expect("group");
        let group = index.group(uid).expect("present").clone();
        assert_eq!(group.members.len(), 2);
        assert_eq!(index.lookup("fire").map(|r| r.kind()), Some(RecordKind::Group));
    }
}
