// src/data/version_store.rs

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use crate::errors::{FlowdagError, Result};
use crate::types::{DataId, DataKey, Location, VersionId};

/// One immutable version of a data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataVersion {
    pub id: VersionId,
    /// Analysed tasks that will read this version and have not completed.
    pub readers: usize,
    /// Graph edges labelled with this version.
    pub edge_refs: usize,
    pub location: Location,
}

/// A logical datum and its ordered versions.
#[derive(Debug, Clone)]
pub struct DataItem {
    pub id: DataId,
    pub key: DataKey,
    versions: BTreeMap<u32, DataVersion>,
    next_version: u32,
    current: Option<u32>,
}

impl DataItem {
    /// The most recently created version, if any.
    pub fn current(&self) -> Option<VersionId> {
        self.current.map(|v| VersionId::new(self.id, v))
    }

    pub fn versions(&self) -> impl Iterator<Item = &DataVersion> {
        self.versions.values()
    }
}

/// Tracks every data item, its versions and which of them are still needed.
///
/// Single-writer: only the analyser mutates it.
#[derive(Debug, Default)]
pub struct DataVersionStore {
    items: HashMap<DataId, DataItem>,
    by_key: HashMap<DataKey, DataId>,
    next_data: u64,
}

impl DataVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data id for `key`, registering the item on first sight.
    pub fn register(&mut self, key: &DataKey) -> DataId {
        if let Some(id) = self.by_key.get(key) {
            return *id;
        }

        let id = DataId(self.next_data);
        self.next_data += 1;
        self.by_key.insert(key.clone(), id);
        self.items.insert(
            id,
            DataItem {
                id,
                key: key.clone(),
                versions: BTreeMap::new(),
                next_version: 0,
                current: None,
            },
        );
        debug!(data = %id, key = %key, "registered data item");
        id
    }

    pub fn lookup(&self, key: &DataKey) -> Option<DataId> {
        self.by_key.get(key).copied()
    }

    pub fn item(&self, data: DataId) -> Option<&DataItem> {
        self.items.get(&data)
    }

    /// Create the next version of `data`. Numbers start at 0 and never repeat.
    pub fn new_version(&mut self, data: DataId) -> Result<VersionId> {
        let item = self
            .items
            .get_mut(&data)
            .ok_or(FlowdagError::UnknownData(data))?;

        let number = item.next_version;
        item.next_version += 1;
        item.current = Some(number);

        let id = VersionId::new(data, number);
        item.versions.insert(
            number,
            DataVersion {
                id,
                readers: 0,
                edge_refs: 0,
                location: Location::default(),
            },
        );
        trace!(version = %id, "created version");
        Ok(id)
    }

    pub fn current_version(&self, data: DataId) -> Option<VersionId> {
        self.items.get(&data).and_then(|i| i.current())
    }

    pub fn version(&self, id: VersionId) -> Option<&DataVersion> {
        self.items.get(&id.data)?.versions.get(&id.version)
    }

    fn version_mut(&mut self, id: VersionId) -> Option<&mut DataVersion> {
        self.items.get_mut(&id.data)?.versions.get_mut(&id.version)
    }

    pub fn location(&self, id: VersionId) -> Location {
        self.version(id).map(|v| v.location).unwrap_or_default()
    }

    pub fn add_reader(&mut self, id: VersionId) {
        if let Some(v) = self.version_mut(id) {
            v.readers += 1;
        }
    }

    pub fn remove_reader(&mut self, id: VersionId) {
        if let Some(v) = self.version_mut(id) {
            v.readers = v.readers.saturating_sub(1);
        }
    }

    pub fn add_edge_ref(&mut self, id: VersionId) {
        if let Some(v) = self.version_mut(id) {
            v.edge_refs += 1;
        }
    }

    pub fn remove_edge_ref(&mut self, id: VersionId) {
        if let Some(v) = self.version_mut(id) {
            v.edge_refs = v.edge_refs.saturating_sub(1);
        }
    }

    pub fn mark_local(&mut self, id: VersionId) {
        self.mark(id, Location::LOCAL);
    }

    pub fn mark_remote(&mut self, id: VersionId) {
        self.mark(id, Location::REMOTE);
    }

    pub fn mark(&mut self, id: VersionId, location: Location) {
        if let Some(v) = self.version_mut(id) {
            v.location = v.location.union(location);
        }
    }

    /// A version may be removed once nobody will read it and no edge points to it.
    pub fn is_retirable(&self, id: VersionId) -> bool {
        self.version(id)
            .map(|v| v.readers == 0 && v.edge_refs == 0)
            .unwrap_or(false)
    }

    /// Whether a newer version of the same item exists.
    pub fn is_superseded(&self, id: VersionId) -> bool {
        self.current_version(id.data)
            .map(|current| current.version > id.version)
            .unwrap_or(false)
    }

    /// Remove the version record. Does nothing while it still has readers or
    /// open edges; returns whether the record was removed.
    pub fn retire(&mut self, id: VersionId) -> bool {
        if !self.is_retirable(id) {
            return false;
        }
        let removed = self
            .items
            .get_mut(&id.data)
            .and_then(|i| i.versions.remove(&id.version))
            .is_some();
        if removed {
            debug!(version = %id, "retired version");
        }
        removed
    }

    /// Retire `id` only if it has been superseded and is otherwise unused.
    pub fn retire_if_superseded(&mut self, id: VersionId) -> bool {
        self.is_superseded(id) && self.retire(id)
    }

    /// Number of live version records for `data`.
    pub fn version_count(&self, data: DataId) -> usize {
        self.items.get(&data).map(|i| i.versions.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_monotonic_per_item() {
        let mut store = DataVersionStore::new();
        let a = store.register(&DataKey::Object("a".into()));
        let b = store.register(&DataKey::Object("b".into()));

        assert_eq!(store.new_version(a).unwrap().version, 0);
        assert_eq!(store.new_version(a).unwrap().version, 1);
        assert_eq!(store.new_version(b).unwrap().version, 0);
        assert_eq!(store.current_version(a), Some(VersionId::new(a, 1)));
    }

    #[test]
    fn location_flags_are_or_combined() {
        let mut store = DataVersionStore::new();
        let a = store.register(&DataKey::File("in.txt".into()));
        let v = store.new_version(a).unwrap();

        store.mark_local(v);
        store.mark_local(v);
        assert_eq!(store.location(v), Location::LOCAL);

        store.mark_remote(v);
        assert!(store.location(v).local && store.location(v).remote);
    }

    #[test]
    fn retire_is_silent_while_in_use() {
        let mut store = DataVersionStore::new();
        let a = store.register(&DataKey::Object("a".into()));
        let v = store.new_version(a).unwrap();

        store.add_reader(v);
        store.add_edge_ref(v);
        assert!(!store.retire(v));

        store.remove_reader(v);
        assert!(!store.retire(v));

        store.remove_edge_ref(v);
        assert!(store.retire(v));
        assert!(store.version(v).is_none());
        assert!(!store.retire(v));
    }
}
