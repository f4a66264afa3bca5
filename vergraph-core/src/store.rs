//! Persistence capability.
//!
//! The engine performs no I/O of its own; hosts supply a `ReplicaStore`
//! binding histories and live targets to whatever storage they use.
//! `MemoryStore` is the in-memory reference implementation used by the
//! replication factory tests and by hosts that persist elsewhere.

use crate::change::Change;
use crate::history::History;
use crate::value::{ChangeId, ObjectId};
use std::collections::BTreeMap;

/// Host-supplied storage for histories and live replica targets
pub trait ReplicaStore {
    type Target;

    fn find_history(&self, id: ObjectId) -> Option<&History>;

    fn history_mut(&mut self, id: ObjectId) -> Option<&mut History>;

    fn insert_history(&mut self, history: History);

    /// Look a change up across all known histories
    fn find_change(&self, id: ChangeId) -> Option<&Change>;

    fn target(&self, id: ObjectId) -> Option<&Self::Target>;

    fn target_mut(&mut self, id: ObjectId) -> Option<&mut Self::Target>;

    fn insert_target(&mut self, id: ObjectId, target: Self::Target);
}

/// In-memory store keyed by object id
#[derive(Debug, Default)]
pub struct MemoryStore<T> {
    histories: BTreeMap<ObjectId, History>,
    targets: BTreeMap<ObjectId, T>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            histories: BTreeMap::new(),
            targets: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

impl<T> ReplicaStore for MemoryStore<T> {
    type Target = T;

    fn find_history(&self, id: ObjectId) -> Option<&History> {
        self.histories.get(&id)
    }

    fn history_mut(&mut self, id: ObjectId) -> Option<&mut History> {
        self.histories.get_mut(&id)
    }

    fn insert_history(&mut self, history: History) {
        self.histories.insert(history.global_id(), history);
    }

    fn find_change(&self, id: ChangeId) -> Option<&Change> {
        self.histories.values().find_map(|h| h.lookup(id))
    }

    fn target(&self, id: ObjectId) -> Option<&T> {
        self.targets.get(&id)
    }

    fn target_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        self.targets.get_mut(&id)
    }

    fn insert_target(&mut self, id: ObjectId, target: T) {
        self.targets.insert(id, target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::MapObject;

    #[test]
    fn test_memory_store_histories_and_targets() {
        let mut store: MemoryStore<MapObject> = MemoryStore::new();
        let id = ObjectId::generate();
        store.insert_history(History::new(id));
        store.insert_target(id, MapObject::new(id));

        assert!(store.find_history(id).is_some());
        assert!(store.target(id).is_some());
        assert!(store.find_history(ObjectId::generate()).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_find_change_scans_histories() {
        let store: MemoryStore<MapObject> = MemoryStore::new();
        assert!(store.find_change(ChangeId::NIL).is_none());
    }
}
