use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    Entity, EntityValue, LogPosition, Namespace, NsKey, StateError, StateStore, StateWriter as _,
};

type Overlay = BTreeMap<NsKey, Option<EntityValue>>;

/// Snapshot of the pending writes of a [`StateBatch`] at a point in time.
#[derive(Debug, Clone)]
pub struct Savepoint(Overlay);

/// Pending mutations over a store, visible to subsequent reads of the same
/// batch but invisible to the store until committed.
///
/// A `None` entry in the overlay marks a deletion.
pub struct StateBatch<S: StateStore> {
    store: S,
    overlay: Overlay,
}

impl<S: StateStore> StateBatch<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            overlay: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_empty(&self) -> bool {
        self.overlay.is_empty()
    }

    pub fn len(&self) -> usize {
        self.overlay.len()
    }

    pub fn read(&self, ns: Namespace, key: &[u8]) -> Result<Option<EntityValue>, StateError> {
        match self.overlay.get(&NsKey::new(ns, key)) {
            Some(staged) => Ok(staged.clone()),
            None => self.store.read_entity(ns, key),
        }
    }

    pub fn load<T: Entity>(&self, key: impl AsRef<[u8]>) -> Result<Option<T>, StateError> {
        let value = self.read(T::NS, key.as_ref())?;
        value.as_deref().map(T::decode_value).transpose()
    }

    pub fn exists<T: Entity>(&self, key: impl AsRef<[u8]>) -> Result<bool, StateError> {
        Ok(self.read(T::NS, key.as_ref())?.is_some())
    }

    pub fn save<T: Entity>(&mut self, key: impl AsRef<[u8]>, entity: &T) -> Result<(), StateError> {
        let value = entity.encode_value()?;
        self.overlay
            .insert(NsKey::new(T::NS, key), Some(value));

        Ok(())
    }

    pub fn delete<T: Entity>(&mut self, key: impl AsRef<[u8]>) {
        self.overlay.insert(NsKey::new(T::NS, key), None);
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.overlay.clone())
    }

    /// Discards every write staged after the savepoint was taken.
    pub fn restore(&mut self, savepoint: Savepoint) {
        self.overlay = savepoint.0;
    }

    /// Writes the staged mutations and the new cursor in one store commit.
    pub fn commit(self, cursor: Option<LogPosition>) -> Result<(), StateError> {
        let mut writer = self.store.start_writer()?;

        let staged = self.overlay.len();

        for (NsKey(ns, key), value) in self.overlay {
            match value {
                Some(value) => writer.save_entity(ns, &key, &value)?,
                None => writer.delete_entity(ns, &key)?,
            }
        }

        if let Some(cursor) = cursor {
            writer.set_cursor(cursor)?;
        }

        writer.commit()?;

        debug!(staged, ?cursor, "batch committed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::builtin::MemoryStore;
    use crate::impl_entity;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u64,
    }

    impl_entity!(Counter, "counters");

    #[test]
    fn reads_see_pending_writes() {
        let store = MemoryStore::new();
        let mut batch = StateBatch::new(store.clone());

        batch.save("a", &Counter { value: 1 }).unwrap();

        assert_eq!(batch.load::<Counter>("a").unwrap(), Some(Counter { value: 1 }));
        assert_eq!(store.read_entity_typed::<Counter>("a").unwrap(), None);
    }

    #[test]
    fn delete_hides_committed_value() {
        let store = MemoryStore::new();

        let mut batch = StateBatch::new(store.clone());
        batch.save("a", &Counter { value: 1 }).unwrap();
        batch.commit(None).unwrap();

        let mut batch = StateBatch::new(store.clone());
        batch.delete::<Counter>("a");
        assert!(!batch.exists::<Counter>("a").unwrap());
        assert!(store.read_entity_typed::<Counter>("a").unwrap().is_some());

        batch.commit(None).unwrap();
        assert!(store.read_entity_typed::<Counter>("a").unwrap().is_none());
    }

    #[test]
    fn restore_discards_later_writes() {
        let store = MemoryStore::new();
        let mut batch = StateBatch::new(store);

        batch.save("a", &Counter { value: 1 }).unwrap();
        let savepoint = batch.savepoint();

        batch.save("a", &Counter { value: 2 }).unwrap();
        batch.save("b", &Counter { value: 3 }).unwrap();
        batch.restore(savepoint);

        assert_eq!(batch.load::<Counter>("a").unwrap(), Some(Counter { value: 1 }));
        assert_eq!(batch.load::<Counter>("b").unwrap(), None);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn commit_moves_cursor() {
        let store = MemoryStore::new();

        let mut batch = StateBatch::new(store.clone());
        batch.save("a", &Counter { value: 1 }).unwrap();
        batch.commit(Some(LogPosition::new(5, 2))).unwrap();

        assert_eq!(store.read_cursor().unwrap(), Some(LogPosition::new(5, 2)));
    }

    proptest::proptest! {
        #[test]
        fn committed_store_matches_last_write_per_key(
            ops in proptest::collection::vec((0u8..4, proptest::option::of(0u64..100)), 0..40)
        ) {
            let store = MemoryStore::new();
            let mut batch = StateBatch::new(store.clone());
            let mut model = BTreeMap::new();

            for (key, value) in ops {
                let key = key.to_string();

                match value {
                    Some(value) => batch.save(&key, &Counter { value }).unwrap(),
                    None => batch.delete::<Counter>(&key),
                }

                model.insert(key, value);
            }

            batch.commit(None).unwrap();

            for (key, value) in model {
                let stored = store.read_entity_typed::<Counter>(&key).unwrap();
                proptest::prop_assert_eq!(stored.map(|x| x.value), value);
            }
        }
    }
}
