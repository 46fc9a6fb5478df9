use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    EntityKey, EntityValue, LogPosition, Namespace, StateError, StateStore, StateWriter,
};

type Table = BTreeMap<EntityKey, EntityValue>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Tables {
    cursor: Option<LogPosition>,
    namespaces: BTreeMap<String, Table>,
}

/// Portable, deterministic rendering of a store's full content.
///
/// Keys and values are hex encoded so that two snapshots are equal if and only
/// if the underlying stores hold identical bytes.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cursor: Option<LogPosition>,
    pub namespaces: BTreeMap<String, BTreeMap<String, String>>,
}

/// Shared in-process store. Clones share the same underlying tables.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

fn poisoned<T>(_: T) -> StateError {
    StateError::InternalStoreError("memory store lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespaces(&self) -> Result<Vec<String>, StateError> {
        let tables = self.inner.read().map_err(poisoned)?;
        Ok(tables.namespaces.keys().cloned().collect())
    }

    pub fn count(&self, ns: &str) -> Result<usize, StateError> {
        let tables = self.inner.read().map_err(poisoned)?;
        Ok(tables.namespaces.get(ns).map(|x| x.len()).unwrap_or_default())
    }

    pub fn export(&self) -> Result<Snapshot, StateError> {
        let tables = self.inner.read().map_err(poisoned)?;

        let namespaces = tables
            .namespaces
            .iter()
            .map(|(ns, table)| {
                let entries = table
                    .iter()
                    .map(|(k, v)| (hex::encode(k), hex::encode(v)))
                    .collect();

                (ns.clone(), entries)
            })
            .collect();

        Ok(Snapshot {
            cursor: tables.cursor,
            namespaces,
        })
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, StateError> {
        let mut namespaces = BTreeMap::new();

        for (ns, entries) in snapshot.namespaces {
            let mut table = Table::new();

            for (k, v) in entries {
                let k = hex::decode(k).map_err(|e| StateError::DecodingError("snapshot", e.to_string()))?;
                let v = hex::decode(v).map_err(|e| StateError::DecodingError("snapshot", e.to_string()))?;
                table.insert(k, v);
            }

            namespaces.insert(ns, table);
        }

        let tables = Tables {
            cursor: snapshot.cursor,
            namespaces,
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(tables)),
        })
    }

    pub fn load_snapshot(path: &Path) -> Result<Self, StateError> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);

        let snapshot: Snapshot = serde_json::from_reader(reader)
            .map_err(|e| StateError::DecodingError("snapshot", e.to_string()))?;

        debug!(path = %path.display(), "snapshot loaded");

        Self::from_snapshot(snapshot)
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), StateError> {
        let snapshot = self.export()?;

        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);

        serde_json::to_writer_pretty(writer, &snapshot)
            .map_err(|e| StateError::EncodingError(e.to_string()))?;

        debug!(path = %path.display(), "snapshot saved");

        Ok(())
    }
}

pub type MemoryIter = std::vec::IntoIter<Result<(EntityKey, EntityValue), StateError>>;

enum Op {
    Save(Namespace, EntityKey, EntityValue),
    Delete(Namespace, EntityKey),
}

pub struct MemoryWriter {
    store: MemoryStore,
    ops: Vec<Op>,
    cursor: Option<LogPosition>,
}

impl StateWriter for MemoryWriter {
    fn set_cursor(&mut self, cursor: LogPosition) -> Result<(), StateError> {
        self.cursor = Some(cursor);
        Ok(())
    }

    fn save_entity(&mut self, ns: Namespace, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        self.ops.push(Op::Save(ns, key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn delete_entity(&mut self, ns: Namespace, key: &[u8]) -> Result<(), StateError> {
        self.ops.push(Op::Delete(ns, key.to_vec()));
        Ok(())
    }

    fn commit(self) -> Result<(), StateError> {
        let mut tables = self.store.inner.write().map_err(poisoned)?;

        if let (Some(current), Some(next)) = (tables.cursor, self.cursor) {
            if next <= current {
                return Err(StateError::CursorRegression { current, next });
            }
        }

        for op in self.ops {
            match op {
                Op::Save(ns, key, value) => {
                    tables
                        .namespaces
                        .entry(ns.to_string())
                        .or_default()
                        .insert(key, value);
                }
                Op::Delete(ns, key) => {
                    if let Some(table) = tables.namespaces.get_mut(ns) {
                        table.remove(&key);
                    }
                }
            }
        }

        if self.cursor.is_some() {
            tables.cursor = self.cursor;
        }

        Ok(())
    }
}

impl StateStore for MemoryStore {
    type EntityIter = MemoryIter;
    type Writer = MemoryWriter;

    fn read_cursor(&self) -> Result<Option<LogPosition>, StateError> {
        let tables = self.inner.read().map_err(poisoned)?;
        Ok(tables.cursor)
    }

    fn read_entity(&self, ns: Namespace, key: &[u8]) -> Result<Option<EntityValue>, StateError> {
        let tables = self.inner.read().map_err(poisoned)?;

        let value = tables
            .namespaces
            .get(ns)
            .and_then(|table| table.get(key))
            .cloned();

        Ok(value)
    }

    fn iter_entities(&self, ns: Namespace, prefix: &[u8]) -> Result<Self::EntityIter, StateError> {
        let tables = self.inner.read().map_err(poisoned)?;

        let entries: Vec<_> = tables
            .namespaces
            .get(ns)
            .into_iter()
            .flat_map(|table| table.range(prefix.to_vec()..))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();

        Ok(entries.into_iter())
    }

    fn start_writer(&self) -> Result<Self::Writer, StateError> {
        Ok(MemoryWriter {
            store: self.clone(),
            ops: Vec::new(),
            cursor: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(store: &MemoryStore) {
        let mut writer = store.start_writer().unwrap();
        writer.save_entity("things", b"a-1", b"one").unwrap();
        writer.save_entity("things", b"a-2", b"two").unwrap();
        writer.save_entity("things", b"b-1", b"three").unwrap();
        writer.set_cursor(LogPosition::new(1, 0)).unwrap();
        writer.commit().unwrap();
    }

    #[test]
    fn prefix_iteration_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        seed(&store);

        let keys: Vec<_> = store
            .iter_entities("things", b"a-")
            .unwrap()
            .map(|x| x.unwrap().0)
            .collect();

        assert_eq!(keys, vec![b"a-1".to_vec(), b"a-2".to_vec()]);
    }

    #[test]
    fn iterating_unknown_namespace_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.iter_entities("nothing", b"").unwrap().count(), 0);
    }

    #[test]
    fn writes_are_invisible_until_commit() {
        let store = MemoryStore::new();

        let mut writer = store.start_writer().unwrap();
        writer.save_entity("things", b"x", b"1").unwrap();
        assert_eq!(store.read_entity("things", b"x").unwrap(), None);

        writer.commit().unwrap();
        assert_eq!(store.read_entity("things", b"x").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn cursor_cannot_move_backwards() {
        let store = MemoryStore::new();
        seed(&store);

        let mut writer = store.start_writer().unwrap();
        writer.save_entity("things", b"x", b"1").unwrap();
        writer.set_cursor(LogPosition::new(1, 0)).unwrap();

        let err = writer.commit().unwrap_err();
        assert!(matches!(err, StateError::CursorRegression { .. }));
        assert_eq!(store.read_entity("things", b"x").unwrap(), None);
    }

    #[test]
    fn snapshot_survives_a_file_roundtrip() {
        let store = MemoryStore::new();
        seed(&store);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        store.save_snapshot(&path).unwrap();
        let restored = MemoryStore::load_snapshot(&path).unwrap();

        assert_eq!(restored.export().unwrap(), store.export().unwrap());
        assert_eq!(restored.read_cursor().unwrap(), Some(LogPosition::new(1, 0)));
    }
}
