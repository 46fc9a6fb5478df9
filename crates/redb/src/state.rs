use std::{collections::BTreeMap, path::Path, sync::Arc};

use bondgraph_core::{
    builtin::Snapshot, EntityKey, EntityValue, LogPosition, Namespace, StateError, StateStore,
    StateWriter,
};
use redb::{
    Database, ReadOnlyTable, ReadTransaction, ReadableDatabase, ReadableTable,
    ReadableTableMetadata as _, TableDefinition, TableError, TableHandle as _, WriteTransaction,
};
use tracing::{debug, warn};

use crate::Error;

impl From<Error> for StateError {
    fn from(error: Error) -> Self {
        StateError::InternalStoreError(error.to_string())
    }
}

type ValueTable<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;

fn value_table(ns: &str) -> ValueTable<'_> {
    TableDefinition::new(ns)
}

pub const CURRENT_CURSOR_KEY: u16 = 0;

pub const CURSOR_TABLE: TableDefinition<'static, u16, Vec<u8>> = TableDefinition::new("cursor");

const DEFAULT_CACHE_SIZE_MB: usize = 64;

/// Opens the table of a namespace for reading. Tables are created on the
/// first write, so a missing one reads as empty.
fn open_namespace(
    rx: &ReadTransaction,
    ns: &str,
) -> Result<Option<ReadOnlyTable<&'static [u8], &'static [u8]>>, Error> {
    match rx.open_table(value_table(ns)) {
        Ok(table) => Ok(Some(table)),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn list_namespaces(rx: &ReadTransaction) -> Result<Vec<String>, Error> {
    let mut names: Vec<_> = rx
        .list_tables()?
        .map(|x| x.name().to_string())
        .filter(|x| x != CURSOR_TABLE.name())
        .collect();

    names.sort();

    Ok(names)
}

fn decode_cursor<T: ReadableTable<u16, Vec<u8>>>(
    table: &T,
) -> Result<Option<LogPosition>, Error> {
    let Some(value) = table.get(CURRENT_CURSOR_KEY)? else {
        return Ok(None);
    };

    let cursor = bincode::deserialize(&value.value()).map_err(|_| Error::InvalidCursor)?;

    Ok(Some(cursor))
}

fn write_cursor(wx: &WriteTransaction, cursor: &LogPosition) -> Result<(), StateError> {
    let value = bincode::serialize(cursor).map_err(|e| StateError::EncodingError(e.to_string()))?;

    let mut table = wx.open_table(CURSOR_TABLE).map_err(Error::from)?;
    table.insert(CURRENT_CURSOR_KEY, &value).map_err(Error::from)?;

    Ok(())
}

fn hex_decode(text: &str) -> Result<Vec<u8>, StateError> {
    hex::decode(text).map_err(|e| StateError::DecodingError("snapshot", e.to_string()))
}

/// Entities of one namespace in key order, ending at the first key outside
/// the requested prefix.
pub struct EntityIter {
    range: Option<::redb::Range<'static, &'static [u8], &'static [u8]>>,
    prefix: EntityKey,
}

impl EntityIter {
    fn empty() -> Self {
        Self {
            range: None,
            prefix: vec![],
        }
    }
}

impl Iterator for EntityIter {
    type Item = Result<(EntityKey, EntityValue), StateError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.range.as_mut()?.next()?;

        let entry = next
            .map(|(k, v)| (k.value().to_vec(), v.value().to_vec()))
            .map_err(Error::from)
            .map_err(StateError::from);

        if let Ok((key, _)) = &entry {
            if !key.starts_with(&self.prefix) {
                self.range = None;
                return None;
            }
        }

        Some(entry)
    }
}

/// State store persisted in a single redb file. Clones share the database.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    pub fn open(path: impl AsRef<Path>, cache_size: Option<usize>) -> Result<Self, Error> {
        let db = Database::builder()
            .set_repair_callback(|x| {
                warn!(progress = x.progress() * 100f64, "state db is repairing")
            })
            .set_cache_size(1024 * 1024 * cache_size.unwrap_or(DEFAULT_CACHE_SIZE_MB))
            .create(path)?;

        let store = Self { db: db.into() };

        store.initialize_schema()?;

        Ok(store)
    }

    pub fn in_memory() -> Result<Self, Error> {
        let db = Database::builder().create_with_backend(::redb::backends::InMemoryBackend::new())?;

        let store = Self { db: db.into() };

        store.initialize_schema()?;

        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), Error> {
        let wx = self.db.begin_write()?;

        let _ = wx.open_table(CURSOR_TABLE)?;

        wx.commit()?;

        Ok(())
    }

    pub fn namespaces(&self) -> Result<Vec<String>, StateError> {
        let rx = self.db.begin_read().map_err(Error::from)?;
        Ok(list_namespaces(&rx)?)
    }

    pub fn count(&self, ns: &str) -> Result<usize, StateError> {
        let rx = self.db.begin_read().map_err(Error::from)?;

        let Some(table) = open_namespace(&rx, ns)? else {
            return Ok(0);
        };

        let len = table.len().map_err(Error::from)?;

        Ok(len as usize)
    }

    /// Renders the full content of the store in the portable snapshot form.
    pub fn export(&self) -> Result<Snapshot, StateError> {
        let rx = self.db.begin_read().map_err(Error::from)?;

        let cursor = decode_cursor(&rx.open_table(CURSOR_TABLE).map_err(Error::from)?)?;

        let mut namespaces = BTreeMap::new();

        for name in list_namespaces(&rx)? {
            let table = rx.open_table(value_table(&name)).map_err(Error::from)?;
            let mut entries = BTreeMap::new();

            for entry in table.iter().map_err(Error::from)? {
                let (k, v) = entry.map_err(Error::from)?;
                entries.insert(hex::encode(k.value()), hex::encode(v.value()));
            }

            namespaces.insert(name, entries);
        }

        Ok(Snapshot { cursor, namespaces })
    }

    /// Writes the entities and cursor of a snapshot in one transaction.
    pub fn import(&self, snapshot: &Snapshot) -> Result<(), StateError> {
        let wx = self.db.begin_write().map_err(Error::from)?;

        for (ns, entries) in &snapshot.namespaces {
            let mut table = wx.open_table(value_table(ns)).map_err(Error::from)?;

            for (key, value) in entries {
                let key = hex_decode(key)?;
                let value = hex_decode(value)?;

                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(Error::from)?;
            }
        }

        if let Some(cursor) = &snapshot.cursor {
            write_cursor(&wx, cursor)?;
        }

        wx.commit().map_err(Error::from)?;

        debug!(namespaces = snapshot.namespaces.len(), cursor = ?snapshot.cursor, "snapshot imported");

        Ok(())
    }
}

pub struct RedbWriter {
    wx: WriteTransaction,
    cursor: Option<LogPosition>,
}

impl StateWriter for RedbWriter {
    fn set_cursor(&mut self, cursor: LogPosition) -> Result<(), StateError> {
        self.cursor = Some(cursor);
        Ok(())
    }

    fn save_entity(&mut self, ns: Namespace, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        let mut table = self.wx.open_table(value_table(ns)).map_err(Error::from)?;
        table.insert(key, value).map_err(Error::from)?;

        Ok(())
    }

    fn delete_entity(&mut self, ns: Namespace, key: &[u8]) -> Result<(), StateError> {
        let exists = self
            .wx
            .list_tables()
            .map_err(Error::from)?
            .any(|x| x.name() == ns);

        if !exists {
            return Ok(());
        }

        let mut table = self.wx.open_table(value_table(ns)).map_err(Error::from)?;
        table.remove(key).map_err(Error::from)?;

        Ok(())
    }

    /// Commits the transaction; dropping it on a cursor regression aborts
    /// every staged write.
    fn commit(self) -> Result<(), StateError> {
        if let Some(next) = self.cursor {
            let current = {
                let table = self.wx.open_table(CURSOR_TABLE).map_err(Error::from)?;
                decode_cursor(&table)?
            };

            if let Some(current) = current {
                if next <= current {
                    return Err(StateError::CursorRegression { current, next });
                }
            }

            write_cursor(&self.wx, &next)?;
        }

        self.wx.commit().map_err(Error::from)?;

        Ok(())
    }
}

impl StateStore for RedbStore {
    type EntityIter = EntityIter;
    type Writer = RedbWriter;

    fn read_cursor(&self) -> Result<Option<LogPosition>, StateError> {
        let rx = self.db.begin_read().map_err(Error::from)?;
        let table = rx.open_table(CURSOR_TABLE).map_err(Error::from)?;

        Ok(decode_cursor(&table)?)
    }

    fn read_entity(&self, ns: Namespace, key: &[u8]) -> Result<Option<EntityValue>, StateError> {
        let rx = self.db.begin_read().map_err(Error::from)?;

        let Some(table) = open_namespace(&rx, ns)? else {
            return Ok(None);
        };

        let value = table.get(key).map_err(Error::from)?;

        Ok(value.map(|x| x.value().to_vec()))
    }

    fn iter_entities(&self, ns: Namespace, prefix: &[u8]) -> Result<Self::EntityIter, StateError> {
        let rx = self.db.begin_read().map_err(Error::from)?;

        let Some(table) = open_namespace(&rx, ns)? else {
            return Ok(EntityIter::empty());
        };

        let range = table.range(prefix..).map_err(Error::from)?;

        Ok(EntityIter {
            range: Some(range),
            prefix: prefix.to_vec(),
        })
    }

    fn start_writer(&self) -> Result<Self::Writer, StateError> {
        let wx = self.db.begin_write().map_err(Error::from)?;

        Ok(RedbWriter { wx, cursor: None })
    }
}

#[cfg(test)]
mod tests {
    use bondgraph_core::builtin::MemoryStore;

    use super::*;

    fn seed<S: StateStore>(store: &S) {
        let mut writer = store.start_writer().unwrap();
        writer.save_entity("things", b"a-1", b"one").unwrap();
        writer.save_entity("things", b"a-2", b"two").unwrap();
        writer.save_entity("things", b"b-1", b"three").unwrap();
        writer.save_entity("others", b"x", b"four").unwrap();
        writer.set_cursor(LogPosition::new(1, 0)).unwrap();
        writer.commit().unwrap();
    }

    fn churn<S: StateStore>(store: &S) {
        let mut writer = store.start_writer().unwrap();
        writer.save_entity("things", b"a-2", b"deux").unwrap();
        writer.delete_entity("things", b"b-1").unwrap();
        writer.delete_entity("nothing", b"x").unwrap();
        writer.set_cursor(LogPosition::new(2, 3)).unwrap();
        writer.commit().unwrap();
    }

    #[test]
    fn state_survives_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");

        {
            let store = RedbStore::open(&path, None).unwrap();
            seed(&store);
        }

        let store = RedbStore::open(&path, Some(8)).unwrap();

        assert_eq!(store.read_cursor().unwrap(), Some(LogPosition::new(1, 0)));
        assert_eq!(store.read_entity("things", b"a-2").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.namespaces().unwrap(), vec!["others", "things"]);
        assert_eq!(store.count("things").unwrap(), 3);
    }

    #[test]
    fn prefix_iteration_is_ordered_and_bounded() {
        let store = RedbStore::in_memory().unwrap();
        seed(&store);

        let keys: Vec<_> = store
            .iter_entities("things", b"a-")
            .unwrap()
            .map(|x| x.unwrap().0)
            .collect();

        assert_eq!(keys, vec![b"a-1".to_vec(), b"a-2".to_vec()]);
        assert_eq!(store.iter_entities("things", b"").unwrap().count(), 3);
    }

    #[test]
    fn unknown_namespaces_read_as_empty() {
        let store = RedbStore::in_memory().unwrap();

        assert_eq!(store.read_cursor().unwrap(), None);
        assert_eq!(store.read_entity("nothing", b"x").unwrap(), None);
        assert_eq!(store.iter_entities("nothing", b"").unwrap().count(), 0);
        assert_eq!(store.count("nothing").unwrap(), 0);
    }

    #[test]
    fn cursor_cannot_move_backwards() {
        let store = RedbStore::in_memory().unwrap();
        seed(&store);

        let mut writer = store.start_writer().unwrap();
        writer.save_entity("things", b"x", b"1").unwrap();
        writer.set_cursor(LogPosition::new(1, 0)).unwrap();

        let err = writer.commit().unwrap_err();
        assert!(matches!(err, StateError::CursorRegression { .. }));

        assert_eq!(store.read_entity("things", b"x").unwrap(), None);
        assert_eq!(store.read_cursor().unwrap(), Some(LogPosition::new(1, 0)));
    }

    #[test]
    fn export_matches_the_memory_store() {
        let redb = RedbStore::in_memory().unwrap();
        let memory = MemoryStore::new();

        seed(&redb);
        seed(&memory);
        churn(&redb);
        churn(&memory);

        let exported = redb.export().unwrap();

        assert_eq!(exported, memory.export().unwrap());
        assert!(!exported.namespaces.contains_key("nothing"));
    }

    #[test]
    fn import_restores_an_export() {
        let source = RedbStore::in_memory().unwrap();
        seed(&source);
        churn(&source);

        let snapshot = source.export().unwrap();

        let target = RedbStore::in_memory().unwrap();
        target.import(&snapshot).unwrap();

        assert_eq!(target.export().unwrap(), snapshot);
        assert_eq!(target.read_cursor().unwrap(), Some(LogPosition::new(2, 3)));
    }
}
