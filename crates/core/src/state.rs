use std::marker::PhantomData;

use crate::LogPosition;

pub type Namespace = &'static str;
pub type EntityKey = Vec<u8>;
pub type EntityValue = Vec<u8>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NsKey(pub Namespace, pub EntityKey);

impl NsKey {
    pub fn new(ns: Namespace, key: impl AsRef<[u8]>) -> Self {
        Self(ns, key.as_ref().to_vec())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("internal store error: {0}")]
    InternalStoreError(String),

    #[error("namespace {0} not found")]
    NamespaceNotFound(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error in {0}: {1}")]
    DecodingError(Namespace, String),

    #[error("cursor regression: {next} is not after {current}")]
    CursorRegression {
        current: LogPosition,
        next: LogPosition,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A typed record that lives under a fixed namespace of the store.
pub trait Entity: Sized {
    const NS: Namespace;

    fn decode_value(value: &[u8]) -> Result<Self, StateError>;
    fn encode_value(&self) -> Result<EntityValue, StateError>;
}

#[macro_export]
macro_rules! impl_entity {
    ($type:ty, $ns:expr) => {
        impl $crate::Entity for $type {
            const NS: $crate::Namespace = $ns;

            fn decode_value(value: &[u8]) -> Result<Self, $crate::StateError> {
                $crate::bincode::deserialize(value)
                    .map_err(|e| $crate::StateError::DecodingError($ns, e.to_string()))
            }

            fn encode_value(&self) -> Result<$crate::EntityValue, $crate::StateError> {
                $crate::bincode::serialize(self)
                    .map_err(|e| $crate::StateError::EncodingError(e.to_string()))
            }
        }
    };
}

pub struct EntityIterTyped<S: StateStore, T: Entity> {
    inner: S::EntityIter,
    _marker: PhantomData<T>,
}

impl<S: StateStore, T: Entity> EntityIterTyped<S, T> {
    pub fn new(inner: S::EntityIter) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

impl<S: StateStore, T: Entity> Iterator for EntityIterTyped<S, T> {
    type Item = Result<(EntityKey, T), StateError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner.next()?;

        let mapped = next.and_then(|(key, value)| T::decode_value(&value).map(|v| (key, v)));

        Some(mapped)
    }
}

pub trait StateWriter: Sized {
    fn set_cursor(&mut self, cursor: LogPosition) -> Result<(), StateError>;

    fn save_entity(&mut self, ns: Namespace, key: &[u8], value: &[u8]) -> Result<(), StateError>;

    fn delete_entity(&mut self, ns: Namespace, key: &[u8]) -> Result<(), StateError>;

    /// Applies every staged operation as a single atomic unit.
    fn commit(self) -> Result<(), StateError>;

    fn save_entity_typed<T: Entity>(
        &mut self,
        key: impl AsRef<[u8]>,
        entity: &T,
    ) -> Result<(), StateError> {
        let value = entity.encode_value()?;
        self.save_entity(T::NS, key.as_ref(), &value)
    }
}

pub trait StateStore: Sized + Clone + Send + Sync + 'static {
    type EntityIter: Iterator<Item = Result<(EntityKey, EntityValue), StateError>>;
    type Writer: StateWriter;

    fn read_cursor(&self) -> Result<Option<LogPosition>, StateError>;

    fn read_entity(&self, ns: Namespace, key: &[u8]) -> Result<Option<EntityValue>, StateError>;

    /// Iterates, in key order, every entity of the namespace whose key starts
    /// with `prefix`.
    fn iter_entities(&self, ns: Namespace, prefix: &[u8]) -> Result<Self::EntityIter, StateError>;

    fn start_writer(&self) -> Result<Self::Writer, StateError>;

    fn read_entity_typed<T: Entity>(&self, key: impl AsRef<[u8]>) -> Result<Option<T>, StateError> {
        let value = self.read_entity(T::NS, key.as_ref())?;
        let decoded = value.as_deref().map(T::decode_value).transpose()?;

        Ok(decoded)
    }

    fn iter_entities_typed<T: Entity>(
        &self,
        prefix: impl AsRef<[u8]>,
    ) -> Result<EntityIterTyped<Self, T>, StateError> {
        let inner = self.iter_entities(T::NS, prefix.as_ref())?;
        Ok(EntityIterTyped::<_, T>::new(inner))
    }
}
