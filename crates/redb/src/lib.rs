//! Persistent state store backed by [redb](https://docs.rs/redb).
//!
//! Every entity namespace maps to one redb table keyed by the raw entity key;
//! the log cursor lives in a dedicated table and moves in the same write
//! transaction as the entities it covers.

pub mod state;

pub use state::{EntityIter, RedbStore, RedbWriter};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    DatabaseError(#[from] ::redb::DatabaseError),

    #[error(transparent)]
    TransactionError(#[from] ::redb::TransactionError),

    #[error(transparent)]
    CommitError(#[from] ::redb::CommitError),

    #[error(transparent)]
    TableError(#[from] ::redb::TableError),

    #[error(transparent)]
    StorageError(#[from] ::redb::StorageError),

    #[error("stored cursor can't be decoded")]
    InvalidCursor,
}
