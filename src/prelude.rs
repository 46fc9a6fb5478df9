use std::fmt::Display;

use miette::Diagnostic;
use thiserror::Error;

pub use bondgraph_core::{builtin::MemoryStore, LogPosition, StateError, StateStore};
pub use bondgraph_livepeer::{ContractReader, Engine, Envelope, NetworkConfig, Outcome};
pub use bondgraph_redb::RedbStore;

#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("malformed envelope at line {line}: {reason}")]
    #[diagnostic(help("each line of an event feed holds one JSON encoded envelope"))]
    MalformedEnvelope { line: usize, reason: String },

    #[error("recording error: {0}")]
    RecordingError(#[from] bondgraph_livepeer::recorded::RecordingError),

    #[error("state error: {0}")]
    StateError(#[from] StateError),

    #[error("engine error: {0}")]
    EngineError(#[from] bondgraph_livepeer::EngineError),

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn config(text: impl Display) -> Error {
        Error::ConfigError(text.to_string())
    }

    pub fn message(text: impl Into<String>) -> Error {
        Error::Message(text.into())
    }
}
