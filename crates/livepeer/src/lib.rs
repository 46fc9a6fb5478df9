//! Projection of the Livepeer protocol contracts into an entity graph.
//!
//! Logs from the bonding manager, rounds manager, minter, token, ticket
//! broker, governance and treasury contracts are folded, in log order, into
//! delegator, transcoder, round, poll and treasury entities. [`Engine`] is the
//! entry point: it applies one [`Envelope`] at a time against a
//! [`bondgraph_core::StateStore`], consulting a [`ContractReader`] for the
//! figures logs don't carry.

use bondgraph_core::{BrokenInvariant, Entity, StateError};
use thiserror::Error;

pub mod config;
pub mod context;
pub mod controller;
pub mod days;
pub mod decimal;
pub mod dispatch;
pub mod events;
pub mod governance;
pub mod history;
pub mod ids;
pub mod migrator;
pub mod minter;
pub mod model;
pub mod price;
pub mod reader;
pub mod recorded;
pub mod rounds;
pub mod services;
pub mod staking;
pub mod tickets;
pub mod token;

pub use config::NetworkConfig;
pub use decimal::Decimal;
pub use dispatch::{Engine, Outcome, WatchRegistry};
pub use events::{Envelope, Event};
pub use reader::{CallError, ContractReader};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("broken invariant: {0}")]
    BrokenInvariant(#[from] BrokenInvariant),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    State(#[from] StateError),
}

macro_rules! entity_json {
    ($ns:expr, $value:expr, $($type:ty),* $(,)?) => {
        match $ns {
            $(
                <$type as Entity>::NS => {
                    let entity = <$type as Entity>::decode_value($value)?;
                    serde_json::to_value(&entity)
                        .map(Some)
                        .map_err(|e| StateError::EncodingError(e.to_string()))
                }
            )*
            _ => Ok(None),
        }
    };
}

/// Decodes a stored entity value into JSON, or `None` for a namespace this
/// crate doesn't own.
pub fn entity_json(ns: &str, value: &[u8]) -> Result<Option<serde_json::Value>, StateError> {
    use model::*;

    entity_json!(
        ns,
        value,
        Protocol,
        Round,
        Transcoder,
        Delegator,
        Account,
        UnbondingLock,
        Pool,
        Poll,
        Vote,
        PollTally,
        PollWatch,
        TreasuryProposal,
        TreasuryVote,
        Broadcaster,
        Day,
        TranscoderDay,
        BroadcasterDay,
        Transaction,
        history::HistoryEvent,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Delegator;

    #[test]
    fn entity_json_decodes_known_namespaces() {
        let delegator = Delegator::new("0xaa");
        let bytes = delegator.encode_value().unwrap();

        let json = entity_json("delegators", &bytes).unwrap().unwrap();
        assert_eq!(json["id"], "0xaa");

        assert!(entity_json("widgets", &bytes).unwrap().is_none());
    }
}
