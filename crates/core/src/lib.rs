use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use thiserror::Error;

pub mod batch;
pub mod builtin;
pub mod config;
pub mod state;

pub use batch::*;
pub use state::*;

pub use alloy_primitives::{Address, B256, U256};

// re-exported so that `impl_entity!` expands without the caller depending on
// bincode directly
#[doc(hidden)]
pub use bincode;

pub type BlockNumber = u64;
pub type Timestamp = u64;
pub type LogIndex = u64;

pub type TxHash = B256;
pub type BlockHash = B256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub number: BlockNumber,
    pub timestamp: Timestamp,
    pub hash: BlockHash,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMeta {
    pub hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub gas_used: u64,

    #[serde_as(as = "DisplayFromStr")]
    pub gas_price: U256,
}

/// Position of a log within the chain, the unit of progress for the projection
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LogPosition {
    pub block: BlockNumber,
    pub log_index: LogIndex,
}

impl LogPosition {
    pub fn new(block: BlockNumber, log_index: LogIndex) -> Self {
        Self { block, log_index }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.log_index)
    }
}

/// A decoded contract log together with the block and transaction that
/// carried it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    pub block: BlockMeta,
    pub transaction: TxMeta,
    pub log_index: LogIndex,
    pub address: Address,
    pub event: E,
}

impl<E> EventEnvelope<E> {
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.block.number, self.log_index)
    }
}

#[derive(Debug, Error)]
pub enum BrokenInvariant {
    #[error("missing {ns} entity referenced as {key}")]
    MissingEntity { ns: Namespace, key: String },

    #[error("inconsistent state: {0}")]
    InconsistentState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_with_and_without_prefix() {
        let a: Address = "0x00000000000000000000000000000000000000ab".parse().unwrap();
        let b: Address = "00000000000000000000000000000000000000ab".parse().unwrap();

        assert_eq!(a, b);
        assert_eq!(format!("{a:#x}"), "0x00000000000000000000000000000000000000ab");
    }

    #[test]
    fn address_rejects_wrong_length() {
        assert!("0xabcd".parse::<Address>().is_err());
    }

    #[test]
    fn address_serializes_lowercase() {
        let a: Address = "0x52908400098527886E0F7030069857D2E4169EE7".parse().unwrap();
        let json = serde_json::to_string(&a).unwrap();

        assert_eq!(json, "\"0x52908400098527886e0f7030069857d2e4169ee7\"");
    }

    #[test]
    fn positions_order_by_block_then_log() {
        assert!(LogPosition::new(1, 9) < LogPosition::new(2, 0));
        assert!(LogPosition::new(2, 0) < LogPosition::new(2, 1));
    }

    #[test]
    fn envelope_roundtrips_through_json() {
        let envelope = EventEnvelope {
            block: BlockMeta {
                number: 10,
                timestamp: 1_600_000_000,
                hash: B256::ZERO,
            },
            transaction: TxMeta {
                hash: B256::repeat_byte(1),
                from: Address::repeat_byte(2),
                to: None,
                gas_used: 21000,
                gas_price: U256::from(1_000_000_000u64),
            },
            log_index: 3,
            address: Address::repeat_byte(3),
            event: "payload".to_string(),
        };

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"gas_price\":\"1000000000\""));

        let back: EventEnvelope<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.position(), LogPosition::new(10, 3));
    }
}
