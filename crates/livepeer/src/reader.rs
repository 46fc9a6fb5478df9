//! Read-only view over the protocol contracts.
//!
//! Event payloads don't carry every derived figure (delegated totals, pool
//! membership, pending stake), so handlers consult the contracts for the
//! authoritative value at the block being processed. Every call may revert;
//! callers always recover with a fallback.

use bondgraph_core::{Address, LogPosition, U256};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("call reverted")]
    Reverted,

    #[error("call result unavailable: {0}")]
    Unavailable(String),
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DelegatorInfo {
    #[serde_as(as = "DisplayFromStr")]
    pub bonded_amount: U256,

    #[serde_as(as = "DisplayFromStr")]
    pub fees: U256,

    pub delegate_address: Address,

    #[serde_as(as = "DisplayFromStr")]
    pub delegated_amount: U256,

    pub start_round: u64,
    pub last_claim_round: u64,
    pub next_unbonding_lock_id: u64,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EarningsPool {
    #[serde_as(as = "DisplayFromStr")]
    pub total_stake: U256,

    pub transcoder_reward_cut: u64,
    pub transcoder_fee_share: u64,

    #[serde_as(as = "DisplayFromStr")]
    pub cumulative_reward_factor: U256,

    #[serde_as(as = "DisplayFromStr")]
    pub cumulative_fee_factor: U256,
}

pub trait ContractReader {
    /// Positions the reader at the log about to be processed. Readers backed
    /// by historical state use it to answer as of that point.
    fn seek(&mut self, _at: LogPosition) {}

    // rounds manager
    fn block_num(&mut self) -> Result<u64, CallError>;
    fn round_length(&mut self) -> Result<u64, CallError>;
    fn current_round(&mut self) -> Result<u64, CallError>;
    fn last_round_length_update_start_block(&mut self) -> Result<u64, CallError>;
    fn last_round_length_update_round(&mut self) -> Result<u64, CallError>;
    fn round_lock_amount(&mut self) -> Result<u64, CallError>;

    // bonding manager
    fn get_delegator(&mut self, delegator: &Address) -> Result<DelegatorInfo, CallError>;
    fn get_first_transcoder_in_pool(&mut self) -> Result<Address, CallError>;
    fn get_next_transcoder_in_pool(&mut self, transcoder: &Address) -> Result<Address, CallError>;
    fn get_total_bonded(&mut self) -> Result<U256, CallError>;
    fn pending_stake(&mut self, delegator: &Address, round: u64) -> Result<U256, CallError>;
    fn get_transcoder_earnings_pool_for_round(
        &mut self,
        transcoder: &Address,
        round: u64,
    ) -> Result<EarningsPool, CallError>;
    fn unbonding_period(&mut self) -> Result<u64, CallError>;
    fn get_transcoder_pool_max_size(&mut self) -> Result<u64, CallError>;

    // minter
    fn target_bonding_rate(&mut self) -> Result<u64, CallError>;
    fn inflation(&mut self) -> Result<u64, CallError>;
    fn inflation_change(&mut self) -> Result<u64, CallError>;

    // price pools
    fn slot0(&mut self, pool: &Address) -> Result<U256, CallError>;
}

pub trait CallResultExt<T> {
    /// Converts a failed read into `None`, logging which call was skipped.
    fn available(self, call: &'static str) -> Option<T>;

    fn or_fallback(self, call: &'static str, fallback: T) -> T
    where
        Self: Sized,
    {
        self.available(call).unwrap_or(fallback)
    }
}

impl<T> CallResultExt<T> for Result<T, CallError> {
    fn available(self, call: &'static str) -> Option<T> {
        match self {
            Ok(x) => Some(x),
            Err(err) => {
                info!(call, %err, "contract read unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_replaces_revert() {
        let failed: Result<u64, CallError> = Err(CallError::Reverted);
        assert_eq!(failed.or_fallback("roundLength", 7), 7);

        let ok: Result<u64, CallError> = Ok(3);
        assert_eq!(ok.or_fallback("roundLength", 7), 3);
    }

    #[test]
    fn delegator_info_amounts_are_strings() {
        let info = DelegatorInfo {
            bonded_amount: U256::from(10u8),
            ..Default::default()
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["bonded_amount"], "10");
    }
}
