//! Contract reads captured from a live reader and replayed later.
//!
//! A recording is a JSON array of calls, each stamped with the log position
//! it was answered at. On replay a call is answered with the latest recorded
//! outcome at or before the current position, so sparse recordings of slowly
//! changing values (round length, pool max size) remain usable.

use std::{collections::BTreeMap, path::Path};

use bondgraph_core::{Address, LogPosition, U256};
use itertools::Itertools;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::reader::{CallError, ContractReader, DelegatorInfo, EarningsPool};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "fn", rename_all = "snake_case")]
pub enum Call {
    BlockNum,
    RoundLength,
    CurrentRound,
    LastRoundLengthUpdateStartBlock,
    LastRoundLengthUpdateRound,
    RoundLockAmount,
    GetDelegator { delegator: Address },
    GetFirstTranscoderInPool,
    GetNextTranscoderInPool { transcoder: Address },
    GetTotalBonded,
    PendingStake { delegator: Address, round: u64 },
    GetTranscoderEarningsPoolForRound { transcoder: Address, round: u64 },
    UnbondingPeriod,
    GetTranscoderPoolMaxSize,
    TargetBondingRate,
    Inflation,
    InflationChange,
    Slot0 { pool: Address },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Value(Value),
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCall {
    pub at: LogPosition,
    pub call: Call,
    pub outcome: Outcome,
}

/// Conversion between call results and their JSON rendering.
trait Recordable: Sized {
    fn to_json(&self) -> Value;
    fn from_json(value: Value) -> Option<Self>;
}

impl Recordable for u64 {
    fn to_json(&self) -> Value {
        Value::from(*self)
    }

    fn from_json(value: Value) -> Option<Self> {
        value.as_u64()
    }
}

impl Recordable for U256 {
    fn to_json(&self) -> Value {
        Value::String(self.to_string())
    }

    fn from_json(value: Value) -> Option<Self> {
        value.as_str()?.parse().ok()
    }
}

fn to_json_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn from_json_value<T: DeserializeOwned>(value: Value) -> Option<T> {
    serde_json::from_value(value).ok()
}

impl Recordable for Address {
    fn to_json(&self) -> Value {
        to_json_value(self)
    }

    fn from_json(value: Value) -> Option<Self> {
        from_json_value(value)
    }
}

impl Recordable for DelegatorInfo {
    fn to_json(&self) -> Value {
        to_json_value(self)
    }

    fn from_json(value: Value) -> Option<Self> {
        from_json_value(value)
    }
}

impl Recordable for EarningsPool {
    fn to_json(&self) -> Value {
        to_json_value(self)
    }

    fn from_json(value: Value) -> Option<Self> {
        from_json_value(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed recording: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Answers contract reads from a recording.
#[derive(Debug, Default, Clone)]
pub struct RecordedReader {
    calls: BTreeMap<Call, Vec<(LogPosition, Outcome)>>,
    at: LogPosition,
}

impl RecordedReader {
    pub fn new(recorded: impl IntoIterator<Item = RecordedCall>) -> Self {
        let calls = recorded
            .into_iter()
            .map(|x| (x.call, (x.at, x.outcome)))
            .into_group_map()
            .into_iter()
            .map(|(call, mut outcomes)| {
                // stable, so the last answer recorded at a position wins
                outcomes.sort_by_key(|(at, _)| *at);
                (call, outcomes)
            })
            .collect();

        Self {
            calls,
            at: LogPosition::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, RecordingError> {
        let file = std::fs::File::open(path)?;
        let recorded: Vec<RecordedCall> = serde_json::from_reader(std::io::BufReader::new(file))?;

        debug!(path = %path.display(), calls = recorded.len(), "loaded recorded calls");

        Ok(Self::new(recorded))
    }

    fn answer<T: Recordable>(&self, call: Call) -> Result<T, CallError> {
        let outcome = self
            .calls
            .get(&call)
            .and_then(|outcomes| outcomes.iter().rev().find(|(at, _)| *at <= self.at))
            .map(|(_, outcome)| outcome.clone())
            .ok_or_else(|| CallError::Unavailable(format!("{call:?} not recorded")))?;

        match outcome {
            Outcome::Reverted => Err(CallError::Reverted),
            Outcome::Value(value) => T::from_json(value)
                .ok_or_else(|| CallError::Unavailable(format!("{call:?} recorded with a malformed value"))),
        }
    }
}

impl ContractReader for RecordedReader {
    fn seek(&mut self, at: LogPosition) {
        self.at = at;
    }

    fn block_num(&mut self) -> Result<u64, CallError> {
        self.answer(Call::BlockNum)
    }

    fn round_length(&mut self) -> Result<u64, CallError> {
        self.answer(Call::RoundLength)
    }

    fn current_round(&mut self) -> Result<u64, CallError> {
        self.answer(Call::CurrentRound)
    }

    fn last_round_length_update_start_block(&mut self) -> Result<u64, CallError> {
        self.answer(Call::LastRoundLengthUpdateStartBlock)
    }

    fn last_round_length_update_round(&mut self) -> Result<u64, CallError> {
        self.answer(Call::LastRoundLengthUpdateRound)
    }

    fn round_lock_amount(&mut self) -> Result<u64, CallError> {
        self.answer(Call::RoundLockAmount)
    }

    fn get_delegator(&mut self, delegator: &Address) -> Result<DelegatorInfo, CallError> {
        self.answer(Call::GetDelegator {
            delegator: *delegator,
        })
    }

    fn get_first_transcoder_in_pool(&mut self) -> Result<Address, CallError> {
        self.answer(Call::GetFirstTranscoderInPool)
    }

    fn get_next_transcoder_in_pool(&mut self, transcoder: &Address) -> Result<Address, CallError> {
        self.answer(Call::GetNextTranscoderInPool {
            transcoder: *transcoder,
        })
    }

    fn get_total_bonded(&mut self) -> Result<U256, CallError> {
        self.answer(Call::GetTotalBonded)
    }

    fn pending_stake(&mut self, delegator: &Address, round: u64) -> Result<U256, CallError> {
        self.answer(Call::PendingStake {
            delegator: *delegator,
            round,
        })
    }

    fn get_transcoder_earnings_pool_for_round(
        &mut self,
        transcoder: &Address,
        round: u64,
    ) -> Result<EarningsPool, CallError> {
        self.answer(Call::GetTranscoderEarningsPoolForRound {
            transcoder: *transcoder,
            round,
        })
    }

    fn unbonding_period(&mut self) -> Result<u64, CallError> {
        self.answer(Call::UnbondingPeriod)
    }

    fn get_transcoder_pool_max_size(&mut self) -> Result<u64, CallError> {
        self.answer(Call::GetTranscoderPoolMaxSize)
    }

    fn target_bonding_rate(&mut self) -> Result<u64, CallError> {
        self.answer(Call::TargetBondingRate)
    }

    fn inflation(&mut self) -> Result<u64, CallError> {
        self.answer(Call::Inflation)
    }

    fn inflation_change(&mut self) -> Result<u64, CallError> {
        self.answer(Call::InflationChange)
    }

    fn slot0(&mut self, pool: &Address) -> Result<U256, CallError> {
        self.answer(Call::Slot0 { pool: *pool })
    }
}

/// Wraps a live reader and keeps a copy of every answer it gives.
pub struct RecordingReader<R> {
    inner: R,
    at: LogPosition,
    recorded: Vec<RecordedCall>,
}

impl<R: ContractReader> RecordingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            at: LogPosition::default(),
            recorded: Vec::new(),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn recorded(&self) -> &[RecordedCall] {
        &self.recorded
    }

    pub fn into_recorded(self) -> Vec<RecordedCall> {
        self.recorded
    }

    fn record<T: Recordable>(&mut self, call: Call, result: Result<T, CallError>) -> Result<T, CallError> {
        let outcome = match &result {
            Ok(value) => Some(Outcome::Value(value.to_json())),
            Err(CallError::Reverted) => Some(Outcome::Reverted),
            Err(CallError::Unavailable(_)) => None,
        };

        if let Some(outcome) = outcome {
            self.recorded.push(RecordedCall {
                at: self.at,
                call,
                outcome,
            });
        }

        result
    }
}

impl<R: ContractReader> ContractReader for RecordingReader<R> {
    fn seek(&mut self, at: LogPosition) {
        self.at = at;
        self.inner.seek(at);
    }

    fn block_num(&mut self) -> Result<u64, CallError> {
        let result = self.inner.block_num();
        self.record(Call::BlockNum, result)
    }

    fn round_length(&mut self) -> Result<u64, CallError> {
        let result = self.inner.round_length();
        self.record(Call::RoundLength, result)
    }

    fn current_round(&mut self) -> Result<u64, CallError> {
        let result = self.inner.current_round();
        self.record(Call::CurrentRound, result)
    }

    fn last_round_length_update_start_block(&mut self) -> Result<u64, CallError> {
        let result = self.inner.last_round_length_update_start_block();
        self.record(Call::LastRoundLengthUpdateStartBlock, result)
    }

    fn last_round_length_update_round(&mut self) -> Result<u64, CallError> {
        let result = self.inner.last_round_length_update_round();
        self.record(Call::LastRoundLengthUpdateRound, result)
    }

    fn round_lock_amount(&mut self) -> Result<u64, CallError> {
        let result = self.inner.round_lock_amount();
        self.record(Call::RoundLockAmount, result)
    }

    fn get_delegator(&mut self, delegator: &Address) -> Result<DelegatorInfo, CallError> {
        let result = self.inner.get_delegator(delegator);
        let call = Call::GetDelegator {
            delegator: *delegator,
        };
        self.record(call, result)
    }

    fn get_first_transcoder_in_pool(&mut self) -> Result<Address, CallError> {
        let result = self.inner.get_first_transcoder_in_pool();
        self.record(Call::GetFirstTranscoderInPool, result)
    }

    fn get_next_transcoder_in_pool(&mut self, transcoder: &Address) -> Result<Address, CallError> {
        let result = self.inner.get_next_transcoder_in_pool(transcoder);
        let call = Call::GetNextTranscoderInPool {
            transcoder: *transcoder,
        };
        self.record(call, result)
    }

    fn get_total_bonded(&mut self) -> Result<U256, CallError> {
        let result = self.inner.get_total_bonded();
        self.record(Call::GetTotalBonded, result)
    }

    fn pending_stake(&mut self, delegator: &Address, round: u64) -> Result<U256, CallError> {
        let result = self.inner.pending_stake(delegator, round);
        let call = Call::PendingStake {
            delegator: *delegator,
            round,
        };
        self.record(call, result)
    }

    fn get_transcoder_earnings_pool_for_round(
        &mut self,
        transcoder: &Address,
        round: u64,
    ) -> Result<EarningsPool, CallError> {
        let result = self
            .inner
            .get_transcoder_earnings_pool_for_round(transcoder, round);
        let call = Call::GetTranscoderEarningsPoolForRound {
            transcoder: *transcoder,
            round,
        };
        self.record(call, result)
    }

    fn unbonding_period(&mut self) -> Result<u64, CallError> {
        let result = self.inner.unbonding_period();
        self.record(Call::UnbondingPeriod, result)
    }

    fn get_transcoder_pool_max_size(&mut self) -> Result<u64, CallError> {
        let result = self.inner.get_transcoder_pool_max_size();
        self.record(Call::GetTranscoderPoolMaxSize, result)
    }

    fn target_bonding_rate(&mut self) -> Result<u64, CallError> {
        let result = self.inner.target_bonding_rate();
        self.record(Call::TargetBondingRate, result)
    }

    fn inflation(&mut self) -> Result<u64, CallError> {
        let result = self.inner.inflation();
        self.record(Call::Inflation, result)
    }

    fn inflation_change(&mut self) -> Result<u64, CallError> {
        let result = self.inner.inflation_change();
        self.record(Call::InflationChange, result)
    }

    fn slot0(&mut self, pool: &Address) -> Result<U256, CallError> {
        let result = self.inner.slot0(pool);
        self.record(Call::Slot0 { pool: *pool }, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(block: u64) -> LogPosition {
        LogPosition::new(block, 0)
    }

    #[test]
    fn answers_with_latest_outcome_before_position() {
        let mut reader = RecordedReader::new(vec![
            RecordedCall {
                at: at(10),
                call: Call::RoundLength,
                outcome: Outcome::Value(Value::from(100u64)),
            },
            RecordedCall {
                at: at(50),
                call: Call::RoundLength,
                outcome: Outcome::Value(Value::from(200u64)),
            },
        ]);

        reader.seek(at(5));
        assert!(matches!(reader.round_length(), Err(CallError::Unavailable(_))));

        reader.seek(at(20));
        assert_eq!(reader.round_length(), Ok(100));

        reader.seek(at(50));
        assert_eq!(reader.round_length(), Ok(200));
    }

    #[test]
    fn recorded_reverts_replay_as_reverts() {
        let mut reader = RecordedReader::new(vec![RecordedCall {
            at: at(1),
            call: Call::GetFirstTranscoderInPool,
            outcome: Outcome::Reverted,
        }]);

        reader.seek(at(1));
        assert_eq!(reader.get_first_transcoder_in_pool(), Err(CallError::Reverted));
    }

    #[test]
    fn calls_are_keyed_by_arguments() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);

        let mut reader = RecordedReader::new(vec![RecordedCall {
            at: at(1),
            call: Call::PendingStake {
                delegator: a,
                round: 3,
            },
            outcome: Outcome::Value(Value::from("42")),
        }]);

        reader.seek(at(1));
        assert_eq!(reader.pending_stake(&a, 3), Ok(U256::from(42u8)));
        assert!(reader.pending_stake(&b, 3).is_err());
        assert!(reader.pending_stake(&a, 4).is_err());
    }

    #[test]
    fn recording_json_shape_is_stable() {
        let entry = RecordedCall {
            at: at(7),
            call: Call::Slot0 {
                pool: Address::repeat_byte(9),
            },
            outcome: Outcome::Reverted,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["call"]["fn"], "slot0");
        assert_eq!(json["outcome"], "reverted");

        let back: RecordedCall = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
