//! In-memory stand-in for the protocol contracts.
//!
//! The state is shared between clones, so a test can keep a handle to the
//! chain while an engine owns another one as its reader.

use std::{
    cell::{Ref, RefCell, RefMut},
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

use bondgraph_core::{Address, LogPosition, U256};
use bondgraph_livepeer::reader::{CallError, ContractReader, DelegatorInfo, EarningsPool};

#[derive(Debug, Default)]
pub struct ChainState {
    pub block: u64,
    pub round_length: u64,
    pub last_round_length_update_start_block: u64,
    pub last_round_length_update_round: u64,
    pub round_lock_amount: u64,
    pub delegators: BTreeMap<Address, DelegatorInfo>,
    pub transcoder_pool: Vec<Address>,
    pub total_bonded: U256,
    pub pending_stake: BTreeMap<Address, U256>,
    pub earnings: BTreeMap<(Address, u64), EarningsPool>,
    pub unbonding_period: u64,
    pub pool_max_size: u64,
    pub target_bonding_rate: u64,
    pub inflation: u64,
    pub inflation_change: u64,
    pub sqrt_prices: BTreeMap<Address, U256>,
    pub reverting: BTreeSet<&'static str>,
}

impl ChainState {
    pub fn current_round(&self) -> u64 {
        if self.round_length == 0 {
            return self.last_round_length_update_round;
        }

        let elapsed = self
            .block
            .saturating_sub(self.last_round_length_update_start_block);

        self.last_round_length_update_round + elapsed / self.round_length
    }

    pub fn delegator_mut(&mut self, address: &Address) -> &mut DelegatorInfo {
        self.delegators.entry(*address).or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockChain(Rc<RefCell<ChainState>>);

impl MockChain {
    pub fn new(state: ChainState) -> Self {
        Self(Rc::new(RefCell::new(state)))
    }

    pub fn state(&self) -> Ref<'_, ChainState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, ChainState> {
        self.0.borrow_mut()
    }

    /// Makes every subsequent call named `call` revert.
    pub fn revert(&self, call: &'static str) {
        self.state_mut().reverting.insert(call);
    }

    pub fn heal(&self, call: &'static str) {
        self.state_mut().reverting.remove(call);
    }

    fn read<T>(&self, call: &'static str, f: impl FnOnce(&ChainState) -> T) -> Result<T, CallError> {
        let state = self.state();

        if state.reverting.contains(call) {
            return Err(CallError::Reverted);
        }

        Ok(f(&state))
    }
}

impl ContractReader for MockChain {
    fn seek(&mut self, at: LogPosition) {
        self.state_mut().block = at.block;
    }

    fn block_num(&mut self) -> Result<u64, CallError> {
        self.read("blockNum", |x| x.block)
    }

    fn round_length(&mut self) -> Result<u64, CallError> {
        self.read("roundLength", |x| x.round_length)
    }

    fn current_round(&mut self) -> Result<u64, CallError> {
        self.read("currentRound", ChainState::current_round)
    }

    fn last_round_length_update_start_block(&mut self) -> Result<u64, CallError> {
        self.read("lastRoundLengthUpdateStartBlock", |x| {
            x.last_round_length_update_start_block
        })
    }

    fn last_round_length_update_round(&mut self) -> Result<u64, CallError> {
        self.read("lastRoundLengthUpdateRound", |x| x.last_round_length_update_round)
    }

    fn round_lock_amount(&mut self) -> Result<u64, CallError> {
        self.read("roundLockAmount", |x| x.round_lock_amount)
    }

    fn get_delegator(&mut self, delegator: &Address) -> Result<DelegatorInfo, CallError> {
        self.read("getDelegator", |x| {
            x.delegators.get(delegator).cloned().unwrap_or_default()
        })
    }

    fn get_first_transcoder_in_pool(&mut self) -> Result<Address, CallError> {
        self.read("getFirstTranscoderInPool", |x| {
            x.transcoder_pool.first().copied().unwrap_or(Address::ZERO)
        })
    }

    fn get_next_transcoder_in_pool(&mut self, transcoder: &Address) -> Result<Address, CallError> {
        self.read("getNextTranscoderInPool", |x| {
            x.transcoder_pool
                .iter()
                .skip_while(|t| *t != transcoder)
                .nth(1)
                .copied()
                .unwrap_or(Address::ZERO)
        })
    }

    fn get_total_bonded(&mut self) -> Result<U256, CallError> {
        self.read("getTotalBonded", |x| x.total_bonded.clone())
    }

    fn pending_stake(&mut self, delegator: &Address, _round: u64) -> Result<U256, CallError> {
        self.read("pendingStake", |x| {
            x.pending_stake
                .get(delegator)
                .or_else(|| x.delegators.get(delegator).map(|d| &d.bonded_amount))
                .cloned()
                .unwrap_or_default()
        })
    }

    fn get_transcoder_earnings_pool_for_round(
        &mut self,
        transcoder: &Address,
        round: u64,
    ) -> Result<EarningsPool, CallError> {
        self.read("getTranscoderEarningsPoolForRound", |x| {
            x.earnings
                .get(&(*transcoder, round))
                .cloned()
                .unwrap_or_default()
        })
    }

    fn unbonding_period(&mut self) -> Result<u64, CallError> {
        self.read("unbondingPeriod", |x| x.unbonding_period)
    }

    fn get_transcoder_pool_max_size(&mut self) -> Result<u64, CallError> {
        self.read("getTranscoderPoolMaxSize", |x| x.pool_max_size)
    }

    fn target_bonding_rate(&mut self) -> Result<u64, CallError> {
        self.read("targetBondingRate", |x| x.target_bonding_rate)
    }

    fn inflation(&mut self) -> Result<u64, CallError> {
        self.read("inflation", |x| x.inflation)
    }

    fn inflation_change(&mut self) -> Result<u64, CallError> {
        self.read("inflationChange", |x| x.inflation_change)
    }

    fn slot0(&mut self, pool: &Address) -> Result<U256, CallError> {
        self.read("slot0", |x| x.sqrt_prices.get(pool).cloned())?
            .ok_or(CallError::Reverted)
    }
}
