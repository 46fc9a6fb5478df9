//! Append-only history: one immutable record per applied log plus the
//! transaction it came from.

use bondgraph_core::{impl_entity, Address, StateError, StateStore, B256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    context::Ctx,
    decimal::Decimal,
    ids,
    model::{Keyed, Transaction, TreasurySupport},
    reader::ContractReader,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub id: String,
    pub transaction: String,
    pub timestamp: u64,
    pub round: u64,
    pub detail: EventDetail,
}

impl_entity!(HistoryEvent, "events");

impl Keyed for HistoryEvent {
    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventDetail {
    Bond {
        new_delegate: Address,
        old_delegate: Address,
        delegator: Address,
        bonded_amount: Decimal,
        additional_amount: Decimal,
    },
    Unbond {
        delegate: Address,
        delegator: Address,
        unbonding_lock_id: u64,
        amount: Decimal,
        withdraw_round: u64,
    },
    Rebond {
        delegate: Address,
        delegator: Address,
        unbonding_lock_id: u64,
        amount: Decimal,
    },
    TransferBond {
        new_delegator: Address,
        old_delegator: Address,
        new_unbonding_lock_id: u64,
        old_unbonding_lock_id: u64,
        amount: Decimal,
    },
    WithdrawStake {
        delegator: Address,
        unbonding_lock_id: u64,
        amount: Decimal,
    },
    WithdrawFees {
        delegator: Address,
        recipient: Address,
        amount: Decimal,
    },
    ParameterUpdate {
        param: String,
    },
    Reward {
        delegate: Address,
        reward_tokens: Decimal,
    },
    TranscoderSlashed {
        delegate: Address,
        finder: Address,
        penalty: Decimal,
        finder_reward: Decimal,
    },
    TranscoderUpdate {
        delegate: Address,
        reward_cut: u64,
        fee_share: u64,
    },
    TranscoderActivated {
        delegate: Address,
        activation_round: u64,
    },
    TranscoderDeactivated {
        delegate: Address,
        deactivation_round: u64,
    },
    EarningsClaimed {
        delegate: Address,
        delegator: Address,
        start_round: u64,
        end_round: u64,
        reward_tokens: Decimal,
        fees: Decimal,
    },
    NewRound {
        block_hash: B256,
    },
    SetCurrentRewardTokens {
        current_mintable_tokens: Decimal,
        current_inflation: String,
    },
    Mint {
        to: Address,
        amount: Decimal,
    },
    Burn {
        value: Decimal,
    },
    WinningTicketRedeemed {
        sender: Address,
        recipient: Address,
        face_value: Decimal,
        face_value_usd: Decimal,
        win_prob: String,
        sender_nonce: String,
        recipient_rand: String,
        aux_data: String,
    },
    DepositFunded {
        sender: Address,
        amount: Decimal,
    },
    ReserveFunded {
        reserve_holder: Address,
        amount: Decimal,
    },
    ReserveClaimed {
        reserve_holder: Address,
        claimant: Address,
        amount: Decimal,
    },
    Withdrawal {
        sender: Address,
        deposit: Decimal,
        reserve: Decimal,
    },
    PollCreated {
        poll: Address,
        proposal: String,
        end_block: u64,
        quorum: u64,
        quota: u64,
    },
    Vote {
        voter: Address,
        poll: Address,
        choice_id: u64,
    },
    Pause,
    Unpause,
    ServiceUriUpdate {
        addr: Address,
        service_uri: String,
    },
    MigrateDelegatorFinalized {
        l1_addr: Address,
        l2_addr: Address,
        stake: Decimal,
        delegated_stake: Decimal,
        fees: Decimal,
        delegate: Address,
    },
    StakeClaimed {
        delegator: Address,
        delegate: Address,
        stake: Decimal,
        fees: Decimal,
    },
    TreasuryProposalCreated {
        proposal: String,
        proposer: Address,
    },
    TreasuryVote {
        proposal: String,
        voter: Address,
        support: TreasurySupport,
        weight: Decimal,
        reason: Option<String>,
    },
}

impl<S: StateStore, R: ContractReader> Ctx<'_, S, R> {
    /// Loads or creates the transaction that carried the current log. A
    /// transaction is written once no matter how many of its logs apply.
    pub fn transaction(&mut self) -> Result<Transaction, StateError> {
        let tx = &self.envelope.transaction;
        let id = format!("{:#x}", tx.hash);

        if let Some(existing) = self.load::<Transaction>(&id)? {
            return Ok(existing);
        }

        let created = Transaction {
            id,
            block_number: self.envelope.block.number,
            gas_used: tx.gas_used,
            gas_price: tx.gas_price.to_string(),
            timestamp: self.envelope.block.timestamp,
            from: ids::address_id(&tx.from),
            to: tx.to.as_ref().map(ids::address_id),
        };

        self.save(&created)?;

        Ok(created)
    }

    /// Appends the history record of the current log.
    pub fn record(&mut self, round: u64, detail: EventDetail) -> Result<(), StateError> {
        let transaction = self.transaction()?;

        let event = HistoryEvent {
            id: ids::event_id(&self.envelope.transaction.hash, self.envelope.log_index),
            transaction: transaction.id,
            timestamp: self.envelope.block.timestamp,
            round,
            detail,
        };

        debug!(id = %event.id, round, "recording event");

        self.save(&event)
    }
}
