//! Drives a [`MockChain`] the way the protocol contracts would and emits the
//! matching logs.
//!
//! Every method mutates the chain first and then returns the envelope of the
//! log it produced, so processing each envelope right away gives handlers the
//! same view of the contracts they'd have live.

use std::collections::BTreeMap;

use bondgraph_core::{Address, BlockMeta, TxMeta, B256, U256};
use bondgraph_livepeer::{
    events::{
        BondingManagerEvent, ControllerEvent, MigratorEvent, MinterEvent, PollCreatorEvent,
        PollEvent, RoundsManagerEvent, ServiceRegistryEvent, TicketBrokerEvent, TokenEvent,
        TreasuryEvent,
    },
    Envelope, Event,
};
use tracing::trace;

use crate::{
    chain::{ChainState, MockChain},
    TestAddress,
};

pub const START_BLOCK: u64 = 1_000;
pub const START_TIMESTAMP: u64 = 1_700_000_000;
pub const BLOCK_TIME: u64 = 12;
pub const UNBONDING_PERIOD: u64 = 7;

#[derive(Debug, Clone)]
pub struct Contracts {
    pub bonding_manager: Address,
    pub rounds_manager: Address,
    pub minter: Address,
    pub token: Address,
    pub ticket_broker: Address,
    pub poll_creator: Address,
    pub controller: Address,
    pub service_registry: Address,
    pub migrator: Address,
    pub treasury: Address,
}

impl Default for Contracts {
    fn default() -> Self {
        let at = |x: u8| Address::repeat_byte(x);

        Self {
            bonding_manager: at(0xb0),
            rounds_manager: at(0xb1),
            minter: at(0xb2),
            token: at(0xb3),
            ticket_broker: at(0xb4),
            poll_creator: at(0xb5),
            controller: at(0xb6),
            service_registry: at(0xb7),
            migrator: at(0xb8),
            treasury: at(0xb9),
        }
    }
}

pub struct Simulator {
    pub chain: MockChain,
    pub contracts: Contracts,
    block: u64,
    timestamp: u64,
    log_index: u64,
    tx_seq: u64,
    locks: BTreeMap<(Address, u64), U256>,
    emitted: Vec<Envelope>,
}

impl Simulator {
    /// A chain whose round schedule starts at block zero, so the round of a
    /// block is `block / round_length`.
    pub fn new(round_length: u64) -> Self {
        let chain = MockChain::new(ChainState {
            block: START_BLOCK,
            round_length,
            unbonding_period: UNBONDING_PERIOD,
            pool_max_size: 100,
            target_bonding_rate: 500_000,
            inflation: 137,
            inflation_change: 3,
            ..Default::default()
        });

        Self {
            chain,
            contracts: Contracts::default(),
            block: START_BLOCK,
            timestamp: START_TIMESTAMP,
            log_index: 0,
            tx_seq: 0,
            locks: BTreeMap::new(),
            emitted: vec![],
        }
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn current_round(&self) -> u64 {
        self.chain.state().current_round()
    }

    /// Every envelope produced so far, in log order.
    pub fn emitted(&self) -> &[Envelope] {
        &self.emitted
    }

    pub fn advance(&mut self, blocks: u64) {
        self.block += blocks;
        self.timestamp += blocks * BLOCK_TIME;
        self.log_index = 0;
        self.chain.state_mut().block = self.block;
    }

    /// Moves to the first block of the next round.
    pub fn next_round(&mut self) {
        let length = self.chain.state().round_length.max(1);
        let next = (self.block / length + 1) * length;
        self.advance(next - self.block);
    }

    fn emit(&mut self, from: Address, address: Address, event: Event) -> Envelope {
        self.tx_seq += 1;

        let mut tx_hash = [0u8; 32];
        tx_hash[24..].copy_from_slice(&self.tx_seq.to_be_bytes());

        let mut block_hash = [0xbb; 32];
        block_hash[24..].copy_from_slice(&self.block.to_be_bytes());

        let envelope = Envelope {
            block: BlockMeta {
                number: self.block,
                timestamp: self.timestamp,
                hash: B256::new(block_hash),
            },
            transaction: TxMeta {
                hash: B256::new(tx_hash),
                from,
                to: Some(address),
                gas_used: 120_000,
                gas_price: U256::from(100_000_000u64),
            },
            log_index: self.log_index,
            address,
            event,
        };

        self.log_index += 1;

        trace!(position = %envelope.position(), event = envelope.event.name(), "emitted");

        self.emitted.push(envelope.clone());

        envelope
    }

    fn bonding(&mut self, from: Address, event: BondingManagerEvent) -> Envelope {
        let at = self.contracts.bonding_manager;
        self.emit(from, at, Event::BondingManager(event))
    }

    pub fn bond(&mut self, delegator: TestAddress, delegate: TestAddress, amount: U256) -> Envelope {
        let delegator = delegator.address();
        let delegate = delegate.address();

        let (old_delegate, bonded_amount) = {
            let mut state = self.chain.state_mut();
            let round = state.current_round();

            let previous = state.delegator_mut(&delegator).clone();
            let bonded_amount = previous.bonded_amount + amount;
            let old_delegate = previous.delegate_address;

            if !old_delegate.is_zero() && old_delegate != delegate {
                let old = state.delegator_mut(&old_delegate);
                old.delegated_amount -= previous.bonded_amount;
                state.delegator_mut(&delegate).delegated_amount += bonded_amount;
            } else {
                state.delegator_mut(&delegate).delegated_amount += amount;
            }

            let info = state.delegator_mut(&delegator);
            info.bonded_amount = bonded_amount;
            info.delegate_address = delegate;
            info.start_round = round + 1;
            info.last_claim_round = round;

            state.total_bonded += amount;

            (old_delegate, bonded_amount)
        };

        self.bonding(
            delegator,
            BondingManagerEvent::Bond {
                new_delegate: delegate,
                old_delegate,
                delegator,
                additional_amount: amount,
                bonded_amount,
            },
        )
    }

    /// Unbonds `amount`, returning the envelope and the new lock id.
    pub fn unbond(&mut self, delegator: TestAddress, amount: U256) -> (Envelope, u64) {
        let delegator = delegator.address();

        let (delegate, lock_id, withdraw_round) = {
            let mut state = self.chain.state_mut();
            let round = state.current_round();
            let withdraw_round = round + state.unbonding_period;

            let info = state.delegator_mut(&delegator);
            let delegate = info.delegate_address;
            let lock_id = info.next_unbonding_lock_id;

            info.next_unbonding_lock_id += 1;
            info.bonded_amount -= amount;

            if info.bonded_amount.is_zero() {
                info.delegate_address = Address::ZERO;
            }

            state.delegator_mut(&delegate).delegated_amount -= amount;
            state.total_bonded -= amount;

            (delegate, lock_id, withdraw_round)
        };

        self.locks.insert((delegator, lock_id), amount);

        let envelope = self.bonding(
            delegator,
            BondingManagerEvent::Unbond {
                delegate,
                delegator,
                unbonding_lock_id: U256::from(lock_id),
                amount,
                withdraw_round: U256::from(withdraw_round),
            },
        );

        (envelope, lock_id)
    }

    /// Rebonds a lock to `delegate`, which becomes the delegator's delegate.
    pub fn rebond(&mut self, delegator: TestAddress, delegate: TestAddress, lock_id: u64) -> Envelope {
        let delegator = delegator.address();
        let delegate = delegate.address();

        let amount = self
            .locks
            .remove(&(delegator, lock_id))
            .unwrap_or_default();

        {
            let mut state = self.chain.state_mut();

            let info = state.delegator_mut(&delegator);
            info.bonded_amount += amount;
            info.delegate_address = delegate;

            state.delegator_mut(&delegate).delegated_amount += amount;
            state.total_bonded += amount;
        }

        self.bonding(
            delegator,
            BondingManagerEvent::Rebond {
                delegate,
                delegator,
                unbonding_lock_id: U256::from(lock_id),
                amount,
            },
        )
    }

    pub fn withdraw_stake(&mut self, delegator: TestAddress, lock_id: u64) -> Envelope {
        let delegator = delegator.address();

        let amount = self
            .locks
            .remove(&(delegator, lock_id))
            .unwrap_or_default();

        let withdraw_round = self.current_round();

        self.bonding(
            delegator,
            BondingManagerEvent::WithdrawStake {
                delegator,
                unbonding_lock_id: U256::from(lock_id),
                amount,
                withdraw_round: U256::from(withdraw_round),
            },
        )
    }

    /// Hands an unbonding lock over to another delegator, returning the
    /// envelope and the receiver's lock id.
    pub fn transfer_bond(
        &mut self,
        from: TestAddress,
        to: TestAddress,
        lock_id: u64,
    ) -> (Envelope, u64) {
        let from = from.address();
        let to = to.address();

        let amount = self.locks.remove(&(from, lock_id)).unwrap_or_default();

        let new_lock_id = {
            let mut state = self.chain.state_mut();
            let info = state.delegator_mut(&to);
            let id = info.next_unbonding_lock_id;
            info.next_unbonding_lock_id += 1;
            id
        };

        self.locks.insert((to, new_lock_id), amount);

        let envelope = self.bonding(
            from,
            BondingManagerEvent::TransferBond {
                old_delegator: from,
                new_delegator: to,
                old_unbonding_lock_id: U256::from(lock_id),
                new_unbonding_lock_id: U256::from(new_lock_id),
                amount,
            },
        );

        (envelope, new_lock_id)
    }

    pub fn withdraw_fees(&mut self, delegator: TestAddress, amount: U256) -> Envelope {
        let delegator = delegator.address();

        {
            let mut state = self.chain.state_mut();
            let info = state.delegator_mut(&delegator);

            if info.fees >= amount {
                info.fees -= amount;
            }
        }

        self.bonding(
            delegator,
            BondingManagerEvent::WithdrawFees {
                delegator,
                recipient: delegator,
                amount,
            },
        )
    }

    pub fn reward(&mut self, transcoder: TestAddress, amount: U256) -> Envelope {
        let transcoder = transcoder.address();

        {
            let mut state = self.chain.state_mut();
            let round = state.current_round();

            state.delegator_mut(&transcoder).delegated_amount += amount;
            state.total_bonded += amount;

            let pool = state.earnings.entry((transcoder, round)).or_default();
            pool.total_stake += amount;
            pool.cumulative_reward_factor += U256::from(10u8).pow(U256::from(27u8));
        }

        self.bonding(transcoder, BondingManagerEvent::Reward { transcoder, amount })
    }

    /// Adds a transcoder to the active pool from the next round on.
    pub fn activate(&mut self, transcoder: TestAddress) -> Envelope {
        let transcoder = transcoder.address();

        let activation_round = {
            let mut state = self.chain.state_mut();

            if !state.transcoder_pool.contains(&transcoder) {
                state.transcoder_pool.push(transcoder);
            }

            state.current_round() + 1
        };

        self.bonding(
            transcoder,
            BondingManagerEvent::TranscoderActivated {
                transcoder,
                activation_round: U256::from(activation_round),
            },
        )
    }

    pub fn deactivate(&mut self, transcoder: TestAddress) -> Envelope {
        let transcoder = transcoder.address();

        let deactivation_round = {
            let mut state = self.chain.state_mut();
            state.transcoder_pool.retain(|x| *x != transcoder);
            state.current_round() + 1
        };

        self.bonding(
            transcoder,
            BondingManagerEvent::TranscoderDeactivated {
                transcoder,
                deactivation_round: U256::from(deactivation_round),
            },
        )
    }

    pub fn transcoder_update(&mut self, transcoder: TestAddress, reward_cut: u64, fee_share: u64) -> Envelope {
        let transcoder = transcoder.address();

        self.bonding(
            transcoder,
            BondingManagerEvent::TranscoderUpdate {
                transcoder,
                reward_cut: U256::from(reward_cut),
                fee_share: U256::from(fee_share),
            },
        )
    }

    pub fn earnings_claimed(
        &mut self,
        delegator: TestAddress,
        rewards: U256,
        fees: U256,
    ) -> Envelope {
        let delegator = delegator.address();

        let (delegate, start_round, end_round) = {
            let mut state = self.chain.state_mut();
            let round = state.current_round();

            let info = state.delegator_mut(&delegator);
            let start_round = info.last_claim_round + 1;
            info.bonded_amount += rewards;
            info.fees += fees;
            info.last_claim_round = round;

            (info.delegate_address, start_round, round)
        };

        self.bonding(
            delegator,
            BondingManagerEvent::EarningsClaimed {
                delegate,
                delegator,
                rewards,
                fees,
                start_round: U256::from(start_round),
                end_round: U256::from(end_round),
            },
        )
    }

    pub fn bonding_parameter(&mut self, param: &str) -> Envelope {
        let from = self.contracts.controller;

        self.bonding(
            from,
            BondingManagerEvent::ParameterUpdate {
                param: param.to_string(),
            },
        )
    }

    /// Initializes the round the chain is currently in.
    pub fn initialize_round(&mut self) -> Envelope {
        let round = self.current_round();
        let (from, at) = (TestAddress::Custom(0xee).address(), self.contracts.rounds_manager);

        let mut block_hash = [0xbb; 32];
        block_hash[24..].copy_from_slice(&self.block.to_be_bytes());

        self.emit(
            from,
            at,
            Event::RoundsManager(RoundsManagerEvent::NewRound {
                round: U256::from(round),
                block_hash: B256::new(block_hash),
            }),
        )
    }

    /// Changes the round length starting at the current block.
    pub fn set_round_length(&mut self, length: u64) -> Envelope {
        {
            let mut state = self.chain.state_mut();
            let round = state.current_round();

            state.last_round_length_update_round = round;
            state.last_round_length_update_start_block = state.block;
            state.round_length = length;
        }

        let (from, at) = (self.contracts.controller, self.contracts.rounds_manager);

        self.emit(
            from,
            at,
            Event::RoundsManager(RoundsManagerEvent::ParameterUpdate {
                param: "roundLength".into(),
            }),
        )
    }

    pub fn set_current_reward_tokens(&mut self, mintable: U256, inflation: u64) -> Envelope {
        self.chain.state_mut().inflation = inflation;

        let (from, at) = (self.contracts.rounds_manager, self.contracts.minter);

        self.emit(
            from,
            at,
            Event::Minter(MinterEvent::SetCurrentRewardTokens {
                current_mintable_tokens: mintable,
                current_inflation: U256::from(inflation),
            }),
        )
    }

    pub fn mint(&mut self, to: TestAddress, amount: U256) -> Envelope {
        let (from, at) = (self.contracts.minter, self.contracts.token);

        self.emit(
            from,
            at,
            Event::LivepeerToken(TokenEvent::Mint {
                to: to.address(),
                amount,
            }),
        )
    }

    pub fn burn(&mut self, burner: TestAddress, value: U256) -> Envelope {
        let burner = burner.address();
        let at = self.contracts.token;

        self.emit(burner, at, Event::LivepeerToken(TokenEvent::Burn { burner, value }))
    }

    fn broker(&mut self, from: Address, event: TicketBrokerEvent) -> Envelope {
        let at = self.contracts.ticket_broker;
        self.emit(from, at, Event::TicketBroker(event))
    }

    pub fn fund_deposit(&mut self, sender: TestAddress, amount: U256) -> Envelope {
        let sender = sender.address();
        self.broker(sender, TicketBrokerEvent::DepositFunded { sender, amount })
    }

    pub fn fund_reserve(&mut self, holder: TestAddress, amount: U256) -> Envelope {
        let reserve_holder = holder.address();

        self.broker(
            reserve_holder,
            TicketBrokerEvent::ReserveFunded {
                reserve_holder,
                amount,
            },
        )
    }

    pub fn redeem_ticket(
        &mut self,
        sender: TestAddress,
        recipient: TestAddress,
        face_value: U256,
    ) -> Envelope {
        let sender = sender.address();
        let recipient = recipient.address();
        let nonce = U256::from(self.tx_seq);

        {
            let mut state = self.chain.state_mut();
            let round = state.current_round();
            state.delegator_mut(&recipient).fees += face_value;
            state.earnings.entry((recipient, round)).or_default().cumulative_fee_factor +=
                U256::from(10u8).pow(U256::from(27u8));
        }

        self.broker(
            recipient,
            TicketBrokerEvent::WinningTicketRedeemed {
                sender,
                recipient,
                face_value,
                win_prob: U256::from(u64::MAX),
                sender_nonce: nonce,
                recipient_rand: U256::from(0xdeadu32),
                aux_data: String::new(),
            },
        )
    }

    pub fn withdraw_broadcaster(&mut self, sender: TestAddress, deposit: U256, reserve: U256) -> Envelope {
        let sender = sender.address();

        self.broker(
            sender,
            TicketBrokerEvent::Withdrawal {
                sender,
                deposit,
                reserve,
            },
        )
    }

    pub fn create_poll(&mut self, poll: Address, end_block: u64) -> Envelope {
        let (from, at) = (TestAddress::Custom(0xee).address(), self.contracts.poll_creator);

        self.emit(
            from,
            at,
            Event::PollCreator(PollCreatorEvent::PollCreated {
                poll,
                proposal: "QmProposalHash".into(),
                end_block: U256::from(end_block),
                quorum: U256::from(333_300u64),
                quota: U256::from(500_000u64),
            }),
        )
    }

    pub fn vote(&mut self, poll: Address, voter: TestAddress, choice_id: u64) -> Envelope {
        self.vote_with_choice_id(poll, voter, U256::from(choice_id))
    }

    /// Casts a vote carrying the raw uint256 choice id of the log.
    pub fn vote_with_choice_id(&mut self, poll: Address, voter: TestAddress, choice_id: U256) -> Envelope {
        let voter = voter.address();
        self.emit(voter, poll, Event::Poll(PollEvent::Vote { voter, choice_id }))
    }

    pub fn set_paused(&mut self, paused: bool) -> Envelope {
        let event = match paused {
            true => ControllerEvent::Pause,
            false => ControllerEvent::Unpause,
        };

        let at = self.contracts.controller;
        self.emit(TestAddress::Custom(0xee).address(), at, Event::Controller(event))
    }

    pub fn set_service_uri(&mut self, transcoder: TestAddress, uri: &str) -> Envelope {
        let addr = transcoder.address();
        let at = self.contracts.service_registry;

        self.emit(
            addr,
            at,
            Event::ServiceRegistry(ServiceRegistryEvent::ServiceUriUpdate {
                addr,
                service_uri: uri.to_string(),
            }),
        )
    }

    pub fn stake_claimed(&mut self, delegator: TestAddress, delegate: TestAddress, stake: U256) -> Envelope {
        let delegator = delegator.address();
        let at = self.contracts.migrator;

        self.emit(
            delegator,
            at,
            Event::L2Migrator(MigratorEvent::StakeClaimed {
                delegator,
                delegate: delegate.address(),
                stake,
                fees: U256::ZERO,
            }),
        )
    }

    pub fn propose(&mut self, proposal_id: u64, proposer: TestAddress, vote_end: u64) -> Envelope {
        let proposer = proposer.address();
        let at = self.contracts.treasury;
        let vote_start = self.block + 1;

        self.emit(
            proposer,
            at,
            Event::Treasury(TreasuryEvent::ProposalCreated {
                proposal_id: U256::from(proposal_id),
                proposer,
                targets: vec![self.contracts.token],
                values: vec![U256::ZERO],
                calldatas: vec!["0xa9059cbb".into()],
                vote_start: U256::from(vote_start),
                vote_end: U256::from(vote_end),
                description: format!("treasury proposal {proposal_id}"),
            }),
        )
    }

    pub fn treasury_vote(
        &mut self,
        proposal_id: u64,
        voter: TestAddress,
        support: u8,
        weight: U256,
        reason: &str,
    ) -> Envelope {
        let voter = voter.address();
        let at = self.contracts.treasury;

        self.emit(
            voter,
            at,
            Event::Treasury(TreasuryEvent::VoteCast {
                voter,
                proposal_id: U256::from(proposal_id),
                support,
                weight,
                reason: reason.to_string(),
            }),
        )
    }
}
