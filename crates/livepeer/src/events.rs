//! Decoded contract logs, grouped by the contract that emits them.
//!
//! Envelopes travel as JSON lines, one log each:
//!
//! ```json
//! {"block": {...}, "transaction": {...}, "log_index": 3, "address": "0x..",
//!  "event": {"contract": "BondingManager",
//!            "log": {"event": "Reward", "params": {"transcoder": "0x..", "amount": "1000"}}}}
//! ```
//!
//! Every `uint256` parameter is carried as a decimal string.

use bondgraph_core::{Address, EventEnvelope, B256, U256};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

pub type Envelope = EventEnvelope<Event>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "contract", content = "log")]
pub enum Event {
    BondingManager(BondingManagerEvent),
    RoundsManager(RoundsManagerEvent),
    Minter(MinterEvent),
    LivepeerToken(TokenEvent),
    TicketBroker(TicketBrokerEvent),
    PollCreator(PollCreatorEvent),
    Poll(PollEvent),
    Controller(ControllerEvent),
    ServiceRegistry(ServiceRegistryEvent),
    L2Migrator(MigratorEvent),
    Treasury(TreasuryEvent),
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params")]
pub enum BondingManagerEvent {
    Bond {
        new_delegate: Address,
        old_delegate: Address,
        delegator: Address,
        #[serde_as(as = "DisplayFromStr")]
        additional_amount: U256,
        #[serde_as(as = "DisplayFromStr")]
        bonded_amount: U256,
    },
    Unbond {
        delegate: Address,
        delegator: Address,
        #[serde_as(as = "DisplayFromStr")]
        unbonding_lock_id: U256,
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
        #[serde_as(as = "DisplayFromStr")]
        withdraw_round: U256,
    },
    Rebond {
        delegate: Address,
        delegator: Address,
        #[serde_as(as = "DisplayFromStr")]
        unbonding_lock_id: U256,
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
    TransferBond {
        old_delegator: Address,
        new_delegator: Address,
        #[serde_as(as = "DisplayFromStr")]
        old_unbonding_lock_id: U256,
        #[serde_as(as = "DisplayFromStr")]
        new_unbonding_lock_id: U256,
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
    WithdrawStake {
        delegator: Address,
        #[serde_as(as = "DisplayFromStr")]
        unbonding_lock_id: U256,
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
        #[serde_as(as = "DisplayFromStr")]
        withdraw_round: U256,
    },
    WithdrawFees {
        delegator: Address,
        recipient: Address,
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
    ParameterUpdate {
        param: String,
    },
    Reward {
        transcoder: Address,
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
    TranscoderSlashed {
        transcoder: Address,
        finder: Address,
        #[serde_as(as = "DisplayFromStr")]
        penalty: U256,
        #[serde_as(as = "DisplayFromStr")]
        finder_reward: U256,
    },
    TranscoderUpdate {
        transcoder: Address,
        #[serde_as(as = "DisplayFromStr")]
        reward_cut: U256,
        #[serde_as(as = "DisplayFromStr")]
        fee_share: U256,
    },
    TranscoderActivated {
        transcoder: Address,
        #[serde_as(as = "DisplayFromStr")]
        activation_round: U256,
    },
    TranscoderDeactivated {
        transcoder: Address,
        #[serde_as(as = "DisplayFromStr")]
        deactivation_round: U256,
    },
    EarningsClaimed {
        delegate: Address,
        delegator: Address,
        #[serde_as(as = "DisplayFromStr")]
        rewards: U256,
        #[serde_as(as = "DisplayFromStr")]
        fees: U256,
        #[serde_as(as = "DisplayFromStr")]
        start_round: U256,
        #[serde_as(as = "DisplayFromStr")]
        end_round: U256,
    },
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params")]
pub enum RoundsManagerEvent {
    NewRound {
        #[serde_as(as = "DisplayFromStr")]
        round: U256,
        block_hash: B256,
    },
    ParameterUpdate {
        param: String,
    },
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params")]
pub enum MinterEvent {
    SetCurrentRewardTokens {
        #[serde_as(as = "DisplayFromStr")]
        current_mintable_tokens: U256,
        #[serde_as(as = "DisplayFromStr")]
        current_inflation: U256,
    },
    ParameterUpdate {
        param: String,
    },
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params")]
pub enum TokenEvent {
    Mint {
        to: Address,
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
    Burn {
        burner: Address,
        #[serde_as(as = "DisplayFromStr")]
        value: U256,
    },
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params")]
pub enum TicketBrokerEvent {
    WinningTicketRedeemed {
        sender: Address,
        recipient: Address,
        #[serde_as(as = "DisplayFromStr")]
        face_value: U256,
        #[serde_as(as = "DisplayFromStr")]
        win_prob: U256,
        #[serde_as(as = "DisplayFromStr")]
        sender_nonce: U256,
        #[serde_as(as = "DisplayFromStr")]
        recipient_rand: U256,
        #[serde(default)]
        aux_data: String,
    },
    DepositFunded {
        sender: Address,
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
    ReserveFunded {
        reserve_holder: Address,
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
    ReserveClaimed {
        reserve_holder: Address,
        claimant: Address,
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
    Withdrawal {
        sender: Address,
        #[serde_as(as = "DisplayFromStr")]
        deposit: U256,
        #[serde_as(as = "DisplayFromStr")]
        reserve: U256,
    },
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params")]
pub enum PollCreatorEvent {
    PollCreated {
        poll: Address,
        proposal: String,
        #[serde_as(as = "DisplayFromStr")]
        end_block: U256,
        #[serde_as(as = "DisplayFromStr")]
        quorum: U256,
        #[serde_as(as = "DisplayFromStr")]
        quota: U256,
    },
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params")]
pub enum PollEvent {
    Vote {
        voter: Address,
        #[serde_as(as = "DisplayFromStr")]
        choice_id: U256,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params")]
pub enum ControllerEvent {
    Pause,
    Unpause,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params")]
pub enum ServiceRegistryEvent {
    #[serde(rename = "ServiceURIUpdate")]
    ServiceUriUpdate { addr: Address, service_uri: String },
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params")]
pub enum MigratorEvent {
    MigrateDelegatorFinalized {
        l1_addr: Address,
        l2_addr: Address,
        #[serde_as(as = "DisplayFromStr")]
        stake: U256,
        #[serde_as(as = "DisplayFromStr")]
        delegated_stake: U256,
        #[serde_as(as = "DisplayFromStr")]
        fees: U256,
        delegate: Address,
    },
    StakeClaimed {
        delegator: Address,
        delegate: Address,
        #[serde_as(as = "DisplayFromStr")]
        stake: U256,
        #[serde_as(as = "DisplayFromStr")]
        fees: U256,
    },
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params")]
pub enum TreasuryEvent {
    ProposalCreated {
        #[serde_as(as = "DisplayFromStr")]
        proposal_id: U256,
        proposer: Address,
        targets: Vec<Address>,
        #[serde_as(as = "Vec<DisplayFromStr>")]
        values: Vec<U256>,
        calldatas: Vec<String>,
        #[serde_as(as = "DisplayFromStr")]
        vote_start: U256,
        #[serde_as(as = "DisplayFromStr")]
        vote_end: U256,
        description: String,
    },
    VoteCast {
        voter: Address,
        #[serde_as(as = "DisplayFromStr")]
        proposal_id: U256,
        support: u8,
        #[serde_as(as = "DisplayFromStr")]
        weight: U256,
        #[serde(default)]
        reason: String,
    },
    VoteCastWithParams {
        voter: Address,
        #[serde_as(as = "DisplayFromStr")]
        proposal_id: U256,
        support: u8,
        #[serde_as(as = "DisplayFromStr")]
        weight: U256,
        #[serde(default)]
        reason: String,
        #[serde(default)]
        params: String,
    },
}

/// Bonding manager logs that poll watchers react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WatchedEvent {
    Bond,
    Unbond,
    Rebond,
    Reward,
}

impl WatchedEvent {
    pub const ALL: [WatchedEvent; 4] = [Self::Bond, Self::Unbond, Self::Rebond, Self::Reward];
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::BondingManager(x) => match x {
                BondingManagerEvent::Bond { .. } => "Bond",
                BondingManagerEvent::Unbond { .. } => "Unbond",
                BondingManagerEvent::Rebond { .. } => "Rebond",
                BondingManagerEvent::TransferBond { .. } => "TransferBond",
                BondingManagerEvent::WithdrawStake { .. } => "WithdrawStake",
                BondingManagerEvent::WithdrawFees { .. } => "WithdrawFees",
                BondingManagerEvent::ParameterUpdate { .. } => "ParameterUpdate",
                BondingManagerEvent::Reward { .. } => "Reward",
                BondingManagerEvent::TranscoderSlashed { .. } => "TranscoderSlashed",
                BondingManagerEvent::TranscoderUpdate { .. } => "TranscoderUpdate",
                BondingManagerEvent::TranscoderActivated { .. } => "TranscoderActivated",
                BondingManagerEvent::TranscoderDeactivated { .. } => "TranscoderDeactivated",
                BondingManagerEvent::EarningsClaimed { .. } => "EarningsClaimed",
            },
            Event::RoundsManager(x) => match x {
                RoundsManagerEvent::NewRound { .. } => "NewRound",
                RoundsManagerEvent::ParameterUpdate { .. } => "ParameterUpdate",
            },
            Event::Minter(x) => match x {
                MinterEvent::SetCurrentRewardTokens { .. } => "SetCurrentRewardTokens",
                MinterEvent::ParameterUpdate { .. } => "ParameterUpdate",
            },
            Event::LivepeerToken(x) => match x {
                TokenEvent::Mint { .. } => "Mint",
                TokenEvent::Burn { .. } => "Burn",
            },
            Event::TicketBroker(x) => match x {
                TicketBrokerEvent::WinningTicketRedeemed { .. } => "WinningTicketRedeemed",
                TicketBrokerEvent::DepositFunded { .. } => "DepositFunded",
                TicketBrokerEvent::ReserveFunded { .. } => "ReserveFunded",
                TicketBrokerEvent::ReserveClaimed { .. } => "ReserveClaimed",
                TicketBrokerEvent::Withdrawal { .. } => "Withdrawal",
            },
            Event::PollCreator(PollCreatorEvent::PollCreated { .. }) => "PollCreated",
            Event::Poll(PollEvent::Vote { .. }) => "Vote",
            Event::Controller(ControllerEvent::Pause) => "Pause",
            Event::Controller(ControllerEvent::Unpause) => "Unpause",
            Event::ServiceRegistry(ServiceRegistryEvent::ServiceUriUpdate { .. }) => {
                "ServiceURIUpdate"
            }
            Event::L2Migrator(x) => match x {
                MigratorEvent::MigrateDelegatorFinalized { .. } => "MigrateDelegatorFinalized",
                MigratorEvent::StakeClaimed { .. } => "StakeClaimed",
            },
            Event::Treasury(x) => match x {
                TreasuryEvent::ProposalCreated { .. } => "ProposalCreated",
                TreasuryEvent::VoteCast { .. } => "VoteCast",
                TreasuryEvent::VoteCastWithParams { .. } => "VoteCastWithParams",
            },
        }
    }

    pub fn watched(&self) -> Option<WatchedEvent> {
        match self {
            Event::BondingManager(BondingManagerEvent::Bond { .. }) => Some(WatchedEvent::Bond),
            Event::BondingManager(BondingManagerEvent::Unbond { .. }) => Some(WatchedEvent::Unbond),
            Event::BondingManager(BondingManagerEvent::Rebond { .. }) => Some(WatchedEvent::Rebond),
            Event::BondingManager(BondingManagerEvent::Reward { .. }) => Some(WatchedEvent::Reward),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bonding_logs_decode_from_json() {
        let raw = r#"{
            "contract": "BondingManager",
            "log": {
                "event": "Bond",
                "params": {
                    "new_delegate": "0x00000000000000000000000000000000000000aa",
                    "old_delegate": "0x0000000000000000000000000000000000000000",
                    "delegator": "0x00000000000000000000000000000000000000bb",
                    "additional_amount": "1000000000000000000",
                    "bonded_amount": "1000000000000000000"
                }
            }
        }"#;

        let event: Event = serde_json::from_str(raw).unwrap();

        assert_eq!(event.name(), "Bond");
        assert_eq!(event.watched(), Some(WatchedEvent::Bond));

        let Event::BondingManager(BondingManagerEvent::Bond { bonded_amount, .. }) = event else {
            panic!("unexpected event {event:?}");
        };

        assert_eq!(bonded_amount, U256::from(10u64.pow(18)));
    }

    #[test]
    fn oversized_integers_decode() {
        let raw = r#"{
            "contract": "Poll",
            "log": {
                "event": "Vote",
                "params": {
                    "voter": "0x00000000000000000000000000000000000000aa",
                    "choice_id": "18446744073709551616"
                }
            }
        }"#;

        let event: Event = serde_json::from_str(raw).unwrap();

        let Event::Poll(PollEvent::Vote { choice_id, .. }) = event else {
            panic!("unexpected event {event:?}");
        };

        assert_eq!(choice_id, U256::from(u64::MAX) + U256::from(1u8));
    }

    #[test]
    fn integers_are_written_as_decimal_strings() {
        let event = Event::Poll(PollEvent::Vote {
            voter: Address::ZERO,
            choice_id: U256::from(2u8),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["log"]["params"]["choice_id"], "2");
    }

    #[test]
    fn unit_logs_need_no_params() {
        let event: Event =
            serde_json::from_str(r#"{"contract": "Controller", "log": {"event": "Pause"}}"#)
                .unwrap();

        assert_eq!(event, Event::Controller(ControllerEvent::Pause));
        assert_eq!(event.watched(), None);
    }

    #[test]
    fn service_uri_keeps_contract_spelling() {
        let event = Event::ServiceRegistry(ServiceRegistryEvent::ServiceUriUpdate {
            addr: Address::ZERO,
            service_uri: "https://t.example:8935".into(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["log"]["event"], "ServiceURIUpdate");
    }
}
