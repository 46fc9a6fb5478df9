use bondgraph_core::{impl_entity, Address, Entity, U256};
use serde::{Deserialize, Serialize};

use crate::{decimal::Decimal, ids};

pub const PROTOCOL_KEY: &str = "0";

/// An entity that knows the key it is stored under.
pub trait Keyed: Entity {
    fn key(&self) -> String;
}

macro_rules! keyed_by_id {
    ($($type:ty),* $(,)?) => {
        $(
            impl Keyed for $type {
                fn key(&self) -> String {
                    self.id.to_string()
                }
            }
        )*
    };
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Protocol {
    pub paused: bool,
    pub current_round: u64,
    pub last_initialized_round: u64,
    pub last_round_length_update_round: u64,
    pub last_round_length_update_start_block: u64,
    pub round_length: u64,
    pub round_lock_amount: u64,
    pub lock_period: u64,
    pub unbonding_period: u64,
    pub num_active_transcoders: u64,
    pub active_transcoder_count: u64,
    pub target_bonding_rate: u64,
    pub inflation: u64,
    pub inflation_change: u64,
    pub total_supply: Decimal,
    pub total_active_stake: Decimal,
    pub participation_rate: Decimal,
    pub total_volume_eth: Decimal,
    pub total_volume_usd: Decimal,
    pub winning_ticket_count: u64,
    pub round_count: u64,
    pub lpt_price_eth: Decimal,
    pub delegators_count: u64,
    pub pending_activation: Vec<String>,
    pub pending_deactivation: Vec<String>,
    pub active_broadcasters: Vec<String>,
}

impl Protocol {
    pub fn enqueue_activation(&mut self, transcoder: &str) {
        self.pending_deactivation.retain(|x| x != transcoder);

        if !self.pending_activation.iter().any(|x| x == transcoder) {
            self.pending_activation.push(transcoder.to_string());
        }
    }

    pub fn enqueue_deactivation(&mut self, transcoder: &str) {
        self.pending_activation.retain(|x| x != transcoder);

        if !self.pending_deactivation.iter().any(|x| x == transcoder) {
            self.pending_deactivation.push(transcoder.to_string());
        }
    }

    /// Recomputes the participation rate; left untouched while either side
    /// of the ratio is zero.
    pub fn refresh_participation_rate(&mut self) -> bool {
        if self.total_active_stake.is_positive() && self.total_supply.is_positive() {
            self.participation_rate = self.total_active_stake.safe_div(&self.total_supply);
            return true;
        }

        false
    }

    pub fn mark_broadcaster_active(&mut self, broadcaster: &str) {
        if !self.active_broadcasters.iter().any(|x| x == broadcaster) {
            self.active_broadcasters.push(broadcaster.to_string());
        }
    }
}

impl_entity!(Protocol, "protocol");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDate {
    pub date: String,
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Round {
    pub id: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub length: u64,
    pub initialized: bool,
    pub start_timestamp: u64,
    pub calendar: Option<CalendarDate>,
    pub total_active_stake: Decimal,
    pub total_supply: Decimal,
    pub participation_rate: Decimal,
    pub mintable_tokens: Decimal,
    pub volume_eth: Decimal,
    pub volume_usd: Decimal,
    pub moved_stake: Decimal,
    pub new_stake: Decimal,
    pub delegators_count: u64,
    pub num_active_transcoders: u64,
    pub active_transcoder_count: u64,
    pub inflation: u64,
}

impl_entity!(Round, "rounds");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TranscoderStatus {
    #[default]
    NotRegistered,
    Registered,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transcoder {
    pub id: String,
    pub status: TranscoderStatus,
    pub active: bool,
    pub delegator: Option<String>,
    pub activation_round: u64,
    /// `None` while no deactivation is scheduled.
    pub deactivation_round: Option<u64>,
    pub activation_timestamp: u64,
    pub last_active_stake_update_round: u64,
    pub last_reward_round: Option<u64>,
    pub reward_cut: u64,
    pub reward_cut_update_timestamp: u64,
    pub fee_share: u64,
    pub fee_share_update_timestamp: u64,
    pub total_stake: Decimal,
    pub total_volume_eth: Decimal,
    pub total_volume_usd: Decimal,
    pub thirty_day_volume_eth: Decimal,
    pub sixty_day_volume_eth: Decimal,
    pub ninety_day_volume_eth: Decimal,
    pub service_uri: Option<String>,
    pub transcoder_days: Vec<String>,
}

impl Transcoder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_registered(&self) -> bool {
        self.status == TranscoderStatus::Registered
    }

    pub fn register(&mut self, self_delegator: &str) {
        self.status = TranscoderStatus::Registered;
        self.delegator = Some(self_delegator.to_string());
    }

    pub fn unregister(&mut self) {
        self.status = TranscoderStatus::NotRegistered;
        self.delegator = None;
    }
}

impl_entity!(Transcoder, "transcoders");

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Delegator {
    pub id: String,
    pub delegate: Option<String>,
    pub bonded_amount: Decimal,
    pub principal: Decimal,
    pub unbonded: Decimal,
    pub fees: Decimal,
    pub withdrawn_fees: Decimal,
    pub delegated_amount: Decimal,
    pub start_round: u64,
    pub last_claim_round: Option<u64>,
}

impl Delegator {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_bonded(&self) -> bool {
        self.delegate.is_some()
    }
}

impl_entity!(Delegator, "delegators");

/// Links an address to the delegator and transcoder records it owns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub delegator: Option<String>,
    pub delegate: Option<String>,
    pub last_updated_timestamp: u64,
}

impl_entity!(Account, "accounts");

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnbondingLock {
    pub id: String,
    pub lock_id: u64,
    pub delegator: String,
    pub sender: String,
    pub delegate: String,
    pub withdraw_round: u64,
    pub amount: Decimal,
}

impl_entity!(UnbondingLock, "unbonding_locks");

/// Stake and fee-sharing snapshot of one transcoder for one round.
///
/// `reward_tokens` stays `None` unless the transcoder called reward during the
/// round.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub round: u64,
    pub delegate: String,
    pub total_stake: Decimal,
    pub reward_cut: u64,
    pub fee_share: u64,
    pub reward_tokens: Option<Decimal>,
    pub fees: Decimal,
    pub cumulative_reward_factor: Option<Decimal>,
    pub cumulative_fee_factor: Option<Decimal>,
}

impl Pool {
    pub fn snapshot(id: String, round: u64, transcoder: &Transcoder) -> Self {
        Self {
            id,
            round,
            delegate: transcoder.id.clone(),
            total_stake: transcoder.total_stake.clone(),
            reward_cut: transcoder.reward_cut,
            fee_share: transcoder.fee_share,
            ..Default::default()
        }
    }
}

impl_entity!(Pool, "pools");

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub proposal: String,
    pub end_block: u64,
    pub quorum: u64,
    pub quota: u64,
    pub votes: Vec<String>,
}

impl Poll {
    /// A poll stops observing stake movements once its end block is behind.
    pub fn is_closed_at(&self, block: u64) -> bool {
        self.end_block < block
    }
}

impl_entity!(Poll, "polls");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoteChoice {
    #[default]
    Unset,
    Yes,
    No,
}

impl VoteChoice {
    pub fn from_choice_id(choice_id: &U256) -> Option<Self> {
        match u64::try_from(*choice_id) {
            Ok(0) => Some(Self::Yes),
            Ok(1) => Some(Self::No),
            _ => None,
        }
    }

    pub fn is_cast(&self) -> bool {
        !matches!(self, Self::Unset)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vote {
    pub id: String,
    pub voter: String,
    pub poll: Option<String>,
    pub choice: VoteChoice,
    pub vote_stake: Decimal,
    /// Stake delegated to this voter by delegators that haven't voted
    /// themselves.
    pub non_vote_stake: Decimal,
    pub registered_transcoder: bool,
}

impl Vote {
    pub fn new(id: String, voter: &str) -> Self {
        Self {
            id,
            voter: voter.to_string(),
            ..Default::default()
        }
    }

    /// Weight this vote contributes to its choice. Overridden stake is only
    /// subtracted from registered transcoders.
    pub fn effective_weight(&self) -> Decimal {
        match self.registered_transcoder {
            true => self.vote_stake.clone() - &self.non_vote_stake,
            false => self.vote_stake.clone(),
        }
    }
}

impl_entity!(Vote, "votes");

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PollTally {
    pub id: String,
    pub yes: Decimal,
    pub no: Decimal,
}

impl_entity!(PollTally, "poll_tallies");

/// Persistent record of a voter whose stake movements must be reflected in a
/// poll's tally while it is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollWatch {
    pub seq: u64,
    pub poll: String,
    pub voter: Address,
}

impl_entity!(PollWatch, "poll_watches");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreasurySupport {
    Against,
    For,
    Abstain,
}

impl TreasurySupport {
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Against),
            1 => Some(Self::For),
            2 => Some(Self::Abstain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TreasuryProposal {
    pub id: String,
    pub proposer: String,
    pub targets: Vec<String>,
    pub values: Vec<String>,
    pub calldatas: Vec<String>,
    pub vote_start: u64,
    pub vote_end: u64,
    pub description: String,
    pub for_votes: Decimal,
    pub against_votes: Decimal,
    pub abstain_votes: Decimal,
    pub total_votes: Decimal,
}

impl TreasuryProposal {
    fn bucket(&mut self, support: TreasurySupport) -> &mut Decimal {
        match support {
            TreasurySupport::For => &mut self.for_votes,
            TreasurySupport::Against => &mut self.against_votes,
            TreasurySupport::Abstain => &mut self.abstain_votes,
        }
    }

    pub fn add_votes(&mut self, support: TreasurySupport, weight: &Decimal) {
        *self.bucket(support) += weight;
        self.total_votes += weight;
    }

    pub fn remove_votes(&mut self, support: TreasurySupport, weight: &Decimal) {
        *self.bucket(support) -= weight;
        self.total_votes -= weight;
    }
}

impl_entity!(TreasuryProposal, "treasury_proposals");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreasuryVote {
    pub id: String,
    pub proposal: String,
    pub voter: String,
    pub support: TreasurySupport,
    pub weight: Decimal,
    pub reason: Option<String>,
}

impl_entity!(TreasuryVote, "treasury_votes");

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Broadcaster {
    pub id: String,
    pub deposit: Decimal,
    pub reserve: Decimal,
    pub total_volume_eth: Decimal,
    pub total_volume_usd: Decimal,
    pub thirty_day_volume_eth: Decimal,
    pub sixty_day_volume_eth: Decimal,
    pub ninety_day_volume_eth: Decimal,
    pub first_active_day: u64,
    pub last_active_day: u64,
    pub broadcaster_days: Vec<String>,
}

impl_entity!(Broadcaster, "broadcasters");

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Day {
    pub id: u64,
    pub date: u64,
    pub volume_eth: Decimal,
    pub volume_usd: Decimal,
    pub total_supply: Decimal,
    pub total_active_stake: Decimal,
    pub participation_rate: Decimal,
    pub delegators_count: u64,
    pub num_active_transcoders: u64,
    pub active_transcoder_count: u64,
    pub inflation: u64,
}

impl_entity!(Day, "days");

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscoderDay {
    pub id: String,
    pub date: u64,
    pub transcoder: String,
    pub volume_eth: Decimal,
    pub volume_usd: Decimal,
}

impl_entity!(TranscoderDay, "transcoder_days");

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BroadcasterDay {
    pub id: String,
    pub date: u64,
    pub broadcaster: String,
    pub volume_eth: Decimal,
    pub volume_usd: Decimal,
}

impl_entity!(BroadcasterDay, "broadcaster_days");

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub block_number: u64,
    pub gas_used: u64,
    pub gas_price: String,
    pub timestamp: u64,
    pub from: String,
    pub to: Option<String>,
}

impl_entity!(Transaction, "transactions");

impl Keyed for Protocol {
    fn key(&self) -> String {
        PROTOCOL_KEY.to_string()
    }
}

impl Keyed for PollWatch {
    fn key(&self) -> String {
        ids::watch_id(self.seq)
    }
}

keyed_by_id!(
    Round,
    Transcoder,
    Delegator,
    Account,
    UnbondingLock,
    Pool,
    Poll,
    Vote,
    PollTally,
    TreasuryProposal,
    TreasuryVote,
    Broadcaster,
    Day,
    TranscoderDay,
    BroadcasterDay,
    Transaction,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_queues_are_exclusive() {
        let mut protocol = Protocol::default();

        protocol.enqueue_activation("t1");
        protocol.enqueue_activation("t1");
        assert_eq!(protocol.pending_activation, vec!["t1"]);

        protocol.enqueue_deactivation("t1");
        assert!(protocol.pending_activation.is_empty());
        assert_eq!(protocol.pending_deactivation, vec!["t1"]);

        protocol.enqueue_activation("t1");
        assert!(protocol.pending_deactivation.is_empty());
        assert_eq!(protocol.pending_activation, vec!["t1"]);
    }

    #[test]
    fn participation_needs_both_sides() {
        let mut protocol = Protocol {
            total_active_stake: Decimal::from(50u64),
            ..Default::default()
        };

        assert!(!protocol.refresh_participation_rate());
        assert!(protocol.participation_rate.is_zero());

        protocol.total_supply = Decimal::from(200u64);
        assert!(protocol.refresh_participation_rate());
        assert_eq!(protocol.participation_rate.to_string(), "0.25");
    }

    #[test]
    fn only_registered_votes_subtract_overrides() {
        let mut vote = Vote {
            vote_stake: Decimal::from(100u64),
            non_vote_stake: Decimal::from(30u64),
            ..Default::default()
        };

        assert_eq!(vote.effective_weight(), Decimal::from(100u64));

        vote.registered_transcoder = true;
        assert_eq!(vote.effective_weight(), Decimal::from(70u64));
    }

    #[test]
    fn choice_ids_outside_binary_are_rejected() {
        let choice = |x: u64| VoteChoice::from_choice_id(&U256::from(x));

        assert_eq!(choice(0), Some(VoteChoice::Yes));
        assert_eq!(choice(1), Some(VoteChoice::No));
        assert_eq!(choice(2), None);
        assert_eq!(VoteChoice::from_choice_id(&(U256::from(1u8) << 64usize)), None);
        assert_eq!(VoteChoice::from_choice_id(&U256::MAX), None);
    }

    #[test]
    fn treasury_totals_follow_buckets() {
        let mut proposal = TreasuryProposal::default();
        let ten = Decimal::from(10u64);

        proposal.add_votes(TreasurySupport::For, &ten);
        proposal.add_votes(TreasurySupport::Abstain, &ten);
        proposal.remove_votes(TreasurySupport::For, &ten);

        assert!(proposal.for_votes.is_zero());
        assert_eq!(proposal.abstain_votes, ten);
        assert_eq!(proposal.total_votes, ten);
    }

    #[test]
    fn entities_survive_binary_encoding() {
        let transcoder = Transcoder {
            deactivation_round: Some(12),
            service_uri: Some("https://orchestrator:8935".into()),
            total_stake: "1234.000000000000000001".parse().unwrap(),
            ..Transcoder::new("0xaa")
        };

        let bytes = transcoder.encode_value().unwrap();
        assert_eq!(Transcoder::decode_value(&bytes).unwrap(), transcoder);
    }
}
