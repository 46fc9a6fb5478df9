//! Event routing and the engine that applies envelopes to a store.
//!
//! Each envelope is applied inside its own [`StateBatch`]: the static handler
//! for the log runs first, then every poll watch subscribed to the log's
//! kind. The batch commits together with the new cursor, so an envelope is
//! either fully applied or not at all.

use std::collections::BTreeMap;

use bondgraph_core::{LogPosition, StateBatch, StateStore};
use tracing::{debug, error, info};

use crate::{
    config::NetworkConfig,
    context::{Ctx, CtxSavepoint, WatchChanges},
    controller,
    decimal::saturating_u64,
    events::{
        BondingManagerEvent, ControllerEvent, Envelope, Event, MigratorEvent, MinterEvent,
        PollCreatorEvent, PollEvent, RoundsManagerEvent, ServiceRegistryEvent, TicketBrokerEvent,
        TokenEvent, TreasuryEvent, WatchedEvent,
    },
    governance::{poll, treasury, watch},
    migrator, minter,
    model::{PollWatch, Protocol, PROTOCOL_KEY},
    reader::{CallResultExt as _, ContractReader},
    rounds, services, staking, tickets, token, EngineError, HandlerError,
};

/// Routes a log to the handler of its contract and event.
pub fn route<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    event: &Event,
) -> Result<(), HandlerError> {
    match event {
        Event::BondingManager(x) => match x {
            BondingManagerEvent::Bond {
                new_delegate,
                old_delegate,
                delegator,
                additional_amount,
                bonded_amount,
            } => staking::bond(
                ctx,
                new_delegate,
                old_delegate,
                delegator,
                additional_amount,
                bonded_amount,
            ),
            BondingManagerEvent::Unbond {
                delegate,
                delegator,
                unbonding_lock_id,
                amount,
                withdraw_round,
            } => staking::unbond(
                ctx,
                delegate,
                delegator,
                saturating_u64(unbonding_lock_id),
                amount,
                saturating_u64(withdraw_round),
            ),
            BondingManagerEvent::Rebond {
                delegate,
                delegator,
                unbonding_lock_id,
                amount,
            } => staking::rebond(
                ctx,
                delegate,
                delegator,
                saturating_u64(unbonding_lock_id),
                amount,
            ),
            BondingManagerEvent::TransferBond {
                old_delegator,
                new_delegator,
                old_unbonding_lock_id,
                new_unbonding_lock_id,
                amount,
            } => staking::transfer_bond(
                ctx,
                old_delegator,
                new_delegator,
                saturating_u64(old_unbonding_lock_id),
                saturating_u64(new_unbonding_lock_id),
                amount,
            ),
            BondingManagerEvent::WithdrawStake {
                delegator,
                unbonding_lock_id,
                amount,
                ..
            } => staking::withdraw_stake(
                ctx,
                delegator,
                saturating_u64(unbonding_lock_id),
                amount,
            ),
            BondingManagerEvent::WithdrawFees {
                delegator,
                recipient,
                amount,
            } => staking::withdraw_fees(ctx, delegator, recipient, amount),
            BondingManagerEvent::ParameterUpdate { param } => staking::parameter_update(ctx, param),
            BondingManagerEvent::Reward { transcoder, amount } => {
                staking::reward(ctx, transcoder, amount)
            }
            BondingManagerEvent::TranscoderSlashed {
                transcoder,
                finder,
                penalty,
                finder_reward,
            } => staking::transcoder_slashed(ctx, transcoder, finder, penalty, finder_reward),
            BondingManagerEvent::TranscoderUpdate {
                transcoder,
                reward_cut,
                fee_share,
            } => staking::transcoder_update(
                ctx,
                transcoder,
                saturating_u64(reward_cut),
                saturating_u64(fee_share),
            ),
            BondingManagerEvent::TranscoderActivated {
                transcoder,
                activation_round,
            } => {
                staking::transcoder_activated(ctx, transcoder, saturating_u64(activation_round))
            }
            BondingManagerEvent::TranscoderDeactivated {
                transcoder,
                deactivation_round,
            } => staking::transcoder_deactivated(
                ctx,
                transcoder,
                saturating_u64(deactivation_round),
            ),
            BondingManagerEvent::EarningsClaimed {
                delegate,
                delegator,
                rewards,
                fees,
                start_round,
                end_round,
            } => staking::earnings_claimed(
                ctx,
                delegate,
                delegator,
                rewards,
                fees,
                saturating_u64(start_round),
                saturating_u64(end_round),
            ),
        },
        Event::RoundsManager(x) => match x {
            RoundsManagerEvent::NewRound { round, block_hash } => {
                rounds::new_round(ctx, saturating_u64(round), *block_hash)
            }
            RoundsManagerEvent::ParameterUpdate { param } => rounds::parameter_update(ctx, param),
        },
        Event::Minter(x) => match x {
            MinterEvent::SetCurrentRewardTokens {
                current_mintable_tokens,
                current_inflation,
            } => minter::set_current_reward_tokens(ctx, current_mintable_tokens, current_inflation),
            MinterEvent::ParameterUpdate { param } => minter::parameter_update(ctx, param),
        },
        Event::LivepeerToken(x) => match x {
            TokenEvent::Mint { to, amount } => token::mint(ctx, to, amount),
            TokenEvent::Burn { value, .. } => token::burn(ctx, value),
        },
        Event::TicketBroker(x) => match x {
            TicketBrokerEvent::WinningTicketRedeemed {
                sender,
                recipient,
                face_value,
                win_prob,
                sender_nonce,
                recipient_rand,
                aux_data,
            } => tickets::winning_ticket_redeemed(
                ctx,
                sender,
                recipient,
                face_value,
                win_prob,
                sender_nonce,
                recipient_rand,
                aux_data,
            ),
            TicketBrokerEvent::DepositFunded { sender, amount } => {
                tickets::deposit_funded(ctx, sender, amount)
            }
            TicketBrokerEvent::ReserveFunded {
                reserve_holder,
                amount,
            } => tickets::reserve_funded(ctx, reserve_holder, amount),
            TicketBrokerEvent::ReserveClaimed {
                reserve_holder,
                claimant,
                amount,
            } => tickets::reserve_claimed(ctx, reserve_holder, claimant, amount),
            TicketBrokerEvent::Withdrawal {
                sender,
                deposit,
                reserve,
            } => tickets::withdrawal(ctx, sender, deposit, reserve),
        },
        Event::PollCreator(PollCreatorEvent::PollCreated {
            poll,
            proposal,
            end_block,
            quorum,
            quota,
        }) => poll::poll_created(
            ctx,
            poll,
            proposal,
            saturating_u64(end_block),
            saturating_u64(quorum),
            saturating_u64(quota),
        ),
        Event::Poll(PollEvent::Vote { voter, choice_id }) => poll::vote(ctx, voter, choice_id),
        Event::Controller(x) => controller::set_paused(ctx, matches!(x, ControllerEvent::Pause)),
        Event::ServiceRegistry(ServiceRegistryEvent::ServiceUriUpdate { addr, service_uri }) => {
            services::service_uri_update(ctx, addr, service_uri)
        }
        Event::L2Migrator(x) => match x {
            MigratorEvent::MigrateDelegatorFinalized {
                l1_addr,
                l2_addr,
                stake,
                delegated_stake,
                fees,
                delegate,
            } => migrator::migrate_delegator_finalized(
                ctx,
                l1_addr,
                l2_addr,
                stake,
                delegated_stake,
                fees,
                delegate,
            ),
            MigratorEvent::StakeClaimed {
                delegator,
                delegate,
                stake,
                fees,
            } => migrator::stake_claimed(ctx, delegator, delegate, stake, fees),
        },
        Event::Treasury(x) => match x {
            TreasuryEvent::ProposalCreated {
                proposal_id,
                proposer,
                targets,
                values,
                calldatas,
                vote_start,
                vote_end,
                description,
            } => treasury::proposal_created(
                ctx,
                proposal_id,
                proposer,
                targets,
                values,
                calldatas,
                saturating_u64(vote_start),
                saturating_u64(vote_end),
                description,
            ),
            TreasuryEvent::VoteCast {
                voter,
                proposal_id,
                support,
                weight,
                reason,
            }
            | TreasuryEvent::VoteCastWithParams {
                voter,
                proposal_id,
                support,
                weight,
                reason,
                ..
            } => treasury::vote_cast(ctx, voter, proposal_id, *support, weight, reason),
        },
    }
}

/// Poll watches by the bonding manager log kinds they react to, each list in
/// registration order.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    by_kind: BTreeMap<WatchedEvent, Vec<PollWatch>>,
    next_seq: u64,
}

impl WatchRegistry {
    pub fn register(&mut self, watch: PollWatch) {
        self.next_seq = self.next_seq.max(watch.seq + 1);

        for kind in WatchedEvent::ALL {
            self.by_kind.entry(kind).or_default().push(watch.clone());
        }
    }

    pub fn close(&mut self, seq: u64) {
        for watches in self.by_kind.values_mut() {
            watches.retain(|x| x.seq != seq);
        }
    }

    pub fn for_event(&self, kind: WatchedEvent) -> &[PollWatch] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.by_kind
            .get(&WatchedEvent::Bond)
            .map(Vec::len)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply(&mut self, changes: WatchChanges) {
        for seq in changes.closed {
            self.close(seq);
        }

        for watch in changes.added {
            self.register(watch);
        }

        self.next_seq = self.next_seq.max(changes.next_seq);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The envelope was at or behind the cursor.
    Skipped,

    /// The envelope was committed; `aborted` handlers had their writes
    /// discarded after breaking an invariant.
    Applied { aborted: usize },
}

pub struct Engine<S: StateStore, R: ContractReader> {
    store: S,
    reader: R,
    network: NetworkConfig,
    registry: WatchRegistry,
    cursor: Option<LogPosition>,
}

impl<S: StateStore, R: ContractReader> Engine<S, R> {
    /// Opens an engine over a store, restoring the cursor and the poll watches
    /// persisted by earlier runs.
    pub fn new(store: S, reader: R, network: NetworkConfig) -> Result<Self, EngineError> {
        let cursor = store.read_cursor()?;

        let mut registry = WatchRegistry::default();

        for entry in store.iter_entities_typed::<PollWatch>(b"")? {
            let (_, watch) = entry?;
            registry.register(watch);
        }

        info!(?cursor, watches = registry.len(), network = %network.name, "engine ready");

        Ok(Self {
            store,
            reader,
            network,
            registry,
            cursor,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn into_reader(self) -> R {
        self.reader
    }

    pub fn cursor(&self) -> Option<LogPosition> {
        self.cursor
    }

    pub fn watches(&self) -> &WatchRegistry {
        &self.registry
    }

    fn genesis_protocol(&mut self) -> Protocol {
        info!("initializing protocol");

        Protocol {
            round_length: self.reader.round_length().or_fallback("roundLength", 0),
            delegators_count: self.network.initial_delegators_count,
            ..Default::default()
        }
    }

    pub fn process(&mut self, envelope: &Envelope) -> Result<Outcome, EngineError> {
        let position = envelope.position();

        if self.cursor.is_some_and(|x| position <= x) {
            debug!(%position, "already applied, skipping");
            return Ok(Outcome::Skipped);
        }

        self.reader.seek(position);

        let mut batch = StateBatch::new(self.store.clone());

        let mut protocol = match batch.load::<Protocol>(PROTOCOL_KEY)? {
            Some(x) => x,
            None => self.genesis_protocol(),
        };

        let mut ctx = Ctx::new(
            &mut batch,
            &mut self.reader,
            &mut protocol,
            &self.network,
            envelope,
            self.registry.next_seq(),
        );

        let mut aborted = 0;

        let savepoint = ctx.savepoint();

        if let Err(err) = route(&mut ctx, &envelope.event) {
            settle(&mut ctx, savepoint, err)?;
            aborted += 1;
        }

        let watched = envelope
            .event
            .watched()
            .filter(|_| self.network.is_bonding_manager(&envelope.address));

        if let (Some(kind), Event::BondingManager(event)) = (watched, &envelope.event) {
            for watch in self.registry.for_event(kind) {
                let savepoint = ctx.savepoint();

                if let Err(err) = watch::apply(&mut ctx, watch, event) {
                    settle(&mut ctx, savepoint, err)?;
                    aborted += 1;
                }
            }
        }

        let changes = std::mem::take(&mut ctx.watches);

        batch.save(PROTOCOL_KEY, &protocol)?;
        batch.commit(Some(position))?;

        self.cursor = Some(position);
        self.registry.apply(changes);

        debug!(%position, event = envelope.event.name(), aborted, "envelope applied");

        Ok(Outcome::Applied { aborted })
    }
}

/// Discards the writes of a handler that broke an invariant; store failures
/// stay fatal.
fn settle<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    savepoint: CtxSavepoint,
    err: HandlerError,
) -> Result<(), EngineError> {
    match err {
        HandlerError::State(err) => Err(EngineError::State(err)),
        HandlerError::BrokenInvariant(err) => {
            error!(
                %err,
                position = %ctx.envelope.position(),
                event = ctx.envelope.event.name(),
                "handler aborted, discarding its writes"
            );

            ctx.restore(savepoint);

            Ok(())
        }
    }
}
