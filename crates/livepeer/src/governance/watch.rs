//! Tally maintenance for stake movements of voters in open polls.
//!
//! A watch is created on a voter's first vote and runs after the static
//! handler of every bonding manager log it subscribes to, so the stake figures
//! it reads are already up to date. Once the poll's end block is behind, the
//! watch is dropped.

use bondgraph_core::{Address, StateStore, U256};
use tracing::{debug, error};

use crate::{
    context::Ctx,
    decimal::Decimal,
    events::BondingManagerEvent,
    ids,
    model::{Delegator, Poll, PollWatch, Vote},
    reader::ContractReader,
    HandlerError,
};

use super::{delegate_vote, pending_stake, tally_votes};

/// Runs a watch against a bonding manager log, re-tallying the poll when any
/// vote it counts was touched.
pub fn apply<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    watch: &PollWatch,
    event: &BondingManagerEvent,
) -> Result<(), HandlerError> {
    let Some(poll) = ctx.load::<Poll>(&watch.poll)? else {
        error!(poll = %watch.poll, voter = %watch.voter, "watch over an unknown poll, dropping it");
        ctx.unwatch(watch);
        return Ok(());
    };

    if poll.is_closed_at(ctx.envelope.block.number) {
        debug!(poll = %poll.id, voter = %watch.voter, "poll closed, dropping watch");
        ctx.unwatch(watch);
        return Ok(());
    }

    let voter = &watch.voter;

    let touched = match event {
        BondingManagerEvent::Bond {
            new_delegate,
            old_delegate,
            delegator,
            additional_amount,
            bonded_amount,
        } => on_bond(
            ctx,
            &poll,
            voter,
            new_delegate,
            old_delegate,
            delegator,
            additional_amount,
            bonded_amount,
        )?,
        BondingManagerEvent::Unbond {
            delegate,
            delegator,
            ..
        }
        | BondingManagerEvent::Rebond {
            delegate,
            delegator,
            ..
        } => on_stake_change(ctx, &poll, voter, delegate, delegator)?,
        BondingManagerEvent::Reward { transcoder, .. } => on_reward(ctx, &poll, voter, transcoder)?,
        _ => false,
    };

    if touched {
        tally_votes(ctx, &poll)?;
    }

    Ok(())
}

fn voter_vote<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    poll: &Poll,
    voter: &Address,
) -> Result<Vote, HandlerError> {
    ctx.require::<Vote>(&ids::vote_id(&ids::address_id(voter), &poll.id))
}

#[allow(clippy::too_many_arguments)]
fn on_bond<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    poll: &Poll,
    voter: &Address,
    new_delegate: &Address,
    old_delegate: &Address,
    delegator: &Address,
    additional_amount: &U256,
    bonded_amount: &U256,
) -> Result<bool, HandlerError> {
    let switching = bonded_amount > additional_amount && old_delegate != new_delegate;
    let bonded = Decimal::from_wei(bonded_amount);
    let additional = Decimal::from_wei(additional_amount);

    let mut touched = false;

    let old_vote_id = ids::vote_id(&ids::address_id(old_delegate), &poll.id);

    if let Some(mut old_vote) = ctx.load::<Vote>(&old_vote_id)? {
        let old = ctx.transcoder(old_delegate)?;
        touched = true;

        old_vote.registered_transcoder = old.is_registered();

        if switching {
            if old_vote.choice.is_cast() {
                old_vote.vote_stake = old.total_stake.clone();
            }

            if voter == delegator {
                old_vote.non_vote_stake -= bonded.clone() - &additional;
            }
        }

        ctx.save(&old_vote)?;
    }

    let new_vote_id = ids::vote_id(&ids::address_id(new_delegate), &poll.id);
    let mut new_vote = ctx.load::<Vote>(&new_vote_id)?;
    let new = ctx.transcoder(new_delegate)?;

    if let Some(vote) = new_vote.as_mut() {
        touched = true;

        vote.registered_transcoder = new.is_registered();

        if vote.registered_transcoder && vote.choice.is_cast() {
            vote.vote_stake = new.total_stake.clone();
        }
    }

    if voter == delegator && voter != new_delegate {
        touched = true;

        let mut own = voter_vote(ctx, poll, voter)?;
        let mut overridden = match new_vote.take() {
            Some(x) => x,
            None => delegate_vote(ctx, &poll.id, &new)?,
        };

        if switching {
            overridden.non_vote_stake += &bonded;
        } else {
            overridden.non_vote_stake = overridden.non_vote_stake - &own.vote_stake + &bonded;
        }

        own.vote_stake = bonded;
        ctx.save(&own)?;

        new_vote = Some(overridden);
    }

    if let Some(vote) = new_vote {
        ctx.save(&vote)?;
    }

    Ok(touched)
}

/// Shared by unbond and rebond: both move stake between a delegator and its
/// current delegate.
fn on_stake_change<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    poll: &Poll,
    voter: &Address,
    delegate: &Address,
    delegator: &Address,
) -> Result<bool, HandlerError> {
    let round = ctx.current_round()?;

    let delegate_vote_id = ids::vote_id(&ids::address_id(delegate), &poll.id);
    let mut existing = ctx.load::<Vote>(&delegate_vote_id)?;
    let transcoder = ctx.transcoder(delegate)?;

    let mut touched = false;

    if let Some(vote) = existing.as_mut() {
        touched = true;

        vote.registered_transcoder = transcoder.is_registered();

        if vote.choice.is_cast() {
            if vote.registered_transcoder {
                vote.vote_stake = transcoder.total_stake.clone();
            } else if let Some(stake) = pending_stake(ctx, delegate, round.id) {
                vote.vote_stake = stake;
            }
        }
    }

    if voter == delegator && voter != delegate {
        touched = true;

        let stake = match pending_stake(ctx, voter, round.id) {
            Some(x) => x,
            None => ctx
                .load::<Delegator>(&ids::address_id(voter))?
                .map(|x| x.bonded_amount)
                .unwrap_or_default(),
        };

        let mut own = voter_vote(ctx, poll, voter)?;
        let mut overridden = match existing.take() {
            Some(x) => x,
            None => delegate_vote(ctx, &poll.id, &transcoder)?,
        };

        overridden.non_vote_stake = overridden.non_vote_stake - &own.vote_stake + &stake;
        own.vote_stake = stake;
        ctx.save(&own)?;

        existing = Some(overridden);
    }

    if let Some(vote) = existing {
        ctx.save(&vote)?;
    }

    Ok(touched)
}

fn on_reward<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    poll: &Poll,
    voter: &Address,
    transcoder: &Address,
) -> Result<bool, HandlerError> {
    let delegates_to_caller = ctx
        .load::<Delegator>(&ids::address_id(voter))?
        .and_then(|x| x.delegate)
        .is_some_and(|x| x == ids::address_id(transcoder));

    if !delegates_to_caller {
        return Ok(false);
    }

    let round = ctx.current_round()?;
    let rewarded = ctx.transcoder(transcoder)?;
    let mut own = voter_vote(ctx, poll, voter)?;

    if voter == transcoder {
        own.vote_stake = rewarded.total_stake.clone();
    } else {
        let stake = pending_stake(ctx, voter, round.id).unwrap_or_else(|| own.vote_stake.clone());

        let mut overridden = delegate_vote(ctx, &poll.id, &rewarded)?;
        overridden.non_vote_stake = overridden.non_vote_stake - &own.vote_stake + &stake;
        ctx.save(&overridden)?;

        own.vote_stake = stake;
    }

    ctx.save(&own)?;

    Ok(true)
}
