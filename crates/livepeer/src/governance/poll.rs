use bondgraph_core::{Address, StateStore, U256};
use tracing::{debug, error};

use crate::{
    context::Ctx,
    decimal::saturating_u64,
    history::EventDetail,
    ids,
    model::{Delegator, Poll, Vote, VoteChoice},
    reader::ContractReader,
    HandlerError,
};

use super::{delegate_vote, pending_stake, tally_votes};

pub fn poll_created<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    poll: &Address,
    proposal: &str,
    end_block: u64,
    quorum: u64,
    quota: u64,
) -> Result<(), HandlerError> {
    let round = ctx.current_round()?;

    let created = Poll {
        id: ids::address_id(poll),
        proposal: proposal.to_string(),
        end_block,
        quorum,
        quota,
        votes: vec![],
    };

    ctx.save(&created)?;

    debug!(%poll, end_block, "poll created");

    ctx.record(
        round.id,
        EventDetail::PollCreated {
            poll: *poll,
            proposal: proposal.to_string(),
            end_block,
            quorum,
            quota,
        },
    )?;

    Ok(())
}

/// Applies a vote cast at the poll contract that emitted the log.
pub fn vote<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    voter: &Address,
    choice_id: &U256,
) -> Result<(), HandlerError> {
    let Some(choice) = VoteChoice::from_choice_id(choice_id) else {
        debug!(%voter, %choice_id, "ignoring non-binary vote");
        return Ok(());
    };

    let round = ctx.current_round()?;
    let poll_address = ctx.envelope.address;
    let poll_id = ids::address_id(&poll_address);

    let Some(mut poll) = ctx.load::<Poll>(&poll_id)? else {
        error!(poll = %poll_id, %voter, "vote for an unknown poll, dropping");
        return Ok(());
    };

    let voter_id = ids::address_id(voter);
    let vote_id = ids::vote_id(&voter_id, &poll.id);

    let mut vote = ctx
        .load::<Vote>(&vote_id)?
        .unwrap_or_else(|| Vote::new(vote_id.clone(), &voter_id));

    let first_vote = !vote.choice.is_cast();
    vote.choice = choice;

    if first_vote {
        vote.voter = voter_id.clone();
        vote.poll = Some(poll.id.clone());

        poll.votes.push(vote_id);
        ctx.save(&poll)?;

        let delegation = ctx
            .load::<Delegator>(&voter_id)?
            .and_then(|x| x.delegate.clone().map(|delegate| (x, delegate)));

        if let Some((delegator, delegate_id)) = delegation {
            let delegate = ctx.transcoder_by_id(&delegate_id)?;

            if delegate_id == voter_id {
                vote.vote_stake = delegate.total_stake.clone();
                vote.registered_transcoder = true;
            } else {
                let stake = pending_stake(ctx, voter, round.id)
                    .unwrap_or_else(|| delegator.bonded_amount.clone());

                vote.vote_stake = stake.clone();
                vote.registered_transcoder = false;

                let mut overridden = delegate_vote(ctx, &poll.id, &delegate)?;
                overridden.non_vote_stake += &stake;
                ctx.save(&overridden)?;
            }
        }

        ctx.watch(&poll.id, *voter)?;
    }

    ctx.save(&vote)?;
    tally_votes(ctx, &poll)?;

    debug!(poll = %poll.id, %voter, ?choice, first_vote, "vote applied");

    ctx.record(
        round.id,
        EventDetail::Vote {
            voter: *voter,
            poll: poll_address,
            choice_id: saturating_u64(choice_id),
        },
    )?;

    Ok(())
}
