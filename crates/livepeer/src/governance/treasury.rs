use bondgraph_core::{Address, StateStore, U256};
use tracing::{debug, error};

use crate::{
    context::Ctx,
    decimal::Decimal,
    history::EventDetail,
    ids,
    model::{TreasuryProposal, TreasurySupport, TreasuryVote},
    reader::ContractReader,
    HandlerError,
};

#[allow(clippy::too_many_arguments)]
pub fn proposal_created<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    proposal_id: &U256,
    proposer: &Address,
    targets: &[Address],
    values: &[U256],
    calldatas: &[String],
    vote_start: u64,
    vote_end: u64,
    description: &str,
) -> Result<(), HandlerError> {
    let id = proposal_id.to_string();

    ctx.account(proposer)?;
    let round = ctx.current_round()?;

    // totals of a proposal already seen are kept
    let mut proposal = ctx.load::<TreasuryProposal>(&id)?.unwrap_or_default();

    proposal.id = id.clone();
    proposal.proposer = ids::address_id(proposer);
    proposal.targets = targets.iter().map(ids::address_id).collect();
    proposal.values = values.iter().map(|x| x.to_string()).collect();
    proposal.calldatas = calldatas.to_vec();
    proposal.vote_start = vote_start;
    proposal.vote_end = vote_end;
    proposal.description = description.to_string();

    ctx.save(&proposal)?;

    debug!(proposal = %id, %proposer, vote_end, "treasury proposal created");

    ctx.record(
        round.id,
        EventDetail::TreasuryProposalCreated {
            proposal: id,
            proposer: *proposer,
        },
    )?;

    Ok(())
}

/// Handles both `VoteCast` and `VoteCastWithParams`; the params don't affect
/// the tally.
pub fn vote_cast<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    voter: &Address,
    proposal_id: &U256,
    support: u8,
    weight: &U256,
    reason: &str,
) -> Result<(), HandlerError> {
    let id = proposal_id.to_string();

    let Some(mut proposal) = ctx.load::<TreasuryProposal>(&id)? else {
        error!(proposal = %id, %voter, "treasury vote for an unknown proposal, dropping");
        return Ok(());
    };

    let Some(support) = TreasurySupport::from_value(support) else {
        debug!(proposal = %id, support, "ignoring unknown vote support");
        return Ok(());
    };

    ctx.account(voter)?;
    let round = ctx.current_round()?;

    let weight = Decimal::from_wei(weight);
    let vote_id = ids::treasury_vote_id(&id, voter);

    if let Some(prior) = ctx.load::<TreasuryVote>(&vote_id)? {
        debug!(vote = %vote_id, "replacing prior treasury vote");
        proposal.remove_votes(prior.support, &prior.weight);
    }

    let reason = (!reason.is_empty()).then(|| reason.to_string());

    let vote = TreasuryVote {
        id: vote_id,
        proposal: id.clone(),
        voter: ids::address_id(voter),
        support,
        weight: weight.clone(),
        reason: reason.clone(),
    };

    proposal.add_votes(support, &weight);

    ctx.save(&vote)?;
    ctx.save(&proposal)?;

    ctx.record(
        round.id,
        EventDetail::TreasuryVote {
            proposal: id,
            voter: *voter,
            support,
            weight,
            reason,
        },
    )?;

    Ok(())
}
