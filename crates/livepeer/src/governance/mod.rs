//! Governance tallies: binary stake-weighted polls whose tallies follow the
//! voters' later stake movements, and treasury proposals with fixed weights.

use bondgraph_core::{Address, StateError, StateStore};

use crate::{
    context::Ctx,
    decimal::Decimal,
    ids,
    model::{Transcoder, Vote},
    reader::{CallResultExt as _, ContractReader},
};

pub mod poll;
pub mod tally;
pub mod treasury;
pub mod watch;

pub use tally::tally_votes;

fn pending_stake<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    address: &Address,
    round: u64,
) -> Option<Decimal> {
    ctx.reader
        .pending_stake(address, round)
        .available("pendingStake")
        .map(|x| Decimal::from_wei(&x))
}

/// Loads the delegate's vote in a poll, or a placeholder that only carries
/// the stake of delegators voting on their own.
fn delegate_vote<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    poll: &str,
    delegate: &Transcoder,
) -> Result<Vote, StateError> {
    let id = ids::vote_id(&delegate.id, poll);

    let mut vote = ctx.load::<Vote>(&id)?.unwrap_or_else(|| Vote {
        poll: Some(poll.to_string()),
        ..Vote::new(id, &delegate.id)
    });

    vote.voter = delegate.id.clone();
    vote.registered_transcoder = delegate.is_registered();

    Ok(vote)
}
