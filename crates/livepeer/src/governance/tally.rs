use bondgraph_core::StateStore;
use tracing::debug;

use crate::{
    context::Ctx,
    decimal::Decimal,
    model::{Poll, PollTally, Vote, VoteChoice},
    reader::ContractReader,
    HandlerError,
};

/// Sums the effective weight of each vote into its choice.
pub fn sum_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> (Decimal, Decimal) {
    let mut yes = Decimal::zero();
    let mut no = Decimal::zero();

    for vote in votes {
        match vote.choice {
            VoteChoice::Yes => yes += vote.effective_weight(),
            VoteChoice::No => no += vote.effective_weight(),
            VoteChoice::Unset => (),
        }
    }

    (yes, no)
}

/// Recomputes a poll tally from every vote cast in it.
pub fn tally_votes<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    poll: &Poll,
) -> Result<PollTally, HandlerError> {
    let mut votes = Vec::with_capacity(poll.votes.len());

    for id in &poll.votes {
        votes.push(ctx.require::<Vote>(id)?);
    }

    let (yes, no) = sum_votes(&votes);

    let tally = PollTally {
        id: poll.id.clone(),
        yes,
        no,
    };

    debug!(poll = %poll.id, yes = %tally.yes, no = %tally.no, "poll tallied");

    ctx.save(&tally)?;

    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(choice: VoteChoice, stake: u64, overridden: u64, registered: bool) -> Vote {
        Vote {
            choice,
            vote_stake: Decimal::from(stake),
            non_vote_stake: Decimal::from(overridden),
            registered_transcoder: registered,
            ..Default::default()
        }
    }

    #[test]
    fn overrides_reduce_registered_delegates() {
        let votes = [
            vote(VoteChoice::Yes, 1_000, 300, true),
            vote(VoteChoice::No, 300, 0, false),
        ];

        let (yes, no) = sum_votes(&votes);

        assert_eq!(yes, Decimal::from(700u64));
        assert_eq!(no, Decimal::from(300u64));
    }

    #[test]
    fn placeholders_count_for_nothing() {
        let votes = [
            vote(VoteChoice::Unset, 0, 500, true),
            vote(VoteChoice::No, 200, 50, false),
        ];

        let (yes, no) = sum_votes(&votes);

        assert!(yes.is_zero());
        assert_eq!(no, Decimal::from(200u64));
    }
}
