//! L1 to L2 stake migration. Migrated stake reaches the projection through the
//! bonding manager logs emitted alongside, so these only leave history.

use bondgraph_core::{Address, StateStore, U256};

use crate::{
    context::Ctx, decimal::Decimal, history::EventDetail, reader::ContractReader, HandlerError,
};

pub fn migrate_delegator_finalized<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    l1_addr: &Address,
    l2_addr: &Address,
    stake: &U256,
    delegated_stake: &U256,
    fees: &U256,
    delegate: &Address,
) -> Result<(), HandlerError> {
    let round = ctx.current_round()?;

    ctx.record(
        round.id,
        EventDetail::MigrateDelegatorFinalized {
            l1_addr: *l1_addr,
            l2_addr: *l2_addr,
            stake: Decimal::from_wei(stake),
            delegated_stake: Decimal::from_wei(delegated_stake),
            fees: Decimal::from_wei(fees),
            delegate: *delegate,
        },
    )?;

    Ok(())
}

pub fn stake_claimed<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    delegator: &Address,
    delegate: &Address,
    stake: &U256,
    fees: &U256,
) -> Result<(), HandlerError> {
    let round = ctx.current_round()?;

    ctx.record(
        round.id,
        EventDetail::StakeClaimed {
            delegator: *delegator,
            delegate: *delegate,
            stake: Decimal::from_wei(stake),
            fees: Decimal::from_wei(fees),
        },
    )?;

    Ok(())
}
