//! Token supply tracking from mint and burn logs.

use bondgraph_core::{Address, StateError, StateStore, U256};
use tracing::debug;

use crate::{
    context::Ctx,
    decimal::Decimal,
    history::EventDetail,
    model::Round,
    reader::ContractReader,
    HandlerError,
};

/// Applies a supply change to the protocol and snapshots it into the current
/// day and round.
fn apply_supply<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    total_supply: Decimal,
) -> Result<Round, StateError> {
    let mut round = ctx.current_round()?;
    let mut day = ctx.day()?;

    let protocol = &mut *ctx.protocol;
    protocol.total_supply = total_supply;

    day.total_supply = protocol.total_supply.clone();
    day.total_active_stake = protocol.total_active_stake.clone();

    if protocol.refresh_participation_rate() {
        day.participation_rate = protocol.participation_rate.clone();
    }

    round.total_supply = protocol.total_supply.clone();
    round.participation_rate = protocol.participation_rate.clone();

    debug!(total_supply = %protocol.total_supply, "supply changed");

    ctx.save(&round)?;
    ctx.save(&day)?;

    Ok(round)
}

pub fn mint<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    to: &Address,
    amount: &U256,
) -> Result<(), HandlerError> {
    let amount = Decimal::from_wei(amount);
    let supply = ctx.protocol.total_supply.clone() + &amount;

    let round = apply_supply(ctx, supply)?;

    ctx.record(round.id, EventDetail::Mint { to: *to, amount })?;

    Ok(())
}

pub fn burn<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    value: &U256,
) -> Result<(), HandlerError> {
    let value = Decimal::from_wei(value);
    let supply = ctx.protocol.total_supply.clone() - &value;

    let round = apply_supply(ctx, supply)?;

    ctx.record(round.id, EventDetail::Burn { value })?;

    Ok(())
}
