use bondgraph_core::{StateStore, U256};
use tracing::debug;

use crate::{
    context::Ctx,
    decimal::Decimal,
    history::EventDetail,
    reader::{CallResultExt as _, ContractReader},
    HandlerError,
};

pub fn set_current_reward_tokens<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    current_mintable_tokens: &U256,
    current_inflation: &U256,
) -> Result<(), HandlerError> {
    let mintable = Decimal::from_wei(current_mintable_tokens);

    if let Some(x) = ctx.reader.target_bonding_rate().available("targetBondingRate") {
        ctx.protocol.target_bonding_rate = x;
    }

    if let Some(x) = ctx.reader.inflation_change().available("inflationChange") {
        ctx.protocol.inflation_change = x;
    }

    if let Some(x) = ctx.reader.inflation().available("inflation") {
        ctx.protocol.inflation = x;
    }

    let mut round = ctx.current_round()?;
    round.mintable_tokens = mintable.clone();
    ctx.save(&round)?;

    debug!(round = round.id, %mintable, "mintable tokens set");

    ctx.record(
        round.id,
        EventDetail::SetCurrentRewardTokens {
            current_mintable_tokens: mintable,
            current_inflation: current_inflation.to_string(),
        },
    )?;

    Ok(())
}

pub fn parameter_update<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    param: &str,
) -> Result<(), HandlerError> {
    let round = ctx.current_round()?;

    match param {
        "targetBondingRate" => {
            if let Some(x) = ctx.reader.target_bonding_rate().available("targetBondingRate") {
                ctx.protocol.target_bonding_rate = x;
            }
        }
        "inflationChange" => {
            if let Some(x) = ctx.reader.inflation_change().available("inflationChange") {
                ctx.protocol.inflation_change = x;
            }
        }
        other => debug!(param = other, "ignoring minter parameter"),
    }

    ctx.record(
        round.id,
        EventDetail::ParameterUpdate {
            param: param.to_string(),
        },
    )?;

    Ok(())
}
