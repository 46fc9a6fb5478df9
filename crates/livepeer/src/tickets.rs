//! Probabilistic micropayment settlement: broadcaster balances and the fee
//! volumes redeemed winning tickets add to transcoders, rounds and days.

use bondgraph_core::{Address, StateStore, U256};
use tracing::debug;

use crate::{
    context::Ctx,
    decimal::Decimal,
    history::EventDetail,
    ids,
    model::Pool,
    price,
    reader::ContractReader,
    HandlerError,
};

#[allow(clippy::too_many_arguments)]
pub fn winning_ticket_redeemed<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    sender: &Address,
    recipient: &Address,
    face_value: &U256,
    win_prob: &U256,
    sender_nonce: &U256,
    recipient_rand: &U256,
    aux_data: &str,
) -> Result<(), HandlerError> {
    let face_value = Decimal::from_wei(face_value);
    let eth_price = price::price_for_pair(&mut *ctx.reader, ctx.network.dai_eth_pool.as_ref());
    let face_value_usd = &face_value * &eth_price;

    let mut round = ctx.current_round()?;
    let mut day = ctx.day()?;

    let mut broadcaster = ctx.broadcaster(sender)?;

    if face_value > broadcaster.deposit {
        broadcaster.deposit = Decimal::zero();
    } else {
        broadcaster.deposit -= &face_value;
    }

    broadcaster.total_volume_eth += &face_value;
    broadcaster.total_volume_usd += &face_value_usd;

    let mut broadcaster_day = ctx.broadcaster_day(&mut broadcaster)?;
    broadcaster_day.volume_eth += &face_value;
    broadcaster_day.volume_usd += &face_value_usd;

    ctx.save(&broadcaster_day)?;
    ctx.save(&broadcaster)?;

    let mut transcoder = ctx.transcoder(recipient)?;
    transcoder.total_volume_eth += &face_value;
    transcoder.total_volume_usd += &face_value_usd;

    let mut transcoder_day = ctx.transcoder_day(&mut transcoder)?;
    transcoder_day.volume_eth += &face_value;
    transcoder_day.volume_usd += &face_value_usd;

    ctx.save(&transcoder_day)?;
    ctx.save(&transcoder)?;

    let protocol = &mut *ctx.protocol;
    protocol.total_volume_eth += &face_value;
    protocol.total_volume_usd += &face_value_usd;
    protocol.winning_ticket_count += 1;

    day.total_supply = protocol.total_supply.clone();
    day.total_active_stake = protocol.total_active_stake.clone();
    day.participation_rate = protocol.participation_rate.clone();
    day.volume_eth += &face_value;
    day.volume_usd += &face_value_usd;
    ctx.save(&day)?;

    round.volume_eth += &face_value;
    round.volume_usd += &face_value_usd;
    ctx.save(&round)?;

    let pool_key = ids::pool_id(recipient, round.id);

    match ctx.load::<Pool>(&pool_key)? {
        Some(mut pool) => {
            pool.fees += &face_value;
            ctx.save(&pool)?;
        }
        None => debug!(pool = %pool_key, "no pool snapshot for ticket fees"),
    }

    debug!(%sender, %recipient, %face_value, "winning ticket redeemed");

    ctx.record(
        round.id,
        EventDetail::WinningTicketRedeemed {
            sender: *sender,
            recipient: *recipient,
            face_value,
            face_value_usd,
            win_prob: win_prob.to_string(),
            sender_nonce: sender_nonce.to_string(),
            recipient_rand: recipient_rand.to_string(),
            aux_data: aux_data.to_string(),
        },
    )?;

    Ok(())
}

pub fn deposit_funded<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    sender: &Address,
    amount: &U256,
) -> Result<(), HandlerError> {
    let amount = Decimal::from_wei(amount);

    let round = ctx.current_round()?;
    let mut broadcaster = ctx.broadcaster(sender)?;

    broadcaster.deposit += &amount;
    ctx.save(&broadcaster)?;

    ctx.record(
        round.id,
        EventDetail::DepositFunded {
            sender: *sender,
            amount,
        },
    )?;

    Ok(())
}

pub fn reserve_funded<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    reserve_holder: &Address,
    amount: &U256,
) -> Result<(), HandlerError> {
    let amount = Decimal::from_wei(amount);

    let round = ctx.current_round()?;
    let mut broadcaster = ctx.broadcaster(reserve_holder)?;

    broadcaster.reserve += &amount;
    ctx.save(&broadcaster)?;

    ctx.record(
        round.id,
        EventDetail::ReserveFunded {
            reserve_holder: *reserve_holder,
            amount,
        },
    )?;

    Ok(())
}

pub fn reserve_claimed<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    reserve_holder: &Address,
    claimant: &Address,
    amount: &U256,
) -> Result<(), HandlerError> {
    let amount = Decimal::from_wei(amount);

    let round = ctx.current_round()?;
    let mut broadcaster = ctx.broadcaster(reserve_holder)?;

    broadcaster.reserve -= &amount;
    ctx.save(&broadcaster)?;

    ctx.record(
        round.id,
        EventDetail::ReserveClaimed {
            reserve_holder: *reserve_holder,
            claimant: *claimant,
            amount,
        },
    )?;

    Ok(())
}

pub fn withdrawal<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    sender: &Address,
    deposit: &U256,
    reserve: &U256,
) -> Result<(), HandlerError> {
    let round = ctx.current_round()?;
    let mut broadcaster = ctx.broadcaster(sender)?;

    broadcaster.deposit = Decimal::zero();
    broadcaster.reserve = Decimal::zero();
    ctx.save(&broadcaster)?;

    ctx.record(
        round.id,
        EventDetail::Withdrawal {
            sender: *sender,
            deposit: Decimal::from_wei(deposit),
            reserve: Decimal::from_wei(reserve),
        },
    )?;

    Ok(())
}
