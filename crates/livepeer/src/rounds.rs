//! Round lifecycle: deriving the round of a block, creating round records and
//! initializing rounds at their boundary.

use std::collections::BTreeSet;

use bondgraph_core::{Address, StateError, StateStore, B256};
use tracing::{debug, info, warn};

use crate::{
    context::Ctx,
    days,
    decimal::Decimal,
    history::EventDetail,
    ids::{self, PERC_DIVISOR},
    model::{Broadcaster, Pool, Protocol, Round},
    price,
    reader::{CallResultExt as _, ContractReader},
    HandlerError,
};

/// Round number containing `block` under the protocol's current round length
/// schedule.
pub fn round_number(protocol: &Protocol, block: u64) -> u64 {
    if protocol.round_length == 0 {
        return protocol.last_round_length_update_round;
    }

    let elapsed = block.saturating_sub(protocol.last_round_length_update_start_block);

    protocol.last_round_length_update_round + elapsed / protocol.round_length
}

/// Creates a round record, snapshotting the protocol aggregates. An existing
/// record for the same number is returned untouched.
pub fn create_round<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    start_block: u64,
    length: u64,
    number: u64,
) -> Result<Round, StateError> {
    if let Some(existing) = ctx.load::<Round>(number.to_string())? {
        return Ok(existing);
    }

    let round = Round {
        id: number,
        start_block,
        end_block: start_block + length,
        length,
        initialized: false,
        total_active_stake: ctx.protocol.total_active_stake.clone(),
        total_supply: ctx.protocol.total_supply.clone(),
        participation_rate: ctx.protocol.participation_rate.clone(),
        ..Default::default()
    };

    info!(round = number, start_block, length, "round created");

    ctx.save(&round)?;

    Ok(round)
}

/// Returns the round containing `block`, creating it the first time it is
/// seen. Repeated calls within a round are idempotent.
pub fn load_or_create_round<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    block: u64,
) -> Result<Round, StateError> {
    let number = round_number(ctx.protocol, block);

    if let Some(existing) = ctx.load::<Round>(number.to_string())? {
        return Ok(existing);
    }

    let protocol = &mut *ctx.protocol;

    let since_update = number - protocol.last_round_length_update_round;
    let start_block =
        protocol.last_round_length_update_start_block + since_update * protocol.round_length;
    let length = protocol.round_length;

    protocol.round_count += 1;
    protocol.current_round = number;

    create_round(ctx, start_block, length, number)
}

impl<S: StateStore, R: ContractReader> Ctx<'_, S, R> {
    /// The round containing the rounds manager's current block.
    pub fn current_round(&mut self) -> Result<Round, StateError> {
        let block = self.block_num();
        load_or_create_round(self, block)
    }
}

/// Walks the active transcoder list until the sentinel. A revert mid-walk or
/// an address seen twice ends the walk early.
fn walk_transcoder_pool<S: StateStore, R: ContractReader>(ctx: &mut Ctx<'_, S, R>) -> Vec<Address> {
    let mut current = ctx
        .reader
        .get_first_transcoder_in_pool()
        .or_fallback("getFirstTranscoderInPool", Address::ZERO);

    let mut seen = BTreeSet::new();
    let mut walked = vec![];

    while !current.is_zero() {
        if !seen.insert(current) {
            warn!(transcoder = %current, "transcoder pool revisits an address, stopping walk");
            break;
        }

        walked.push(current);

        current = match ctx
            .reader
            .get_next_transcoder_in_pool(&current)
            .available("getNextTranscoderInPool")
        {
            Some(next) => next,
            None => break,
        };
    }

    walked
}

fn flush_pending_queues<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
) -> Result<(), StateError> {
    let timestamp = ctx.timestamp();

    for id in std::mem::take(&mut ctx.protocol.pending_activation) {
        let mut transcoder = ctx.transcoder_by_id(&id)?;
        transcoder.active = true;
        transcoder.activation_timestamp = timestamp;
        ctx.save(&transcoder)?;

        debug!(transcoder = %id, "activated");
    }

    for id in std::mem::take(&mut ctx.protocol.pending_deactivation) {
        let mut transcoder = ctx.transcoder_by_id(&id)?;
        transcoder.active = false;
        ctx.save(&transcoder)?;

        debug!(transcoder = %id, "deactivated");
    }

    Ok(())
}

fn refresh_broadcasters<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
) -> Result<(), StateError> {
    let today = ids::day_number(ctx.timestamp());
    let mut still_active = vec![];

    for id in ctx.protocol.active_broadcasters.clone() {
        let Some(mut broadcaster) = ctx.load::<Broadcaster>(&id)? else {
            continue;
        };

        ctx.refresh_broadcaster_windows(&mut broadcaster)?;
        ctx.save(&broadcaster)?;

        if broadcaster.last_active_day + days::ACTIVITY_WINDOW_DAYS >= today {
            still_active.push(id);
        } else {
            debug!(broadcaster = %id, "broadcaster went inactive");
        }
    }

    ctx.protocol.active_broadcasters = still_active;

    Ok(())
}

pub fn new_round<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    reported: u64,
    block_hash: B256,
) -> Result<(), HandlerError> {
    let mut round = ctx.current_round()?;
    let mut day = ctx.day()?;
    let timestamp = ctx.timestamp();

    if round.id != reported {
        warn!(derived = round.id, reported, "derived round differs from the reported one");
    }

    let total_active_stake = ctx
        .reader
        .get_total_bonded()
        .available("getTotalBonded")
        .map(|x| Decimal::from_wei(&x))
        .unwrap_or_default();

    flush_pending_queues(ctx)?;

    let walked = walk_transcoder_pool(ctx);

    for address in &walked {
        let mut transcoder = ctx.transcoder(address)?;

        let pool = Pool::snapshot(ids::pool_id(address, round.id), round.id, &transcoder);
        ctx.save(&pool)?;

        ctx.refresh_transcoder_windows(&mut transcoder)?;
        ctx.save(&transcoder)?;
    }

    refresh_broadcasters(ctx)?;

    let lpt_price = price::price_for_pair(&mut *ctx.reader, ctx.network.lpt_eth_pool.as_ref());

    let protocol = &mut *ctx.protocol;

    protocol.last_initialized_round = round.id;
    protocol.current_round = round.id;
    protocol.total_active_stake = total_active_stake.clone();
    protocol.active_transcoder_count = walked.len() as u64;
    protocol.lpt_price_eth = lpt_price;

    round.initialized = true;
    round.start_timestamp = timestamp;
    round.calendar = days::calendar_date(timestamp);
    round.total_active_stake = total_active_stake.clone();

    day.total_active_stake = total_active_stake;
    day.total_supply = protocol.total_supply.clone();

    if protocol.refresh_participation_rate() {
        round.participation_rate = protocol.participation_rate.clone();
        day.participation_rate = protocol.participation_rate.clone();
    }

    round.delegators_count = protocol.delegators_count;
    round.num_active_transcoders = protocol.num_active_transcoders;
    round.active_transcoder_count = protocol.active_transcoder_count;
    round.inflation = protocol.inflation;

    day.delegators_count = protocol.delegators_count;
    day.num_active_transcoders = protocol.num_active_transcoders;
    day.active_transcoder_count = protocol.active_transcoder_count;
    day.inflation = protocol.inflation;

    info!(
        round = round.id,
        pools = walked.len(),
        total_active_stake = %round.total_active_stake,
        "round initialized"
    );

    ctx.save(&round)?;
    ctx.save(&day)?;

    ctx.record(round.id, EventDetail::NewRound { block_hash })?;

    Ok(())
}

pub fn parameter_update<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    param: &str,
) -> Result<(), HandlerError> {
    let current_round = ctx.reader.current_round().available("currentRound");

    match param {
        "roundLength" => {
            let length = ctx.reader.round_length().available("roundLength");
            let start = ctx
                .reader
                .last_round_length_update_start_block()
                .available("lastRoundLengthUpdateStartBlock");
            let update_round = ctx
                .reader
                .last_round_length_update_round()
                .available("lastRoundLengthUpdateRound");

            let (Some(length), Some(start), Some(update_round)) = (length, start, update_round)
            else {
                info!("round length schedule unavailable, keeping the current one");
                return record_parameter(ctx, current_round, param);
            };

            if ctx.protocol.round_length == 0 {
                if let Some(number) = current_round {
                    let block = ctx.block_num();
                    create_round(ctx, block, length, number)?;
                }
            }

            let protocol = &mut *ctx.protocol;
            protocol.round_length = length;
            protocol.last_round_length_update_start_block = start;
            protocol.last_round_length_update_round = update_round;

            if let Some(number) = current_round {
                protocol.current_round = number;
            }

            info!(length, start, update_round, "round length updated");
        }
        "roundLockAmount" => {
            let amount = ctx.reader.round_lock_amount().available("roundLockAmount");
            let length = ctx.reader.round_length().available("roundLength");

            if let (Some(amount), Some(length)) = (amount, length) {
                ctx.protocol.round_lock_amount = amount;
                ctx.protocol.lock_period = length.saturating_mul(amount) / PERC_DIVISOR;
            }
        }
        other => debug!(param = other, "ignoring rounds manager parameter"),
    }

    record_parameter(ctx, current_round, param)
}

fn record_parameter<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    current_round: Option<u64>,
    param: &str,
) -> Result<(), HandlerError> {
    let round = current_round.unwrap_or(ctx.protocol.current_round);

    ctx.record(
        round,
        EventDetail::ParameterUpdate {
            param: param.to_string(),
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol(length: u64, start: u64, update_round: u64) -> Protocol {
        Protocol {
            round_length: length,
            last_round_length_update_start_block: start,
            last_round_length_update_round: update_round,
            ..Default::default()
        }
    }

    #[test]
    fn round_number_counts_from_last_update() {
        let protocol = protocol(100, 1_000, 7);

        assert_eq!(round_number(&protocol, 1_000), 7);
        assert_eq!(round_number(&protocol, 1_099), 7);
        assert_eq!(round_number(&protocol, 1_100), 8);
        assert_eq!(round_number(&protocol, 1_450), 11);
    }

    #[test]
    fn blocks_before_update_saturate() {
        let protocol = protocol(100, 1_000, 7);
        assert_eq!(round_number(&protocol, 10), 7);
    }

    #[test]
    fn unconfigured_length_does_not_divide() {
        let protocol = protocol(0, 1_000, 3);
        assert_eq!(round_number(&protocol, 5_000), 3);
    }
}
