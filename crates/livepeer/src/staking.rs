//! Delegator and transcoder stake accounting driven by bonding manager logs.
//!
//! Handlers re-read stake figures from the bonding manager instead of
//! deriving them from log parameters; a reverted read leaves the stored
//! figure untouched.

use bondgraph_core::{Address, StateError, StateStore, U256};
use tracing::{debug, error, warn};

use crate::{
    context::Ctx,
    decimal::Decimal,
    history::EventDetail,
    ids,
    model::{Delegator, Pool, UnbondingLock},
    reader::{CallResultExt as _, ContractReader, DelegatorInfo},
    HandlerError,
};

/// Writes a fresh delegated total to the delegate's own delegator record. The
/// record may be the bonder's, in which case it is updated in place and saved
/// by the caller.
fn sync_delegated<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    delegate: &Address,
    data: Option<&DelegatorInfo>,
    bonder: &mut Delegator,
) -> Result<(), StateError> {
    let delegated = data.map(|x| Decimal::from_wei(&x.delegated_amount));

    if bonder.id == ids::address_id(delegate) {
        if let Some(delegated) = delegated {
            bonder.delegated_amount = delegated;
        }

        return Ok(());
    }

    let mut record = ctx.delegator(delegate)?;

    if let Some(delegated) = delegated {
        record.delegated_amount = delegated;
    }

    ctx.save(&record)
}

fn apply_delegator_info(delegator: &mut Delegator, data: &DelegatorInfo) {
    delegator.bonded_amount = Decimal::from_wei(&data.bonded_amount);
    delegator.fees = Decimal::from_wei(&data.fees);
    delegator.start_round = data.start_round;
}

pub fn bond<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    new_delegate: &Address,
    old_delegate: &Address,
    delegator: &Address,
    additional_amount: &U256,
    bonded_amount: &U256,
) -> Result<(), HandlerError> {
    let delegate_data = ctx.delegator_info(new_delegate);
    let delegator_data = ctx.delegator_info(delegator);

    let mut round = ctx.current_round()?;
    let mut transcoder = ctx.transcoder(new_delegate)?;
    let mut bonder = ctx.delegator(delegator)?;

    let was_bonded = bonder.is_bonded();
    let self_bond = delegator == new_delegate;

    if self_bond {
        transcoder.register(&bonder.id);
    }

    let moving = bonded_amount > additional_amount && old_delegate != new_delegate;

    if moving {
        let old_data = ctx.delegator_info(old_delegate);
        let mut old_transcoder = ctx.transcoder(old_delegate)?;

        if old_delegate == delegator {
            old_transcoder.unregister();
        }

        if let Some(data) = &old_data {
            old_transcoder.total_stake = Decimal::from_wei(&data.delegated_amount);
        }

        sync_delegated(ctx, old_delegate, old_data.as_ref(), &mut bonder)?;
        ctx.save(&old_transcoder)?;

        let fresh_bonded = delegator_data
            .as_ref()
            .map(|x| &x.bonded_amount)
            .unwrap_or(bonded_amount);

        let additional = Decimal::from_wei(additional_amount);

        round.moved_stake += Decimal::from_wei(fresh_bonded) - &additional;
        round.new_stake += additional;
        ctx.save(&round)?;

        debug!(%delegator, from = %old_delegate, to = %new_delegate, "stake moved");
    }

    if let Some(data) = &delegate_data {
        transcoder.total_stake = Decimal::from_wei(&data.delegated_amount);
    }

    sync_delegated(ctx, new_delegate, delegate_data.as_ref(), &mut bonder)?;

    bonder.delegate = Some(ids::address_id(new_delegate));
    bonder.last_claim_round = Some(round.id);
    bonder.bonded_amount = Decimal::from_wei(bonded_amount);
    bonder.principal += Decimal::from_wei(additional_amount);

    if let Some(data) = &delegator_data {
        bonder.fees = Decimal::from_wei(&data.fees);
        bonder.start_round = data.start_round;
    }

    if !was_bonded && bonder.bonded_amount.is_positive() {
        ctx.protocol.delegators_count += 1;
    }

    ctx.save(&bonder)?;
    ctx.save(&transcoder)?;

    debug!(%delegator, delegate = %new_delegate, bonded = %bonder.bonded_amount, "bonded");

    ctx.record(
        round.id,
        EventDetail::Bond {
            new_delegate: *new_delegate,
            old_delegate: *old_delegate,
            delegator: *delegator,
            bonded_amount: Decimal::from_wei(bonded_amount),
            additional_amount: Decimal::from_wei(additional_amount),
        },
    )?;

    Ok(())
}

pub fn unbond<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    delegate: &Address,
    delegator: &Address,
    unbonding_lock_id: u64,
    amount: &U256,
    withdraw_round: u64,
) -> Result<(), HandlerError> {
    let amount = Decimal::from_wei(amount);

    let delegate_data = ctx.delegator_info(delegate);
    let round = ctx.current_round()?;
    let mut transcoder = ctx.transcoder(delegate)?;
    let mut bonder = ctx.delegator(delegator)?;

    if let Some(data) = &delegate_data {
        transcoder.total_stake = Decimal::from_wei(&data.delegated_amount);
    }

    let delegator_data = ctx.delegator_info(delegator);

    bonder.last_claim_round = Some(round.id);
    bonder.unbonded += &amount;

    if let Some(data) = &delegator_data {
        apply_delegator_info(&mut bonder, data);

        if data.bonded_amount.is_zero() {
            if delegator == delegate {
                transcoder.unregister();
            }

            if bonder.delegate.take().is_some() {
                ctx.protocol.delegators_count = ctx.protocol.delegators_count.saturating_sub(1);
            }
        }
    }

    sync_delegated(ctx, delegate, delegate_data.as_ref(), &mut bonder)?;

    let lock = UnbondingLock {
        id: ids::unbonding_lock_id(delegator, unbonding_lock_id),
        lock_id: unbonding_lock_id,
        delegator: bonder.id.clone(),
        sender: bonder.id.clone(),
        delegate: ids::address_id(delegate),
        withdraw_round,
        amount: amount.clone(),
    };

    ctx.save(&transcoder)?;
    ctx.save(&lock)?;
    ctx.save(&bonder)?;

    debug!(%delegator, lock = %lock.id, %amount, "unbonded");

    ctx.record(
        round.id,
        EventDetail::Unbond {
            delegate: *delegate,
            delegator: *delegator,
            unbonding_lock_id,
            amount,
            withdraw_round,
        },
    )?;

    Ok(())
}

pub fn rebond<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    delegate: &Address,
    delegator: &Address,
    unbonding_lock_id: u64,
    amount: &U256,
) -> Result<(), HandlerError> {
    let amount = Decimal::from_wei(amount);

    let round = ctx.current_round()?;
    let mut transcoder = ctx.transcoder(delegate)?;
    let mut bonder = ctx.delegator(delegator)?;
    let delegate_data = ctx.delegator_info(delegate);

    let lock_key = ids::unbonding_lock_id(delegator, unbonding_lock_id);
    let lock = ctx.load::<UnbondingLock>(&lock_key)?;

    if !bonder.is_bonded() {
        if delegator == delegate {
            transcoder.register(&bonder.id);
        }

        ctx.protocol.delegators_count += 1;
    }

    if let Some(data) = ctx.delegator_info(delegator) {
        apply_delegator_info(&mut bonder, &data);
    }

    bonder.delegate = Some(ids::address_id(delegate));
    bonder.last_claim_round = Some(round.id);

    // locks received through a transfer never counted as unbonded
    if lock.as_ref().is_some_and(|x| x.sender == bonder.id) {
        bonder.unbonded -= &amount;
    }

    if let Some(data) = &delegate_data {
        transcoder.total_stake = Decimal::from_wei(&data.delegated_amount);
    }

    sync_delegated(ctx, delegate, delegate_data.as_ref(), &mut bonder)?;

    ctx.save(&transcoder)?;
    ctx.save(&bonder)?;

    if lock.is_some() {
        ctx.delete::<UnbondingLock>(&lock_key);
    }

    debug!(%delegator, lock = %lock_key, %amount, "rebonded");

    ctx.record(
        round.id,
        EventDetail::Rebond {
            delegate: *delegate,
            delegator: *delegator,
            unbonding_lock_id,
            amount,
        },
    )?;

    Ok(())
}

pub fn transfer_bond<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    old_delegator: &Address,
    new_delegator: &Address,
    old_unbonding_lock_id: u64,
    new_unbonding_lock_id: u64,
    amount: &U256,
) -> Result<(), HandlerError> {
    let amount = Decimal::from_wei(amount);

    let old_key = ids::unbonding_lock_id(old_delegator, old_unbonding_lock_id);
    let new_key = ids::unbonding_lock_id(new_delegator, new_unbonding_lock_id);

    let Some(source) = ctx.load::<UnbondingLock>(&old_key)? else {
        error!(lock = %old_key, "transfer of an unknown unbonding lock, dropping");
        return Ok(());
    };

    let round = ctx.current_round()?;

    let mut receiver = ctx.delegator(new_delegator)?;
    receiver.principal += &amount;
    ctx.save(&receiver)?;

    let transferred = UnbondingLock {
        id: new_key.clone(),
        lock_id: new_unbonding_lock_id,
        delegator: receiver.id.clone(),
        sender: ids::address_id(old_delegator),
        delegate: source.delegate,
        withdraw_round: source.withdraw_round,
        amount: amount.clone(),
    };

    if old_key != new_key {
        ctx.delete::<UnbondingLock>(&old_key);
    }

    ctx.save(&transferred)?;

    debug!(from = %old_key, to = %new_key, "unbonding lock transferred");

    ctx.record(
        round.id,
        EventDetail::TransferBond {
            new_delegator: *new_delegator,
            old_delegator: *old_delegator,
            new_unbonding_lock_id,
            old_unbonding_lock_id,
            amount,
        },
    )?;

    Ok(())
}

pub fn withdraw_stake<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    delegator: &Address,
    unbonding_lock_id: u64,
    amount: &U256,
) -> Result<(), HandlerError> {
    let round = ctx.current_round()?;

    let lock_key = ids::unbonding_lock_id(delegator, unbonding_lock_id);
    ctx.delete::<UnbondingLock>(&lock_key);

    debug!(%delegator, lock = %lock_key, "stake withdrawn");

    ctx.record(
        round.id,
        EventDetail::WithdrawStake {
            delegator: *delegator,
            unbonding_lock_id,
            amount: Decimal::from_wei(amount),
        },
    )?;

    Ok(())
}

pub fn withdraw_fees<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    delegator: &Address,
    recipient: &Address,
    amount: &U256,
) -> Result<(), HandlerError> {
    let amount = Decimal::from_wei(amount);

    let mut record = ctx.delegator(delegator)?;
    let data = ctx.delegator_info(delegator);
    let round = ctx.current_round()?;

    if let Some(data) = &data {
        record.bonded_amount = Decimal::from_wei(&data.bonded_amount);
        record.fees = Decimal::from_wei(&data.fees);
    }

    record.withdrawn_fees += &amount;
    record.last_claim_round = Some(round.id);

    ctx.save(&record)?;

    ctx.record(
        round.id,
        EventDetail::WithdrawFees {
            delegator: *delegator,
            recipient: *recipient,
            amount,
        },
    )?;

    Ok(())
}

pub fn parameter_update<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    param: &str,
) -> Result<(), HandlerError> {
    match param {
        "unbondingPeriod" => {
            if let Some(period) = ctx.reader.unbonding_period().available("unbondingPeriod") {
                ctx.protocol.unbonding_period = period;
            }
        }
        "numActiveTranscoders" => {
            if let Some(size) = ctx
                .reader
                .get_transcoder_pool_max_size()
                .available("getTranscoderPoolMaxSize")
            {
                ctx.protocol.num_active_transcoders = size;
            }
        }
        other => debug!(param = other, "ignoring bonding manager parameter"),
    }

    let round = ctx.protocol.current_round;

    ctx.record(
        round,
        EventDetail::ParameterUpdate {
            param: param.to_string(),
        },
    )?;

    Ok(())
}

/// Precision of the earnings pool cumulative factors.
const FACTOR_DECIMALS: u32 = 27;

pub fn reward<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    address: &Address,
    amount: &U256,
) -> Result<(), HandlerError> {
    let amount = Decimal::from_wei(amount);

    let mut transcoder = ctx.transcoder(address)?;
    let mut delegate = ctx.delegator(address)?;
    let round = ctx.current_round()?;

    let pool_key = ids::pool_id(address, round.id);

    let mut pool = match ctx.load::<Pool>(&pool_key)? {
        Some(x) => x,
        None => {
            warn!(transcoder = %address, round = round.id, "reward without a pool snapshot, creating one");
            Pool::snapshot(pool_key, round.id, &transcoder)
        }
    };

    delegate.delegated_amount += &amount;

    pool.reward_tokens = Some(amount.clone());
    pool.reward_cut = transcoder.reward_cut;
    pool.fee_share = transcoder.fee_share;

    if let Some(earnings) = ctx
        .reader
        .get_transcoder_earnings_pool_for_round(address, round.id)
        .available("getTranscoderEarningsPoolForRound")
    {
        pool.cumulative_reward_factor = Some(Decimal::from_scaled(
            &earnings.cumulative_reward_factor,
            FACTOR_DECIMALS,
        ));
        pool.cumulative_fee_factor = Some(Decimal::from_scaled(
            &earnings.cumulative_fee_factor,
            FACTOR_DECIMALS,
        ));
    }

    transcoder.total_stake += &amount;
    transcoder.last_reward_round = Some(round.id);

    ctx.save(&transcoder)?;
    ctx.save(&delegate)?;
    ctx.save(&pool)?;

    debug!(transcoder = %address, round = round.id, %amount, "reward claimed");

    ctx.record(
        round.id,
        EventDetail::Reward {
            delegate: *address,
            reward_tokens: amount,
        },
    )?;

    Ok(())
}

pub fn transcoder_slashed<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    address: &Address,
    finder: &Address,
    penalty: &U256,
    finder_reward: &U256,
) -> Result<(), HandlerError> {
    let mut transcoder = ctx.transcoder(address)?;
    let round = ctx.current_round()?;

    if let Some(data) = ctx.delegator_info(address) {
        transcoder.total_stake = Decimal::from_wei(&data.delegated_amount);
    }

    ctx.save(&transcoder)?;

    warn!(transcoder = %address, penalty = %penalty, "transcoder slashed");

    ctx.record(
        round.id,
        EventDetail::TranscoderSlashed {
            delegate: *address,
            finder: *finder,
            penalty: Decimal::from_wei(penalty),
            finder_reward: Decimal::from_wei(finder_reward),
        },
    )?;

    Ok(())
}

pub fn transcoder_update<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    address: &Address,
    reward_cut: u64,
    fee_share: u64,
) -> Result<(), HandlerError> {
    let round = ctx.current_round()?;
    let mut transcoder = ctx.transcoder(address)?;
    let timestamp = ctx.timestamp();

    if transcoder.reward_cut != reward_cut {
        transcoder.reward_cut_update_timestamp = timestamp;
    }

    if transcoder.fee_share != fee_share {
        transcoder.fee_share_update_timestamp = timestamp;
    }

    transcoder.reward_cut = reward_cut;
    transcoder.fee_share = fee_share;

    ctx.save(&transcoder)?;

    ctx.record(
        round.id,
        EventDetail::TranscoderUpdate {
            delegate: *address,
            reward_cut,
            fee_share,
        },
    )?;

    Ok(())
}

pub fn transcoder_activated<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    address: &Address,
    activation_round: u64,
) -> Result<(), HandlerError> {
    let round = ctx.current_round()?;
    let mut transcoder = ctx.transcoder(address)?;

    transcoder.last_active_stake_update_round = activation_round;
    transcoder.activation_round = activation_round;
    transcoder.deactivation_round = None;

    ctx.save(&transcoder)?;
    ctx.protocol.enqueue_activation(&transcoder.id);

    ctx.record(
        round.id,
        EventDetail::TranscoderActivated {
            delegate: *address,
            activation_round,
        },
    )?;

    Ok(())
}

pub fn transcoder_deactivated<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    address: &Address,
    deactivation_round: u64,
) -> Result<(), HandlerError> {
    let mut transcoder = ctx.transcoder(address)?;
    let round = ctx.current_round()?;

    transcoder.deactivation_round = Some(deactivation_round);

    ctx.save(&transcoder)?;
    ctx.protocol.enqueue_deactivation(&transcoder.id);

    ctx.record(
        round.id,
        EventDetail::TranscoderDeactivated {
            delegate: *address,
            deactivation_round,
        },
    )?;

    Ok(())
}

pub fn earnings_claimed<S: StateStore, R: ContractReader>(
    ctx: &mut Ctx<'_, S, R>,
    delegate: &Address,
    delegator: &Address,
    rewards: &U256,
    fees: &U256,
    start_round: u64,
    end_round: u64,
) -> Result<(), HandlerError> {
    let rewards = Decimal::from_wei(rewards);
    let fees = Decimal::from_wei(fees);

    let round = ctx.current_round()?;
    let mut record = ctx.delegator(delegator)?;

    record.last_claim_round = Some(end_round);
    record.bonded_amount += &rewards;
    record.fees += &fees;

    ctx.save(&record)?;

    ctx.record(
        round.id,
        EventDetail::EarningsClaimed {
            delegate: *delegate,
            delegator: *delegator,
            start_round,
            end_round,
            reward_tokens: rewards,
            fees,
        },
    )?;

    Ok(())
}
