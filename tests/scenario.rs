use std::collections::BTreeMap;

use bondgraph_core::{builtin::MemoryStore, StateStore, U256};
use bondgraph_livepeer::{
    ids,
    model::{
        Account, Broadcaster, Delegator, Pool, Protocol, Round, Transcoder, UnbondingLock,
        PROTOCOL_KEY,
    },
    Decimal, Engine, Envelope, NetworkConfig, Outcome,
};
use bondgraph_testing::{lpt, MockChain, Simulator, TestAddress::*};

fn setup() -> (Simulator, Engine<MemoryStore, MockChain>, MemoryStore) {
    let sim = Simulator::new(100);
    let store = MemoryStore::new();

    let engine = Engine::new(store.clone(), sim.chain.clone(), NetworkConfig::default()).unwrap();

    (sim, engine, store)
}

fn apply(engine: &mut Engine<MemoryStore, MockChain>, envelope: Envelope) {
    let outcome = engine.process(&envelope).unwrap();
    assert_eq!(outcome, Outcome::Applied { aborted: 0 }, "{}", envelope.event.name());
}

fn read<T: bondgraph_core::Entity>(store: &MemoryStore, key: impl AsRef<[u8]>) -> T {
    store.read_entity_typed::<T>(key).unwrap().unwrap()
}

fn protocol(store: &MemoryStore) -> Protocol {
    read(store, PROTOCOL_KEY)
}

fn lpt_dec(whole: u64) -> Decimal {
    Decimal::from(whole)
}

#[test]
fn bonds_and_rewards_flow_into_pools() {
    let (mut sim, mut engine, store) = setup();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));
    apply(&mut engine, sim.bond(Bob, Alice, lpt(50)));
    apply(&mut engine, sim.activate(Alice));

    sim.next_round();
    assert_eq!(sim.current_round(), 11);

    apply(&mut engine, sim.initialize_round());
    apply(&mut engine, sim.reward(Alice, lpt(10)));

    let alice: Transcoder = read(&store, Alice.id());
    assert!(alice.active);
    assert!(alice.is_registered());
    assert_eq!(alice.total_stake, lpt_dec(160));
    assert_eq!(alice.last_reward_round, Some(11));

    let pool: Pool = read(&store, ids::pool_id(&Alice.address(), 11));
    assert_eq!(pool.total_stake, lpt_dec(150));
    assert_eq!(pool.reward_tokens, Some(lpt_dec(10)));
    assert_eq!(pool.cumulative_reward_factor, Some(Decimal::one()));

    let round: Round = read(&store, "11");
    assert!(round.initialized);
    assert_eq!(round.start_block, 1_100);
    assert_eq!(round.end_block, 1_200);
    assert_eq!(round.total_active_stake, lpt_dec(150));

    let protocol = protocol(&store);
    assert_eq!(protocol.delegators_count, 2);
    assert_eq!(protocol.active_transcoder_count, 1);
    assert_eq!(protocol.last_initialized_round, 11);
    assert!(protocol.pending_activation.is_empty());

    let self_delegation: Delegator = read(&store, Alice.id());
    assert_eq!(self_delegation.delegated_amount, lpt_dec(160));
}

#[test]
fn delegated_stake_matches_delegator_bonds() {
    let (mut sim, mut engine, store) = setup();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));
    apply(&mut engine, sim.bond(Bob, Alice, lpt(50)));
    apply(&mut engine, sim.bond(Carol, Alice, lpt(30)));
    apply(&mut engine, sim.unbond(Carol, lpt(10)).0);
    apply(&mut engine, sim.bond(Dave, Dave, lpt(40)));
    apply(&mut engine, sim.bond(Bob, Dave, U256::ZERO));

    let mut by_delegate: BTreeMap<String, Decimal> = BTreeMap::new();

    for entry in store.iter_entities_typed::<Delegator>(b"").unwrap() {
        let (_, delegator) = entry.unwrap();

        if let Some(delegate) = delegator.delegate {
            *by_delegate.entry(delegate).or_default() += delegator.bonded_amount;
        }
    }

    for (delegate, expected) in [(Alice, 120), (Dave, 90)] {
        let id = delegate.id();
        let transcoder: Transcoder = read(&store, &id);

        assert_eq!(transcoder.total_stake, lpt_dec(expected));
        assert_eq!(by_delegate[&id], lpt_dec(expected));
    }

    let bob: Delegator = read(&store, Bob.id());
    assert_eq!(bob.delegate, Some(Dave.id()));
    assert_eq!(bob.principal, lpt_dec(50));

    let round: Round = read(&store, "10");
    assert_eq!(round.moved_stake, lpt_dec(50));

    assert_eq!(protocol(&store).delegators_count, 4);
}

#[test]
fn unbonding_locks_follow_their_lifecycle() {
    let (mut sim, mut engine, store) = setup();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));
    apply(&mut engine, sim.bond(Bob, Alice, lpt(50)));

    let (envelope, first) = sim.unbond(Bob, lpt(20));
    apply(&mut engine, envelope);

    let lock: UnbondingLock = read(&store, ids::unbonding_lock_id(&Bob.address(), first));
    assert_eq!(lock.amount, lpt_dec(20));
    assert_eq!(lock.withdraw_round, 17);
    assert_eq!(lock.delegate, Alice.id());

    let bob: Delegator = read(&store, Bob.id());
    assert_eq!(bob.bonded_amount, lpt_dec(30));
    assert_eq!(bob.unbonded, lpt_dec(20));

    apply(&mut engine, sim.rebond(Bob, Alice, first));

    let bob: Delegator = read(&store, Bob.id());
    assert_eq!(bob.bonded_amount, lpt_dec(50));
    assert_eq!(bob.unbonded, Decimal::zero());

    let alice: Transcoder = read(&store, Alice.id());
    assert_eq!(alice.total_stake, lpt_dec(150));

    let (envelope, second) = sim.unbond(Bob, lpt(50));
    apply(&mut engine, envelope);

    let bob: Delegator = read(&store, Bob.id());
    assert_eq!(bob.delegate, None);
    assert_eq!(protocol(&store).delegators_count, 1);

    let (envelope, moved) = sim.transfer_bond(Bob, Carol, second);
    apply(&mut engine, envelope);

    let received: UnbondingLock = read(&store, ids::unbonding_lock_id(&Carol.address(), moved));
    assert_eq!(received.amount, lpt_dec(50));
    assert_eq!(received.sender, Bob.id());
    assert_eq!(received.delegate, Alice.id());

    let gone = store
        .read_entity_typed::<UnbondingLock>(ids::unbonding_lock_id(&Bob.address(), second))
        .unwrap();
    assert!(gone.is_none());

    apply(&mut engine, sim.withdraw_stake(Carol, moved));

    let remaining = store.iter_entities_typed::<UnbondingLock>(b"").unwrap().count();
    assert_eq!(remaining, 0);
}

#[test]
fn self_delegation_registers_the_transcoder() {
    let (mut sim, mut engine, store) = setup();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));

    let id = Alice.id();

    let alice: Transcoder = read(&store, &id);
    assert!(alice.is_registered());
    assert_eq!(alice.delegator, Some(id.clone()));

    let account: Account = read(&store, &id);
    assert_eq!(account.delegator, Some(id.clone()));
    assert_eq!(account.delegate, Some(id.clone()));
    assert_eq!(account.last_updated_timestamp, sim.timestamp());

    apply(&mut engine, sim.unbond(Alice, lpt(100)).0);

    let alice: Transcoder = read(&store, &id);
    assert!(!alice.is_registered());
    assert_eq!(alice.delegator, None);
    assert_eq!(alice.total_stake, Decimal::zero());
}

#[test]
fn rounds_are_created_once_per_number() {
    let (mut sim, mut engine, store) = setup();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));
    apply(&mut engine, sim.transcoder_update(Alice, 50_000, 250_000));
    sim.advance(10);
    apply(&mut engine, sim.mint(Bob, lpt(1)));

    assert_eq!(protocol(&store).round_count, 1);

    let first: Round = read(&store, "10");
    assert_eq!(first.start_block, 1_000);
    assert_eq!(first.length, 100);

    sim.advance(100);
    apply(&mut engine, sim.mint(Bob, lpt(1)));

    let protocol_now = protocol(&store);
    assert_eq!(protocol_now.round_count, 2);
    assert_eq!(protocol_now.current_round, 11);

    // skipped rounds are never materialized
    sim.advance(300);
    apply(&mut engine, sim.mint(Bob, lpt(1)));

    assert_eq!(protocol(&store).round_count, 3);
    assert!(store.read_entity_typed::<Round>("12").unwrap().is_none());

    let latest: Round = read(&store, "14");
    assert_eq!(latest.start_block, 1_400);
    assert_eq!(latest.end_block, 1_500);
}

#[test]
fn round_length_change_moves_boundaries() {
    let (mut sim, mut engine, store) = setup();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));
    apply(&mut engine, sim.set_round_length(50));

    let protocol_now = protocol(&store);
    assert_eq!(protocol_now.round_length, 50);
    assert_eq!(protocol_now.last_round_length_update_start_block, 1_000);
    assert_eq!(protocol_now.last_round_length_update_round, 10);

    sim.advance(50);
    apply(&mut engine, sim.mint(Bob, lpt(1)));

    let round: Round = read(&store, "11");
    assert_eq!(round.start_block, 1_050);
    assert_eq!(round.end_block, 1_100);
    assert_eq!(round.length, 50);
}

#[test]
fn redelivered_logs_are_skipped() {
    let (mut sim, mut engine, store) = setup();

    let first = sim.bond(Alice, Alice, lpt(100));
    apply(&mut engine, first.clone());

    let second = sim.bond(Bob, Alice, lpt(50));
    apply(&mut engine, second.clone());

    assert_eq!(engine.process(&second).unwrap(), Outcome::Skipped);
    assert_eq!(engine.process(&first).unwrap(), Outcome::Skipped);

    assert_eq!(engine.cursor(), Some(second.position()));
    assert_eq!(store.read_cursor().unwrap(), Some(second.position()));

    let alice: Transcoder = read(&store, Alice.id());
    assert_eq!(alice.total_stake, lpt_dec(150));
    assert_eq!(protocol(&store).delegators_count, 2);
}

#[test]
fn reverted_reads_keep_stored_figures() {
    let (mut sim, mut engine, store) = setup();

    sim.chain.revert("getDelegator");
    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));

    let alice: Transcoder = read(&store, Alice.id());
    assert_eq!(alice.total_stake, Decimal::zero());

    let delegator: Delegator = read(&store, Alice.id());
    assert_eq!(delegator.bonded_amount, lpt_dec(100));

    sim.chain.heal("getDelegator");
    apply(&mut engine, sim.bond(Alice, Alice, lpt(10)));

    let alice: Transcoder = read(&store, Alice.id());
    assert_eq!(alice.total_stake, lpt_dec(110));
}

#[test]
fn tickets_move_broadcaster_funds_into_volumes() {
    let (mut sim, mut engine, store) = setup();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));
    apply(&mut engine, sim.activate(Alice));
    sim.next_round();
    apply(&mut engine, sim.initialize_round());

    apply(&mut engine, sim.fund_deposit(Eve, lpt(5)));
    apply(&mut engine, sim.fund_reserve(Eve, lpt(10)));
    apply(&mut engine, sim.redeem_ticket(Eve, Alice, lpt(2)));

    let eve: Broadcaster = read(&store, Eve.id());
    assert_eq!(eve.deposit, lpt_dec(3));
    assert_eq!(eve.reserve, lpt_dec(10));
    assert_eq!(eve.total_volume_eth, lpt_dec(2));

    let alice: Transcoder = read(&store, Alice.id());
    assert_eq!(alice.total_volume_eth, lpt_dec(2));

    let pool: Pool = read(&store, ids::pool_id(&Alice.address(), 11));
    assert_eq!(pool.fees, lpt_dec(2));

    let round: Round = read(&store, "11");
    assert_eq!(round.volume_eth, lpt_dec(2));

    apply(&mut engine, sim.redeem_ticket(Eve, Alice, lpt(4)));

    let eve: Broadcaster = read(&store, Eve.id());
    assert_eq!(eve.deposit, Decimal::zero());
    assert_eq!(eve.total_volume_eth, lpt_dec(6));

    let protocol_now = protocol(&store);
    assert_eq!(protocol_now.winning_ticket_count, 2);
    assert_eq!(protocol_now.total_volume_eth, lpt_dec(6));
    assert_eq!(protocol_now.total_volume_usd, Decimal::zero());

    apply(&mut engine, sim.withdraw_broadcaster(Eve, U256::ZERO, lpt(10)));

    let eve: Broadcaster = read(&store, Eve.id());
    assert_eq!(eve.reserve, Decimal::zero());
}

#[test]
fn supply_tracks_mints_and_burns() {
    let (mut sim, mut engine, store) = setup();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));
    apply(&mut engine, sim.activate(Alice));
    sim.next_round();
    apply(&mut engine, sim.initialize_round());

    apply(&mut engine, sim.mint(Alice, lpt(1_000)));

    let protocol_now = protocol(&store);
    assert_eq!(protocol_now.total_supply, lpt_dec(1_000));
    assert_eq!(protocol_now.participation_rate, "0.1".parse::<Decimal>().unwrap());

    apply(&mut engine, sim.burn(Alice, lpt(500)));

    let protocol_now = protocol(&store);
    assert_eq!(protocol_now.total_supply, lpt_dec(500));
    assert_eq!(protocol_now.participation_rate, "0.2".parse::<Decimal>().unwrap());

    let round: Round = read(&store, "11");
    assert_eq!(round.total_supply, lpt_dec(500));
    assert_eq!(round.participation_rate, "0.2".parse::<Decimal>().unwrap());
}

#[test]
fn every_applied_log_leaves_a_history_record() {
    let (mut sim, mut engine, store) = setup();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));
    apply(&mut engine, sim.transcoder_update(Alice, 100_000, 500_000));
    apply(&mut engine, sim.set_service_uri(Alice, "https://orchestrator.example:8935"));
    apply(&mut engine, sim.set_paused(true));
    apply(&mut engine, sim.stake_claimed(Bob, Alice, lpt(3)));

    assert_eq!(store.count("events").unwrap(), 5);
    assert_eq!(store.count("transactions").unwrap(), 5);

    let alice: Transcoder = read(&store, Alice.id());
    assert_eq!(alice.reward_cut, 100_000);
    assert_eq!(alice.fee_share, 500_000);
    assert_eq!(
        alice.service_uri.as_deref(),
        Some("https://orchestrator.example:8935")
    );

    assert!(protocol(&store).paused);

    apply(&mut engine, sim.set_paused(false));
    assert!(!protocol(&store).paused);
}

#[test]
fn delegation_after_a_round_boundary_leaves_the_snapshot_intact() {
    let (mut sim, mut engine, store) = setup();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(1_000)));
    apply(&mut engine, sim.transcoder_update(Alice, 500_000, 50_000));
    apply(&mut engine, sim.activate(Alice));

    sim.next_round();
    apply(&mut engine, sim.initialize_round());
    apply(&mut engine, sim.bond(Bob, Alice, lpt(3_000)));

    let alice: Transcoder = read(&store, Alice.id());
    assert!(alice.is_registered());
    assert_eq!(alice.reward_cut, 500_000);
    assert_eq!(alice.fee_share, 50_000);
    assert_eq!(alice.total_stake, lpt_dec(4_000));

    let bob: Delegator = read(&store, Bob.id());
    assert_eq!(bob.delegate, Some(Alice.id()));
    assert_eq!(bob.bonded_amount, lpt_dec(3_000));

    let pool: Pool = read(&store, ids::pool_id(&Alice.address(), 11));
    assert_eq!(pool.total_stake, lpt_dec(1_000));
    assert_eq!(pool.reward_cut, 500_000);
    assert_eq!(pool.fee_share, 50_000);
}

#[test]
fn bonding_parameters_refresh_and_unknown_names_are_ignored() {
    let (mut sim, mut engine, store) = setup();

    {
        let mut chain = sim.chain.state_mut();
        chain.unbonding_period = 9;
        chain.pool_max_size = 42;
    }

    apply(&mut engine, sim.bonding_parameter("unbondingPeriod"));
    apply(&mut engine, sim.bonding_parameter("numActiveTranscoders"));

    let before = protocol(&store);
    assert_eq!(before.unbonding_period, 9);
    assert_eq!(before.num_active_transcoders, 42);

    sim.chain.state_mut().pool_max_size = 7;
    apply(&mut engine, sim.bonding_parameter("somethingNew"));

    let after = protocol(&store);
    assert_eq!(after.num_active_transcoders, 42);
    assert_eq!(store.count("events").unwrap(), 3);
}

#[test]
fn claimed_earnings_and_withdrawn_fees_update_the_delegator() {
    let (mut sim, mut engine, store) = setup();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));
    apply(&mut engine, sim.bond(Bob, Alice, lpt(50)));
    apply(&mut engine, sim.earnings_claimed(Bob, lpt(5), lpt(2)));

    let bob: Delegator = read(&store, Bob.id());
    assert_eq!(bob.bonded_amount, lpt_dec(55));
    assert_eq!(bob.fees, lpt_dec(2));
    assert_eq!(bob.last_claim_round, Some(10));

    apply(&mut engine, sim.withdraw_fees(Bob, lpt(2)));

    let bob: Delegator = read(&store, Bob.id());
    assert_eq!(bob.bonded_amount, lpt_dec(55));
    assert_eq!(bob.fees, Decimal::zero());
    assert_eq!(bob.withdrawn_fees, lpt_dec(2));
}
