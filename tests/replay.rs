use std::io::Write as _;

use bondgraph::feed;
use bondgraph_core::{builtin::MemoryStore, Address, U256};
use bondgraph_livepeer::{
    recorded::{RecordedReader, RecordingReader},
    ContractReader, Engine, Envelope, NetworkConfig, Outcome,
};
use bondgraph_redb::RedbStore;
use bondgraph_testing::{lpt, MockChain, Simulator, TestAddress::*};

const POLL: Address = Address::new([0x50; 20]);

fn apply<R: ContractReader>(engine: &mut Engine<MemoryStore, R>, envelope: Envelope) {
    let outcome = engine.process(&envelope).unwrap();
    assert!(matches!(outcome, Outcome::Applied { .. }));
}

/// Runs a few rounds of activity against a live engine, returning the live
/// state, the calls it made and the emitted feed.
fn live_run() -> (MemoryStore, RecordingReader<MockChain>, Vec<Envelope>) {
    let mut sim = Simulator::new(100);
    let store = MemoryStore::new();

    let reader = RecordingReader::new(sim.chain.clone());
    let mut engine = Engine::new(store.clone(), reader, NetworkConfig::default()).unwrap();

    apply(&mut engine, sim.bond(Alice, Alice, lpt(100)));
    apply(&mut engine, sim.bond(Bob, Alice, lpt(50)));
    apply(&mut engine, sim.bond(Carol, Carol, lpt(80)));
    apply(&mut engine, sim.activate(Alice));
    apply(&mut engine, sim.activate(Carol));

    let end_block = sim.block() + 250;
    apply(&mut engine, sim.create_poll(POLL, end_block));
    apply(&mut engine, sim.vote(POLL, Alice, 0));
    apply(&mut engine, sim.vote(POLL, Bob, 1));

    sim.next_round();
    sim.chain.revert("getTotalBonded");
    apply(&mut engine, sim.initialize_round());
    sim.chain.heal("getTotalBonded");

    apply(&mut engine, sim.reward(Alice, lpt(10)));
    apply(&mut engine, sim.fund_deposit(Eve, lpt(5)));
    apply(&mut engine, sim.redeem_ticket(Eve, Carol, lpt(1)));
    apply(&mut engine, sim.mint(Alice, lpt(1_000)));

    let (envelope, lock) = sim.unbond(Bob, lpt(20));
    apply(&mut engine, envelope);

    sim.next_round();
    apply(&mut engine, sim.initialize_round());
    apply(&mut engine, sim.rebond(Bob, Carol, lock));
    apply(&mut engine, sim.propose(1, Alice, sim.block() + 100));
    apply(&mut engine, sim.treasury_vote(1, Carol, 1, lpt(80), "ship it"));

    sim.next_round();
    apply(&mut engine, sim.bond(Dave, Alice, lpt(5)));

    let emitted = sim.emitted().to_vec();

    (store, engine.into_reader(), emitted)
}

fn write_feed(envelopes: &[Envelope]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();

    for envelope in envelopes {
        let line = serde_json::to_string(envelope).unwrap();
        writeln!(file, "{line}").unwrap();
    }

    file.flush().unwrap();
    file
}

fn write_calls(reader: RecordingReader<MockChain>) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();

    serde_json::to_writer(&mut file, &reader.into_recorded()).unwrap();

    file.flush().unwrap();
    file
}

#[test]
fn recorded_calls_reproduce_the_live_state() {
    let (live, reader, emitted) = live_run();

    let feed_file = write_feed(&emitted);
    let calls_file = write_calls(reader);

    let envelopes = feed::read_envelopes(feed_file.path()).unwrap();
    assert_eq!(envelopes, emitted);

    let replayed = MemoryStore::new();
    let reader = RecordedReader::from_file(calls_file.path()).unwrap();
    let mut engine = Engine::new(replayed.clone(), reader, NetworkConfig::default()).unwrap();

    let summary = feed::apply_feed(&mut engine, &envelopes).unwrap();

    assert_eq!(summary.applied, emitted.len());
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.by_event["Bond"], 4);
    assert_eq!(summary.cursor, emitted.last().map(Envelope::position));

    assert_eq!(replayed.export().unwrap(), live.export().unwrap());
}

#[test]
fn redb_replay_resumes_after_a_reopen() {
    let (live, reader, emitted) = live_run();
    let recorded = reader.into_recorded();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.redb");

    let (first, _) = emitted.split_at(emitted.len() / 2);

    {
        let store = RedbStore::open(&path, None).unwrap();
        let reader = RecordedReader::new(recorded.clone());
        let mut engine = Engine::new(store, reader, NetworkConfig::default()).unwrap();

        feed::apply_feed(&mut engine, first).unwrap();
    }

    let store = RedbStore::open(&path, None).unwrap();
    let reader = RecordedReader::new(recorded);
    let mut engine = Engine::new(store.clone(), reader, NetworkConfig::default()).unwrap();

    assert_eq!(engine.cursor(), first.last().map(Envelope::position));

    let summary = feed::apply_feed(&mut engine, &emitted).unwrap();

    assert_eq!(summary.skipped, first.len());
    assert_eq!(summary.applied, emitted.len() - first.len());
    assert_eq!(store.export().unwrap(), live.export().unwrap());
}

#[test]
fn live_rebuilds_from_empty_stores_match() {
    let (first, first_reader, first_feed) = live_run();
    let (second, second_reader, second_feed) = live_run();

    assert_eq!(first_feed, second_feed);
    assert_eq!(first_reader.recorded(), second_reader.recorded());

    let first = first.export().unwrap();
    let second = second.export().unwrap();

    assert_eq!(first.cursor, first_feed.last().map(Envelope::position));
    assert!(first.namespaces.contains_key("delegators"));
    assert_eq!(first, second);
}

#[test]
fn replay_resumes_from_a_snapshot() {
    let (live, reader, emitted) = live_run();
    let recorded = reader.into_recorded();

    let (first, _) = emitted.split_at(emitted.len() / 2);

    let partial = MemoryStore::new();
    let mut engine = Engine::new(
        partial.clone(),
        RecordedReader::new(recorded.clone()),
        NetworkConfig::default(),
    )
    .unwrap();

    feed::apply_feed(&mut engine, first).unwrap();
    drop(engine);

    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("state.json");
    partial.save_snapshot(&snapshot).unwrap();

    let resumed = MemoryStore::load_snapshot(&snapshot).unwrap();
    let mut engine = Engine::new(
        resumed.clone(),
        RecordedReader::new(recorded),
        NetworkConfig::default(),
    )
    .unwrap();

    let summary = feed::apply_feed(&mut engine, &emitted).unwrap();

    assert_eq!(summary.skipped, first.len());
    assert_eq!(summary.applied, emitted.len() - first.len());

    assert_eq!(resumed.export().unwrap(), live.export().unwrap());
}

#[test]
fn missing_recordings_fall_back_without_failing() {
    let (_, _, emitted) = live_run();

    let store = MemoryStore::new();
    let mut engine = Engine::new(store.clone(), RecordedReader::default(), NetworkConfig::default()).unwrap();

    let summary = feed::apply_feed(&mut engine, &emitted).unwrap();

    assert_eq!(summary.applied, emitted.len());
    assert_eq!(store.count("events").unwrap(), emitted.len());
}

#[test]
fn recorded_reverts_replay_as_reverts() {
    let mut sim = Simulator::new(100);
    sim.chain.revert("roundLength");

    let mut reader = RecordingReader::new(sim.chain.clone());
    assert!(reader.round_length().is_err());
    assert_eq!(reader.get_total_bonded().unwrap(), U256::ZERO);

    let mut replay = RecordedReader::new(reader.into_recorded());
    assert_eq!(replay.round_length(), Err(bondgraph_livepeer::CallError::Reverted));
    assert_eq!(replay.get_total_bonded().unwrap(), U256::ZERO);
}
