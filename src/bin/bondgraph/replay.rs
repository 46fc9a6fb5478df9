use std::path::PathBuf;

use itertools::Itertools as _;
use miette::{Context as _, IntoDiagnostic};
use tracing::{info, warn};

use bondgraph::feed;
use bondgraph::livepeer::recorded::RecordedReader;
use bondgraph::prelude::*;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// JSON lines file with one event envelope per line
    #[arg(long)]
    events: PathBuf,

    /// recorded contract reads answering the handlers' queries
    #[arg(long)]
    calls: Option<PathBuf>,

    /// redb state file, overriding the configured one
    #[arg(long)]
    store: Option<PathBuf>,

    /// JSON export seeding an empty state and written once done, overriding
    /// the configured one
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

pub fn run(config: &crate::Config, args: &Args) -> miette::Result<()> {
    crate::common::setup_tracing(&config.logging)?;

    let mut storage = config.storage.clone();

    if let Some(path) = &args.store {
        storage.path = Some(path.clone());
    }

    if let Some(path) = &args.snapshot {
        storage.snapshot = Some(path.clone());
    }

    let store = crate::common::open_state_store(&storage)?;

    let reader = match &args.calls {
        Some(path) => RecordedReader::from_file(path)
            .into_diagnostic()
            .with_context(|| format!("loading recorded calls {}", path.display()))?,
        None => {
            warn!("no recorded calls, every contract read falls back");
            RecordedReader::default()
        }
    };

    let envelopes = feed::read_envelopes(&args.events)?;

    let mut engine = Engine::new(store.clone(), reader, config.network.clone()).map_err(Error::from)?;

    info!(
        network = %config.network.name,
        envelopes = envelopes.len(),
        watches = engine.watches().len(),
        "replaying feed"
    );

    let summary = feed::apply_feed(&mut engine, &envelopes)?;

    if let Some(path) = &storage.snapshot {
        crate::common::write_snapshot(&store, path)?;
    } else if storage.is_ephemeral() {
        warn!("neither a state db nor a snapshot configured, discarding state");
    }

    println!("applied: {}", summary.applied);
    println!("skipped: {}", summary.skipped);
    println!("rolled back handlers: {}", summary.aborted_handlers);

    match summary.cursor {
        Some(cursor) => println!("cursor: {cursor}"),
        None => println!("cursor: none"),
    }

    println!("---");

    for (name, count) in summary.by_event.iter().sorted() {
        println!("{name}: {count}");
    }

    Ok(())
}
