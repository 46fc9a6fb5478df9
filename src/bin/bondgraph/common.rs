use std::path::Path;

use miette::{Context as _, IntoDiagnostic};
use tracing::info;
use tracing_subscriber::{filter::Targets, prelude::*};

use bondgraph::core::{
    builtin::Snapshot,
    config::{LoggingConfig, StorageConfig},
};
use bondgraph::prelude::*;

pub fn setup_tracing(config: &LoggingConfig) -> miette::Result<()> {
    let level = config.max_level;

    let mut filter = Targets::new()
        .with_target("bondgraph", level)
        .with_target("bondgraph_livepeer", level);

    if config.include_core {
        filter = filter
            .with_target("bondgraph_core", level)
            .with_target("bondgraph_redb", level);
    }

    tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish()
        .with(filter)
        .init();

    Ok(())
}

/// Opens the state a run starts from: the redb file when configured, an
/// in-memory database otherwise. A store without a cursor is seeded from the
/// snapshot export, if one exists.
pub fn open_state_store(storage: &StorageConfig) -> miette::Result<RedbStore> {
    let store = match &storage.path {
        Some(path) => RedbStore::open(path, storage.cache_size)
            .into_diagnostic()
            .with_context(|| format!("opening state db {}", path.display()))?,
        None => {
            info!("no state db configured, keeping state in memory");
            RedbStore::in_memory().into_diagnostic()?
        }
    };

    let cursor = store.read_cursor().into_diagnostic()?;

    let seed = storage
        .snapshot
        .as_deref()
        .filter(|x| cursor.is_none() && x.is_file());

    if let Some(path) = seed {
        let snapshot = read_snapshot(path)?;

        store
            .import(&snapshot)
            .into_diagnostic()
            .with_context(|| format!("seeding state from {}", path.display()))?;

        info!(path = %path.display(), cursor = ?snapshot.cursor, "resuming from snapshot");

        return Ok(store);
    }

    match cursor {
        Some(cursor) => info!(%cursor, "resuming from stored state"),
        None => info!("starting from an empty state"),
    }

    Ok(store)
}

pub fn read_snapshot(path: &Path) -> miette::Result<Snapshot> {
    let file = std::fs::File::open(path)
        .into_diagnostic()
        .with_context(|| format!("opening snapshot {}", path.display()))?;

    serde_json::from_reader(std::io::BufReader::new(file))
        .into_diagnostic()
        .context("decoding snapshot")
}

pub fn write_snapshot(store: &RedbStore, path: &Path) -> miette::Result<()> {
    let snapshot = store.export().into_diagnostic()?;

    let file = std::fs::File::create(path)
        .into_diagnostic()
        .with_context(|| format!("creating snapshot {}", path.display()))?;

    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &snapshot)
        .into_diagnostic()
        .context("encoding snapshot")?;

    info!(path = %path.display(), "snapshot written");

    Ok(())
}
