use std::path::PathBuf;

use miette::IntoDiagnostic;

use bondgraph::core::builtin::Snapshot;
use bondgraph::livepeer::entity_json;
use bondgraph::prelude::*;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// redb state file to read, defaults to the configured one
    #[arg(long)]
    store: Option<PathBuf>,

    /// JSON export to read instead of a state file
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// namespace to print; lists namespaces when omitted
    namespace: Option<String>,

    /// key of a single entity within the namespace
    key: Option<String>,
}

/// Picks the state to inspect: an explicit export, then the state file, then
/// the configured export.
fn load(config: &crate::Config, args: &Args) -> miette::Result<Snapshot> {
    if let Some(path) = &args.snapshot {
        return crate::common::read_snapshot(path);
    }

    if let Some(path) = args.store.as_ref().or(config.storage.path.as_ref()) {
        let store = RedbStore::open(path, config.storage.cache_size).into_diagnostic()?;
        return store.export().into_diagnostic();
    }

    match &config.storage.snapshot {
        Some(path) => crate::common::read_snapshot(path),
        None => Err(miette::Error::msg("no state to inspect")),
    }
}

pub fn run(config: &crate::Config, args: &Args) -> miette::Result<()> {
    crate::common::setup_tracing(&config.logging)?;

    let snapshot = load(config, args)?;

    let Some(namespace) = &args.namespace else {
        match snapshot.cursor {
            Some(cursor) => println!("cursor: {cursor}"),
            None => println!("cursor: none"),
        }

        for (ns, entries) in &snapshot.namespaces {
            println!("{ns}: {}", entries.len());
        }

        return Ok(());
    };

    let entries = snapshot
        .namespaces
        .get(namespace)
        .ok_or_else(|| miette::Error::msg(format!("namespace {namespace} not found")))?;

    let wanted = args.key.as_ref().map(|x| hex::encode(x.as_bytes()));

    let mut found = false;

    for (key, value) in entries {
        if wanted.as_ref().is_some_and(|x| x != key) {
            continue;
        }

        let value = hex::decode(value).into_diagnostic()?;

        let json = entity_json(namespace, &value)
            .into_diagnostic()?
            .ok_or_else(|| miette::Error::msg(format!("invalid namespace {namespace}")))?;

        println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        found = true;
    }

    if !found {
        println!("entity not found");
    }

    Ok(())
}
