use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};

use bondgraph::core::config::{LoggingConfig, StorageConfig};
use bondgraph::livepeer::NetworkConfig;

mod common;
mod inspect;
mod replay;

#[derive(Debug, Subcommand)]
enum Command {
    /// Applies an event feed onto the state store
    Replay(replay::Args),

    /// Prints entities held in a state store or snapshot
    Inspect(inspect::Args),
}

#[derive(Debug, Parser)]
#[clap(name = "Bondgraph")]
#[clap(bin_name = "bondgraph")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    pub fn new(explicit_file: &Option<std::path::PathBuf>) -> Result<Self, config::ConfigError> {
        let mut s = config::Config::builder();

        // our base config will always be in /etc/bondgraph
        s = s.add_source(config::File::with_name("/etc/bondgraph/daemon.toml").required(false));

        // but we can override it by having a file in the working dir
        s = s.add_source(config::File::with_name("bondgraph.toml").required(false));

        // if an explicit file was passed, then we load it as mandatory
        if let Some(explicit) = explicit_file.as_ref().and_then(|x| x.to_str()) {
            s = s.add_source(config::File::with_name(explicit).required(true));
        }

        // finally, we use env vars to make some last-step overrides, nesting
        // with a double underscore (BONDGRAPH_LOGGING__MAX_LEVEL)
        s = s.add_source(
            config::Environment::with_prefix("BONDGRAPH")
                .prefix_separator("_")
                .separator("__"),
        );

        s.build()?.try_deserialize()
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = Config::new(&args.config).into_diagnostic()?;

    match args.command {
        Command::Replay(x) => replay::run(&config, &x)?,
        Command::Inspect(x) => inspect::run(&config, &x)?,
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_reach_snake_case_keys() {
        std::env::set_var("BONDGRAPH_LOGGING__MAX_LEVEL", "debug");
        std::env::set_var("BONDGRAPH_STORAGE__CACHE_SIZE", "32");

        let config = Config::new(&None);

        std::env::remove_var("BONDGRAPH_LOGGING__MAX_LEVEL");
        std::env::remove_var("BONDGRAPH_STORAGE__CACHE_SIZE");

        let config = config.unwrap();

        assert_eq!(config.logging.max_level, tracing::Level::DEBUG);
        assert_eq!(config.storage.cache_size, Some(32));
    }
}
