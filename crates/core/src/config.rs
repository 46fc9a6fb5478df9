use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoggingConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub max_level: tracing::Level,

    /// Also emit records from the store and batch plumbing.
    #[serde(default)]
    pub include_core: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_level: tracing::Level::INFO,
            include_core: Default::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct StorageConfig {
    /// redb file holding the state. When unset the state lives in memory and
    /// is lost once processing ends.
    pub path: Option<PathBuf>,

    /// Size (in MB) of the redb page cache.
    pub cache_size: Option<usize>,

    /// JSON export of the state, written once processing ends. An existing
    /// export seeds a store that holds no state yet.
    pub snapshot: Option<PathBuf>,
}

impl StorageConfig {
    pub fn is_ephemeral(&self) -> bool {
        self.path.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_level_parses_from_text() {
        let config: LoggingConfig = serde_json::from_str(r#"{ "max_level": "debug" }"#).unwrap();

        assert_eq!(config.max_level, tracing::Level::DEBUG);
        assert!(!config.include_core);
    }

    #[test]
    fn storage_without_a_path_is_ephemeral() {
        let config: StorageConfig =
            serde_json::from_str(r#"{ "snapshot": "state.json", "cache_size": 16 }"#).unwrap();

        assert!(config.is_ephemeral());
        assert_eq!(config.cache_size, Some(16));

        let config: StorageConfig = serde_json::from_str(r#"{ "path": "state.redb" }"#).unwrap();
        assert!(!config.is_ephemeral());
    }
}
