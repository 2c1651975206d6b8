//! Immutable configuration, constructed once and threaded down to every
//! component that needs it. No hidden global state: `Config` is built by
//! `Database::open` (or supplied explicitly by a caller, e.g. the CLI) and
//! handed out as an `Arc` from then on.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::compression::Codec;
use crate::error::{Error, Result};
use crate::storage::StorageConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_path: PathBuf,
    pub null_sentinel_token: String,
    pub auto_facet_enabled: bool,
    pub auto_doc_values_enabled: bool,
    pub schema_persistence_interval_seconds: f64,
    pub storage_compression: Codec,
    pub storage: StorageSettings,
    /// LMDB environment open flags (`write-map`, `async-map`, `no-meta-sync`,
    /// `no-thread-local`), per §4.3's enumerated `open-flags` knob.
    pub open_flags: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Upper bound of the mmap region, in bytes.
    pub map_size: usize,
    /// Upper bound of named sub-databases.
    pub max_sub_databases: u32,
    /// Upper bound of concurrent reader slots.
    pub max_reader_slots: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_path: PathBuf::from("."),
            null_sentinel_token: "_null_".to_string(),
            auto_facet_enabled: true,
            auto_doc_values_enabled: true,
            schema_persistence_interval_seconds: 1.0,
            storage_compression: Codec::FastStreaming,
            storage: StorageSettings::default(),
            open_flags: StorageConfig::default(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            map_size: 10 * 1024 * 1024 * 1024, // 10 GiB virtual mapping, grows lazily.
            max_sub_databases: 256,
            max_reader_slots: 126,
        }
    }
}

impl Config {
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = path.into();
        self
    }

    /// Load a config from a TOML file, falling back to defaults for any
    /// field it omits.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("invalid config file: {e}")))
    }

    /// Overlay `SHELFDB_*` environment variables onto this config.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("SHELFDB_DATA_PATH") {
            self.data_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SHELFDB_NULL_SENTINEL_TOKEN") {
            self.null_sentinel_token = v;
        }
        if let Ok(v) = std::env::var("SHELFDB_AUTO_FACET_ENABLED") {
            if let Ok(b) = v.parse() {
                self.auto_facet_enabled = b;
            }
        }
        if let Ok(v) = std::env::var("SHELFDB_SCHEMA_PERSISTENCE_INTERVAL_SECONDS") {
            if let Ok(f) = v.parse() {
                self.schema_persistence_interval_seconds = f;
            }
        }
        if let Ok(v) = std::env::var("SHELFDB_STORAGE_COMPRESSION") {
            self.storage_compression = match v.as_str() {
                "none" => Codec::None,
                "fast-streaming" => Codec::FastStreaming,
                "deflate" => Codec::Deflate,
                _ => self.storage_compression,
            };
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design() {
        let cfg = Config::default();
        assert_eq!(cfg.null_sentinel_token, "_null_");
        assert!(cfg.auto_facet_enabled);
        assert!(cfg.auto_doc_values_enabled);
        assert_eq!(cfg.schema_persistence_interval_seconds, 1.0);
        assert_eq!(cfg.storage_compression, Codec::FastStreaming);
    }

    #[test]
    fn toml_round_trip() {
        let cfg = Config::default().with_data_path("/tmp/shelfdb-test");
        let text = toml::to_string(&cfg).unwrap();
        let restored: Config = toml::from_str(&text).unwrap();
        assert_eq!(restored.data_path, cfg.data_path);
    }

    #[test]
    fn open_flags_default_to_cleared() {
        let cfg = Config::default();
        assert!(!cfg.open_flags.write_map);
        assert!(!cfg.open_flags.async_map);
        assert!(!cfg.open_flags.no_meta_sync);
        assert!(!cfg.open_flags.no_thread_local_storage);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults_for_open_flags() {
        let partial = "data_path = \"/tmp/shelfdb-partial\"\n";
        let cfg: Config = toml::from_str(partial).unwrap();
        assert_eq!(cfg.null_sentinel_token, "_null_");
        assert!(!cfg.open_flags.write_map);
    }
}
