use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dwn_data::ChunkingStrategy;
use dwn_sql::MEMORY_PATH;
use dwn_store::EngineConfig;

use crate::error::{SdkError, SdkResult};

/// Which family of stores backs a [`crate::Storage`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Kv,
    Sql,
}

/// Layout of the embedded key-value backend.
///
/// Messages, indexes and payloads each get their own physical store unless
/// `shared` is set or `shared_path` is given, in which case all partitions
/// live in one store and message writes commit as a single batch. The event
/// log lives with the indexes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    pub engine: EngineConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockstore_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_path: Option<PathBuf>,
    pub shared: bool,
}

impl KvConfig {
    pub fn is_shared(&self) -> bool {
        self.shared || self.shared_path.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    /// SQLite file, or `:memory:`.
    pub path: PathBuf,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(MEMORY_PATH),
        }
    }
}

/// Configuration of the whole storage layer.
///
/// ```toml
/// backend = "kv"
///
/// [kv]
/// engine = "redb"
/// shared_path = "/var/lib/dwn/store.redb"
///
/// [chunking]
/// strategy = "chunked"
/// chunk_size = 262144
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    pub kv: KvConfig,
    pub sql: SqlConfig,
    pub chunking: ChunkingStrategy,
}

impl StorageConfig {
    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject layouts that cannot be opened.
    pub fn validate(&self) -> SdkResult<()> {
        if let ChunkingStrategy::Chunked { chunk_size, max_links } = self.chunking {
            if chunk_size == 0 || max_links < 2 {
                return Err(SdkError::Config(
                    "chunked layout needs chunk_size > 0 and max_links >= 2".into(),
                ));
            }
        }
        if self.backend != Backend::Kv || self.kv.engine != EngineConfig::Redb {
            return Ok(());
        }
        if self.kv.is_shared() {
            if self.kv.shared_path.is_none() {
                return Err(SdkError::Config("kv.shared_path is required for a shared redb store".into()));
            }
            return Ok(());
        }
        for (name, path) in [
            ("kv.blockstore_path", &self.kv.blockstore_path),
            ("kv.index_path", &self.kv.index_path),
            ("kv.data_path", &self.kv.data_path),
        ] {
            if path.is_none() {
                return Err(SdkError::Config(format!("{name} is required for the redb engine")));
            }
        }
        Ok(())
    }
}
