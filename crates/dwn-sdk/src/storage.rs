use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use dwn_data::DataStoreKv;
use dwn_message::{EventLogKv, MessageStoreKv, ReconcileReport};
use dwn_sql::{DataStoreSql, EventLogSql, MessageStoreSql, SqlDatabase};
use dwn_store::{Database, DatabaseConfig, EngineConfig};
use dwn_types::{DataStore, EventLog, MessageStore, OpContext};

use crate::config::{Backend, KvConfig, StorageConfig};
use crate::error::{SdkError, SdkResult};

/// The three stores of a DWN node, opened from one [`StorageConfig`].
pub struct Storage {
    backend: Backend,
    messages: Arc<dyn MessageStore>,
    data: Arc<dyn DataStore>,
    events: Arc<dyn EventLog>,
    // Present for the KV backend, whose message writes may span two stores.
    kv_messages: Option<MessageStoreKv>,
}

impl Storage {
    /// Open every store the configuration describes.
    pub fn open(config: &StorageConfig) -> SdkResult<Self> {
        config.validate()?;
        let storage = match config.backend {
            Backend::Kv => Self::open_kv(config)?,
            Backend::Sql => Self::open_sql(config)?,
        };
        info!(backend = ?config.backend, "storage opened");
        Ok(storage)
    }

    /// In-memory KV storage with the default layout.
    pub fn memory() -> SdkResult<Self> {
        Self::open(&StorageConfig::default())
    }

    fn open_kv(config: &StorageConfig) -> SdkResult<Self> {
        let mut handles = KvHandles::new(&config.kv);
        let (blocks, index, data) = if config.kv.is_shared() {
            let db = handles.get(config.kv.shared_path.as_deref())?;
            (db.clone(), db.clone(), db)
        } else {
            (
                handles.get(config.kv.blockstore_path.as_deref())?,
                handles.get(config.kv.index_path.as_deref())?,
                handles.get(config.kv.data_path.as_deref())?,
            )
        };

        let messages = MessageStoreKv::new(blocks, index.clone());
        debug!(atomic = messages.is_atomic(), "kv message store ready");
        Ok(Self {
            backend: Backend::Kv,
            messages: Arc::new(messages.clone()),
            data: Arc::new(DataStoreKv::new(data, config.chunking)),
            events: Arc::new(EventLogKv::new(index)),
            kv_messages: Some(messages),
        })
    }

    fn open_sql(config: &StorageConfig) -> SdkResult<Self> {
        let db = SqlDatabase::open_path(&config.sql.path)?;
        Ok(Self {
            backend: Backend::Sql,
            messages: Arc::new(MessageStoreSql::new(db.clone())),
            data: Arc::new(DataStoreSql::new(db.clone(), config.chunking)),
            events: Arc::new(EventLogSql::new(db)),
            kv_messages: None,
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn messages(&self) -> &Arc<dyn MessageStore> {
        &self.messages
    }

    pub fn data(&self) -> &Arc<dyn DataStore> {
        &self.data
    }

    pub fn events(&self) -> &Arc<dyn EventLog> {
        &self.events
    }

    /// Reopen every store after [`Storage::close`].
    pub fn reopen(&self) -> SdkResult<()> {
        self.messages.open()?;
        self.data.open()?;
        self.events.open()?;
        Ok(())
    }

    pub fn close(&self) -> SdkResult<()> {
        self.events.close()?;
        self.data.close()?;
        self.messages.close()?;
        debug!(backend = ?self.backend, "storage closed");
        Ok(())
    }

    /// Wipe every tenant from every store.
    pub fn clear(&self, ctx: &OpContext) -> SdkResult<()> {
        self.messages.clear(ctx)?;
        self.data.clear(ctx)?;
        self.events.clear(ctx)?;
        Ok(())
    }

    /// Repair message blocks and index entries left inconsistent by an
    /// interrupted write. The relational backend writes transactionally and
    /// always reports a clean result.
    pub fn reconcile(&self, ctx: &OpContext, tenant: &str) -> SdkResult<ReconcileReport> {
        match &self.kv_messages {
            Some(messages) => Ok(messages.reconcile(ctx, tenant)?),
            None => Ok(ReconcileReport::default()),
        }
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

// Physical KV stores opened so far. A redb file can only be opened once per
// process, so components configured with the same path share one handle.
struct KvHandles {
    engine: EngineConfig,
    opened: Vec<(PathBuf, Database)>,
}

impl KvHandles {
    fn new(config: &KvConfig) -> Self {
        Self {
            engine: config.engine,
            opened: Vec::new(),
        }
    }

    fn get(&mut self, path: Option<&Path>) -> SdkResult<Database> {
        match self.engine {
            EngineConfig::Memory => Ok(Database::memory()),
            EngineConfig::Redb => {
                let path = path.ok_or_else(|| SdkError::Config("redb store path missing".into()))?;
                if let Some((_, db)) = self.opened.iter().find(|(p, _)| p == path) {
                    return Ok(db.clone());
                }
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let db = Database::new(DatabaseConfig::redb(path));
                db.open()?;
                self.opened.push((path.to_path_buf(), db.clone()));
                Ok(db)
            }
        }
    }
}
