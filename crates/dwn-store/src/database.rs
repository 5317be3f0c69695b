use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use dwn_types::{OpContext, StoreError, StoreResult};

use crate::engine::{KvEngine, WriteBatch};
use crate::memory::MemoryEngine;
use crate::redb_engine::RedbEngine;

/// Which engine backs a physical store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineConfig {
    #[default]
    Memory,
    Redb,
}

/// Description of one physical store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// File path; required for durable engines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn redb(path: impl Into<PathBuf>) -> Self {
        Self {
            engine: EngineConfig::Redb,
            path: Some(path.into()),
        }
    }

    fn build(&self) -> StoreResult<Box<dyn KvEngine>> {
        match self.engine {
            EngineConfig::Memory => Ok(Box::new(MemoryEngine::new())),
            EngineConfig::Redb => {
                let path = self
                    .path
                    .as_ref()
                    .ok_or_else(|| StoreError::backend("redb engine requires a path"))?;
                Ok(Box::new(RedbEngine::open(path)?))
            }
        }
    }
}

#[derive(Default)]
struct State {
    engine: Option<Box<dyn KvEngine>>,
    // A closed memory engine is parked here so reopening finds its data.
    retained: Option<Box<dyn KvEngine>>,
}

struct Inner {
    config: DatabaseConfig,
    state: RwLock<State>,
}

/// Shared handle to one physical ordered key-value store.
///
/// Cloning is cheap and every clone refers to the same store. A single
/// `RwLock` guards every operation on the store, so partitions that share a
/// handle serialize through it. Operations on a closed handle fail with
/// [`StoreError::StoreNotOpen`].
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// A closed handle; call [`Database::open`] before use.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(State::default()),
            }),
        }
    }

    /// An open, empty in-memory store.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                config: DatabaseConfig::memory(),
                state: RwLock::new(State {
                    engine: Some(Box::new(MemoryEngine::new())),
                    retained: None,
                }),
            }),
        }
    }

    /// An open redb-backed store at `path`.
    pub fn redb(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let db = Self::new(DatabaseConfig::redb(path));
        db.open()?;
        Ok(db)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Open the store. Opening an open store is a no-op.
    pub fn open(&self) -> StoreResult<()> {
        let mut state = self.lock_write()?;
        if state.engine.is_some() {
            return Ok(());
        }
        let engine = match state.retained.take() {
            Some(engine) => engine,
            None => self.inner.config.build()?,
        };
        state.engine = Some(engine);
        debug!(engine = ?self.inner.config.engine, "database opened");
        Ok(())
    }

    /// Close the store. Closing a closed store is a no-op.
    pub fn close(&self) -> StoreResult<()> {
        let mut state = self.lock_write()?;
        if let Some(engine) = state.engine.take() {
            if !engine.is_durable() {
                state.retained = Some(engine);
            }
            debug!(engine = ?self.inner.config.engine, "database closed");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .state
            .read()
            .map(|s| s.engine.is_some())
            .unwrap_or(false)
    }

    /// `true` when both handles refer to the same physical store.
    pub fn same_handle(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` under the shared lock.
    pub fn read<T>(&self, ctx: &OpContext, f: impl FnOnce(&dyn KvEngine) -> StoreResult<T>) -> StoreResult<T> {
        ctx.check()?;
        let state = self.lock_read()?;
        let engine = state.engine.as_deref().ok_or(StoreError::StoreNotOpen)?;
        f(engine)
    }

    /// Apply `batch` atomically under the exclusive lock.
    pub fn write(&self, ctx: &OpContext, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return self.read(ctx, |_| Ok(()));
        }
        self.update(ctx, |engine| engine.write(batch))
    }

    /// Run a read-modify-write `f` under the exclusive lock.
    ///
    /// Nothing else can observe the store between the reads `f` makes and the
    /// batch it writes.
    pub fn update<T>(&self, ctx: &OpContext, f: impl FnOnce(&mut dyn KvEngine) -> StoreResult<T>) -> StoreResult<T> {
        ctx.check()?;
        let mut state = self.lock_write()?;
        let engine = state.engine.as_deref_mut().ok_or(StoreError::StoreNotOpen)?;
        f(engine)
    }

    fn lock_read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.inner
            .state
            .read()
            .map_err(|e| StoreError::backend(format!("lock poisoned: {e}")))
    }

    fn lock_write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.inner
            .state
            .write()
            .map_err(|e| StoreError::backend(format!("lock poisoned: {e}")))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.inner.config)
            .field("open", &self.is_open())
            .finish()
    }
}
