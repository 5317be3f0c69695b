use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use dwn_types::{OpContext, StoreError, StoreResult};

/// Path that selects a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS message_store (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant TEXT NOT NULL,
    message_cid TEXT NOT NULL,
    encoded_message_bytes BLOB NOT NULL,
    encoded_data TEXT,
    interface TEXT,
    method TEXT,
    schema TEXT,
    data_cid TEXT,
    data_size TEXT,
    date_created TEXT,
    message_timestamp TEXT,
    data_format TEXT,
    is_latest_base_state TEXT,
    published TEXT,
    author TEXT,
    record_id TEXT,
    entry_id TEXT,
    date_published TEXT,
    latest TEXT,
    protocol TEXT,
    date_expires TEXT,
    description TEXT,
    granted_to TEXT,
    granted_by TEXT,
    granted_for TEXT,
    permissions_request_id TEXT,
    attester TEXT,
    protocol_path TEXT,
    recipient TEXT,
    context_id TEXT,
    parent_id TEXT,
    permissions_grant_id TEXT,
    UNIQUE(tenant, message_cid)
);
CREATE INDEX IF NOT EXISTS idx_message_interface ON message_store(tenant, interface);
CREATE INDEX IF NOT EXISTS idx_message_record_id ON message_store(tenant, record_id);
CREATE INDEX IF NOT EXISTS idx_message_protocol ON message_store(tenant, protocol);
CREATE INDEX IF NOT EXISTS idx_message_timestamp ON message_store(tenant, message_timestamp);
CREATE INDEX IF NOT EXISTS idx_message_date_created ON message_store(tenant, date_created);

CREATE TABLE IF NOT EXISTS data_stores (
    tenant TEXT NOT NULL,
    data_cid TEXT NOT NULL,
    encoded_data BLOB NOT NULL,
    data_size INTEGER NOT NULL,
    PRIMARY KEY(tenant, data_cid)
);

CREATE TABLE IF NOT EXISTS data_store_references (
    tenant TEXT NOT NULL,
    data_cid TEXT NOT NULL,
    message_cid TEXT NOT NULL,
    PRIMARY KEY(tenant, data_cid, message_cid)
);

CREATE TABLE IF NOT EXISTS event_logs (
    watermark INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant TEXT NOT NULL,
    event_type TEXT,
    message_cid TEXT NOT NULL,
    data_cid TEXT,
    metadata TEXT NOT NULL,
    timestamp TEXT,
    UNIQUE(tenant, message_cid)
);
"#;

#[derive(Default)]
struct State {
    conn: Option<Connection>,
    // A closed in-memory connection is parked here so reopening finds its data.
    retained: Option<Connection>,
}

struct Inner {
    path: PathBuf,
    state: Mutex<State>,
}

/// Shared handle to one SQLite database.
///
/// All three relational stores can share a handle. One mutex guards the
/// connection; the schema is created on [`SqlDatabase::open`].
#[derive(Clone)]
pub struct SqlDatabase {
    inner: Arc<Inner>,
}

pub(crate) fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::backend(err)
}

impl SqlDatabase {
    /// A closed handle for `path`; `:memory:` selects an in-memory database.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// An open in-memory database.
    pub fn memory() -> StoreResult<Self> {
        Self::open_path(MEMORY_PATH)
    }

    /// An open database at `path`.
    pub fn open_path(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let db = Self::new(path);
        db.open()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_memory(&self) -> bool {
        self.inner.path.as_os_str() == MEMORY_PATH
    }

    /// Open the connection and create the schema. Opening twice is a no-op.
    pub fn open(&self) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.conn.is_some() {
            return Ok(());
        }
        let conn = match state.retained.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        conn.execute_batch(SCHEMA).map_err(backend)?;
        state.conn = Some(conn);
        debug!(path = %self.inner.path.display(), "sql database opened");
        Ok(())
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = if self.is_memory() {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = self.inner.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(&self.inner.path)
        }
        .map_err(backend)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(backend)?;
        Ok(conn)
    }

    /// Close the connection. Closing twice is a no-op.
    pub fn close(&self) -> StoreResult<()> {
        let mut state = self.lock()?;
        if let Some(conn) = state.conn.take() {
            if self.is_memory() {
                state.retained = Some(conn);
            }
            debug!(path = %self.inner.path.display(), "sql database closed");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.lock().map(|s| s.conn.is_some()).unwrap_or(false)
    }

    /// Run `f` against the open connection.
    pub fn with_conn<T>(&self, ctx: &OpContext, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        ctx.check()?;
        let state = self.lock()?;
        let conn = state.conn.as_ref().ok_or(StoreError::StoreNotOpen)?;
        f(conn)
    }

    /// Run `f` in an immediate transaction.
    ///
    /// The transaction commits only if `f` succeeds. Engine failures inside
    /// it surface as [`StoreError::TransactionFailure`]; other errors from
    /// `f` are returned unchanged. Either way nothing is applied.
    pub fn transaction<T>(
        &self,
        ctx: &OpContext,
        f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        ctx.check()?;
        let mut state = self.lock()?;
        let conn = state.conn.as_mut().ok_or(StoreError::StoreNotOpen)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::TransactionFailure(e.to_string()))?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()
                    .map_err(|e| StoreError::TransactionFailure(e.to_string()))?;
                Ok(value)
            }
            Err(StoreError::Backend(reason)) => Err(StoreError::TransactionFailure(reason)),
            Err(other) => Err(other),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.inner
            .state
            .lock()
            .map_err(|e| StoreError::backend(format!("lock poisoned: {e}")))
    }
}

impl std::fmt::Debug for SqlDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlDatabase")
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .finish()
    }
}
