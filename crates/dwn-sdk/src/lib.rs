//! Composition root for the DWN storage engine.
//!
//! [`Storage::open`] turns a [`StorageConfig`] into a message store, data
//! store and event log over either the embedded key-value backend or SQLite.
//! The pipeline above only sees the `dwn_types` traits, so both backends are
//! interchangeable.

pub mod config;
pub mod error;
pub mod storage;

#[cfg(test)]
mod conformance;

pub use config::{Backend, KvConfig, SqlConfig, StorageConfig};
pub use error::{SdkError, SdkResult};
pub use storage::Storage;

// Re-export the surfaces callers program against
pub use dwn_message::ReconcileReport;
pub use dwn_types::{
    DataStore, EventLog, Filter, FilterValue, IndexValue, KeyValues, MessageSort, MessageStore,
    OpContext, Pagination, RangeFilter, SortDirection, SortProperty, StoreError,
};

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_installs_once() {
        init_tracing();
        assert!(!init_tracing());
        let storage = Storage::memory().unwrap();
        storage.clear(&OpContext::background()).unwrap();
    }
}
