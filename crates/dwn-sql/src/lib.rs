//! Relational backend for the DWN storage engine.
//!
//! SQLite through `rusqlite`. One [`SqlDatabase`] handle can back all three
//! stores. Indexed properties are stored in the same order-preserving
//! encoding as the embedded index, so both backends sort and filter alike.

pub mod columns;
pub mod data;
pub mod database;
pub mod events;
pub mod message;

pub use columns::{column, INDEXED_COLUMNS};
pub use data::DataStoreSql;
pub use database::{SqlDatabase, MEMORY_PATH};
pub use events::EventLogSql;
pub use message::MessageStoreSql;
