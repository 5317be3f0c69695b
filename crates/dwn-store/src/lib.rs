//! Physical storage for the DWN storage engine.
//!
//! Everything above this crate sees a [`Database`]: one ordered key-value
//! store behind one reader/writer lock, with an explicit open/close
//! lifecycle. Logical partitions are key prefixes built from escaped segments
//! (see [`key`]), so tenants, purposes and ids never collide.
//!
//! # Engines
//!
//! - [`MemoryEngine`] -- `BTreeMap`-backed, for tests and ephemeral nodes
//! - [`RedbEngine`] -- durable single-file store
//!
//! # Design Rules
//!
//! 1. Write batches are all-or-nothing and may span partitions of one handle.
//! 2. Missing keys are `Ok(None)`, never an error.
//! 3. The cancellation context is checked before the lock is taken.
//! 4. No internal retries; engine errors surface as `Backend`.

pub mod blockstore;
pub mod database;
pub mod engine;
pub mod key;
pub mod memory;
pub mod redb_engine;

pub use blockstore::{BlockStore, KeyIter, KEY_PAGE_SIZE};
pub use database::{Database, DatabaseConfig, EngineConfig};
pub use engine::{BatchOp, Direction, Entry, KeyRange, KvEngine, WriteBatch};
pub use key::Scope;
pub use memory::MemoryEngine;
pub use redb_engine::RedbEngine;
