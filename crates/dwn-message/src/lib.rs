//! Message storage for the DWN storage engine.
//!
//! [`MessageStoreKv`] composes a block store (for DAG-CBOR encoded messages)
//! with an [`dwn_index::IndexKv`] (for queryable metadata). [`EventLogKv`]
//! keeps a per-tenant, append-ordered log of message events on the same
//! index machinery.

pub mod events;
pub mod store;

pub use events::{EventLogKv, EVENTS_PARTITION, WATERMARK, WATERMARK_PARTITION};
pub use store::{
    MessageStoreKv, ReconcileReport, ENCODED_DATA_PARTITION, INDEXES_PARTITION, MESSAGES_PARTITION,
};
