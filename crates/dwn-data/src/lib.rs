//! Payload storage for the DWN storage engine.
//!
//! [`DataStoreKv`] deduplicates payloads per tenant and collects them when
//! their last reference is dropped. How a payload is cut into blocks is a
//! single pluggable [`ChunkingStrategy`]: one raw block, or a balanced DAG of
//! raw leaves that [`DagReader`] streams back lazily.

pub mod chunking;
pub mod reader;
pub mod store;

pub use chunking::{
    ChunkingStrategy, DagBuild, DagLink, DagNode, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_LINKS,
};
pub use reader::{root_size, DagReader};
pub use store::{DataStoreKv, DATA_PARTITION};
