//! Foundation types for the DWN storage engine.
//!
//! Every storage crate in the workspace depends on `dwn-types`. It carries the
//! pieces that must be identical across backends so the message pipeline can
//! stay backend-agnostic: the error taxonomy, content identifiers, index
//! values and filters, query options, and the store traits themselves.
//!
//! # Key Types
//!
//! - [`ContentId`] -- validated CIDv1 with a SHA2-256 multihash
//! - [`StoreError`] -- the shared error taxonomy
//! - [`IndexValue`] / [`KeyValues`] -- indexable property values
//! - [`Filter`] / [`FilterValue`] -- equality, one-of, and range filters
//! - [`OpContext`] -- cooperative cancellation and deadlines
//! - [`MessageStore`], [`DataStore`], [`EventLog`] -- backend surfaces

pub mod content_id;
pub mod context;
pub mod error;
pub mod filter;
pub mod message;
pub mod query;
pub mod traits;
pub mod value;

pub use content_id::{ContentId, CBOR, DAG_CBOR, RAW, SHA2_256};
pub use context::OpContext;
pub use error::{StoreError, StoreResult};
pub use filter::{
    matches_any, matches_filter, validate_filters, Filter, FilterValue, RangeFilter,
};
pub use message::{decode_message, encode_message, EncodedMessage, GenericMessage, ENCODED_DATA};
pub use query::{
    build_query_options, MessageSort, Pagination, QueryOptions, SortDirection, SortProperty,
};
pub use traits::{
    AssociateResult, DataStore, EventLog, GetResult, MessageQueryResult, MessageStore, PutResult,
};
pub use value::{IndexValue, KeyValues};
