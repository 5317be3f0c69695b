//! Secondary indexes for the DWN storage engine.
//!
//! [`IndexKv`] maps named properties of an item to forward entries whose
//! keys sort in value order, plus a reverse entry per item for deletion.
//! [`encoding`] holds the order-preserving value encoding that both the
//! embedded and the relational backends share.

pub mod encoding;
pub mod index;
pub mod item;

pub use encoding::{encode_number, encode_value};
pub use index::{IndexKv, QueryPage, REVERSE_PARTITION};
pub use item::{Cursor, IndexedItem};
