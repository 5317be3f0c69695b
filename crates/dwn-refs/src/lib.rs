//! Reference ledger for shared payloads.
//!
//! Payloads in the data store are deduplicated per tenant, so several
//! messages may point at the same bytes. The ledger records each such
//! pointer as a marker key and exposes the markers of one payload as a
//! [`ReferenceSet`]. The data store collects a payload exactly when its set
//! becomes empty.

pub mod ledger;
pub mod set;

pub use ledger::{ReferenceLedger, REFERENCES_PARTITION};
pub use set::ReferenceSet;
