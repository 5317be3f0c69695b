use std::fmt;
use std::io::Read;

use crate::content_id::ContentId;
use crate::context::OpContext;
use crate::error::StoreResult;
use crate::filter::Filter;
use crate::message::GenericMessage;
use crate::query::{MessageSort, Pagination};
use crate::value::KeyValues;

/// One page of a message query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageQueryResult {
    pub messages: Vec<GenericMessage>,
    /// Present when more results remain; pass back in [`Pagination::cursor`].
    pub cursor: Option<String>,
}

/// Tenant-scoped store of DWN messages with queryable metadata.
///
/// Implementations must satisfy these invariants:
/// - A message is addressed by the CID of its DAG-CBOR encoding, so putting
///   the same message twice is a no-op beyond refreshing its indexes.
/// - A tenant can never read, query or delete another tenant's messages.
/// - Query order is total: ties on the sort property are broken by message
///   CID in the same direction.
/// - Every operation checks its [`OpContext`] before acquiring a lock.
pub trait MessageStore: Send + Sync {
    fn open(&self) -> StoreResult<()>;

    fn close(&self) -> StoreResult<()>;

    /// Store `message` and index it under `indexes`. Returns the message CID.
    fn put(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message: &GenericMessage,
        indexes: &KeyValues,
    ) -> StoreResult<ContentId>;

    /// Fetch a message by CID string. Returns `Ok(None)` if absent.
    fn get(&self, ctx: &OpContext, tenant: &str, cid: &str) -> StoreResult<Option<GenericMessage>>;

    /// Filtered, sorted, paginated query.
    ///
    /// `filters` are ORed; the constraints within one filter are ANDed.
    fn query(
        &self,
        ctx: &OpContext,
        tenant: &str,
        filters: &[Filter],
        sort: Option<&MessageSort>,
        pagination: Option<&Pagination>,
    ) -> StoreResult<MessageQueryResult>;

    /// Remove a message and its indexes. Absent messages are a no-op.
    fn delete(&self, ctx: &OpContext, tenant: &str, cid: &str) -> StoreResult<()>;

    /// Remove every message of every tenant.
    fn clear(&self, ctx: &OpContext) -> StoreResult<()>;
}

/// Outcome of [`DataStore::put`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutResult {
    pub data_cid: ContentId,
    pub data_size: u64,
}

/// Outcome of [`DataStore::associate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssociateResult {
    pub data_cid: ContentId,
    pub data_size: u64,
}

/// Outcome of [`DataStore::get`]: the payload as a stream.
pub struct GetResult {
    pub data_cid: ContentId,
    pub data_size: u64,
    pub data: Box<dyn Read + Send>,
}

impl GetResult {
    /// Drain the stream into memory.
    pub fn into_bytes(mut self) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(usize::try_from(self.data_size).unwrap_or(0));
        self.data.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for GetResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetResult")
            .field("data_cid", &self.data_cid)
            .field("data_size", &self.data_size)
            .finish_non_exhaustive()
    }
}

/// Deduplicated, reference-counted payload store.
///
/// Payloads are shared between messages of the same tenant. Each
/// (tenant, dataCid, messageCid) triple is one reference; the payload is
/// physically removed when its last reference is deleted.
pub trait DataStore: Send + Sync {
    fn open(&self) -> StoreResult<()>;

    fn close(&self) -> StoreResult<()>;

    /// Import `data` and record a reference from `message_cid`.
    ///
    /// Fails with `CidMismatch` if the content does not hash to `data_cid`.
    fn put(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message_cid: &str,
        data_cid: &str,
        data: &mut dyn Read,
    ) -> StoreResult<PutResult>;

    /// Stream a payload.
    ///
    /// Fails with `NotFound` if the payload is absent and `AccessDenied` if
    /// `message_cid` holds no reference to it.
    fn get(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message_cid: &str,
        data_cid: &str,
    ) -> StoreResult<GetResult>;

    /// Add a reference to an already stored payload.
    fn associate(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message_cid: &str,
        data_cid: &str,
    ) -> StoreResult<AssociateResult>;

    /// Drop one reference, collecting the payload if it was the last.
    fn delete(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message_cid: &str,
        data_cid: &str,
    ) -> StoreResult<()>;

    fn clear(&self, ctx: &OpContext) -> StoreResult<()>;
}

/// Append-only, per-tenant log of message events.
///
/// Events are returned in append order. A cursor is the message CID of the
/// last event the caller has seen.
pub trait EventLog: Send + Sync {
    fn open(&self) -> StoreResult<()>;

    fn close(&self) -> StoreResult<()>;

    fn append(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message_cid: &str,
        indexes: &KeyValues,
    ) -> StoreResult<()>;

    /// Message CIDs after `cursor`, oldest first.
    fn get_events(&self, ctx: &OpContext, tenant: &str, cursor: Option<&str>) -> StoreResult<Vec<String>> {
        self.query_events(ctx, tenant, &[], cursor)
    }

    fn query_events(
        &self,
        ctx: &OpContext,
        tenant: &str,
        filters: &[Filter],
        cursor: Option<&str>,
    ) -> StoreResult<Vec<String>>;

    fn delete_events_by_cid(&self, ctx: &OpContext, tenant: &str, message_cids: &[String]) -> StoreResult<()>;

    fn clear(&self, ctx: &OpContext) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn get_result_drains_stream() {
        let result = GetResult {
            data_cid: ContentId::raw(b"payload"),
            data_size: 7,
            data: Box::new(Cursor::new(b"payload".to_vec())),
        };
        let debug = format!("{result:?}");
        assert!(debug.contains("data_size: 7"));
        assert_eq!(result.into_bytes().unwrap(), b"payload");
    }

    // The traits must stay object safe; the sdk hands them out as `Arc<dyn _>`.
    #[test]
    fn traits_are_object_safe() {
        fn assert_object_safe(
            _: Option<&dyn MessageStore>,
            _: Option<&dyn DataStore>,
            _: Option<&dyn EventLog>,
        ) {
        }
        assert_object_safe(None, None, None);
    }
}
