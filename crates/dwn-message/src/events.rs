use tracing::debug;

use dwn_index::{Cursor, IndexKv};
use dwn_store::{BatchOp, Database, Scope};
use dwn_types::{
    EventLog, Filter, IndexValue, KeyValues, OpContext, QueryOptions, SortDirection, StoreError,
    StoreResult,
};

/// Partition holding event index entries.
pub const EVENTS_PARTITION: &str = "events";
/// Partition holding the watermark counter.
pub const WATERMARK_PARTITION: &str = "event-watermark";
/// Property every event is ordered by.
pub const WATERMARK: &str = "watermark";

/// [`EventLog`] over an [`IndexKv`].
///
/// Each appended event is an index item keyed by its message CID, carrying
/// the caller's properties plus a `watermark` drawn from a per-store counter.
/// The counter is read, advanced and written under the database's exclusive
/// lock in the same batch as the event, so watermarks are unique for every
/// log sharing the handle and gap-free across restarts of a durable store.
#[derive(Clone, Debug)]
pub struct EventLogKv {
    index: IndexKv,
    counter_key: Vec<u8>,
}

impl EventLogKv {
    pub fn new(db: Database) -> Self {
        Self {
            index: IndexKv::with_scope(db, Scope::root().child(EVENTS_PARTITION)),
            counter_key: Scope::root().child(WATERMARK_PARTITION).key("counter"),
        }
    }

    // Index cursor positioned at the event of `message_cid`.
    fn resume_after(&self, ctx: &OpContext, tenant: &str, message_cid: &str) -> StoreResult<String> {
        let indexes = self
            .index
            .get_indexes(ctx, tenant, message_cid)?
            .ok_or_else(|| StoreError::InvalidCursor(format!("no event for {message_cid}")))?;
        let value = indexes
            .get(WATERMARK)
            .cloned()
            .ok_or_else(|| StoreError::InvalidCursor(format!("event {message_cid} has no watermark")))?;
        Cursor {
            item_id: message_cid.to_string(),
            value,
        }
        .encode()
    }
}

impl EventLog for EventLogKv {
    fn open(&self) -> StoreResult<()> {
        self.index.database().open()
    }

    fn close(&self) -> StoreResult<()> {
        self.index.database().close()
    }

    fn append(&self, ctx: &OpContext, tenant: &str, message_cid: &str, indexes: &KeyValues) -> StoreResult<()> {
        let watermark = self.index.database().update(ctx, |engine| {
            let watermark = decode_counter(engine.get(&self.counter_key)?)? + 1;
            let number = i64::try_from(watermark).map_err(|_| StoreError::backend("watermark overflow"))?;
            let mut event = indexes.clone();
            event.insert(WATERMARK.to_string(), IndexValue::Number(number));
            let mut batch = self.index.put_batch_in(&*engine, tenant, message_cid, &event)?;
            batch.put(self.counter_key.clone(), watermark.to_be_bytes().to_vec());
            engine.write(batch)?;
            Ok(watermark)
        })?;
        debug!(tenant, message_cid, watermark, "event appended");
        Ok(())
    }

    fn query_events(
        &self,
        ctx: &OpContext,
        tenant: &str,
        filters: &[Filter],
        cursor: Option<&str>,
    ) -> StoreResult<Vec<String>> {
        let cursor = cursor
            .map(|message_cid| self.resume_after(ctx, tenant, message_cid))
            .transpose()?;
        let options = QueryOptions {
            sort_property: WATERMARK.to_string(),
            sort_direction: SortDirection::Ascending,
            limit: None,
            cursor,
        };
        Ok(self.index.query(ctx, tenant, filters, &options)?.item_ids())
    }

    fn delete_events_by_cid(&self, ctx: &OpContext, tenant: &str, message_cids: &[String]) -> StoreResult<()> {
        for message_cid in message_cids {
            self.index.delete(ctx, tenant, message_cid)?;
        }
        debug!(tenant, count = message_cids.len(), "events deleted");
        Ok(())
    }

    fn clear(&self, ctx: &OpContext) -> StoreResult<()> {
        let batch = [
            self.index.clear_op(),
            BatchOp::Delete {
                key: self.counter_key.clone(),
            },
        ];
        self.index.database().write(ctx, batch.into_iter().collect())?;
        debug!("event log cleared");
        Ok(())
    }
}

fn decode_counter(bytes: Option<Vec<u8>>) -> StoreResult<u64> {
    let Some(bytes) = bytes else {
        return Ok(0);
    };
    let raw: [u8; 8] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| StoreError::serialization("watermark counter is not 8 bytes"))?;
    Ok(u64::from_be_bytes(raw))
}
