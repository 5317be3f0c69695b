use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use dwn_index::{Cursor, IndexKv, IndexedItem};
use dwn_store::{BatchOp, BlockStore, Database, Scope, WriteBatch};
use dwn_types::{
    build_query_options, decode_message, encode_message, ContentId, EncodedMessage, Filter,
    GenericMessage, KeyValues, MessageQueryResult, MessageSort, MessageStore, OpContext, Pagination,
    StoreError, StoreResult,
};

/// Partition of the block database holding encoded messages.
pub const MESSAGES_PARTITION: &str = "messages";
/// Partition of the block database holding detached `encodedData`.
pub const ENCODED_DATA_PARTITION: &str = "encoded-data";
/// Partition of the index database holding message indexes.
pub const INDEXES_PARTITION: &str = "indexes";

/// [`MessageStore`] over a [`BlockStore`] and an [`IndexKv`].
///
/// Messages live at `messages/<tenant>/<cid>`, detached inline payloads at
/// `encoded-data/<tenant>/<cid>` of the same database, and index entries
/// under `indexes/` of the index database.
///
/// When both databases are the same handle, a put or delete commits the
/// block, its inline payload and every index entry as one batch. With
/// separate handles a put writes the block first and removes it again if
/// indexing fails; a delete drops the index entries first. A crash between
/// the two steps leaves at worst an unindexed block or an index entry without
/// a block, which [`MessageStoreKv::reconcile`] repairs.
///
/// Clones share one gate: two-step writes hold it shared and
/// [`MessageStoreKv::reconcile`] holds it exclusively, so a repair pass never
/// observes a put or delete between its two steps.
#[derive(Clone, Debug)]
pub struct MessageStoreKv {
    blocks: BlockStore,
    encoded: Scope,
    index: IndexKv,
    gate: Arc<RwLock<()>>,
}

/// What [`MessageStoreKv::reconcile`] repaired for one tenant.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReconcileReport {
    /// Message blocks with no index entry, now deleted.
    pub orphaned_blocks: Vec<String>,
    /// Index entries whose message block was missing, now deleted.
    pub dangling_entries: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_blocks.is_empty() && self.dangling_entries.is_empty()
    }
}

impl MessageStoreKv {
    pub fn new(blocks: Database, index: Database) -> Self {
        Self {
            blocks: BlockStore::with_scope(blocks, Scope::root().child(MESSAGES_PARTITION)),
            encoded: Scope::root().child(ENCODED_DATA_PARTITION),
            index: IndexKv::with_scope(index, Scope::root().child(INDEXES_PARTITION)),
            gate: Arc::new(RwLock::new(())),
        }
    }

    /// Blocks and indexes in one physical store.
    pub fn shared(db: Database) -> Self {
        Self::new(db.clone(), db)
    }

    /// `true` when puts and deletes commit as a single batch.
    pub fn is_atomic(&self) -> bool {
        self.blocks.database().same_handle(self.index.database())
    }

    pub fn index(&self) -> &IndexKv {
        &self.index
    }

    fn tenant_blocks(&self, tenant: &str) -> BlockStore {
        self.blocks.partition(tenant)
    }

    fn encoded_key(&self, tenant: &str, cid: &ContentId) -> Vec<u8> {
        self.encoded.child(tenant).key(cid.to_bytes())
    }

    fn gate_shared(&self) -> StoreResult<RwLockReadGuard<'_, ()>> {
        self.gate
            .read()
            .map_err(|e| StoreError::backend(format!("lock poisoned: {e}")))
    }

    fn gate_exclusive(&self) -> StoreResult<RwLockWriteGuard<'_, ()>> {
        self.gate
            .write()
            .map_err(|e| StoreError::backend(format!("lock poisoned: {e}")))
    }

    fn write_ops(&self, tenant: &str, message: &EncodedMessage) -> StoreResult<Vec<BatchOp>> {
        let block = self.tenant_blocks(tenant).put_op(&message.cid, &message.bytes)?;
        let key = self.encoded_key(tenant, &message.cid);
        let data = match &message.encoded_data {
            Some(data) => BatchOp::Put {
                key,
                value: data.as_bytes().to_vec(),
            },
            None => BatchOp::Delete { key },
        };
        Ok(vec![block, data])
    }

    fn delete_ops(&self, tenant: &str, cid: &ContentId) -> Vec<BatchOp> {
        vec![
            self.tenant_blocks(tenant).delete_op(cid),
            BatchOp::Delete {
                key: self.encoded_key(tenant, cid),
            },
        ]
    }

    fn load(&self, ctx: &OpContext, tenant: &str, cid: &ContentId) -> StoreResult<Option<GenericMessage>> {
        let block_key = self.tenant_blocks(tenant).block_key(cid);
        let data_key = self.encoded_key(tenant, cid);
        let (block, data) = self
            .blocks
            .database()
            .read(ctx, |engine| Ok((engine.get(&block_key)?, engine.get(&data_key)?)))?;
        let Some(block) = block else {
            return Ok(None);
        };
        let data = data
            .map(|bytes| String::from_utf8(bytes).map_err(StoreError::serialization))
            .transpose()?;
        decode_message(&block, data.as_deref()).map(Some)
    }

    fn put_two_step(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message: &EncodedMessage,
        indexes: &KeyValues,
    ) -> StoreResult<()> {
        let _gate = self.gate_shared()?;
        let existed = self.tenant_blocks(tenant).has(ctx, &message.cid)?;
        let batch: WriteBatch = self.write_ops(tenant, message)?.into_iter().collect();
        self.blocks.database().write(ctx, batch)?;

        let cid = message.cid.to_string();
        if let Err(err) = self.index.put(ctx, tenant, &cid, indexes) {
            if !existed {
                warn!(tenant, cid = %cid, error = %err, "indexing failed, removing message block");
                let rollback: WriteBatch = self.delete_ops(tenant, &message.cid).into_iter().collect();
                // Rollback must not be skipped because the caller gave up.
                if let Err(rollback_err) = self.blocks.database().write(&OpContext::background(), rollback) {
                    warn!(tenant, cid = %cid, error = %rollback_err, "rollback failed, block left for reconcile");
                }
            }
            return Err(err);
        }
        Ok(())
    }

    fn delete_two_step(&self, ctx: &OpContext, tenant: &str, cid: &ContentId) -> StoreResult<()> {
        let _gate = self.gate_shared()?;
        self.index.delete(ctx, tenant, &cid.to_string())?;
        self.blocks
            .database()
            .write(ctx, self.delete_ops(tenant, cid).into_iter().collect())
    }

    /// Remove message blocks without index entries and index entries
    /// without message blocks for `tenant`.
    ///
    /// Every candidate is checked again right before it is removed, under
    /// the lock that commits the removal, so messages put or deleted while
    /// the pass runs are left alone. The report lists only what was removed.
    pub fn reconcile(&self, ctx: &OpContext, tenant: &str) -> StoreResult<ReconcileReport> {
        let _gate = self.gate_exclusive()?;
        let mut report = ReconcileReport::default();

        let indexed = self.index.item_ids(ctx, tenant)?;
        let tenant_blocks = self.tenant_blocks(tenant);
        let mut stored = Vec::new();
        for cid in tenant_blocks.all_keys(ctx) {
            stored.push(cid?);
        }

        for cid in &stored {
            let id = cid.to_string();
            if indexed.binary_search(&id).is_err() && self.remove_orphan(ctx, tenant, cid)? {
                report.orphaned_blocks.push(id);
            }
        }
        for id in indexed {
            if self.remove_dangling(ctx, tenant, &id)? {
                report.dangling_entries.push(id);
            }
        }

        if report.is_clean() {
            debug!(tenant, "message store consistent");
        } else {
            warn!(
                tenant,
                orphaned = report.orphaned_blocks.len(),
                dangling = report.dangling_entries.len(),
                "message store repaired"
            );
        }
        Ok(report)
    }

    // Delete the block of `cid` unless it is indexed by now.
    fn remove_orphan(&self, ctx: &OpContext, tenant: &str, cid: &ContentId) -> StoreResult<bool> {
        let id = cid.to_string();
        let batch: WriteBatch = self.delete_ops(tenant, cid).into_iter().collect();
        if self.is_atomic() {
            let reverse_key = self.index.reverse_key(tenant, &id);
            return self.blocks.database().update(ctx, |engine| {
                if engine.get(&reverse_key)?.is_some() {
                    return Ok(false);
                }
                engine.write(batch)?;
                Ok(true)
            });
        }
        if self.index.get_indexes(ctx, tenant, &id)?.is_some() {
            return Ok(false);
        }
        self.blocks.database().write(ctx, batch)?;
        Ok(true)
    }

    // Drop the index entries of `id` unless its block exists by now.
    fn remove_dangling(&self, ctx: &OpContext, tenant: &str, id: &str) -> StoreResult<bool> {
        let block_key = ContentId::parse(id)
            .ok()
            .map(|cid| self.tenant_blocks(tenant).block_key(&cid));
        if self.is_atomic() {
            return self.blocks.database().update(ctx, |engine| {
                if let Some(key) = &block_key {
                    if engine.get(key)?.is_some() {
                        return Ok(false);
                    }
                }
                match self.index.delete_batch_in(&*engine, tenant, id)? {
                    Some(batch) => {
                        engine.write(batch)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            });
        }
        let present = match &block_key {
            Some(key) => self
                .blocks
                .database()
                .read(ctx, |engine| Ok(engine.get(key)?.is_some()))?,
            None => false,
        };
        if present {
            return Ok(false);
        }
        self.index.delete(ctx, tenant, id)
    }
}

impl MessageStore for MessageStoreKv {
    fn open(&self) -> StoreResult<()> {
        self.blocks.database().open()?;
        self.index.database().open()
    }

    fn close(&self) -> StoreResult<()> {
        self.blocks.database().close()?;
        self.index.database().close()
    }

    fn put(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message: &GenericMessage,
        indexes: &KeyValues,
    ) -> StoreResult<ContentId> {
        ctx.check()?;
        if indexes.is_empty() {
            return Err(StoreError::EmptyIndexSet);
        }
        let encoded = encode_message(message)?;
        if self.is_atomic() {
            let ops = self.write_ops(tenant, &encoded)?;
            self.index
                .put_with(ctx, tenant, &encoded.cid.to_string(), indexes, ops)?;
        } else {
            self.put_two_step(ctx, tenant, &encoded, indexes)?;
        }
        debug!(tenant, cid = %encoded.cid, size = encoded.bytes.len(), "message stored");
        Ok(encoded.cid)
    }

    fn get(&self, ctx: &OpContext, tenant: &str, cid: &str) -> StoreResult<Option<GenericMessage>> {
        let cid = ContentId::parse(cid)?;
        self.load(ctx, tenant, &cid)
    }

    fn query(
        &self,
        ctx: &OpContext,
        tenant: &str,
        filters: &[Filter],
        sort: Option<&MessageSort>,
        pagination: Option<&Pagination>,
    ) -> StoreResult<MessageQueryResult> {
        let options = build_query_options(sort, pagination);
        let mut items: Vec<IndexedItem> = self.index.query(ctx, tenant, filters, &options)?.items;

        let mut cursor = None;
        if let Some(size) = pagination.and_then(Pagination::page_size) {
            if items.len() > size {
                items.truncate(size);
                cursor = items
                    .last()
                    .map(|last| Cursor::for_item(last, &options.sort_property)?.encode())
                    .transpose()?;
            }
        }

        let mut messages = Vec::with_capacity(items.len());
        for item in &items {
            let cid = ContentId::parse(&item.item_id)?;
            match self.load(ctx, tenant, &cid)? {
                Some(message) => messages.push(message),
                None => warn!(tenant, cid = %cid, "indexed message has no block, skipping"),
            }
        }
        Ok(MessageQueryResult { messages, cursor })
    }

    fn delete(&self, ctx: &OpContext, tenant: &str, cid: &str) -> StoreResult<()> {
        let cid = ContentId::parse(cid)?;
        if self.is_atomic() {
            let ops = self.delete_ops(tenant, &cid);
            self.index.delete_with(ctx, tenant, &cid.to_string(), ops)?;
        } else {
            self.delete_two_step(ctx, tenant, &cid)?;
        }
        debug!(tenant, cid = %cid, "message deleted");
        Ok(())
    }

    fn clear(&self, ctx: &OpContext) -> StoreResult<()> {
        let block_ops = [
            self.blocks.clear_op(),
            BatchOp::DeleteRange {
                range: self.encoded.range(),
            },
        ];
        if self.is_atomic() {
            let mut batch: WriteBatch = block_ops.into_iter().collect();
            batch.push(self.index.clear_op());
            self.blocks.database().write(ctx, batch)?;
        } else {
            self.blocks.database().write(ctx, block_ops.into_iter().collect())?;
            self.index.clear(ctx)?;
        }
        debug!("message store cleared");
        Ok(())
    }
}
