//! Per-tenant secondary indexes over an ordered key-value store.
//!
//! Every item is written to two places:
//!
//! - one forward entry per property at
//!   `<tenant>/__<property>__/<encode(value)>/<itemId>`, holding the whole
//!   [`IndexedItem`], so a scan of one property partition visits items in
//!   value order and can evaluate filters on any property without a second
//!   lookup;
//! - one reverse entry at `<tenant>/index/<itemId>` holding all properties,
//!   so a delete can find every forward entry of an item.
//!
//! Both halves always commit in a single batch.

use tracing::debug;

use dwn_store::key::{key_successor, prefix_successor};
use dwn_store::{BatchOp, Database, Direction, KeyRange, KvEngine, Scope, WriteBatch};
use dwn_types::{
    matches_any, validate_filters, Filter, FilterValue, IndexValue, KeyValues, OpContext, QueryOptions,
    StoreError, StoreResult,
};

use crate::encoding::encode_value;
use crate::item::{Cursor, IndexedItem};

/// Partition holding reverse-lookup entries.
pub const REVERSE_PARTITION: &str = "index";

/// Forward entries fetched per engine scan while filtering.
const SCAN_PAGE_SIZE: usize = 256;

/// Items of one query page, in sort order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryPage {
    pub items: Vec<IndexedItem>,
    /// Set when the page is full; resumes after the last item.
    pub cursor: Option<String>,
}

impl QueryPage {
    pub fn item_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.item_id.clone()).collect()
    }
}

/// Secondary index over a [`Database`].
///
/// Writes are read-modify-write under the handle's exclusive lock, so a
/// concurrent reader never sees the forward entries of an item without its
/// reverse entry or the other way round.
#[derive(Clone, Debug)]
pub struct IndexKv {
    db: Database,
    root: Scope,
}

impl IndexKv {
    pub fn new(db: Database) -> Self {
        Self::with_scope(db, Scope::root())
    }

    /// Index rooted at `root`, for handles shared with other components.
    pub fn with_scope(db: Database, root: Scope) -> Self {
        Self { db, root }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn tenant_scope(&self, tenant: &str) -> Scope {
        self.root.child(tenant)
    }

    /// Forward partition of `property` within `tenant`.
    pub fn property_scope(&self, tenant: &str, property: &str) -> Scope {
        self.tenant_scope(tenant).child(format!("__{property}__"))
    }

    /// Reverse-lookup partition of `tenant`.
    pub fn reverse_scope(&self, tenant: &str) -> Scope {
        self.tenant_scope(tenant).child(REVERSE_PARTITION)
    }

    /// Key of the reverse entry of `item_id`. Its presence means the item is
    /// indexed.
    pub fn reverse_key(&self, tenant: &str, item_id: &str) -> Vec<u8> {
        self.reverse_scope(tenant).key(item_id)
    }

    fn forward_key(&self, tenant: &str, property: &str, value: &IndexValue, item_id: &str) -> Vec<u8> {
        self.property_scope(tenant, property)
            .key_of(&[encode_value(value).as_str(), item_id])
    }

    fn push_forward_deletes(&self, batch: &mut WriteBatch, tenant: &str, item_id: &str, indexes: &KeyValues) {
        for (property, value) in indexes {
            batch.delete(self.forward_key(tenant, property, value, item_id));
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Index `item_id` under `indexes`, replacing any earlier entries.
    pub fn put(&self, ctx: &OpContext, tenant: &str, item_id: &str, indexes: &KeyValues) -> StoreResult<()> {
        self.put_with(ctx, tenant, item_id, indexes, Vec::new())
    }

    /// [`IndexKv::put`] that also commits `extra` in the same batch.
    pub fn put_with(
        &self,
        ctx: &OpContext,
        tenant: &str,
        item_id: &str,
        indexes: &KeyValues,
        extra: impl IntoIterator<Item = BatchOp>,
    ) -> StoreResult<()> {
        self.db.update(ctx, |engine| {
            let mut batch = self.put_batch_in(&*engine, tenant, item_id, indexes)?;
            batch.extend(extra);
            engine.write(batch)
        })?;
        debug!(tenant, item_id, count = indexes.len(), "indexed item");
        Ok(())
    }

    /// Batch indexing `item_id` under `indexes`, replacing the entries
    /// `engine` currently holds for it.
    ///
    /// For callers running their own read-modify-write inside
    /// [`Database::update`]; nothing is written here.
    pub fn put_batch_in(
        &self,
        engine: &dyn KvEngine,
        tenant: &str,
        item_id: &str,
        indexes: &KeyValues,
    ) -> StoreResult<WriteBatch> {
        if indexes.is_empty() {
            return Err(StoreError::EmptyIndexSet);
        }
        let item = IndexedItem::new(item_id, indexes.clone());
        let forward = serde_json::to_vec(&item).map_err(StoreError::serialization)?;
        let reverse = serde_json::to_vec(indexes).map_err(StoreError::serialization)?;
        let reverse_key = self.reverse_key(tenant, item_id);

        let mut batch = WriteBatch::new();
        if let Some(old) = engine.get(&reverse_key)? {
            self.push_forward_deletes(&mut batch, tenant, item_id, &decode_indexes(&old)?);
        }
        for (property, value) in indexes {
            batch.put(self.forward_key(tenant, property, value, item_id), forward.clone());
        }
        batch.put(reverse_key, reverse);
        Ok(batch)
    }

    /// Remove every entry of `item_id`. Returns `false` if it was not indexed.
    pub fn delete(&self, ctx: &OpContext, tenant: &str, item_id: &str) -> StoreResult<bool> {
        self.delete_with(ctx, tenant, item_id, Vec::new())
    }

    /// [`IndexKv::delete`] that also commits `extra` in the same batch.
    ///
    /// `extra` is applied even when the item was never indexed.
    pub fn delete_with(
        &self,
        ctx: &OpContext,
        tenant: &str,
        item_id: &str,
        extra: impl IntoIterator<Item = BatchOp>,
    ) -> StoreResult<bool> {
        let existed = self.db.update(ctx, |engine| {
            let removal = self.delete_batch_in(&*engine, tenant, item_id)?;
            let existed = removal.is_some();
            let mut batch = removal.unwrap_or_default();
            batch.extend(extra);
            if !batch.is_empty() {
                engine.write(batch)?;
            }
            Ok(existed)
        })?;
        if existed {
            debug!(tenant, item_id, "removed index entries");
        }
        Ok(existed)
    }

    /// Batch removing every entry `engine` holds for `item_id`, or `None`
    /// if it is not indexed there.
    pub fn delete_batch_in(&self, engine: &dyn KvEngine, tenant: &str, item_id: &str) -> StoreResult<Option<WriteBatch>> {
        let reverse_key = self.reverse_key(tenant, item_id);
        let Some(bytes) = engine.get(&reverse_key)? else {
            return Ok(None);
        };
        let mut batch = WriteBatch::new();
        self.push_forward_deletes(&mut batch, tenant, item_id, &decode_indexes(&bytes)?);
        batch.delete(reverse_key);
        Ok(Some(batch))
    }

    pub fn clear_op(&self) -> BatchOp {
        BatchOp::DeleteRange {
            range: self.root.range(),
        }
    }

    /// Remove every entry of every tenant under this index's root.
    pub fn clear(&self, ctx: &OpContext) -> StoreResult<()> {
        self.db.write(ctx, std::iter::once(self.clear_op()).collect())?;
        debug!("index cleared");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Properties `item_id` is indexed under, if any.
    pub fn get_indexes(&self, ctx: &OpContext, tenant: &str, item_id: &str) -> StoreResult<Option<KeyValues>> {
        let key = self.reverse_key(tenant, item_id);
        self.db.read(ctx, |engine| {
            engine.get(&key)?.map(|bytes| decode_indexes(&bytes)).transpose()
        })
    }

    /// Every indexed item id of `tenant`, in id order.
    pub fn item_ids(&self, ctx: &OpContext, tenant: &str) -> StoreResult<Vec<String>> {
        let scope = self.reverse_scope(tenant);
        self.db.read(ctx, |engine| {
            let entries = engine.scan(&scope.range(), Direction::Forward, None)?;
            let mut ids = Vec::with_capacity(entries.len());
            for (key, _) in entries {
                if let [id] = scope.leaf_segments(&key)?.as_slice() {
                    ids.push(String::from_utf8_lossy(id).into_owned());
                }
            }
            Ok(ids)
        })
    }

    /// Items of `tenant` matching any of `filters`, ordered by
    /// `options.sort_property`.
    ///
    /// Ties on the sort value are broken by item id in the same direction.
    /// Items without the sort property are never returned.
    pub fn query(
        &self,
        ctx: &OpContext,
        tenant: &str,
        filters: &[Filter],
        options: &QueryOptions,
    ) -> StoreResult<QueryPage> {
        validate_filters(filters)?;
        let scope = self.property_scope(tenant, &options.sort_property);
        let direction = if options.sort_direction.is_descending() {
            Direction::Reverse
        } else {
            Direction::Forward
        };

        let mut range = narrowed_range(&scope, filters, &options.sort_property);
        if let Some(token) = &options.cursor {
            let cursor = Cursor::decode(token)?;
            let position = scope.key_of(&[encode_value(&cursor.value).as_str(), cursor.item_id.as_str()]);
            range = match direction {
                Direction::Forward => range.with_start(key_successor(&position)),
                Direction::Reverse => range.with_end(position),
            };
        }

        let limit = options.limit.filter(|l| *l > 0);
        let items = self
            .db
            .read(ctx, |engine| collect_matches(engine, range, direction, filters, limit))?;

        let cursor = match (limit, items.last()) {
            (Some(limit), Some(last)) if items.len() >= limit => {
                Some(Cursor::for_item(last, &options.sort_property)?.encode()?)
            }
            _ => None,
        };
        Ok(QueryPage { items, cursor })
    }
}

fn decode_indexes(bytes: &[u8]) -> StoreResult<KeyValues> {
    serde_json::from_slice(bytes).map_err(StoreError::serialization)
}

// Walk `range` page by page until `limit` matching items are found.
fn collect_matches(
    engine: &dyn KvEngine,
    mut range: KeyRange,
    direction: Direction,
    filters: &[Filter],
    limit: Option<usize>,
) -> StoreResult<Vec<IndexedItem>> {
    let mut items = Vec::new();
    while !range.is_degenerate() {
        let page = engine.scan(&range, direction, Some(SCAN_PAGE_SIZE))?;
        let Some((last_key, _)) = page.last() else {
            break;
        };
        let next = match direction {
            Direction::Forward => range.clone().with_start(key_successor(last_key)),
            Direction::Reverse => range.clone().with_end(last_key.clone()),
        };
        let exhausted = page.len() < SCAN_PAGE_SIZE;

        for (_, value) in &page {
            let item: IndexedItem = serde_json::from_slice(value).map_err(StoreError::serialization)?;
            if matches_any(filters, &item.indexes) {
                items.push(item);
                if limit.is_some_and(|limit| items.len() >= limit) {
                    return Ok(items);
                }
            }
        }
        if exhausted {
            break;
        }
        range = next;
    }
    Ok(items)
}

// With a single filter, a constraint on the sort property bounds the scan.
// Every candidate is still checked against the filters afterwards.
fn narrowed_range(scope: &Scope, filters: &[Filter], sort_property: &str) -> KeyRange {
    let full = scope.range();
    let [filter] = filters else {
        return full;
    };
    match filter.get(sort_property) {
        Some(FilterValue::Equal(value)) => scope.child(encode_value(value)).range(),
        Some(FilterValue::Range(bounds)) => {
            let mut range = full;
            if let Some((value, inclusive)) = bounds.lower() {
                let at = scope.child(encode_value(value));
                if inclusive {
                    range = range.with_start(at.prefix().to_vec());
                } else if let Some(after) = prefix_successor(at.prefix()) {
                    range = range.with_start(after);
                }
            }
            if let Some((value, inclusive)) = bounds.upper() {
                let at = scope.child(encode_value(value));
                if !inclusive {
                    range = range.with_end(at.prefix().to_vec());
                } else if let Some(after) = prefix_successor(at.prefix()) {
                    range = range.with_end(after);
                }
            }
            range
        }
        _ => full,
    }
}
