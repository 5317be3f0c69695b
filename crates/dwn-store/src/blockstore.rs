use std::collections::VecDeque;

use tracing::debug;

use dwn_types::{ContentId, OpContext, StoreResult};

use crate::database::Database;
use crate::engine::{BatchOp, Direction, KeyRange, WriteBatch};
use crate::key::{key_successor, split_segment, Scope};

/// Keys fetched per page by [`BlockStore::all_keys`].
pub const KEY_PAGE_SIZE: usize = 256;

/// Content-addressed blocks inside one partition of a [`Database`].
///
/// A `BlockStore` never interprets block contents. It is cheap to clone and to
/// partition; every partition of the same database shares its lock.
#[derive(Clone, Debug)]
pub struct BlockStore {
    db: Database,
    scope: Scope,
}

impl BlockStore {
    /// A block store at the root of `db`.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            scope: Scope::root(),
        }
    }

    pub fn with_scope(db: Database, scope: Scope) -> Self {
        Self { db, scope }
    }

    /// Sub-partition `name` of this store.
    pub fn partition(&self, name: impl AsRef<[u8]>) -> Self {
        Self {
            db: self.db.clone(),
            scope: self.scope.child(name),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Physical key of `cid` in this scope.
    pub fn block_key(&self, cid: &ContentId) -> Vec<u8> {
        self.scope.key(cid.to_bytes())
    }

    /// Write a block. Writing the same block twice is a no-op.
    pub fn put(&self, ctx: &OpContext, cid: &ContentId, bytes: &[u8]) -> StoreResult<()> {
        let op = self.put_op(cid, bytes)?;
        self.db.write(ctx, std::iter::once(op).collect())?;
        debug!(cid = %cid, size = bytes.len(), "block written");
        Ok(())
    }

    /// Write several blocks in one atomic batch.
    pub fn put_many(&self, ctx: &OpContext, blocks: &[(ContentId, Vec<u8>)]) -> StoreResult<()> {
        let batch = blocks
            .iter()
            .map(|(cid, bytes)| self.put_op(cid, bytes))
            .collect::<StoreResult<WriteBatch>>()?;
        self.db.write(ctx, batch)?;
        debug!(count = blocks.len(), "blocks written");
        Ok(())
    }

    /// Read a block. Returns `Ok(None)` if absent.
    pub fn get(&self, ctx: &OpContext, cid: &ContentId) -> StoreResult<Option<Vec<u8>>> {
        let key = self.block_key(cid);
        self.db.read(ctx, |engine| engine.get(&key))
    }

    pub fn has(&self, ctx: &OpContext, cid: &ContentId) -> StoreResult<bool> {
        Ok(self.get(ctx, cid)?.is_some())
    }

    /// Delete a block. Deleting an absent block is a no-op.
    pub fn delete(&self, ctx: &OpContext, cid: &ContentId) -> StoreResult<()> {
        self.db.write(ctx, std::iter::once(self.delete_op(cid)).collect())
    }

    /// Delete everything under this scope, nested partitions included.
    pub fn clear(&self, ctx: &OpContext) -> StoreResult<()> {
        self.db.write(ctx, std::iter::once(self.clear_op()).collect())
    }

    /// `true` when nothing is stored under this scope.
    pub fn is_empty(&self, ctx: &OpContext) -> StoreResult<bool> {
        let range = self.scope.range();
        self.db
            .read(ctx, |engine| Ok(engine.scan(&range, Direction::Forward, Some(1))?.is_empty()))
    }

    /// Lazily iterate the CIDs of blocks stored directly in this scope.
    pub fn all_keys<'a>(&'a self, ctx: &'a OpContext) -> KeyIter<'a> {
        KeyIter {
            store: self,
            ctx,
            next_start: self.scope.range().start,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Batch op that writes a verified block.
    pub fn put_op(&self, cid: &ContentId, bytes: &[u8]) -> StoreResult<BatchOp> {
        cid.verify(bytes)?;
        Ok(BatchOp::Put {
            key: self.block_key(cid),
            value: bytes.to_vec(),
        })
    }

    pub fn delete_op(&self, cid: &ContentId) -> BatchOp {
        BatchOp::Delete { key: self.block_key(cid) }
    }

    pub fn clear_op(&self) -> BatchOp {
        BatchOp::DeleteRange {
            range: self.scope.range(),
        }
    }
}

/// Paging iterator returned by [`BlockStore::all_keys`].
///
/// The cancellation context is checked before every page fetch and every
/// yielded item. The iterator stops after the first error.
pub struct KeyIter<'a> {
    store: &'a BlockStore,
    ctx: &'a OpContext,
    next_start: Vec<u8>,
    buffer: VecDeque<ContentId>,
    exhausted: bool,
}

impl KeyIter<'_> {
    fn fill(&mut self) -> StoreResult<()> {
        let range = KeyRange {
            start: self.next_start.clone(),
            end: self.store.scope.range().end,
        };
        let page = self.store.db.read(self.ctx, |engine| {
            engine.scan(&range, Direction::Forward, Some(KEY_PAGE_SIZE))
        })?;
        if page.len() < KEY_PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some((last, _)) = page.last() {
            self.next_start = key_successor(last);
        }
        for (key, _) in page {
            if let Some(cid) = self.direct_child(&key) {
                self.buffer.push_back(cid);
            }
        }
        Ok(())
    }

    // Keys of nested partitions have more than one segment below the scope.
    fn direct_child(&self, key: &[u8]) -> Option<ContentId> {
        let rest = self.store.scope.strip(key)?;
        let (segment, tail) = split_segment(rest).ok()?;
        if !tail.is_empty() {
            return None;
        }
        ContentId::from_bytes(&segment).ok()
    }
}

impl Iterator for KeyIter<'_> {
    type Item = StoreResult<ContentId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cid) = self.buffer.pop_front() {
                if let Err(e) = self.ctx.check() {
                    self.exhausted = true;
                    self.buffer.clear();
                    return Some(Err(e));
                }
                return Some(Ok(cid));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}
