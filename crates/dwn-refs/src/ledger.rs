use tracing::debug;

use dwn_store::{BatchOp, Database, Direction, KvEngine, Scope, WriteBatch};
use dwn_types::{ContentId, OpContext, StoreResult};

use crate::set::ReferenceSet;

/// Name of the partition that holds reference markers.
pub const REFERENCES_PARTITION: &str = "references";

/// Which messages reference which payloads.
///
/// A reference is an empty marker at
/// `references/<tenant>/<dataCid>/<messageCid>`. The reference count of a
/// payload is the number of markers under its `(tenant, dataCid)` partition;
/// there is no counter to drift.
#[derive(Clone, Debug)]
pub struct ReferenceLedger {
    db: Database,
    root: Scope,
}

impl ReferenceLedger {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            root: Scope::root().child(REFERENCES_PARTITION),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn set_scope(&self, tenant: &str, data_cid: &ContentId) -> Scope {
        self.root.child(tenant).child(data_cid.to_string())
    }

    /// Physical key of one marker.
    pub fn marker_key(&self, tenant: &str, data_cid: &ContentId, message_cid: &str) -> Vec<u8> {
        self.set_scope(tenant, data_cid).key(message_cid)
    }

    /// Batch op that records a reference.
    pub fn add_op(&self, tenant: &str, data_cid: &ContentId, message_cid: &str) -> BatchOp {
        BatchOp::Put {
            key: self.marker_key(tenant, data_cid, message_cid),
            value: Vec::new(),
        }
    }

    /// Batch op that drops a reference.
    pub fn remove_op(&self, tenant: &str, data_cid: &ContentId, message_cid: &str) -> BatchOp {
        BatchOp::Delete {
            key: self.marker_key(tenant, data_cid, message_cid),
        }
    }

    pub fn clear_op(&self) -> BatchOp {
        BatchOp::DeleteRange {
            range: self.root.range(),
        }
    }

    /// Record that `message_cid` references `data_cid`. Idempotent.
    pub fn add(&self, ctx: &OpContext, tenant: &str, data_cid: &ContentId, message_cid: &str) -> StoreResult<()> {
        let batch: WriteBatch = std::iter::once(self.add_op(tenant, data_cid, message_cid)).collect();
        self.db.write(ctx, batch)
    }

    /// Drop one reference and return the references that remain.
    pub fn remove(
        &self,
        ctx: &OpContext,
        tenant: &str,
        data_cid: &ContentId,
        message_cid: &str,
    ) -> StoreResult<ReferenceSet> {
        self.db.update(ctx, |engine| {
            let mut batch = WriteBatch::new();
            batch.push(self.remove_op(tenant, data_cid, message_cid));
            engine.write(batch)?;
            self.reference_set_in(engine, tenant, data_cid)
        })
    }

    /// `true` when the exact (tenant, dataCid, messageCid) marker exists.
    pub fn contains(&self, ctx: &OpContext, tenant: &str, data_cid: &ContentId, message_cid: &str) -> StoreResult<bool> {
        let key = self.marker_key(tenant, data_cid, message_cid);
        self.db.read(ctx, |engine| Ok(engine.get(&key)?.is_some()))
    }

    /// All messages referencing `data_cid` within `tenant`.
    pub fn reference_set(&self, ctx: &OpContext, tenant: &str, data_cid: &ContentId) -> StoreResult<ReferenceSet> {
        self.db
            .read(ctx, |engine| self.reference_set_in(engine, tenant, data_cid))
    }

    /// [`ReferenceLedger::reference_set`] for callers already holding the lock.
    pub fn reference_set_in(
        &self,
        engine: &dyn KvEngine,
        tenant: &str,
        data_cid: &ContentId,
    ) -> StoreResult<ReferenceSet> {
        let scope = self.set_scope(tenant, data_cid);
        let entries = engine.scan(&scope.range(), Direction::Forward, None)?;
        let mut set = ReferenceSet::default();
        for (key, _) in entries {
            if let [message_cid] = scope.leaf_segments(&key)?.as_slice() {
                set.insert(String::from_utf8_lossy(message_cid).into_owned());
            }
        }
        Ok(set)
    }

    /// Remove every reference of every tenant.
    pub fn clear(&self, ctx: &OpContext) -> StoreResult<()> {
        self.db.write(ctx, std::iter::once(self.clear_op()).collect())?;
        debug!("reference ledger cleared");
        Ok(())
    }
}
