use std::io::Read;

use tracing::debug;

use dwn_refs::{ReferenceLedger, ReferenceSet};
use dwn_store::{BlockStore, Database, Scope, WriteBatch};
use dwn_types::{
    AssociateResult, ContentId, DataStore, GetResult, OpContext, PutResult, StoreError, StoreResult,
};

use crate::chunking::ChunkingStrategy;
use crate::reader::{root_size, DagReader};

/// Name of the partition that holds payload blocks.
pub const DATA_PARTITION: &str = "data";

/// [`DataStore`] over an ordered key-value [`Database`].
///
/// Payload blocks live in `data/<tenant>/<dataCid>` and reference markers in
/// `references/<tenant>/<dataCid>/<messageCid>` of the same database, so every
/// mutation (blocks plus marker, or marker plus collection) commits as one
/// atomic batch.
#[derive(Clone, Debug)]
pub struct DataStoreKv {
    db: Database,
    data: BlockStore,
    refs: ReferenceLedger,
    chunking: ChunkingStrategy,
}

impl DataStoreKv {
    pub fn new(db: Database, chunking: ChunkingStrategy) -> Self {
        Self {
            data: BlockStore::with_scope(db.clone(), Scope::root().child(DATA_PARTITION)),
            refs: ReferenceLedger::new(db.clone()),
            db,
            chunking,
        }
    }

    pub fn chunking(&self) -> ChunkingStrategy {
        self.chunking
    }

    pub fn references(&self) -> &ReferenceLedger {
        &self.refs
    }

    /// Blocks of one payload.
    fn payload(&self, tenant: &str, data_cid: &ContentId) -> BlockStore {
        self.data.partition(tenant).partition(data_cid.to_string())
    }

    // Root block and whether `message_cid` holds a reference, read under one lock.
    fn fetch_root(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message_cid: &str,
        data_cid: &ContentId,
    ) -> StoreResult<(Option<Vec<u8>>, bool)> {
        let root_key = self.payload(tenant, data_cid).block_key(data_cid);
        let marker_key = self.refs.marker_key(tenant, data_cid, message_cid);
        self.db.read(ctx, |engine| {
            Ok((engine.get(&root_key)?, engine.get(&marker_key)?.is_some()))
        })
    }
}

fn not_found(tenant: &str, data_cid: &ContentId) -> StoreError {
    StoreError::NotFound(format!("data {data_cid} for tenant {tenant}"))
}

impl DataStore for DataStoreKv {
    fn open(&self) -> StoreResult<()> {
        self.db.open()
    }

    fn close(&self) -> StoreResult<()> {
        self.db.close()
    }

    /// Store the payload read from `data` under `data_cid`.
    ///
    /// The whole payload is chunked in memory and its root CID checked
    /// before anything is written, so a mismatch or a failing reader leaves
    /// the store untouched. Peak memory is bounded by the payload size plus
    /// the DAG nodes; callers accepting untrusted uploads should cap the
    /// stream themselves, e.g. with [`Read::take`].
    fn put(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message_cid: &str,
        data_cid: &str,
        data: &mut dyn Read,
    ) -> StoreResult<PutResult> {
        ctx.check()?;
        let expected = ContentId::parse(data_cid)?;
        let build = self.chunking.import(data)?;
        if build.root != expected {
            return Err(StoreError::CidMismatch {
                expected: expected.to_string(),
                computed: build.root.to_string(),
            });
        }

        let payload = self.payload(tenant, &expected);
        let mut batch = build
            .blocks
            .iter()
            .map(|(cid, bytes)| payload.put_op(cid, bytes))
            .collect::<StoreResult<WriteBatch>>()?;
        batch.push(self.refs.add_op(tenant, &expected, message_cid));
        self.db.write(ctx, batch)?;

        debug!(
            tenant,
            message_cid,
            data_cid = %expected,
            size = build.size,
            blocks = build.blocks.len(),
            "payload stored"
        );
        Ok(PutResult {
            data_cid: expected,
            data_size: build.size,
        })
    }

    fn get(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message_cid: &str,
        data_cid: &str,
    ) -> StoreResult<GetResult> {
        let data_cid = ContentId::parse(data_cid)?;
        let (root, referenced) = self.fetch_root(ctx, tenant, message_cid, &data_cid)?;
        let root = root.ok_or_else(|| not_found(tenant, &data_cid))?;
        if !referenced {
            return Err(StoreError::AccessDenied {
                message_cid: message_cid.to_string(),
                data_cid: data_cid.to_string(),
            });
        }
        let data_size = root_size(&data_cid, &root)?;
        let reader = DagReader::new(self.payload(tenant, &data_cid), ctx.clone(), data_cid, root)?;
        Ok(GetResult {
            data_cid,
            data_size,
            data: Box::new(reader),
        })
    }

    fn associate(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message_cid: &str,
        data_cid: &str,
    ) -> StoreResult<AssociateResult> {
        let data_cid = ContentId::parse(data_cid)?;
        let root_key = self.payload(tenant, &data_cid).block_key(&data_cid);
        let data_size = self.db.update(ctx, |engine| {
            let root = engine.get(&root_key)?.ok_or_else(|| not_found(tenant, &data_cid))?;
            let size = root_size(&data_cid, &root)?;
            engine.write(std::iter::once(self.refs.add_op(tenant, &data_cid, message_cid)).collect())?;
            Ok(size)
        })?;
        debug!(tenant, message_cid, data_cid = %data_cid, "payload associated");
        Ok(AssociateResult {
            data_cid,
            data_size,
        })
    }

    fn delete(
        &self,
        ctx: &OpContext,
        tenant: &str,
        message_cid: &str,
        data_cid: &str,
    ) -> StoreResult<()> {
        let data_cid = ContentId::parse(data_cid)?;
        let payload = self.payload(tenant, &data_cid);
        let collected = self.db.update(ctx, |engine| {
            let remaining: ReferenceSet = self
                .refs
                .reference_set_in(engine, tenant, &data_cid)?
                .iter()
                .filter(|m| *m != message_cid)
                .collect();
            let mut batch = WriteBatch::new();
            batch.push(self.refs.remove_op(tenant, &data_cid, message_cid));
            let collect = !remaining.retains();
            if collect {
                batch.push(payload.clear_op());
            }
            engine.write(batch)?;
            Ok(collect)
        })?;
        if collected {
            debug!(tenant, data_cid = %data_cid, "last reference dropped, payload collected");
        }
        Ok(())
    }

    fn clear(&self, ctx: &OpContext) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.push(self.data.clear_op()).push(self.refs.clear_op());
        self.db.write(ctx, batch)?;
        debug!("data store cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dwn_store::{Direction, KeyRange};
    use proptest::prelude::*;
    use std::io::Cursor;

    fn ctx() -> OpContext {
        OpContext::background()
    }

    fn store() -> DataStoreKv {
        DataStoreKv::new(Database::memory(), ChunkingStrategy::chunked(16, 4))
    }

    fn put(store: &DataStoreKv, tenant: &str, message: &str, payload: &[u8]) -> PutResult {
        let cid = store.chunking().content_id(payload).unwrap().to_string();
        store
            .put(&ctx(), tenant, message, &cid, &mut Cursor::new(payload.to_vec()))
            .unwrap()
    }

    fn read(store: &DataStoreKv, tenant: &str, message: &str, cid: &ContentId) -> StoreResult<Vec<u8>> {
        store.get(&ctx(), tenant, message, &cid.to_string())?.into_bytes()
    }

    // ----------------------------------------------------------------------
    // Round trip
    // ----------------------------------------------------------------------

    #[test]
    fn put_then_get_returns_payload() {
        let store = store();
        for payload in [&b""[..], &b"small"[..], &[3u8; 500][..]] {
            let result = put(&store, "alice", "m1", payload);
            assert_eq!(result.data_size, payload.len() as u64);
            let got = store.get(&ctx(), "alice", "m1", &result.data_cid.to_string()).unwrap();
            assert_eq!(got.data_size, payload.len() as u64);
            assert_eq!(got.into_bytes().unwrap(), payload);
        }
    }

    #[test]
    fn put_is_idempotent() {
        let store = store();
        let a = put(&store, "alice", "m1", b"same bytes");
        let b = put(&store, "alice", "m1", b"same bytes");
        assert_eq!(a, b);
        assert_eq!(store.references().reference_set(&ctx(), "alice", &a.data_cid).unwrap().len(), 1);
    }

    #[test]
    fn mismatched_cid_writes_nothing() {
        let store = store();
        let wrong = ContentId::raw(b"something else").to_string();
        let err = store
            .put(&ctx(), "alice", "m1", &wrong, &mut Cursor::new(b"payload".to_vec()))
            .unwrap_err();
        assert!(matches!(err, StoreError::CidMismatch { .. }));
        let real = ContentId::raw(b"payload");
        assert!(matches!(read(&store, "alice", "m1", &real), Err(StoreError::NotFound(_))));
        assert!(store.references().reference_set(&ctx(), "alice", &ContentId::parse(&wrong).unwrap()).unwrap().is_empty());
    }

    // Yields `good` bytes, then fails.
    struct FailingReader {
        good: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.good == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "upload dropped"));
            }
            let n = self.good.min(buf.len());
            buf[..n].fill(7);
            self.good -= n;
            Ok(n)
        }
    }

    #[test]
    fn failing_reader_writes_nothing() {
        let store = store();
        let cid = store.chunking().content_id(&[7u8; 200]).unwrap().to_string();
        let err = store
            .put(&ctx(), "alice", "m1", &cid, &mut FailingReader { good: 100 })
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        let written = store.db.read(&ctx(), |e| e.scan(&KeyRange::all(), Direction::Forward, None)).unwrap();
        assert!(written.is_empty());
    }

    #[test]
    fn invalid_cid_string() {
        let store = store();
        let err = store
            .put(&ctx(), "alice", "m1", "d1", &mut Cursor::new(b"x".to_vec()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidContentId(_)));
    }

    // ----------------------------------------------------------------------
    // Access and reference counting
    // ----------------------------------------------------------------------

    #[test]
    fn get_without_reference_is_denied() {
        let store = store();
        let r = put(&store, "alice", "m1", b"secret");
        assert!(matches!(
            read(&store, "alice", "m2", &r.data_cid),
            Err(StoreError::AccessDenied { .. })
        ));
    }

    #[test]
    fn reference_counted_collection() {
        let store = store();
        let payload = vec![5u8; 100];
        let r = put(&store, "alice", "m1", &payload);
        let assoc = store.associate(&ctx(), "alice", "m2", &r.data_cid.to_string()).unwrap();
        assert_eq!(assoc.data_size, 100);

        store.delete(&ctx(), "alice", "m1", &r.data_cid.to_string()).unwrap();
        assert_eq!(read(&store, "alice", "m2", &r.data_cid).unwrap(), payload);

        store.delete(&ctx(), "alice", "m2", &r.data_cid.to_string()).unwrap();
        assert!(matches!(read(&store, "alice", "m2", &r.data_cid), Err(StoreError::NotFound(_))));
        assert!(store.payload("alice", &r.data_cid).is_empty(&ctx()).unwrap());
    }

    #[test]
    fn associate_requires_existing_data() {
        let store = store();
        let cid = ContentId::raw(b"never stored").to_string();
        assert!(matches!(
            store.associate(&ctx(), "alice", "m1", &cid),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn tenants_are_isolated() {
        let store = store();
        let r = put(&store, "alice", "m1", b"shared bytes");
        put(&store, "bob", "m2", b"shared bytes");

        assert!(matches!(
            read(&store, "bob", "m1", &r.data_cid),
            Err(StoreError::AccessDenied { .. })
        ));
        assert!(matches!(
            read(&store, "alice", "m2", &r.data_cid),
            Err(StoreError::AccessDenied { .. })
        ));
        assert!(matches!(
            store.associate(&ctx(), "carol", "m3", &r.data_cid.to_string()),
            Err(StoreError::NotFound(_))
        ));

        store.delete(&ctx(), "alice", "m1", &r.data_cid.to_string()).unwrap();
        assert_eq!(read(&store, "bob", "m2", &r.data_cid).unwrap(), b"shared bytes");
    }

    #[test]
    fn clear_wipes_data_and_references() {
        let store = store();
        let r = put(&store, "alice", "m1", b"x");
        store.clear(&ctx()).unwrap();
        assert!(matches!(read(&store, "alice", "m1", &r.data_cid), Err(StoreError::NotFound(_))));
        assert!(store.references().reference_set(&ctx(), "alice", &r.data_cid).unwrap().is_empty());
    }

    #[test]
    fn redb_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::redb(dir.path().join("data.redb")).unwrap();
        let store = DataStoreKv::new(db, ChunkingStrategy::chunked(4, 2));
        let payload = b"persist me across a close".to_vec();
        let r = put(&store, "alice", "m1", &payload);
        store.close().unwrap();
        assert!(matches!(read(&store, "alice", "m1", &r.data_cid), Err(StoreError::StoreNotOpen)));
        store.open().unwrap();
        assert_eq!(read(&store, "alice", "m1", &r.data_cid).unwrap(), payload);
    }

    // ----------------------------------------------------------------------
    // Properties
    // ----------------------------------------------------------------------

    proptest! {
        #[test]
        fn any_layout_reassembles_the_payload(
            payload in prop::collection::vec(any::<u8>(), 0..600),
            chunk_size in 1usize..64,
            max_links in 2usize..6,
        ) {
            let store = DataStoreKv::new(Database::memory(), ChunkingStrategy::chunked(chunk_size, max_links));
            let r = put(&store, "t", "m", &payload);
            prop_assert_eq!(r.data_size, payload.len() as u64);
            prop_assert_eq!(read(&store, "t", "m", &r.data_cid).unwrap(), payload.clone());

            let flat = ChunkingStrategy::Flat.content_id(&payload).unwrap();
            prop_assert_eq!(flat == r.data_cid, payload.len() <= chunk_size);
        }
    }
}
