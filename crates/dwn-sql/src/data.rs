use std::io::{Cursor, Read};

use rusqlite::{params, OptionalExtension};
use tracing::debug;

use dwn_data::ChunkingStrategy;
use dwn_types::{
    AssociateResult, ContentId, DataStore, GetResult, OpContext, PutResult, StoreError, StoreResult,
};

use crate::database::{backend, SqlDatabase};

/// [`DataStore`] over the `data_stores` and `data_store_references` tables.
///
/// Payloads are stored whole, but their CIDs are computed with the same
/// [`ChunkingStrategy`] as the embedded backend so both agree on every
/// `dataCid`.
#[derive(Clone, Debug)]
pub struct DataStoreSql {
    db: SqlDatabase,
    chunking: ChunkingStrategy,
}

impl DataStoreSql {
    pub fn new(db: SqlDatabase, chunking: ChunkingStrategy) -> Self {
        Self { db, chunking }
    }

    pub fn database(&self) -> &SqlDatabase {
        &self.db
    }
}

fn not_found(tenant: &str, data_cid: &ContentId) -> StoreError {
    StoreError::NotFound(format!("data {data_cid} for tenant {tenant}"))
}

impl DataStore for DataStoreSql {
    fn open(&self) -> StoreResult<()> {
        self.db.open()
    }

    fn close(&self) -> StoreResult<()> {
        self.db.close()
    }

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
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes)?;
        let computed = self.chunking.content_id(&bytes)?;
        if computed != expected {
            return Err(StoreError::CidMismatch {
                expected: expected.to_string(),
                computed: computed.to_string(),
            });
        }

        let size = bytes.len() as u64;
        let key = expected.to_string();
        self.db.transaction(ctx, |tx| {
            tx.execute(
                "INSERT OR IGNORE INTO data_stores (tenant, data_cid, encoded_data, data_size) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![tenant, key, bytes, size as i64],
            )
            .map_err(backend)?;
            tx.execute(
                "INSERT OR IGNORE INTO data_store_references (tenant, data_cid, message_cid) \
                 VALUES (?1, ?2, ?3)",
                params![tenant, key, message_cid],
            )
            .map_err(backend)?;
            Ok(())
        })?;
        debug!(tenant, message_cid, data_cid = %expected, size, "payload stored");
        Ok(PutResult {
            data_cid: expected,
            data_size: size,
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
        let key = data_cid.to_string();
        let (payload, referenced) = self.db.with_conn(ctx, |conn| {
            let payload: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT encoded_data FROM data_stores WHERE tenant = ?1 AND data_cid = ?2",
                    params![tenant, key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;
            let referenced = conn
                .query_row(
                    "SELECT 1 FROM data_store_references \
                     WHERE tenant = ?1 AND data_cid = ?2 AND message_cid = ?3",
                    params![tenant, key, message_cid],
                    |_| Ok(()),
                )
                .optional()
                .map_err(backend)?
                .is_some();
            Ok((payload, referenced))
        })?;

        let payload = payload.ok_or_else(|| not_found(tenant, &data_cid))?;
        if !referenced {
            return Err(StoreError::AccessDenied {
                message_cid: message_cid.to_string(),
                data_cid: key,
            });
        }
        Ok(GetResult {
            data_cid,
            data_size: payload.len() as u64,
            data: Box::new(Cursor::new(payload)),
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
        let key = data_cid.to_string();
        let size = self.db.transaction(ctx, |tx| {
            let size: i64 = tx
                .query_row(
                    "SELECT data_size FROM data_stores WHERE tenant = ?1 AND data_cid = ?2",
                    params![tenant, key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?
                .ok_or_else(|| not_found(tenant, &data_cid))?;
            tx.execute(
                "INSERT OR IGNORE INTO data_store_references (tenant, data_cid, message_cid) \
                 VALUES (?1, ?2, ?3)",
                params![tenant, key, message_cid],
            )
            .map_err(backend)?;
            Ok(size)
        })?;
        debug!(tenant, message_cid, data_cid = %data_cid, "payload associated");
        Ok(AssociateResult {
            data_cid,
            data_size: u64::try_from(size).unwrap_or(0),
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
        let key = data_cid.to_string();
        let collected = self.db.transaction(ctx, |tx| {
            tx.execute(
                "DELETE FROM data_store_references \
                 WHERE tenant = ?1 AND data_cid = ?2 AND message_cid = ?3",
                params![tenant, key, message_cid],
            )
            .map_err(backend)?;
            let remaining: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM data_store_references WHERE tenant = ?1 AND data_cid = ?2",
                    params![tenant, key],
                    |row| row.get(0),
                )
                .map_err(backend)?;
            if remaining > 0 {
                return Ok(false);
            }
            let removed = tx
                .execute(
                    "DELETE FROM data_stores WHERE tenant = ?1 AND data_cid = ?2",
                    params![tenant, key],
                )
                .map_err(backend)?;
            Ok(removed > 0)
        })?;
        if collected {
            debug!(tenant, data_cid = %data_cid, "last reference dropped, payload collected");
        }
        Ok(())
    }

    fn clear(&self, ctx: &OpContext) -> StoreResult<()> {
        self.db.transaction(ctx, |tx| {
            tx.execute_batch("DELETE FROM data_store_references; DELETE FROM data_stores;")
                .map_err(backend)
        })?;
        debug!("data store cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OpContext {
        OpContext::background()
    }

    fn store() -> DataStoreSql {
        DataStoreSql::new(SqlDatabase::memory().unwrap(), ChunkingStrategy::default())
    }

    fn cid_of(bytes: &[u8]) -> String {
        ChunkingStrategy::default().content_id(bytes).unwrap().to_string()
    }

    fn put(store: &DataStoreSql, tenant: &str, message_cid: &str, bytes: &[u8]) -> PutResult {
        store
            .put(&ctx(), tenant, message_cid, &cid_of(bytes), &mut Cursor::new(bytes.to_vec()))
            .unwrap()
    }

    fn read(store: &DataStoreSql, tenant: &str, message_cid: &str, data_cid: &str) -> StoreResult<Vec<u8>> {
        store.get(&ctx(), tenant, message_cid, data_cid)?.into_bytes()
    }

    #[test]
    fn round_trip() {
        let store = store();
        let result = put(&store, "t", "m1", b"hello sql");
        assert_eq!(result.data_size, 9);
        assert_eq!(read(&store, "t", "m1", &cid_of(b"hello sql")).unwrap(), b"hello sql");
    }

    #[test]
    fn mismatched_cid_writes_nothing() {
        let store = store();
        let err = store
            .put(&ctx(), "t", "m1", &cid_of(b"one"), &mut Cursor::new(b"two".to_vec()))
            .unwrap_err();
        assert!(matches!(err, StoreError::CidMismatch { .. }));
        assert!(read(&store, "t", "m1", &cid_of(b"one")).unwrap_err().is_not_found());
    }

    #[test]
    fn reference_counted_collection() {
        let store = store();
        let d = cid_of(b"shared");
        put(&store, "t", "m1", b"shared");
        let assoc = store.associate(&ctx(), "t", "m2", &d).unwrap();
        assert_eq!(assoc.data_size, 6);

        store.delete(&ctx(), "t", "m1", &d).unwrap();
        assert_eq!(read(&store, "t", "m2", &d).unwrap(), b"shared");
        assert!(matches!(read(&store, "t", "m1", &d), Err(StoreError::AccessDenied { .. })));

        store.delete(&ctx(), "t", "m2", &d).unwrap();
        assert!(read(&store, "t", "m2", &d).unwrap_err().is_not_found());
    }

    #[test]
    fn associate_requires_existing_data() {
        let store = store();
        let err = store.associate(&ctx(), "t", "m", &cid_of(b"absent")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn tenants_are_isolated() {
        let store = store();
        let d = cid_of(b"same bytes");
        put(&store, "alice", "m1", b"same bytes");
        put(&store, "bob", "m2", b"same bytes");
        assert!(matches!(read(&store, "alice", "m2", &d), Err(StoreError::AccessDenied { .. })));
        assert!(matches!(read(&store, "bob", "m1", &d), Err(StoreError::AccessDenied { .. })));

        store.delete(&ctx(), "alice", "m1", &d).unwrap();
        assert_eq!(read(&store, "bob", "m2", &d).unwrap(), b"same bytes");
    }

    #[test]
    fn clear_wipes_both_tables() {
        let store = store();
        let d = cid_of(b"x");
        put(&store, "t", "m", b"x");
        store.clear(&ctx()).unwrap();
        assert!(read(&store, "t", "m", &d).unwrap_err().is_not_found());
    }
}
