//! Durable engine backed by redb (pure Rust, ACID).

use std::path::{Path, PathBuf};

use redb::{AccessGuard, Database, ReadableDatabase, ReadableTable, StorageError, TableDefinition};
use tracing::debug;

use dwn_types::{StoreError, StoreResult};

use crate::engine::{BatchOp, Direction, Entry, KeyRange, KvEngine, WriteBatch};

/// All partitions share one table; partitioning lives in the key prefix.
const KV: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// A [`KvEngine`] persisted in a single redb file.
pub struct RedbEngine {
    db: Database,
    path: PathBuf,
}

impl RedbEngine {
    /// Open or create the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path).map_err(StoreError::backend)?;

        // Create the table up front so read transactions never see it missing.
        let txn = db.begin_write().map_err(StoreError::backend)?;
        {
            let _ = txn.open_table(KV).map_err(StoreError::backend)?;
        }
        txn.commit().map_err(StoreError::backend)?;

        debug!(path = %path.display(), "opened redb engine");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for RedbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbEngine").field("path", &self.path).finish()
    }
}

type Row<'a> = (AccessGuard<'a, &'static [u8]>, AccessGuard<'a, &'static [u8]>);

fn collect<'a>(rows: impl Iterator<Item = Result<Row<'a>, StorageError>>) -> StoreResult<Vec<Entry>> {
    rows.map(|row| {
        let (k, v) = row.map_err(StoreError::backend)?;
        Ok((k.value().to_vec(), v.value().to_vec()))
    })
    .collect()
}

impl KvEngine for RedbEngine {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = txn.open_table(KV).map_err(StoreError::backend)?;
        let value = table.get(key).map_err(StoreError::backend)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn scan(&self, range: &KeyRange, direction: Direction, limit: Option<usize>) -> StoreResult<Vec<Entry>> {
        if range.is_degenerate() {
            return Ok(Vec::new());
        }
        let txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = txn.open_table(KV).map_err(StoreError::backend)?;
        let start = range.start.as_slice();
        let iter = match &range.end {
            Some(end) => table.range(start..end.as_slice()),
            None => table.range(start..),
        }
        .map_err(StoreError::backend)?;

        let limit = limit.unwrap_or(usize::MAX);
        match direction {
            Direction::Forward => collect(iter.take(limit)),
            Direction::Reverse => collect(iter.rev().take(limit)),
        }
    }

    fn write(&mut self, batch: WriteBatch) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut table = txn.open_table(KV).map_err(StoreError::backend)?;
            for op in batch.into_ops() {
                match op {
                    BatchOp::Put { key, value } => {
                        table
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(StoreError::backend)?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice()).map_err(StoreError::backend)?;
                    }
                    BatchOp::DeleteRange { range } => {
                        if range.is_degenerate() {
                            continue;
                        }
                        let mut doomed = Vec::new();
                        {
                            let start = range.start.as_slice();
                            let iter = match &range.end {
                                Some(end) => table.range(start..end.as_slice()),
                                None => table.range(start..),
                            }
                            .map_err(StoreError::backend)?;
                            for item in iter {
                                let (k, _) = item.map_err(StoreError::backend)?;
                                doomed.push(k.value().to_vec());
                            }
                        }
                        for key in doomed {
                            table.remove(key.as_slice()).map_err(StoreError::backend)?;
                        }
                    }
                }
            }
        }
        // Dropping an uncommitted transaction aborts it, so an error above
        // leaves the file untouched.
        txn.commit().map_err(StoreError::backend)?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.redb");
        {
            let mut engine = RedbEngine::open(&path).unwrap();
            let mut batch = WriteBatch::new();
            batch.put(b"k".to_vec(), b"v".to_vec());
            engine.write(batch).unwrap();
        }
        let engine = RedbEngine::open(&path).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(engine.is_durable());
    }

    #[test]
    fn scan_and_delete_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = RedbEngine::open(dir.path().join("nested").join("kv.redb")).unwrap();
        let mut batch = WriteBatch::new();
        for k in ["a1", "a2", "a3", "b1"] {
            batch.put(k.as_bytes().to_vec(), vec![1]);
        }
        engine.write(batch).unwrap();

        let range = KeyRange::new(b"a".to_vec(), Some(b"b".to_vec()));
        let rev = engine.scan(&range, Direction::Reverse, Some(2)).unwrap();
        let keys: Vec<_> = rev.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a3".to_vec(), b"a2".to_vec()]);

        let mut batch = WriteBatch::new();
        batch.delete_range(range.clone());
        engine.write(batch).unwrap();
        assert!(engine.scan(&range, Direction::Forward, None).unwrap().is_empty());
        assert_eq!(engine.get(b"b1").unwrap(), Some(vec![1]));
    }
}
