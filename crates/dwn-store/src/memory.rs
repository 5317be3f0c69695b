//! In-memory engine for tests and ephemeral nodes.

use std::collections::BTreeMap;
use std::ops::Bound;

use dwn_types::StoreResult;

use crate::engine::{BatchOp, Direction, Entry, KeyRange, KvEngine, WriteBatch};

/// A `BTreeMap`-backed [`KvEngine`]. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn range<'a>(&'a self, range: &'a KeyRange) -> impl DoubleEndedIterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> + 'a {
        let end = match &range.end {
            Some(end) => Bound::Excluded(end.as_slice()),
            None => Bound::Unbounded,
        };
        self.entries
            .range::<[u8], _>((Bound::Included(range.start.as_slice()), end))
    }
}

impl KvEngine for MemoryEngine {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn scan(&self, range: &KeyRange, direction: Direction, limit: Option<usize>) -> StoreResult<Vec<Entry>> {
        if range.is_degenerate() {
            return Ok(Vec::new());
        }
        let limit = limit.unwrap_or(usize::MAX);
        let iter = self.range(range).map(|(k, v)| (k.clone(), v.clone()));
        Ok(match direction {
            Direction::Forward => iter.take(limit).collect(),
            Direction::Reverse => iter.rev().take(limit).collect(),
        })
    }

    fn write(&mut self, batch: WriteBatch) -> StoreResult<()> {
        // Nothing below can fail, so applying in place is all-or-nothing.
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    self.entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    self.entries.remove(&key);
                }
                BatchOp::DeleteRange { range } => {
                    if range.is_degenerate() {
                        continue;
                    }
                    let doomed: Vec<Vec<u8>> = self.range(&range).map(|(k, _)| k.clone()).collect();
                    for key in doomed {
                        self.entries.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}
