use dwn_types::StoreResult;

/// Half-open byte range `[start, end)`. `end == None` is unbounded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub end: Option<Vec<u8>>,
}

impl KeyRange {
    pub fn new(start: Vec<u8>, end: Option<Vec<u8>>) -> Self {
        Self { start, end }
    }

    /// Every key in the engine.
    pub fn all() -> Self {
        Self::default()
    }

    /// `true` when no key can fall inside the range.
    pub fn is_degenerate(&self) -> bool {
        self.end.as_ref().is_some_and(|end| *end <= self.start)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && self.end.as_ref().map_or(true, |end| key < end.as_slice())
    }

    /// Narrow the start bound. Never widens the range.
    pub fn with_start(mut self, start: Vec<u8>) -> Self {
        if start > self.start {
            self.start = start;
        }
        self
    }

    /// Narrow the end bound. Never widens the range.
    pub fn with_end(mut self, end: Vec<u8>) -> Self {
        match &self.end {
            Some(current) if *current <= end => {}
            _ => self.end = Some(end),
        }
        self
    }
}

/// Scan order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

/// One mutation inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    DeleteRange { range: KeyRange },
}

/// Mutations applied all-or-nothing by [`KvEngine::write`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Put { key, value });
        self
    }

    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key });
        self
    }

    pub fn delete_range(&mut self, range: KeyRange) -> &mut Self {
        self.ops.push(BatchOp::DeleteRange { range });
        self
    }

    pub fn push(&mut self, op: BatchOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = BatchOp>) -> &mut Self {
        self.ops.extend(ops);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchOp> {
        self.ops.iter()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

impl FromIterator<BatchOp> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = BatchOp>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

/// Key/value pair returned by a scan.
pub type Entry = (Vec<u8>, Vec<u8>);

/// An ordered byte-key/byte-value engine.
///
/// Implementations must satisfy these invariants:
/// - Keys are ordered lexicographically by unsigned bytes.
/// - [`KvEngine::write`] applies the whole batch or none of it, in order.
/// - A degenerate range scans nothing and deletes nothing.
///
/// Engines are not synchronized; [`crate::Database`] owns the lock.
pub trait KvEngine: Send + Sync {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Entries in `range`, in `direction` order, at most `limit` of them.
    fn scan(&self, range: &KeyRange, direction: Direction, limit: Option<usize>) -> StoreResult<Vec<Entry>>;

    fn write(&mut self, batch: WriteBatch) -> StoreResult<()>;

    /// `false` for engines whose contents live only in process memory.
    fn is_durable(&self) -> bool;
}
