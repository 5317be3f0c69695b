//! Escaped key segments and partition scopes.
//!
//! A physical key is a sequence of segments. Each segment is written with
//! every `0x00` byte escaped as `0x00 0xFF` and terminated by `0x00 0x01`.
//! Because the terminator sorts below both an escaped zero and any other
//! byte, comparing two encoded keys byte-wise gives the same answer as
//! comparing their segment tuples element by element, and no segment content
//! can ever be mistaken for a boundary.

use dwn_types::{StoreError, StoreResult};

use crate::engine::KeyRange;

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

/// Append one encoded segment to `out`.
pub fn push_segment(out: &mut Vec<u8>, segment: &[u8]) {
    out.reserve(segment.len() + 2);
    for &b in segment {
        if b == ESCAPE {
            out.extend_from_slice(&[ESCAPE, ESCAPED_ZERO]);
        } else {
            out.push(b);
        }
    }
    out.extend_from_slice(&[ESCAPE, TERMINATOR]);
}

/// Encode a full key from its segments.
pub fn encode_segments<S: AsRef<[u8]>>(segments: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for s in segments {
        push_segment(&mut out, s.as_ref());
    }
    out
}

/// Decode the first segment of `key`, returning it and the remaining bytes.
pub fn split_segment(key: &[u8]) -> StoreResult<(Vec<u8>, &[u8])> {
    let mut segment = Vec::new();
    let mut i = 0;
    while i < key.len() {
        if key[i] == ESCAPE {
            match key.get(i + 1) {
                Some(&ESCAPED_ZERO) => segment.push(ESCAPE),
                Some(&TERMINATOR) => return Ok((segment, &key[i + 2..])),
                _ => break,
            }
            i += 2;
        } else {
            segment.push(key[i]);
            i += 1;
        }
    }
    Err(StoreError::Serialization(
        "malformed key: unterminated or badly escaped segment".into(),
    ))
}

/// Decode every segment of `key`.
pub fn decode_segments(mut key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
    let mut segments = Vec::new();
    while !key.is_empty() {
        let (segment, rest) = split_segment(key)?;
        segments.push(segment);
        key = rest;
    }
    Ok(segments)
}

/// Smallest byte string greater than every string starting with `prefix`.
///
/// Returns `None` when no such bound exists (empty or all-`0xFF` prefix).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Smallest key strictly greater than `key`.
pub fn key_successor(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0x00);
    next
}

/// A partition path over one physical store.
///
/// Scopes compose: `root().child("a").child("b")` addresses exactly the same
/// keys as a scope built from the path `["a", "b"]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    prefix: Vec<u8>,
    depth: usize,
}

impl Scope {
    /// The unpartitioned root of a store.
    pub fn root() -> Self {
        Self::default()
    }

    /// Scope at `path` below the root.
    pub fn path<S: AsRef<[u8]>>(path: &[S]) -> Self {
        Self {
            prefix: encode_segments(path),
            depth: path.len(),
        }
    }

    /// Sub-partition `name` of this scope.
    pub fn child(&self, name: impl AsRef<[u8]>) -> Self {
        let mut prefix = self.prefix.clone();
        push_segment(&mut prefix, name.as_ref());
        Self {
            prefix,
            depth: self.depth + 1,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Physical key of `leaf` inside this scope.
    pub fn key(&self, leaf: impl AsRef<[u8]>) -> Vec<u8> {
        let mut key = self.prefix.clone();
        push_segment(&mut key, leaf.as_ref());
        key
    }

    /// Physical key of a multi-segment `leaf` inside this scope.
    pub fn key_of<S: AsRef<[u8]>>(&self, leaf: &[S]) -> Vec<u8> {
        let mut key = self.prefix.clone();
        for s in leaf {
            push_segment(&mut key, s.as_ref());
        }
        key
    }

    /// Every key inside this scope, including nested partitions.
    pub fn range(&self) -> KeyRange {
        KeyRange::new(self.prefix.clone(), prefix_successor(&self.prefix))
    }

    /// Keys inside this scope whose remaining bytes start with `prefix`.
    pub fn range_from(&self, prefix: &[u8]) -> KeyRange {
        let mut start = self.prefix.clone();
        start.extend_from_slice(prefix);
        let end = prefix_successor(&start);
        KeyRange::new(start, end)
    }

    /// `key` with this scope's prefix removed, if it lies inside the scope.
    pub fn strip<'k>(&self, key: &'k [u8]) -> Option<&'k [u8]> {
        key.strip_prefix(self.prefix.as_slice())
    }

    /// Decode the segments of `key` below this scope.
    pub fn leaf_segments(&self, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        let rest = self
            .strip(key)
            .ok_or_else(|| StoreError::Serialization("key lies outside scope".into()))?;
        decode_segments(rest)
    }
}
