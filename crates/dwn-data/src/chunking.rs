//! Payload layout: one raw block, or a balanced DAG of raw leaves.

use std::io::{self, Read};

use serde::{Deserialize, Serialize};

use dwn_types::{ContentId, StoreError, StoreResult, CBOR};

/// Default leaf size of the chunked layout.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
/// Default fan-out of interior nodes.
pub const DEFAULT_MAX_LINKS: usize = 174;

/// How payload bytes are laid out as blocks.
///
/// Both layouts store a payload that fits in one chunk as a single raw block,
/// so they assign the same CID to small payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum ChunkingStrategy {
    /// The whole payload is one raw block.
    Flat,
    /// Raw leaves of `chunk_size` bytes under CBOR nodes of at most
    /// `max_links` children.
    Chunked {
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
        #[serde(default = "default_max_links")]
        max_links: usize,
    },
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_links() -> usize {
    DEFAULT_MAX_LINKS
}

impl Default for ChunkingStrategy {
    fn default() -> Self {
        Self::Chunked {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_links: DEFAULT_MAX_LINKS,
        }
    }
}

/// Link from an interior node to a child block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagLink {
    pub cid: ContentId,
    /// Payload bytes below this link.
    pub size: u64,
}

/// Interior node of a chunked payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    pub links: Vec<DagLink>,
    /// Payload bytes below this node.
    pub size: u64,
}

impl DagNode {
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self).map_err(StoreError::serialization)
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        serde_ipld_dagcbor::from_slice(bytes).map_err(StoreError::serialization)
    }
}

/// Blocks produced by importing one payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DagBuild {
    pub root: ContentId,
    pub size: u64,
    /// Every block, leaves first, root last.
    pub blocks: Vec<(ContentId, Vec<u8>)>,
}

impl ChunkingStrategy {
    pub fn chunked(chunk_size: usize, max_links: usize) -> Self {
        Self::Chunked {
            chunk_size: chunk_size.max(1),
            max_links: max_links.max(2),
        }
    }

    /// Split `reader` into blocks.
    ///
    /// Every block is held in the returned [`DagBuild`], so memory use grows
    /// with the payload size.
    pub fn import(&self, reader: &mut dyn Read) -> StoreResult<DagBuild> {
        match *self {
            Self::Flat => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                Ok(single_leaf(bytes))
            }
            Self::Chunked { chunk_size, max_links } => {
                import_chunked(reader, chunk_size.max(1), max_links.max(2))
            }
        }
    }

    /// Canonical CID of `bytes` under this layout.
    pub fn content_id(&self, bytes: &[u8]) -> StoreResult<ContentId> {
        Ok(self.import(&mut io::Cursor::new(bytes))?.root)
    }
}

fn single_leaf(bytes: Vec<u8>) -> DagBuild {
    let root = ContentId::raw(&bytes);
    DagBuild {
        root,
        size: bytes.len() as u64,
        blocks: vec![(root, bytes)],
    }
}

// Up to `size` bytes; shorter only at end of stream.
fn read_chunk(reader: &mut dyn Read, size: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(size);
    (&mut *reader).take(size as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

fn import_chunked(reader: &mut dyn Read, chunk_size: usize, max_links: usize) -> StoreResult<DagBuild> {
    let first = read_chunk(reader, chunk_size)?;
    if first.len() < chunk_size {
        return Ok(single_leaf(first));
    }
    let second = read_chunk(reader, chunk_size)?;
    if second.is_empty() {
        return Ok(single_leaf(first));
    }

    let mut blocks = Vec::new();
    let mut level = Vec::new();
    let mut push_leaf = |bytes: Vec<u8>, blocks: &mut Vec<(ContentId, Vec<u8>)>| {
        let cid = ContentId::raw(&bytes);
        level.push(DagLink {
            cid,
            size: bytes.len() as u64,
        });
        blocks.push((cid, bytes));
    };
    push_leaf(first, &mut blocks);
    push_leaf(second, &mut blocks);
    loop {
        let chunk = read_chunk(reader, chunk_size)?;
        if chunk.is_empty() {
            break;
        }
        push_leaf(chunk, &mut blocks);
    }

    while level.len() > 1 {
        let mut parents = Vec::with_capacity(level.len().div_ceil(max_links));
        for links in level.chunks(max_links) {
            let node = DagNode {
                size: links.iter().map(|l| l.size).sum(),
                links: links.to_vec(),
            };
            let bytes = node.encode()?;
            let cid = ContentId::of(CBOR, &bytes);
            parents.push(DagLink { cid, size: node.size });
            blocks.push((cid, bytes));
        }
        level = parents;
    }

    let root = level
        .pop()
        .ok_or_else(|| StoreError::serialization("chunked import produced no root"))?;
    Ok(DagBuild {
        root: root.cid,
        size: root.size,
        blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dwn_types::RAW;
    use std::io::Cursor;

    fn import(strategy: ChunkingStrategy, bytes: &[u8]) -> DagBuild {
        strategy.import(&mut Cursor::new(bytes.to_vec())).unwrap()
    }

    #[test]
    fn flat_is_one_raw_block() {
        let build = import(ChunkingStrategy::Flat, b"hello world");
        assert_eq!(build.root, ContentId::raw(b"hello world"));
        assert_eq!(build.size, 11);
        assert_eq!(build.blocks.len(), 1);
    }

    #[test]
    fn small_payloads_agree_across_layouts() {
        let chunked = ChunkingStrategy::chunked(16, 4);
        for payload in [&b""[..], &b"short"[..], &[7u8; 16][..]] {
            assert_eq!(
                import(chunked, payload).root,
                import(ChunkingStrategy::Flat, payload).root
            );
        }
    }

    #[test]
    fn chunked_builds_balanced_tree() {
        let strategy = ChunkingStrategy::chunked(4, 3);
        let payload: Vec<u8> = (0u8..40).collect();
        let build = import(strategy, &payload);

        // 10 leaves -> 4 nodes -> 2 nodes -> root.
        assert_eq!(build.blocks.len(), 10 + 4 + 2 + 1);
        assert_eq!(build.root.codec(), CBOR);
        assert_eq!(build.size, 40);
        assert_eq!(build.blocks.last().map(|(c, _)| *c), Some(build.root));
        assert!(build.blocks[..10].iter().all(|(c, _)| c.codec() == RAW));

        let root = DagNode::decode(&build.blocks.last().unwrap().1).unwrap();
        assert_eq!(root.links.len(), 2);
        assert_eq!(root.links.iter().map(|l| l.size).sum::<u64>(), 40);
    }

    #[test]
    fn import_is_deterministic() {
        let strategy = ChunkingStrategy::chunked(8, 2);
        let payload = vec![42u8; 100];
        assert_eq!(import(strategy, &payload), import(strategy, &payload));
        assert_eq!(strategy.content_id(&payload).unwrap(), import(strategy, &payload).root);
    }

    #[test]
    fn degenerate_parameters_are_clamped() {
        let strategy = ChunkingStrategy::chunked(0, 0);
        assert_eq!(strategy, ChunkingStrategy::Chunked { chunk_size: 1, max_links: 2 });
        assert_eq!(import(strategy, b"abc").size, 3);
    }

    #[test]
    fn serde_shape() {
        let s: ChunkingStrategy = serde_json::from_str(r#"{"strategy":"chunked"}"#).unwrap();
        assert_eq!(s, ChunkingStrategy::default());
        let s: ChunkingStrategy = serde_json::from_str(r#"{"strategy":"flat"}"#).unwrap();
        assert_eq!(s, ChunkingStrategy::Flat);
    }
}
