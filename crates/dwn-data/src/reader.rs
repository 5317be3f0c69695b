use std::collections::VecDeque;
use std::io::{self, Read};

use dwn_store::BlockStore;
use dwn_types::{ContentId, OpContext, StoreError, StoreResult, CBOR, RAW};

use crate::chunking::DagNode;

/// Payload size recorded in a root block.
pub fn root_size(root: &ContentId, bytes: &[u8]) -> StoreResult<u64> {
    match root.codec() {
        RAW => Ok(bytes.len() as u64),
        CBOR => Ok(DagNode::decode(bytes)?.size),
        other => Err(StoreError::InvalidContentId(format!(
            "{root}: unsupported payload codec 0x{other:x}"
        ))),
    }
}

/// Streams a payload by walking its DAG depth-first.
///
/// Blocks are fetched one at a time as the caller reads, each under a short
/// read lock, so a large payload is never held in memory at once. If the
/// payload is collected while a read is in progress the next fetch fails
/// with `NotFound`.
pub struct DagReader {
    blocks: BlockStore,
    ctx: OpContext,
    pending: VecDeque<ContentId>,
    current: io::Cursor<Vec<u8>>,
}

impl DagReader {
    /// Start reading at `root`, whose bytes the caller already fetched.
    pub fn new(blocks: BlockStore, ctx: OpContext, root: ContentId, root_bytes: Vec<u8>) -> StoreResult<Self> {
        let mut reader = Self {
            blocks,
            ctx,
            pending: VecDeque::new(),
            current: io::Cursor::new(Vec::new()),
        };
        reader.visit(root, root_bytes)?;
        Ok(reader)
    }

    fn visit(&mut self, cid: ContentId, bytes: Vec<u8>) -> StoreResult<()> {
        match cid.codec() {
            RAW => {
                self.current = io::Cursor::new(bytes);
                Ok(())
            }
            CBOR => {
                let node = DagNode::decode(&bytes)?;
                for link in node.links.into_iter().rev() {
                    self.pending.push_front(link.cid);
                }
                Ok(())
            }
            other => Err(StoreError::InvalidContentId(format!(
                "{cid}: unsupported payload codec 0x{other:x}"
            ))),
        }
    }

    // Advance to the next leaf. Returns `false` at end of payload.
    fn advance(&mut self) -> StoreResult<bool> {
        while let Some(cid) = self.pending.pop_front() {
            let bytes = self
                .blocks
                .get(&self.ctx, &cid)?
                .ok_or_else(|| StoreError::NotFound(format!("payload block {cid}")))?;
            self.visit(cid, bytes)?;
            if cid.codec() == RAW {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Read for DagReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.current.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            let more = self.advance().map_err(|e| match e {
                StoreError::Io(io) => io,
                StoreError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, e),
                other => io::Error::other(other),
            })?;
            if !more {
                return Ok(0);
            }
        }
    }
}
