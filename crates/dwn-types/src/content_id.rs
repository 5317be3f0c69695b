use std::fmt;
use std::str::FromStr;

use cid::{Cid, Version};
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{StoreError, StoreResult};

/// Multicodec code for raw binary blocks.
pub const RAW: u64 = 0x55;
/// Multicodec code for plain CBOR (chunked-DAG interior nodes).
pub const CBOR: u64 = 0x51;
/// Multicodec code for DAG-CBOR (encoded messages).
pub const DAG_CBOR: u64 = 0x71;
/// Multihash code for SHA2-256.
pub const SHA2_256: u64 = 0x12;

/// Content identifier for an immutable byte sequence.
///
/// A `ContentId` is always a version-1 CID whose multihash is SHA2-256. Any
/// other version or hash function is rejected at construction time, so code
/// holding a `ContentId` never needs to re-check it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Cid);

impl ContentId {
    /// Hash `data` with SHA2-256 and wrap it as a CIDv1 with `codec`.
    pub fn of(codec: u64, data: &[u8]) -> Self {
        Self(Cid::new_v1(codec, Code::Sha2_256.digest(data)))
    }

    /// CID of a raw block.
    pub fn raw(data: &[u8]) -> Self {
        Self::of(RAW, data)
    }

    /// CID of a DAG-CBOR encoded value.
    pub fn dag_cbor(data: &[u8]) -> Self {
        Self::of(DAG_CBOR, data)
    }

    /// Validate an existing CID.
    pub fn from_cid(cid: Cid) -> StoreResult<Self> {
        if cid.version() != Version::V1 {
            return Err(StoreError::InvalidContentId(format!(
                "{cid}: only CIDv1 is accepted"
            )));
        }
        if cid.hash().code() != SHA2_256 {
            return Err(StoreError::InvalidContentId(format!(
                "{cid}: unsupported multihash 0x{:x}",
                cid.hash().code()
            )));
        }
        Ok(Self(cid))
    }

    /// Parse from the multibase string form.
    pub fn parse(s: &str) -> StoreResult<Self> {
        let cid = Cid::try_from(s).map_err(|e| StoreError::InvalidContentId(format!("{s}: {e}")))?;
        Self::from_cid(cid)
    }

    /// Parse from the binary form.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        let cid = Cid::try_from(bytes).map_err(|e| StoreError::InvalidContentId(e.to_string()))?;
        Self::from_cid(cid)
    }

    /// Binary form, used as the block key.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn codec(&self) -> u64 {
        self.0.codec()
    }

    /// The raw SHA2-256 digest.
    pub fn digest(&self) -> &[u8] {
        self.0.hash().digest()
    }

    pub fn as_cid(&self) -> &Cid {
        &self.0
    }

    /// Check that `data` hashes to this identifier.
    pub fn verify(&self, data: &[u8]) -> StoreResult<()> {
        let computed = Self::of(self.codec(), data);
        if computed.digest() != self.digest() {
            return Err(StoreError::CidMismatch {
                expected: self.to_string(),
                computed: computed.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<Cid> for ContentId {
    type Error = StoreError;

    fn try_from(cid: Cid) -> Result<Self, Self::Error> {
        Self::from_cid(cid)
    }
}

impl From<ContentId> for Cid {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
