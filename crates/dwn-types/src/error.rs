use std::fmt::Display;

/// Errors shared by every store in the workspace.
///
/// Both the embedded KV backend and the relational backend report failures
/// through this one enum so callers can match on the same variants regardless
/// of which backend is configured.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key or content is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The data exists but the caller's message holds no reference to it.
    #[error("access denied: message {message_cid} holds no reference to {data_cid}")]
    AccessDenied {
        message_cid: String,
        data_cid: String,
    },

    /// Wrong CID version, unsupported hash function, or unparseable CID.
    #[error("invalid content id: {0}")]
    InvalidContentId(String),

    /// Content does not hash to the CID it was stored under.
    #[error("content id mismatch: expected {expected}, computed {computed}")]
    CidMismatch { expected: String, computed: String },

    /// An index put was attempted with no properties.
    #[error("index must include at least one indexable property")]
    EmptyIndexSet,

    /// Operation issued before open or after close.
    #[error("store is not open")]
    StoreNotOpen,

    /// A relational transaction failed and was rolled back.
    #[error("transaction rolled back: {0}")]
    TransactionFailure(String),

    /// The caller's cancellation token fired before the operation started.
    #[error("operation canceled")]
    Canceled,

    /// The caller's deadline passed before the operation started.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A pagination cursor could not be decoded or no longer resolves.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// A query is malformed (unknown sort property, empty one-of list, ...).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A property value cannot be indexed.
    #[error("invalid index value for {property}: {reason}")]
    InvalidIndexValue { property: String, reason: String },

    /// The backend has no column for this property.
    #[error("unsupported indexed property: {0}")]
    UnsupportedProperty(String),

    /// Encoding or decoding of a stored value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error while reading a payload stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by the underlying storage engine.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl Display) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn serialization(err: impl Display) -> Self {
        Self::Serialization(err.to_string())
    }

    /// Returns `true` for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
