use ark_index::IndexError;
use ark_ocfl::OcflError;
use ark_types::{ResourceId, TransactionId, TypeError};

/// Errors from the transactional kernel.
///
/// Variants group into the kinds callers dispatch on: absence
/// (`NotFound`), semantic clashes (`Conflict`), lock contention
/// (`ConcurrentUpdate`), fixity failures (`ChecksumMismatch`), misuse
/// (`InvalidOperation`, the lifecycle variants), and backend failures
/// (`Backend`, `Index`, `CommitFailed`). Only the last group ends a
/// transaction; everything above it leaves the transaction usable.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The resource, version, or mapping does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested change contradicts recorded state, such as a
    /// tombstone with a different interaction model.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Another live transaction holds the resource.
    #[error("{resource} is locked by transaction {holder}, requested by {requester}")]
    ConcurrentUpdate {
        resource: ResourceId,
        holder: TransactionId,
        requester: TransactionId,
    },

    /// A caller-declared digest does not match the received content.
    #[error("checksum mismatch for {resource}: expected {algorithm} {expected}, computed {computed}")]
    ChecksumMismatch {
        resource: ResourceId,
        algorithm: String,
        expected: String,
        computed: String,
    },

    /// The operation is not supported by this session.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// No transaction with this id exists.
    #[error("transaction not found: {0}")]
    TxNotFound(TransactionId),

    /// The transaction is no longer open.
    #[error("transaction {tx} is {state}")]
    TxClosed { tx: TransactionId, state: String },

    /// A storage session call arrived in the wrong lifecycle state.
    #[error("storage session of {tx} is {state}, cannot {action}")]
    SessionState {
        tx: TransactionId,
        state: String,
        action: String,
    },

    /// One or more object commits failed. When `partial` is set, other
    /// objects had already committed and the transaction cannot be
    /// unwound; the condition is fatal and non-retryable.
    #[error("commit of transaction {tx} failed (partial: {partial}): {}", .reasons.join("; "))]
    CommitFailed {
        tx: TransactionId,
        partial: bool,
        reasons: Vec<String>,
    },

    /// Malformed configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Underlying object-store failure, wrapping its cause.
    #[error("storage backend failure: {0}")]
    Backend(#[source] OcflError),

    /// Index journal or lookup failure, wrapping its cause.
    #[error("index failure: {0}")]
    Index(#[source] IndexError),
}

/// Result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl From<OcflError> for KernelError {
    fn from(e: OcflError) -> Self {
        match e {
            OcflError::ObjectNotFound(id) => Self::NotFound(id),
            OcflError::FileNotFound { object, path } => {
                Self::NotFound(format!("{path} in object {object}"))
            }
            OcflError::VersionNotFound { object, version } => {
                Self::NotFound(format!("version {version} of object {object}"))
            }
            other => Self::Backend(other),
        }
    }
}

impl From<IndexError> for KernelError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::MappingNotFound(id) => Self::NotFound(id.to_string()),
            other => Self::Index(other),
        }
    }
}

impl From<TypeError> for KernelError {
    fn from(e: TypeError) -> Self {
        Self::InvalidOperation(e.to_string())
    }
}
