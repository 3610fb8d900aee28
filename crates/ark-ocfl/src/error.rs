use ark_types::ResourceId;

/// Errors from the versioned object store.
#[derive(Debug, thiserror::Error)]
pub enum OcflError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// The object exists but does not contain the requested file.
    #[error("no such file in object {object}: {path}")]
    FileNotFound { object: String, path: String },

    /// The object exists but has no version by that name.
    #[error("no such version in object {object}: {version}")]
    VersionNotFound { object: String, version: String },

    /// Attempted to create an object that already exists.
    #[error("object already exists: {0}")]
    ObjectAlreadyExists(String),

    /// Committing a brand-new object with nothing staged.
    #[error("cannot create empty object: {0}")]
    EmptyObject(String),

    /// Staged content does not match a digest the caller declared.
    #[error("checksum mismatch for {path}: expected {algorithm} {expected}, computed {computed}")]
    ChecksumMismatch {
        path: String,
        algorithm: String,
        expected: String,
        computed: String,
    },

    /// A session operation was invoked in the wrong lifecycle state.
    #[error("session for {object} is {state}, cannot {action}")]
    SessionState {
        object: String,
        state: String,
        action: String,
    },

    /// The resource does not belong to the named object root.
    #[error("resource {resource} is not within object rooted at {root}")]
    NotInObject {
        root: ResourceId,
        resource: ResourceId,
    },

    /// The object's inventory is missing, malformed, or undecodable.
    #[error("corrupt inventory for {object}: {reason}")]
    CorruptInventory { object: String, reason: String },

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for object store operations.
pub type OcflResult<T> = Result<T, OcflError>;
