use bytes::Bytes;

use crate::digest::Digest;
use crate::id::ResourceId;
use crate::model::InteractionModel;

/// Broad classification of a [`ResourceOperation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Purge,
    Version,
}

/// Immutable description of one requested mutation.
///
/// Operations are built by the caller, handed to the storage session, and
/// consumed exactly once. The session dispatches on the variant; an
/// operation kind the session does not recognize is rejected rather than
/// guessed at.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceOperation {
    CreateRdf(CreateRdfOperation),
    UpdateRdf(UpdateRdfOperation),
    CreateBinary(CreateBinaryOperation),
    UpdateBinary(UpdateBinaryOperation),
    Delete(DeleteOperation),
    Purge(PurgeOperation),
    CreateVersion(CreateVersionOperation),
}

impl ResourceOperation {
    /// The resource this operation addresses.
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Self::CreateRdf(op) => &op.resource_id,
            Self::UpdateRdf(op) => &op.resource_id,
            Self::CreateBinary(op) => &op.resource_id,
            Self::UpdateBinary(op) => &op.resource_id,
            Self::Delete(op) => &op.resource_id,
            Self::Purge(op) => &op.resource_id,
            Self::CreateVersion(op) => &op.resource_id,
        }
    }

    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::CreateRdf(_) | Self::CreateBinary(_) => OperationType::Create,
            Self::UpdateRdf(_) | Self::UpdateBinary(_) => OperationType::Update,
            Self::Delete(_) => OperationType::Delete,
            Self::Purge(_) => OperationType::Purge,
            Self::CreateVersion(_) => OperationType::Version,
        }
    }

    /// Principal the operation runs as, if the caller supplied one.
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::CreateRdf(op) => op.user.as_deref(),
            Self::UpdateRdf(op) => op.user.as_deref(),
            Self::CreateBinary(op) => op.user.as_deref(),
            Self::UpdateBinary(op) => op.user.as_deref(),
            Self::Delete(op) => op.user.as_deref(),
            Self::Purge(op) => op.user.as_deref(),
            Self::CreateVersion(op) => op.user.as_deref(),
        }
    }
}

/// Create an RDF source (a container) with the given triples.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateRdfOperation {
    pub resource_id: ResourceId,
    pub parent_id: ResourceId,
    pub interaction_model: InteractionModel,
    /// When `true` the new resource becomes an archival group root: its
    /// whole subtree persists inside one backing object.
    pub archival_group: bool,
    /// N-Triples payload. The engine never interprets it.
    pub triples: Bytes,
    /// Permit re-creating over a tombstone with a matching model.
    pub is_overwrite: bool,
    pub user: Option<String>,
}

impl CreateRdfOperation {
    pub fn new(
        resource_id: ResourceId,
        parent_id: ResourceId,
        triples: impl Into<Bytes>,
    ) -> Self {
        Self {
            resource_id,
            parent_id,
            interaction_model: InteractionModel::BasicContainer,
            archival_group: false,
            triples: triples.into(),
            is_overwrite: false,
            user: None,
        }
    }
}

/// Replace the triples of an existing RDF source.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateRdfOperation {
    pub resource_id: ResourceId,
    pub triples: Bytes,
    pub user: Option<String>,
}

impl UpdateRdfOperation {
    pub fn new(resource_id: ResourceId, triples: impl Into<Bytes>) -> Self {
        Self {
            resource_id,
            triples: triples.into(),
            user: None,
        }
    }
}

/// Create a binary (non-RDF source) resource.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateBinaryOperation {
    pub resource_id: ResourceId,
    pub parent_id: ResourceId,
    pub content: Bytes,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    /// Caller-declared digests, verified against the received content
    /// before commit.
    pub user_digests: Vec<Digest>,
    pub is_overwrite: bool,
    pub user: Option<String>,
}

impl CreateBinaryOperation {
    pub fn new(
        resource_id: ResourceId,
        parent_id: ResourceId,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            resource_id,
            parent_id,
            content: content.into(),
            mime_type: None,
            filename: None,
            user_digests: Vec::new(),
            is_overwrite: false,
            user: None,
        }
    }
}

/// Replace the content of an existing binary.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateBinaryOperation {
    pub resource_id: ResourceId,
    pub content: Bytes,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub user_digests: Vec<Digest>,
    pub user: Option<String>,
}

impl UpdateBinaryOperation {
    pub fn new(resource_id: ResourceId, content: impl Into<Bytes>) -> Self {
        Self {
            resource_id,
            content: content.into(),
            mime_type: None,
            filename: None,
            user_digests: Vec::new(),
            user: None,
        }
    }
}

/// Soft-delete: content is removed, headers become a tombstone, history
/// stays queryable.
#[derive(Clone, Debug, PartialEq)]
pub struct DeleteOperation {
    pub resource_id: ResourceId,
    pub user: Option<String>,
}

impl DeleteOperation {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            user: None,
        }
    }
}

/// Hard-delete of an already tombstoned resource: files, mapping, and
/// containment history are all removed.
#[derive(Clone, Debug, PartialEq)]
pub struct PurgeOperation {
    pub resource_id: ResourceId,
    pub user: Option<String>,
}

impl PurgeOperation {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            user: None,
        }
    }
}

/// Roll accumulated unversioned changes into an immutable version.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateVersionOperation {
    pub resource_id: ResourceId,
    pub user: Option<String>,
}

impl CreateVersionOperation {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            user: None,
        }
    }
}
