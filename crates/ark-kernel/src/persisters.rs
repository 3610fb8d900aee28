//! Operation persisters.
//!
//! Each [`Persister`] translates one family of [`ResourceOperation`] into
//! staged object-session writes plus pending index entries. The storage
//! session resolves which object a resource lands in, prefetches its
//! current headers, and hands both to the matching persister; nothing here
//! touches the backend directly, so a failed operation leaves the
//! transaction usable.

use ark_index::{ContainmentIndex, IndexError, OcflObjectMap};
use ark_ocfl::paths;
use ark_ocfl::{CommitType, OcflError, OcflObjectSession};
use ark_types::time::now_seconds;
use ark_types::{
    Digest, DigestAlgorithm, InteractionModel, ResourceHeaders, ResourceId, ResourceOperation,
    TransactionId,
};
use tracing::debug;

use crate::error::{KernelError, KernelResult};

/// Everything a persister may touch while handling one operation.
///
/// `root_resource` is the resource whose id names the backing object;
/// when it differs from the operation's target, the target is stored as
/// an archival-group member inside that object. `existing_headers` is the
/// target's current header record as seen through the session, staged
/// content included.
pub struct PersistContext<'a> {
    pub tx: &'a TransactionId,
    pub containment: &'a ContainmentIndex,
    pub mapping: &'a OcflObjectMap,
    pub session: &'a mut OcflObjectSession,
    pub root_resource: &'a ResourceId,
    pub existing_headers: Option<ResourceHeaders>,
    pub default_algorithm: DigestAlgorithm,
}

/// One operation family's translation into staged changes.
pub trait Persister: Send + Sync {
    fn handles(&self, op: &ResourceOperation) -> bool;
    fn persist(&self, ctx: PersistContext<'_>, op: &ResourceOperation) -> KernelResult<()>;
}

/// The full persister set, one per operation family.
pub fn default_persisters() -> Vec<Box<dyn Persister>> {
    vec![
        Box::new(CreateRdfPersister),
        Box::new(UpdateRdfPersister),
        Box::new(CreateBinaryPersister),
        Box::new(UpdateBinaryPersister),
        Box::new(DeletePersister),
        Box::new(PurgePersister),
        Box::new(CreateVersionPersister),
    ]
}

// ---- create ----

pub struct CreateRdfPersister;

impl Persister for CreateRdfPersister {
    fn handles(&self, op: &ResourceOperation) -> bool {
        matches!(op, ResourceOperation::CreateRdf(_))
    }

    fn persist(&self, ctx: PersistContext<'_>, op: &ResourceOperation) -> KernelResult<()> {
        let ResourceOperation::CreateRdf(op) = op else {
            return Err(unsupported(op));
        };
        let PersistContext {
            tx,
            containment,
            mapping,
            session,
            root_resource,
            existing_headers,
            ..
        } = ctx;

        let is_root = op.resource_id.is_root();
        if !is_root {
            check_ancestry(&op.resource_id, &op.parent_id)?;
        }
        let group_id = membership(root_resource, &op.resource_id);
        if op.archival_group && group_id.is_some() {
            return Err(KernelError::Conflict(format!(
                "cannot create archival group {} inside archival group {}",
                op.resource_id, root_resource
            )));
        }
        check_create_allowed(
            existing_headers.as_ref(),
            op.interaction_model,
            group_id.as_ref(),
            op.is_overwrite,
        )?;

        let mut headers = ResourceHeaders::new(
            op.resource_id.clone(),
            (!is_root).then(|| op.parent_id.clone()),
            op.interaction_model,
        );
        headers.archival_group = op.archival_group;
        headers.archival_group_id = group_id;
        headers.touch_created(op.user.as_deref(), now_seconds());

        let content_path = paths::rdf_content_path(root_resource, &op.resource_id)?;
        headers.content_path = Some(content_path.clone());
        session.write_file(&content_path, &op.triples)?;
        store_headers(session, root_resource, &headers)?;

        if !is_root {
            containment.add_contained_by(tx, op.parent_id.clone(), op.resource_id.clone());
        }
        ensure_mapping(mapping, tx, &op.resource_id, root_resource, session.object_id())?;

        debug!(tx = %tx, resource = %op.resource_id, model = %op.interaction_model, "created rdf resource");
        Ok(())
    }
}

pub struct CreateBinaryPersister;

impl Persister for CreateBinaryPersister {
    fn handles(&self, op: &ResourceOperation) -> bool {
        matches!(op, ResourceOperation::CreateBinary(_))
    }

    fn persist(&self, ctx: PersistContext<'_>, op: &ResourceOperation) -> KernelResult<()> {
        let ResourceOperation::CreateBinary(op) = op else {
            return Err(unsupported(op));
        };
        let PersistContext {
            tx,
            containment,
            mapping,
            session,
            root_resource,
            existing_headers,
            default_algorithm,
        } = ctx;

        check_ancestry(&op.resource_id, &op.parent_id)?;
        let group_id = membership(root_resource, &op.resource_id);
        check_create_allowed(
            existing_headers.as_ref(),
            InteractionModel::NonRdfSource,
            group_id.as_ref(),
            op.is_overwrite,
        )?;

        let digests =
            binary_digests(&op.resource_id, &op.content, &op.user_digests, default_algorithm)?;

        let mut headers = ResourceHeaders::new(
            op.resource_id.clone(),
            Some(op.parent_id.clone()),
            InteractionModel::NonRdfSource,
        );
        headers.archival_group_id = group_id;
        headers.touch_created(op.user.as_deref(), now_seconds());
        headers.mime_type = op
            .mime_type
            .clone()
            .or_else(|| Some("application/octet-stream".to_string()));
        headers.filename = op.filename.clone();
        headers.content_size = Some(op.content.len() as u64);
        headers.digests = digests.clone();

        let content_path = paths::binary_content_path(root_resource, &op.resource_id)?;
        headers.content_path = Some(content_path.clone());
        session.write_file(&content_path, &op.content)?;
        session.register_digests(&content_path, digests);
        store_headers(session, root_resource, &headers)?;

        containment.add_contained_by(tx, op.parent_id.clone(), op.resource_id.clone());
        ensure_mapping(mapping, tx, &op.resource_id, root_resource, session.object_id())?;

        debug!(tx = %tx, resource = %op.resource_id, size = op.content.len(), "created binary resource");
        Ok(())
    }
}

// ---- update ----

pub struct UpdateRdfPersister;

impl Persister for UpdateRdfPersister {
    fn handles(&self, op: &ResourceOperation) -> bool {
        matches!(op, ResourceOperation::UpdateRdf(_))
    }

    fn persist(&self, ctx: PersistContext<'_>, op: &ResourceOperation) -> KernelResult<()> {
        let ResourceOperation::UpdateRdf(op) = op else {
            return Err(unsupported(op));
        };
        let PersistContext {
            tx,
            session,
            root_resource,
            existing_headers,
            ..
        } = ctx;

        let mut headers = require_live(existing_headers, &op.resource_id)?;
        if !headers.interaction_model.is_rdf() {
            return Err(KernelError::InvalidOperation(format!(
                "cannot replace triples of binary resource {}",
                op.resource_id
            )));
        }
        headers.touch_modified(op.user.as_deref(), now_seconds());

        let content_path = paths::rdf_content_path(root_resource, &op.resource_id)?;
        session.write_file(&content_path, &op.triples)?;
        store_headers(session, root_resource, &headers)?;

        debug!(tx = %tx, resource = %op.resource_id, "updated rdf resource");
        Ok(())
    }
}

pub struct UpdateBinaryPersister;

impl Persister for UpdateBinaryPersister {
    fn handles(&self, op: &ResourceOperation) -> bool {
        matches!(op, ResourceOperation::UpdateBinary(_))
    }

    fn persist(&self, ctx: PersistContext<'_>, op: &ResourceOperation) -> KernelResult<()> {
        let ResourceOperation::UpdateBinary(op) = op else {
            return Err(unsupported(op));
        };
        let PersistContext {
            tx,
            session,
            root_resource,
            existing_headers,
            default_algorithm,
            ..
        } = ctx;

        let mut headers = require_live(existing_headers, &op.resource_id)?;
        if headers.interaction_model != InteractionModel::NonRdfSource {
            return Err(KernelError::InvalidOperation(format!(
                "cannot write binary content to rdf resource {}",
                op.resource_id
            )));
        }

        let digests =
            binary_digests(&op.resource_id, &op.content, &op.user_digests, default_algorithm)?;

        // Replacement content replaces the recorded fixity wholesale.
        headers.digests = digests.clone();
        headers.content_size = Some(op.content.len() as u64);
        if op.mime_type.is_some() {
            headers.mime_type = op.mime_type.clone();
        }
        if op.filename.is_some() {
            headers.filename = op.filename.clone();
        }
        headers.touch_modified(op.user.as_deref(), now_seconds());

        let content_path = paths::binary_content_path(root_resource, &op.resource_id)?;
        session.write_file(&content_path, &op.content)?;
        session.register_digests(&content_path, digests);
        store_headers(session, root_resource, &headers)?;

        debug!(tx = %tx, resource = %op.resource_id, size = op.content.len(), "updated binary resource");
        Ok(())
    }
}

// ---- delete / purge ----

pub struct DeletePersister;

impl Persister for DeletePersister {
    fn handles(&self, op: &ResourceOperation) -> bool {
        matches!(op, ResourceOperation::Delete(_))
    }

    fn persist(&self, ctx: PersistContext<'_>, op: &ResourceOperation) -> KernelResult<()> {
        let ResourceOperation::Delete(op) = op else {
            return Err(unsupported(op));
        };
        let PersistContext {
            tx,
            containment,
            session,
            root_resource,
            existing_headers,
            ..
        } = ctx;

        if op.resource_id.is_root() {
            return Err(KernelError::InvalidOperation(
                "the repository root cannot be deleted".to_string(),
            ));
        }
        let mut headers = require_live(existing_headers, &op.resource_id)?;

        let content_path = if headers.interaction_model.is_rdf() {
            paths::rdf_content_path(root_resource, &op.resource_id)?
        } else {
            paths::binary_content_path(root_resource, &op.resource_id)?
        };
        session.delete_file(&content_path)?;

        headers.mark_deleted(now_seconds());
        headers.last_modified_by = op.user.clone();
        store_headers(session, root_resource, &headers)?;

        containment.remove_resource(tx, &op.resource_id);

        debug!(tx = %tx, resource = %op.resource_id, "deleted resource");
        Ok(())
    }
}

pub struct PurgePersister;

impl Persister for PurgePersister {
    fn handles(&self, op: &ResourceOperation) -> bool {
        matches!(op, ResourceOperation::Purge(_))
    }

    fn persist(&self, ctx: PersistContext<'_>, op: &ResourceOperation) -> KernelResult<()> {
        let ResourceOperation::Purge(op) = op else {
            return Err(unsupported(op));
        };
        let PersistContext {
            tx,
            containment,
            mapping,
            session,
            root_resource,
            existing_headers,
            ..
        } = ctx;

        if op.resource_id.is_root() {
            return Err(KernelError::InvalidOperation(
                "the repository root cannot be purged".to_string(),
            ));
        }
        let headers = match existing_headers {
            None => return Err(KernelError::NotFound(op.resource_id.to_string())),
            Some(h) if !h.deleted => {
                return Err(KernelError::Conflict(format!(
                    "{} must be deleted before it can be purged",
                    op.resource_id
                )))
            }
            Some(h) => h,
        };

        if op.resource_id == *root_resource {
            if !containment.get_contains(Some(tx), &op.resource_id).is_empty()
                || !containment
                    .get_contains_deleted(Some(tx), &op.resource_id)
                    .is_empty()
            {
                return Err(KernelError::Conflict(format!(
                    "{} still contains members and cannot be purged",
                    op.resource_id
                )));
            }
            session.delete_object()?;
        } else {
            let content_path = if headers.interaction_model.is_rdf() {
                paths::rdf_content_path(root_resource, &op.resource_id)?
            } else {
                paths::binary_content_path(root_resource, &op.resource_id)?
            };
            session.delete_file(&content_path)?;
            session.delete_file(&paths::header_path(root_resource, &op.resource_id)?)?;
        }

        mapping.remove_mapping(tx, &op.resource_id);
        containment.purge_resource(tx, &op.resource_id);

        debug!(tx = %tx, resource = %op.resource_id, "purged resource");
        Ok(())
    }
}

// ---- versioning ----

pub struct CreateVersionPersister;

impl Persister for CreateVersionPersister {
    fn handles(&self, op: &ResourceOperation) -> bool {
        matches!(op, ResourceOperation::CreateVersion(_))
    }

    fn persist(&self, ctx: PersistContext<'_>, op: &ResourceOperation) -> KernelResult<()> {
        let ResourceOperation::CreateVersion(op) = op else {
            return Err(unsupported(op));
        };
        let PersistContext {
            tx,
            session,
            root_resource,
            existing_headers,
            ..
        } = ctx;

        require_live(existing_headers, &op.resource_id)?;
        if op.resource_id != *root_resource {
            return Err(KernelError::InvalidOperation(format!(
                "versions are created on {}, which stores {}",
                root_resource, op.resource_id
            )));
        }

        session.set_commit_type(CommitType::NewVersion);
        debug!(tx = %tx, resource = %op.resource_id, "version requested");
        Ok(())
    }
}

// ---- header sidecar io ----

/// Read the target's headers through the session, staged content first.
/// Absence of the object or the sidecar file both mean "no headers yet".
pub(crate) fn load_headers(
    session: &OcflObjectSession,
    root: &ResourceId,
    resource: &ResourceId,
) -> KernelResult<Option<ResourceHeaders>> {
    let path = paths::header_path(root, resource)?;
    match session.read_file(&path) {
        Ok(bytes) => {
            let headers = serde_json::from_slice(&bytes).map_err(|e| OcflError::Io(e.into()))?;
            Ok(Some(headers))
        }
        Err(OcflError::ObjectNotFound(_)) | Err(OcflError::FileNotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn store_headers(
    session: &mut OcflObjectSession,
    root: &ResourceId,
    headers: &ResourceHeaders,
) -> KernelResult<()> {
    let path = paths::header_path(root, &headers.id)?;
    let bytes = serde_json::to_vec_pretty(headers).map_err(|e| OcflError::Io(e.into()))?;
    session.write_file(&path, &bytes)?;
    Ok(())
}

// ---- shared checks ----

fn unsupported(op: &ResourceOperation) -> KernelError {
    KernelError::InvalidOperation(format!(
        "operation {:?} on {} not supported by this persister",
        op.operation_type(),
        op.resource_id()
    ))
}

fn check_ancestry(resource: &ResourceId, parent: &ResourceId) -> KernelResult<()> {
    if resource == parent || !resource.starts_with(parent) {
        return Err(KernelError::InvalidOperation(format!(
            "{parent} is not an ancestor of {resource}"
        )));
    }
    Ok(())
}

/// `Some(root)` when the resource is stored inside another resource's
/// object, `None` when it roots its own.
fn membership(root: &ResourceId, resource: &ResourceId) -> Option<ResourceId> {
    (root != resource).then(|| root.clone())
}

/// A create may land on empty ground freely. Over an existing record,
/// live or tombstoned, it must declare overwrite and must match the
/// recorded interaction model and archival-group membership.
fn check_create_allowed(
    existing: Option<&ResourceHeaders>,
    model: InteractionModel,
    group_id: Option<&ResourceId>,
    is_overwrite: bool,
) -> KernelResult<()> {
    let Some(existing) = existing else {
        return Ok(());
    };
    if !is_overwrite {
        let state = if existing.deleted { "deleted" } else { "present" };
        return Err(KernelError::Conflict(format!(
            "{} is {state}; creating over it requires overwrite",
            existing.id
        )));
    }
    if existing.interaction_model != model {
        return Err(KernelError::Conflict(format!(
            "{} was a {}, cannot recreate as {}",
            existing.id, existing.interaction_model, model
        )));
    }
    if existing.archival_group_id.as_ref() != group_id {
        return Err(KernelError::Conflict(format!(
            "{} changes archival group membership on recreate",
            existing.id
        )));
    }
    Ok(())
}

fn require_live(
    existing: Option<ResourceHeaders>,
    resource: &ResourceId,
) -> KernelResult<ResourceHeaders> {
    match existing {
        None => Err(KernelError::NotFound(resource.to_string())),
        Some(h) if h.deleted => Err(KernelError::NotFound(format!("{resource} is deleted"))),
        Some(h) => Ok(h),
    }
}

/// Compute the server digest, verify every caller-declared digest against
/// the received bytes, and return the merged set.
fn binary_digests(
    resource: &ResourceId,
    content: &[u8],
    declared: &[Digest],
    default_algorithm: DigestAlgorithm,
) -> KernelResult<Vec<Digest>> {
    let mut digests = vec![Digest::compute(default_algorithm, content)];
    for expected in declared {
        let computed = Digest::compute(expected.algorithm, content);
        if !computed.matches(expected) {
            return Err(KernelError::ChecksumMismatch {
                resource: resource.clone(),
                algorithm: expected.algorithm.to_string(),
                expected: expected.hex.clone(),
                computed: computed.hex,
            });
        }
        if !digests.iter().any(|d| d.algorithm == computed.algorithm) {
            digests.push(computed);
        }
    }
    Ok(digests)
}

fn ensure_mapping(
    mapping: &OcflObjectMap,
    tx: &TransactionId,
    resource: &ResourceId,
    root: &ResourceId,
    object_id: &str,
) -> KernelResult<()> {
    match mapping.get_mapping(Some(tx), resource) {
        Ok(_) => Ok(()),
        Err(IndexError::MappingNotFound(_)) => {
            mapping.add_mapping(tx, resource.clone(), root.clone(), object_id.to_string());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
