//! Per-transaction storage sessions.
//!
//! A [`StorageSession`] is the front door for one transaction's
//! persistence work. It resolves every operation to the backing object,
//! keeps one [`OcflObjectSession`] per distinct object touched, answers
//! reads from staged content first, and drives the prepare, commit, and
//! rollback protocol across all of them. The read-only variant serves
//! latest-committed reads and rejects every mutation.
//!
//! Commit is ordered and collects the union of per-object failures. Once
//! any object has committed, the remainder of a failed commit cannot be
//! unwound; the session reports the failure as partial and refuses
//! rollback from then on.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ark_index::{ContainmentIndex, OcflObjectMap};
use ark_ocfl::paths;
use ark_ocfl::{CommitType, OcflError, OcflObjectSession, OcflRepository, VersionDetails};
use ark_types::{DigestAlgorithm, ResourceHeaders, ResourceId, ResourceOperation, TransactionId};
use tracing::{debug, warn};

use crate::error::{KernelError, KernelResult};
use crate::persisters::{self, default_persisters, PersistContext, Persister};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Open,
    Prepared,
    Committed,
    RolledBack,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Prepared => "prepared",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

struct SessionInner {
    state: SessionState,
    /// Object sessions keyed by object id. Ordered so multi-object
    /// prepare and commit always run in the same sequence.
    sessions: BTreeMap<String, OcflObjectSession>,
}

/// Builds storage sessions over one repository's shared backends.
pub struct SessionFactory {
    repo: Arc<OcflRepository>,
    containment: Arc<ContainmentIndex>,
    mapping: Arc<OcflObjectMap>,
    staging_root: PathBuf,
    default_commit_type: CommitType,
    default_algorithm: DigestAlgorithm,
}

impl SessionFactory {
    pub fn new(
        repo: Arc<OcflRepository>,
        containment: Arc<ContainmentIndex>,
        mapping: Arc<OcflObjectMap>,
        staging_root: PathBuf,
        default_commit_type: CommitType,
        default_algorithm: DigestAlgorithm,
    ) -> Self {
        Self {
            repo,
            containment,
            mapping,
            staging_root,
            default_commit_type,
            default_algorithm,
        }
    }

    /// A writable session bound to `tx`.
    pub fn writable(&self, tx: &TransactionId) -> StorageSession {
        self.build(tx.clone(), false)
    }

    /// The latest-committed read session. Mutations are rejected and
    /// commit and rollback are no-ops.
    pub fn read_only(&self) -> StorageSession {
        self.build(TransactionId::read_only(), true)
    }

    fn build(&self, tx: TransactionId, read_only: bool) -> StorageSession {
        StorageSession {
            tx,
            read_only,
            repo: Arc::clone(&self.repo),
            containment: Arc::clone(&self.containment),
            mapping: Arc::clone(&self.mapping),
            staging_root: self.staging_root.clone(),
            default_commit_type: self.default_commit_type,
            default_algorithm: self.default_algorithm,
            persisters: default_persisters(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Open,
                sessions: BTreeMap::new(),
            }),
        }
    }
}

/// One transaction's view of storage.
pub struct StorageSession {
    tx: TransactionId,
    read_only: bool,
    repo: Arc<OcflRepository>,
    containment: Arc<ContainmentIndex>,
    mapping: Arc<OcflObjectMap>,
    staging_root: PathBuf,
    default_commit_type: CommitType,
    default_algorithm: DigestAlgorithm,
    persisters: Vec<Box<dyn Persister>>,
    inner: Mutex<SessionInner>,
}

impl StorageSession {
    pub fn tx_id(&self) -> &TransactionId {
        &self.tx
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    // ---- writes ----

    /// Route one operation to its object session and stage its changes.
    ///
    /// A failed operation leaves the session open; only commit-path
    /// failures end it.
    pub fn persist(&self, op: &ResourceOperation) -> KernelResult<()> {
        if self.read_only {
            return Err(KernelError::InvalidOperation(
                "the read-only session cannot persist operations".to_string(),
            ));
        }
        let mut inner = self.lock();
        self.ensure_open(&inner, "persist")?;

        let (root, object_id) = self.resolve_target(&inner, op)?;
        let object_session = match inner.sessions.entry(object_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => {
                let key = v.key().clone();
                let mut session = OcflObjectSession::new(
                    self.tx.as_str(),
                    key,
                    Arc::clone(&self.repo),
                    &self.staging_root,
                )?;
                session.set_commit_type(self.default_commit_type);
                v.insert(session)
            }
        };

        let existing = persisters::load_headers(object_session, &root, op.resource_id())?;
        if let Some(user) = op.user() {
            object_session.set_version_info(Some(user.to_string()), None);
        }

        let persister = self
            .persisters
            .iter()
            .find(|p| p.handles(op))
            .ok_or_else(|| {
                KernelError::InvalidOperation(format!(
                    "no persister handles {:?} operations",
                    op.operation_type()
                ))
            })?;
        persister.persist(
            PersistContext {
                tx: &self.tx,
                containment: &self.containment,
                mapping: &self.mapping,
                session: object_session,
                root_resource: &root,
                existing_headers: existing,
                default_algorithm: self.default_algorithm,
            },
            op,
        )
    }

    /// Root resource of the object `op` would land in. The transaction
    /// layer locks this before staging so that writers of one archival
    /// group serialize on the group root.
    pub fn resolve_object_root(&self, op: &ResourceOperation) -> KernelResult<ResourceId> {
        let inner = self.lock();
        self.ensure_open(&inner, "resolve")?;
        let (root, _) = self.resolve_target(&inner, op)?;
        Ok(root)
    }

    // ---- reads ----

    /// Current headers of `resource`, staged state first. Tombstoned
    /// resources return their headers with the deleted flag set.
    pub fn get_headers(&self, resource: &ResourceId) -> KernelResult<ResourceHeaders> {
        let inner = self.lock();
        self.ensure_open(&inner, "read headers")?;
        let (root, object_id) = self.locate(resource)?;
        self.peek_headers(&inner, &object_id, &root, resource)?
            .ok_or_else(|| KernelError::NotFound(resource.to_string()))
    }

    /// N-Triples content of a live RDF resource.
    pub fn get_triples(&self, resource: &ResourceId) -> KernelResult<Vec<u8>> {
        let inner = self.lock();
        self.ensure_open(&inner, "read triples")?;
        let (root, object_id) = self.locate(resource)?;
        let headers = self.require_live(&inner, &object_id, &root, resource)?;
        if !headers.interaction_model.is_rdf() {
            return Err(KernelError::InvalidOperation(format!(
                "{resource} is a binary; read its content instead"
            )));
        }
        let path = paths::rdf_content_path(&root, resource)?;
        self.read_content(&inner, &object_id, &path)
    }

    /// Bytes of a live binary resource.
    pub fn get_binary_content(&self, resource: &ResourceId) -> KernelResult<Vec<u8>> {
        let inner = self.lock();
        self.ensure_open(&inner, "read content")?;
        let (root, object_id) = self.locate(resource)?;
        let headers = self.require_live(&inner, &object_id, &root, resource)?;
        if headers.interaction_model.is_rdf() {
            return Err(KernelError::InvalidOperation(format!(
                "{resource} is an rdf resource; read its triples instead"
            )));
        }
        let path = paths::binary_content_path(&root, resource)?;
        self.read_content(&inner, &object_id, &path)
    }

    /// Triples of `resource` as of an immutable version.
    pub fn get_triples_version(
        &self,
        resource: &ResourceId,
        version: &str,
    ) -> KernelResult<Vec<u8>> {
        let inner = self.lock();
        self.ensure_open(&inner, "read versioned triples")?;
        let (root, object_id) = self.locate(resource)?;
        let path = paths::rdf_content_path(&root, resource)?;
        Ok(self.repo.read_file_version(&object_id, &path, version)?)
    }

    /// Immutable versions of the object backing `resource`, oldest
    /// first. A resource staged in this session but never committed has
    /// no versions yet.
    pub fn list_versions(&self, resource: &ResourceId) -> KernelResult<Vec<VersionDetails>> {
        let inner = self.lock();
        self.ensure_open(&inner, "list versions")?;
        let (_, object_id) = self.locate(resource)?;
        match self.repo.list_versions(&object_id) {
            Ok(versions) => Ok(versions),
            Err(OcflError::ObjectNotFound(_)) if inner.sessions.contains_key(&object_id) => {
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    // ---- lifecycle ----

    /// Validate every object session without touching the backend.
    pub fn prepare(&self) -> KernelResult<()> {
        if self.read_only {
            return Ok(());
        }
        let mut inner = self.lock();
        match inner.state {
            SessionState::Open => {}
            SessionState::Prepared => return Ok(()),
            other => return Err(self.bad_state(other, "prepare")),
        }
        for session in inner.sessions.values_mut() {
            session.prepare()?;
        }
        inner.state = SessionState::Prepared;
        debug!(tx = %self.tx, objects = inner.sessions.len(), "storage session prepared");
        Ok(())
    }

    /// Commit every object session in order, then publish the pending
    /// index entries.
    ///
    /// Every object is attempted even after a failure so the caller sees
    /// the union of errors. Any failure after the first successful object
    /// commit is reported as partial; such a session can be neither
    /// retried nor rolled back.
    pub fn commit(&self) -> KernelResult<()> {
        if self.read_only {
            return Ok(());
        }
        let mut inner = self.lock();
        match inner.state {
            SessionState::Open => {
                for session in inner.sessions.values_mut() {
                    session.prepare()?;
                }
            }
            SessionState::Prepared => {}
            other => return Err(self.bad_state(other, "commit")),
        }

        let mut committed = 0usize;
        let mut reasons = Vec::new();
        for (object_id, session) in inner.sessions.iter_mut() {
            match session.commit() {
                Ok(version) => {
                    committed += 1;
                    debug!(tx = %self.tx, object = %object_id, version = ?version, "object committed");
                }
                Err(e) => {
                    warn!(tx = %self.tx, object = %object_id, error = %e, "object commit failed");
                    reasons.push(format!("{object_id}: {e}"));
                }
            }
        }
        if !reasons.is_empty() {
            inner.state = SessionState::Failed;
            return Err(KernelError::CommitFailed {
                tx: self.tx.clone(),
                partial: committed > 0,
                reasons,
            });
        }

        if let Err(e) = self.containment.commit_transaction(&self.tx) {
            inner.state = SessionState::Failed;
            return Err(KernelError::CommitFailed {
                tx: self.tx.clone(),
                partial: committed > 0,
                reasons: vec![format!("containment index: {e}")],
            });
        }
        if let Err(e) = self.mapping.commit_transaction(&self.tx) {
            inner.state = SessionState::Failed;
            return Err(KernelError::CommitFailed {
                tx: self.tx.clone(),
                partial: true,
                reasons: vec![format!("object map: {e}")],
            });
        }

        inner.state = SessionState::Committed;
        debug!(tx = %self.tx, objects = committed, "storage session committed");
        Ok(())
    }

    /// Discard all staged changes and pending index entries.
    ///
    /// Refused once any object session has committed: a committed backend
    /// object cannot be un-committed, so there is nothing coherent to
    /// roll back to.
    pub fn rollback(&self) -> KernelResult<()> {
        if self.read_only {
            return Ok(());
        }
        let mut inner = self.lock();
        match inner.state {
            SessionState::Open | SessionState::Prepared | SessionState::Failed => {}
            other => return Err(self.bad_state(other, "rollback")),
        }
        if inner.sessions.values().any(OcflObjectSession::is_committed) {
            inner.state = SessionState::Failed;
            return Err(KernelError::SessionState {
                tx: self.tx.clone(),
                state: "partially committed".to_string(),
                action: "rollback".to_string(),
            });
        }
        for session in inner.sessions.values_mut() {
            session.rollback()?;
        }
        self.containment.rollback_transaction(&self.tx);
        self.mapping.rollback_transaction(&self.tx);
        inner.state = SessionState::RolledBack;
        debug!(tx = %self.tx, "storage session rolled back");
        Ok(())
    }

    /// Drop every object session's staging directory and any pending
    /// index entries still attached to this transaction. Valid in any
    /// state; used when a transaction is evicted. After a successful
    /// commit the pending entries are already gone and only the
    /// session map is cleared.
    pub fn close(&self) {
        let mut inner = self.lock();
        for session in inner.sessions.values_mut() {
            session.close();
        }
        inner.sessions.clear();
        if self.read_only {
            return;
        }
        self.containment.rollback_transaction(&self.tx);
        self.mapping.rollback_transaction(&self.tx);
    }

    // ---- resolution ----

    /// Root resource and object id for an operation's target. Creates
    /// derive them from the parent; everything else must already be
    /// mapped.
    fn resolve_target(
        &self,
        inner: &SessionInner,
        op: &ResourceOperation,
    ) -> KernelResult<(ResourceId, String)> {
        match op {
            ResourceOperation::CreateRdf(create) => {
                if create.resource_id.is_root() {
                    let root = create.resource_id.clone();
                    let object_id = root.as_str().to_string();
                    return Ok((root, object_id));
                }
                self.resolve_for_create(inner, &create.resource_id, &create.parent_id)
            }
            ResourceOperation::CreateBinary(create) => {
                self.resolve_for_create(inner, &create.resource_id, &create.parent_id)
            }
            _ => {
                let mapping = self.mapping.get_mapping(Some(&self.tx), op.resource_id())?;
                Ok((mapping.root_resource_id, mapping.ocfl_object_id))
            }
        }
    }

    /// A new resource joins its parent's object when the parent is an
    /// archival group root or member; otherwise it roots an object of
    /// its own.
    fn resolve_for_create(
        &self,
        inner: &SessionInner,
        resource: &ResourceId,
        parent: &ResourceId,
    ) -> KernelResult<(ResourceId, String)> {
        let parent_mapping = self.mapping.get_mapping(Some(&self.tx), parent)?;
        let parent_headers = self
            .peek_headers(
                inner,
                &parent_mapping.ocfl_object_id,
                &parent_mapping.root_resource_id,
                parent,
            )?
            .ok_or_else(|| KernelError::NotFound(parent.to_string()))?;
        if parent_headers.deleted {
            return Err(KernelError::NotFound(format!("{parent} is deleted")));
        }
        if !parent_headers.interaction_model.is_rdf() {
            return Err(KernelError::Conflict(format!(
                "cannot create {resource} inside binary {parent}"
            )));
        }

        if parent_headers.archival_group {
            Ok((parent.clone(), parent_mapping.ocfl_object_id))
        } else if let Some(group) = parent_headers.archival_group_id {
            Ok((group, parent_mapping.ocfl_object_id))
        } else {
            Ok((resource.clone(), resource.as_str().to_string()))
        }
    }

    fn locate(&self, resource: &ResourceId) -> KernelResult<(ResourceId, String)> {
        let mapping = self.mapping.get_mapping(self.index_tx(), resource)?;
        Ok((mapping.root_resource_id, mapping.ocfl_object_id))
    }

    /// Pending index entries are visible to their own transaction only.
    fn index_tx(&self) -> Option<&TransactionId> {
        (!self.read_only).then_some(&self.tx)
    }

    fn peek_headers(
        &self,
        inner: &SessionInner,
        object_id: &str,
        root: &ResourceId,
        resource: &ResourceId,
    ) -> KernelResult<Option<ResourceHeaders>> {
        if let Some(session) = inner.sessions.get(object_id) {
            return persisters::load_headers(session, root, resource);
        }
        let path = paths::header_path(root, resource)?;
        match self.repo.read_file(object_id, &path) {
            Ok(bytes) => {
                let headers =
                    serde_json::from_slice(&bytes).map_err(|e| OcflError::Io(e.into()))?;
                Ok(Some(headers))
            }
            Err(OcflError::ObjectNotFound(_)) | Err(OcflError::FileNotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn require_live(
        &self,
        inner: &SessionInner,
        object_id: &str,
        root: &ResourceId,
        resource: &ResourceId,
    ) -> KernelResult<ResourceHeaders> {
        match self.peek_headers(inner, object_id, root, resource)? {
            None => Err(KernelError::NotFound(resource.to_string())),
            Some(h) if h.deleted => Err(KernelError::NotFound(format!("{resource} is deleted"))),
            Some(h) => Ok(h),
        }
    }

    fn read_content(
        &self,
        inner: &SessionInner,
        object_id: &str,
        path: &str,
    ) -> KernelResult<Vec<u8>> {
        if let Some(session) = inner.sessions.get(object_id) {
            return Ok(session.read_file(path)?);
        }
        Ok(self.repo.read_file(object_id, path)?)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().expect("storage session lock poisoned")
    }

    fn ensure_open(&self, inner: &SessionInner, action: &str) -> KernelResult<()> {
        if inner.state == SessionState::Open {
            Ok(())
        } else {
            Err(self.bad_state(inner.state, action))
        }
    }

    fn bad_state(&self, state: SessionState, action: &str) -> KernelError {
        KernelError::SessionState {
            tx: self.tx.clone(),
            state: state.to_string(),
            action: action.to_string(),
        }
    }
}
