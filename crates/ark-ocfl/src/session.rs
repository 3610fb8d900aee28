use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ark_types::time::now_seconds;
use ark_types::Digest;
use sha2::{Digest as _, Sha256};
use tracing::debug;

use crate::error::{OcflError, OcflResult};
use crate::inventory::{VersionDetails, VersionMeta};
use crate::repository::{ChangeSet, OcflRepository, StagedWrite};

/// How a session's changes land in the object at commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitType {
    /// Mint a new immutable version.
    NewVersion,
    /// Accumulate into the mutable head; a later version commit folds the
    /// head into a single immutable version.
    Unversioned,
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewVersion => write!(f, "new-version"),
            Self::Unversioned => write!(f, "unversioned"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Open,
    Prepared,
    Committed,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Prepared => "prepared",
            Self::Committed => "committed",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Write buffer over one object: stages content on disk, answers reads
/// from staged content first, and applies everything to the repository
/// in a single commit.
///
/// Moves through open, prepared, committed. A session that committed can
/// no longer be rolled back; its repository changes are already durable.
pub struct OcflObjectSession {
    object_id: String,
    repo: Arc<OcflRepository>,
    staging: PathBuf,
    state: SessionState,
    /// Whether the object existed when the session opened. Commit keys
    /// off this snapshot, so an object created concurrently by another
    /// session is detected as a conflict instead of silently updated.
    existed_at_open: bool,
    writes: BTreeMap<String, StagedWrite>,
    deletes: BTreeSet<String>,
    wipe: bool,
    registered: HashMap<String, Vec<Digest>>,
    commit_type: CommitType,
    author: Option<String>,
    message: Option<String>,
}

impl OcflObjectSession {
    /// Open a session for `object_id`, staging content under
    /// `staging_root/<session id>/<hashed object id>`.
    pub fn new(
        session_id: &str,
        object_id: impl Into<String>,
        repo: Arc<OcflRepository>,
        staging_root: &Path,
    ) -> OcflResult<Self> {
        let object_id = object_id.into();
        let hashed = hex::encode(Sha256::digest(object_id.as_bytes()));
        let staging = staging_root.join(session_id).join(hashed);
        fs::create_dir_all(&staging)?;
        let existed_at_open = repo.object_exists(&object_id);
        Ok(Self {
            object_id,
            repo,
            staging,
            state: SessionState::Open,
            existed_at_open,
            writes: BTreeMap::new(),
            deletes: BTreeSet::new(),
            wipe: false,
            registered: HashMap::new(),
            commit_type: CommitType::NewVersion,
            author: None,
            message: None,
        })
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn commit_type(&self) -> CommitType {
        self.commit_type
    }

    pub fn set_commit_type(&mut self, commit_type: CommitType) {
        self.commit_type = commit_type;
    }

    pub fn set_version_info(&mut self, author: Option<String>, message: Option<String>) {
        self.author = author;
        self.message = message;
    }

    // ---- staging ----

    /// Stage content for `logical`, replacing prior staged content and
    /// cancelling a pending delete of the same path.
    pub fn write_file(&mut self, logical: &str, content: &[u8]) -> OcflResult<()> {
        self.ensure_open("write")?;
        let staged = self.staging.join(logical);
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&staged, content)?;
        let digest = Digest::compute(self.repo.algorithm(), content).hex;
        self.deletes.remove(logical);
        self.writes.insert(
            logical.to_string(),
            StagedWrite {
                source: staged,
                digest,
            },
        );
        Ok(())
    }

    /// Record digests the caller asserts for `logical`; checked against
    /// the staged content by `prepare`.
    pub fn register_digests(&mut self, logical: &str, digests: Vec<Digest>) {
        self.registered
            .entry(logical.to_string())
            .or_default()
            .extend(digests);
    }

    /// Remove `logical` from the session: staged content is discarded,
    /// committed content is deleted at commit.
    pub fn delete_file(&mut self, logical: &str) -> OcflResult<()> {
        self.ensure_open("delete")?;
        if let Some(write) = self.writes.remove(logical) {
            fs::remove_file(&write.source)?;
        }
        self.registered.remove(logical);
        if self.repo.file_exists(&self.object_id, logical) {
            self.deletes.insert(logical.to_string());
        }
        Ok(())
    }

    /// Mark the whole object for removal. Content staged afterwards
    /// recreates the object with fresh history.
    pub fn delete_object(&mut self) -> OcflResult<()> {
        self.ensure_open("delete object")?;
        for (_, write) in std::mem::take(&mut self.writes) {
            fs::remove_file(&write.source)?;
        }
        self.deletes.clear();
        self.registered.clear();
        self.wipe = true;
        Ok(())
    }

    // ---- reads ----

    /// Read through the session: staged content wins over committed.
    pub fn read_file(&self, logical: &str) -> OcflResult<Vec<u8>> {
        if let Some(write) = self.writes.get(logical) {
            return Ok(fs::read(&write.source)?);
        }
        if self.deletes.contains(logical) || self.wipe {
            return Err(OcflError::FileNotFound {
                object: self.object_id.clone(),
                path: logical.to_string(),
            });
        }
        self.repo.read_file(&self.object_id, logical)
    }

    pub fn read_file_version(&self, logical: &str, version: &str) -> OcflResult<Vec<u8>> {
        self.repo
            .read_file_version(&self.object_id, logical, version)
    }

    pub fn file_exists(&self, logical: &str) -> bool {
        if self.writes.contains_key(logical) {
            return true;
        }
        if self.deletes.contains(logical) || self.wipe {
            return false;
        }
        self.repo.file_exists(&self.object_id, logical)
    }

    pub fn list_versions(&self) -> OcflResult<Vec<VersionDetails>> {
        self.repo.list_versions(&self.object_id)
    }

    // ---- lifecycle ----

    /// Verify the session can commit: a brand-new object must have
    /// content, and staged content must match every registered digest.
    /// Leaves no trace in the repository.
    pub fn prepare(&mut self) -> OcflResult<()> {
        match self.state {
            SessionState::Open => {}
            SessionState::Prepared => return Ok(()),
            other => return Err(self.bad_state(other, "prepare")),
        }

        if !self.wipe
            && self.writes.is_empty()
            && self.deletes.is_empty()
            && !self.repo.object_exists(&self.object_id)
        {
            return Err(OcflError::EmptyObject(self.object_id.clone()));
        }

        for (logical, expected) in &self.registered {
            let Some(write) = self.writes.get(logical) else {
                continue;
            };
            let content = fs::read(&write.source)?;
            for digest in expected {
                let computed = Digest::compute(digest.algorithm, &content);
                if !computed.matches(digest) {
                    return Err(OcflError::ChecksumMismatch {
                        path: logical.clone(),
                        algorithm: digest.algorithm.to_string(),
                        expected: digest.hex.clone(),
                        computed: computed.hex,
                    });
                }
            }
        }

        self.state = SessionState::Prepared;
        Ok(())
    }

    /// Apply the session to the repository. Returns the version minted,
    /// if any.
    pub fn commit(&mut self) -> OcflResult<Option<String>> {
        if self.state == SessionState::Open {
            self.prepare()?;
        }
        if self.state != SessionState::Prepared {
            return Err(self.bad_state(self.state, "commit"));
        }

        let meta = VersionMeta {
            created: now_seconds(),
            message: self.message.take(),
            user: self.author.take(),
        };
        let changes = ChangeSet {
            writes: std::mem::take(&mut self.writes),
            deletes: std::mem::take(&mut self.deletes),
        };

        let version = if self.wipe {
            self.repo.purge_object(&self.object_id)?;
            if changes.writes.is_empty() {
                None
            } else {
                self.land(changes, meta, true)?
            }
        } else {
            self.land(changes, meta, !self.existed_at_open)?
        };

        self.state = SessionState::Committed;
        self.cleanup_staging();
        debug!(object = %self.object_id, version = ?version, "object session committed");
        Ok(version)
    }

    /// Discard the session. Fails once the session has committed, since
    /// its repository changes are already durable.
    pub fn rollback(&mut self) -> OcflResult<()> {
        if self.state == SessionState::Committed {
            return Err(self.bad_state(SessionState::Committed, "rollback"));
        }
        self.cleanup_staging();
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Drop the staging directory; valid in any state.
    pub fn close(&mut self) {
        self.cleanup_staging();
        if self.state != SessionState::Committed {
            self.state = SessionState::Closed;
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state == SessionState::Committed
    }

    fn land(
        &self,
        changes: ChangeSet,
        meta: VersionMeta,
        fresh: bool,
    ) -> OcflResult<Option<String>> {
        match self.commit_type {
            CommitType::Unversioned => {
                self.repo.stage_changes(&self.object_id, changes, meta)?;
                Ok(None)
            }
            CommitType::NewVersion if fresh => Ok(Some(self.repo.create_object(
                &self.object_id,
                changes,
                meta,
            )?)),
            CommitType::NewVersion if changes.is_empty() => {
                Ok(Some(self.repo.commit_staged_changes(&self.object_id, meta)?))
            }
            CommitType::NewVersion => {
                Ok(Some(self.repo.update_object(&self.object_id, changes, meta)?))
            }
        }
    }

    fn cleanup_staging(&self) {
        let _ = fs::remove_dir_all(&self.staging);
    }

    fn ensure_open(&self, action: &str) -> OcflResult<()> {
        if self.state == SessionState::Open {
            Ok(())
        } else {
            Err(self.bad_state(self.state, action))
        }
    }

    fn bad_state(&self, state: SessionState, action: &str) -> OcflError {
        OcflError::SessionState {
            object: self.object_id.clone(),
            state: state.to_string(),
            action: action.to_string(),
        }
    }
}
