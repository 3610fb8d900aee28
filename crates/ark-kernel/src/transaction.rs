//! A single unit of work over the repository.
//!
//! A [`Transaction`] pairs one [`StorageSession`] with the resource
//! locks it has claimed. Mutations go through [`Transaction::execute`],
//! which locks before staging; `commit` and `rollback` end the
//! transaction and release every lock it holds. A failed commit
//! unwinds the session and leaves the transaction in the terminal
//! failed state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use ark_types::time::now_seconds;
use ark_types::{ResourceId, ResourceOperation, TransactionId};

use crate::error::{KernelError, KernelResult};
use crate::locks::ResourceLockManager;
use crate::session::StorageSession;

/// Transaction lifecycle.
///
/// `Open` is the only state that accepts work. `Committing` and
/// `RollingBack` are transient while storage is touched. `Committed`,
/// `RolledBack` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
}

impl TxState {
    /// True once the transaction can never accept work again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TxState::Committed | TxState::RolledBack | TxState::Failed
        )
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxState::Open => "open",
            TxState::Committing => "committing",
            TxState::Committed => "committed",
            TxState::RollingBack => "rolling back",
            TxState::RolledBack => "rolled back",
            TxState::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct TxInner {
    state: TxState,
    expires_at: Instant,
    /// Set once the storage session has been fully unwound, so a later
    /// `rollback` call acknowledges instead of unwinding again.
    unwound: bool,
}

/// One unit of work: a storage session plus the locks backing it.
pub struct Transaction {
    id: TransactionId,
    short_lived: bool,
    created_at: DateTime<Utc>,
    timeout: Duration,
    storage: StorageSession,
    locks: Arc<ResourceLockManager>,
    inner: Mutex<TxInner>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        short_lived: bool,
        storage: StorageSession,
        locks: Arc<ResourceLockManager>,
        timeout: Duration,
    ) -> Self {
        Self {
            id,
            short_lived,
            created_at: now_seconds(),
            timeout,
            storage,
            locks,
            inner: Mutex::new(TxInner {
                state: TxState::Open,
                expires_at: Instant::now() + timeout,
                unwound: false,
            }),
        }
    }

    /// The shared read-only transaction. It never expires, takes no
    /// locks, and treats commit and rollback as no-ops.
    pub(crate) fn read_only(storage: StorageSession, locks: Arc<ResourceLockManager>) -> Self {
        Self::new(
            TransactionId::read_only(),
            false,
            storage,
            locks,
            Duration::ZERO,
        )
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    pub fn is_short_lived(&self) -> bool {
        self.short_lived
    }

    pub fn is_read_only(&self) -> bool {
        self.id.is_read_only()
    }

    /// When the transaction was opened, at second precision.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> TxState {
        self.lock_inner().state
    }

    /// The storage session backing this transaction, for reads.
    pub fn storage(&self) -> &StorageSession {
        &self.storage
    }

    // ---- expiry ----

    /// True when an open transaction has outlived its timeout. The
    /// read-only transaction never expires.
    pub fn expired(&self) -> bool {
        if self.is_read_only() {
            return false;
        }
        let inner = self.lock_inner();
        inner.state == TxState::Open && Instant::now() >= inner.expires_at
    }

    /// Push the expiry another full timeout into the future.
    pub fn refresh(&self) {
        if self.is_read_only() {
            return;
        }
        self.lock_inner().expires_at = Instant::now() + self.timeout;
    }

    /// Expire the transaction immediately.
    pub fn expire(&self) {
        if self.is_read_only() {
            return;
        }
        self.lock_inner().expires_at = Instant::now();
    }

    // ---- locks ----

    /// Take an exclusive lock on `resource` for the life of this
    /// transaction. The read-only transaction takes none.
    pub fn lock_resource(&self, resource: &ResourceId) -> KernelResult<()> {
        if self.is_read_only() {
            return Ok(());
        }
        self.ensure_open()?;
        self.locks.acquire_exclusive(&self.id, resource)
    }

    /// Take a shared lock on `resource`, coexisting with other readers.
    pub fn lock_resource_non_exclusive(&self, resource: &ResourceId) -> KernelResult<()> {
        if self.is_read_only() {
            return Ok(());
        }
        self.ensure_open()?;
        self.locks.acquire_shared(&self.id, resource)
    }

    /// Every resource this transaction currently holds a lock on.
    pub fn locked_resources(&self) -> Vec<ResourceId> {
        self.locks.held_by(&self.id)
    }

    // ---- work ----

    /// Lock and stage one mutation.
    ///
    /// The target is locked exclusively, along with the root of the
    /// object it lands in so that writers of one archival group
    /// serialize on the group root. Creates also hold their parent
    /// non-exclusively, which blocks a concurrent delete of the
    /// parent.
    pub fn execute(&self, op: &ResourceOperation) -> KernelResult<()> {
        if self.is_read_only() {
            return Err(KernelError::InvalidOperation(
                "the read-only transaction cannot modify resources".to_string(),
            ));
        }
        self.ensure_open()?;
        self.refresh();

        let root = self.storage.resolve_object_root(op)?;
        self.lock_resource(op.resource_id())?;
        if root != *op.resource_id() {
            self.lock_resource(&root)?;
        }
        match op {
            ResourceOperation::CreateRdf(create) if !create.resource_id.is_root() => {
                self.lock_resource_non_exclusive(&create.parent_id)?;
            }
            ResourceOperation::CreateBinary(create) => {
                self.lock_resource_non_exclusive(&create.parent_id)?;
            }
            _ => {}
        }
        self.storage.persist(op)
    }

    // ---- lifecycle ----

    /// Commit every staged change, then release all locks.
    ///
    /// On failure the session is unwound, the transaction ends failed,
    /// and the commit error is returned.
    pub fn commit(&self) -> KernelResult<()> {
        if self.is_read_only() {
            return Ok(());
        }
        {
            let mut inner = self.lock_inner();
            match inner.state {
                TxState::Open if Instant::now() >= inner.expires_at => {
                    return Err(self.closed("expired"));
                }
                TxState::Open => inner.state = TxState::Committing,
                other => return Err(self.closed(other.to_string())),
            }
        }

        match self.storage.commit() {
            Ok(()) => {
                self.lock_inner().state = TxState::Committed;
                self.release_locks();
                debug!(tx = %self.id, "transaction committed");
                Ok(())
            }
            Err(e) => {
                warn!(tx = %self.id, error = %e, "commit failed, unwinding");
                let unwound = match self.storage.rollback() {
                    Ok(()) => true,
                    Err(rb) => {
                        warn!(tx = %self.id, error = %rb, "unwind after failed commit refused");
                        self.storage.close();
                        false
                    }
                };
                {
                    let mut inner = self.lock_inner();
                    inner.state = TxState::Failed;
                    inner.unwound = unwound;
                }
                self.release_locks();
                Err(e)
            }
        }
    }

    /// Discard every staged change, then release all locks.
    ///
    /// Valid while open and after a failure. A failed transaction whose
    /// session was already unwound just acknowledges; one that was
    /// partially committed cannot be unwound and the refusal surfaces.
    pub fn rollback(&self) -> KernelResult<()> {
        if self.is_read_only() {
            return Ok(());
        }
        {
            let mut inner = self.lock_inner();
            match inner.state {
                TxState::Open => inner.state = TxState::RollingBack,
                TxState::Failed if inner.unwound => {
                    inner.state = TxState::RolledBack;
                    return Ok(());
                }
                TxState::Failed => inner.state = TxState::RollingBack,
                other => return Err(self.closed(other.to_string())),
            }
        }

        match self.storage.rollback() {
            Ok(()) => {
                self.lock_inner().state = TxState::RolledBack;
                self.release_locks();
                debug!(tx = %self.id, "transaction rolled back");
                Ok(())
            }
            Err(e) => {
                self.storage.close();
                self.lock_inner().state = TxState::Failed;
                self.release_locks();
                Err(e)
            }
        }
    }

    /// Force an open transaction into the failed state, unwinding any
    /// staged work.
    pub fn fail(&self) {
        if self.is_read_only() {
            return;
        }
        {
            let mut inner = self.lock_inner();
            if inner.state != TxState::Open {
                return;
            }
            inner.state = TxState::Failed;
        }
        let unwound = match self.storage.rollback() {
            Ok(()) => true,
            Err(e) => {
                warn!(tx = %self.id, error = %e, "unwind of failed transaction refused");
                self.storage.close();
                false
            }
        };
        self.lock_inner().unwound = unwound;
        self.release_locks();
        warn!(tx = %self.id, "transaction failed");
    }

    /// Commit automatically when the transaction was opened for a
    /// single request.
    pub fn commit_if_short_lived(&self) -> KernelResult<()> {
        if self.short_lived {
            self.commit()
        } else {
            Ok(())
        }
    }

    /// Release whatever locks a short-lived transaction still holds
    /// after its single request has run. Commit and rollback already
    /// release; this catches a request that ended without reaching a
    /// terminal state. Long-running transactions keep their locks.
    pub fn release_locks_if_short_lived(&self) {
        if self.short_lived {
            self.release_locks();
            debug!(tx = %self.id, "released short-lived locks");
        }
    }

    // ---- internals ----

    fn ensure_open(&self) -> KernelResult<()> {
        let inner = self.lock_inner();
        match inner.state {
            TxState::Open => {
                if !self.is_read_only() && Instant::now() >= inner.expires_at {
                    return Err(self.closed("expired"));
                }
                Ok(())
            }
            other => Err(self.closed(other.to_string())),
        }
    }

    fn release_locks(&self) {
        self.locks.release_all(&self.id);
    }

    fn closed(&self, state: impl Into<String>) -> KernelError {
        KernelError::TxClosed {
            tx: self.id.clone(),
            state: state.into(),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, TxInner> {
        self.inner.lock().expect("transaction state poisoned")
    }
}
