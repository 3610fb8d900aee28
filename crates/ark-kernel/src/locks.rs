//! Fail-fast resource locking.
//!
//! A transaction that touches a resource another open transaction already
//! holds does not wait; the attempt fails immediately with
//! [`KernelError::ConcurrentUpdate`] naming both transactions. Locks are
//! held until the owning transaction commits or rolls back.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use ark_types::{ResourceId, TransactionId};
use tracing::debug;

use crate::error::{KernelError, KernelResult};

#[derive(Default)]
struct LockState {
    exclusive: HashMap<ResourceId, TransactionId>,
    shared: HashMap<ResourceId, HashSet<TransactionId>>,
}

/// Tracks which transaction holds which resource.
#[derive(Default)]
pub struct ResourceLockManager {
    state: Mutex<LockState>,
}

impl ResourceLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an exclusive lock on `resource` for `tx`.
    ///
    /// Fails if any other transaction holds the resource, exclusively or
    /// shared. Re-acquiring a lock the transaction already holds is a
    /// no-op; a shared hold by the same transaction is upgraded.
    pub fn acquire_exclusive(
        &self,
        tx: &TransactionId,
        resource: &ResourceId,
    ) -> KernelResult<()> {
        let mut state = self.state.lock().expect("lock state poisoned");
        if let Some(holder) = state.exclusive.get(resource) {
            if holder != tx {
                return Err(concurrent(resource, holder, tx));
            }
            return Ok(());
        }
        if let Some(readers) = state.shared.get(resource) {
            if let Some(other) = readers.iter().find(|r| *r != tx) {
                return Err(concurrent(resource, other, tx));
            }
        }
        if let Some(readers) = state.shared.get_mut(resource) {
            readers.remove(tx);
            if readers.is_empty() {
                state.shared.remove(resource);
            }
        }
        state.exclusive.insert(resource.clone(), tx.clone());
        debug!(%tx, %resource, "acquired exclusive lock");
        Ok(())
    }

    /// Take a shared lock on `resource` for `tx`.
    ///
    /// Any number of transactions may share a resource; only another
    /// transaction's exclusive hold conflicts. A transaction that already
    /// holds the resource exclusively keeps the stronger lock.
    pub fn acquire_shared(&self, tx: &TransactionId, resource: &ResourceId) -> KernelResult<()> {
        let mut state = self.state.lock().expect("lock state poisoned");
        if let Some(holder) = state.exclusive.get(resource) {
            if holder != tx {
                return Err(concurrent(resource, holder, tx));
            }
            return Ok(());
        }
        state
            .shared
            .entry(resource.clone())
            .or_default()
            .insert(tx.clone());
        debug!(%tx, %resource, "acquired shared lock");
        Ok(())
    }

    /// Drop every lock `tx` holds.
    pub fn release_all(&self, tx: &TransactionId) {
        let mut state = self.state.lock().expect("lock state poisoned");
        state.exclusive.retain(|_, holder| holder != tx);
        state.shared.retain(|_, readers| {
            readers.remove(tx);
            !readers.is_empty()
        });
        debug!(%tx, "released locks");
    }

    /// Every resource `tx` currently holds, exclusive or shared, sorted.
    pub fn held_by(&self, tx: &TransactionId) -> Vec<ResourceId> {
        let state = self.state.lock().expect("lock state poisoned");
        let mut held: Vec<ResourceId> = state
            .exclusive
            .iter()
            .filter(|(_, holder)| *holder == tx)
            .map(|(resource, _)| resource.clone())
            .collect();
        held.extend(
            state
                .shared
                .iter()
                .filter(|(_, readers)| readers.contains(tx))
                .map(|(resource, _)| resource.clone()),
        );
        held.sort();
        held
    }

    /// Resources currently locked, for diagnostics.
    pub fn held_count(&self) -> usize {
        let state = self.state.lock().expect("lock state poisoned");
        state.exclusive.len() + state.shared.len()
    }
}

fn concurrent(resource: &ResourceId, holder: &TransactionId, requester: &TransactionId) -> KernelError {
    KernelError::ConcurrentUpdate {
        resource: resource.clone(),
        holder: holder.clone(),
        requester: requester.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn rid(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn tid(s: &str) -> TransactionId {
        TransactionId::from_string(s)
    }

    #[test]
    fn exclusive_blocks_other_tx() {
        let locks = ResourceLockManager::new();
        let (a, b) = (tid("tx-a"), tid("tx-b"));
        let r = rid("info:ark/obj");
        locks.acquire_exclusive(&a, &r).unwrap();
        let err = locks.acquire_exclusive(&b, &r).unwrap_err();
        match err {
            KernelError::ConcurrentUpdate { holder, requester, .. } => {
                assert_eq!(holder, a);
                assert_eq!(requester, b);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reentrant_exclusive_is_noop() {
        let locks = ResourceLockManager::new();
        let a = tid("tx-a");
        let r = rid("info:ark/obj");
        locks.acquire_exclusive(&a, &r).unwrap();
        locks.acquire_exclusive(&a, &r).unwrap();
    }

    #[test]
    fn shared_locks_coexist() {
        let locks = ResourceLockManager::new();
        let r = rid("info:ark/obj");
        locks.acquire_shared(&tid("tx-a"), &r).unwrap();
        locks.acquire_shared(&tid("tx-b"), &r).unwrap();
    }

    #[test]
    fn shared_blocks_foreign_exclusive() {
        let locks = ResourceLockManager::new();
        let (a, b) = (tid("tx-a"), tid("tx-b"));
        let r = rid("info:ark/obj");
        locks.acquire_shared(&a, &r).unwrap();
        assert!(locks.acquire_exclusive(&b, &r).is_err());
    }

    #[test]
    fn exclusive_blocks_foreign_shared() {
        let locks = ResourceLockManager::new();
        let (a, b) = (tid("tx-a"), tid("tx-b"));
        let r = rid("info:ark/obj");
        locks.acquire_exclusive(&a, &r).unwrap();
        assert!(locks.acquire_shared(&b, &r).is_err());
    }

    #[test]
    fn shared_upgrades_for_same_tx() {
        let locks = ResourceLockManager::new();
        let a = tid("tx-a");
        let r = rid("info:ark/obj");
        locks.acquire_shared(&a, &r).unwrap();
        locks.acquire_exclusive(&a, &r).unwrap();
        // Still exclusive: another reader must now be refused.
        assert!(locks.acquire_shared(&tid("tx-b"), &r).is_err());
    }

    #[test]
    fn release_frees_resources() {
        let locks = ResourceLockManager::new();
        let (a, b) = (tid("tx-a"), tid("tx-b"));
        let r = rid("info:ark/obj");
        locks.acquire_exclusive(&a, &r).unwrap();
        locks.release_all(&a);
        locks.acquire_exclusive(&b, &r).unwrap();
        assert_eq!(locks.held_count(), 1);
    }

    #[test]
    fn exclusive_with_own_shared_hold_succeeds() {
        let locks = ResourceLockManager::new();
        let a = tid("tx-a");
        let r = rid("info:ark/obj");
        locks.acquire_shared(&a, &r).unwrap();
        locks.acquire_shared(&a, &r).unwrap();
        locks.acquire_exclusive(&a, &r).unwrap();
        locks.release_all(&a);
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn held_by_lists_both_kinds_of_hold() {
        let locks = ResourceLockManager::new();
        let (a, b) = (tid("tx-a"), tid("tx-b"));
        locks.acquire_exclusive(&a, &rid("info:ark/x")).unwrap();
        locks.acquire_shared(&a, &rid("info:ark/y")).unwrap();
        locks.acquire_shared(&b, &rid("info:ark/y")).unwrap();

        assert_eq!(locks.held_by(&a), vec![rid("info:ark/x"), rid("info:ark/y")]);
        assert_eq!(locks.held_by(&b), vec![rid("info:ark/y")]);

        locks.release_all(&a);
        assert!(locks.held_by(&a).is_empty());
        assert_eq!(locks.held_by(&b), vec![rid("info:ark/y")]);
    }

    #[test]
    fn exactly_one_concurrent_writer_wins() {
        let locks = Arc::new(ResourceLockManager::new());
        let barrier = Arc::new(Barrier::new(8));
        let r = rid("info:ark/obj");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let locks = Arc::clone(&locks);
                let barrier = Arc::clone(&barrier);
                let r = r.clone();
                thread::spawn(move || {
                    let tx = tid(&format!("tx-{i}"));
                    barrier.wait();
                    locks.acquire_exclusive(&tx, &r).is_ok()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(locks.held_count(), 1);
    }
}
