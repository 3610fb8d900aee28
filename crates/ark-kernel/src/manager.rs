//! Registry of live transactions.
//!
//! The manager mints transactions, hands out the shared read-only
//! transaction, and refreshes expiry on every lookup. A reaper thread
//! rolls back transactions that outlive their timeout and evicts
//! entries that reached a terminal state.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use ark_types::TransactionId;

use crate::error::{KernelError, KernelResult};
use crate::locks::ResourceLockManager;
use crate::session::SessionFactory;
use crate::transaction::Transaction;

type TxMap = Arc<Mutex<HashMap<TransactionId, Arc<Transaction>>>>;

/// Mints, tracks, times out, and evicts transactions.
pub struct TransactionManager {
    sessions: Arc<SessionFactory>,
    locks: Arc<ResourceLockManager>,
    timeout: Duration,
    transactions: TxMap,
    read_only: Arc<Transaction>,
    reaper: Option<Reaper>,
}

impl TransactionManager {
    pub fn new(
        sessions: Arc<SessionFactory>,
        locks: Arc<ResourceLockManager>,
        timeout: Duration,
        reaper_interval: Duration,
    ) -> Self {
        let transactions: TxMap = Arc::new(Mutex::new(HashMap::new()));
        let read_only = Arc::new(Transaction::read_only(
            sessions.read_only(),
            Arc::clone(&locks),
        ));
        let reaper = Reaper::spawn(Arc::clone(&transactions), reaper_interval);
        Self {
            sessions,
            locks,
            timeout,
            transactions,
            read_only,
            reaper: Some(reaper),
        }
    }

    /// Open a new transaction. A short-lived one is committed by its
    /// caller right after its single unit of work.
    pub fn create(&self, short_lived: bool) -> Arc<Transaction> {
        let mut map = self.lock_map();
        loop {
            let id = TransactionId::mint();
            if let Entry::Vacant(entry) = map.entry(id.clone()) {
                let tx = Arc::new(Transaction::new(
                    id.clone(),
                    short_lived,
                    self.sessions.writable(&id),
                    Arc::clone(&self.locks),
                    self.timeout,
                ));
                entry.insert(Arc::clone(&tx));
                debug!(tx = %id, short_lived, "transaction opened");
                return tx;
            }
        }
    }

    /// Look up a live transaction, refreshing its expiry. The read-only
    /// id always resolves to the shared read-only transaction. An
    /// expired transaction is rolled back, evicted, and reported
    /// closed.
    pub fn get(&self, id: &TransactionId) -> KernelResult<Arc<Transaction>> {
        if id.is_read_only() {
            return Ok(Arc::clone(&self.read_only));
        }
        let tx = self
            .lock_map()
            .get(id)
            .cloned()
            .ok_or_else(|| KernelError::TxNotFound(id.clone()))?;
        if tx.expired() {
            warn!(tx = %id, "transaction expired, rolling back");
            if let Err(e) = tx.rollback() {
                warn!(tx = %id, error = %e, "rollback of expired transaction failed");
            }
            self.lock_map().remove(id);
            return Err(KernelError::TxClosed {
                tx: id.clone(),
                state: "expired".to_string(),
            });
        }
        tx.refresh();
        Ok(tx)
    }

    /// The shared read-only transaction.
    pub fn read_only(&self) -> Arc<Transaction> {
        Arc::clone(&self.read_only)
    }

    /// Number of tracked transactions, for diagnostics.
    pub fn live_count(&self) -> usize {
        self.lock_map().len()
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<TransactionId, Arc<Transaction>>> {
        self.transactions.lock().expect("transaction map poisoned")
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.stop();
        }
    }
}

/// One reaper pass: roll back expired transactions, then drop every
/// entry whose transaction reached a terminal state.
fn sweep(transactions: &TxMap) {
    let expired: Vec<Arc<Transaction>> = {
        let map = transactions.lock().expect("transaction map poisoned");
        map.values().filter(|tx| tx.expired()).cloned().collect()
    };
    for tx in expired {
        warn!(tx = %tx.id(), "reaping expired transaction");
        if let Err(e) = tx.rollback() {
            warn!(tx = %tx.id(), error = %e, "rollback of expired transaction failed");
        }
    }
    let mut map = transactions.lock().expect("transaction map poisoned");
    map.retain(|_, tx| !tx.state().is_terminal());
}

struct Reaper {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

impl Reaper {
    fn spawn(transactions: TxMap, interval: Duration) -> Self {
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("ark-tx-reaper".to_string())
            .spawn(move || {
                let (flag, cvar) = &*signal;
                loop {
                    {
                        let stopped = flag.lock().expect("reaper shutdown flag poisoned");
                        if *stopped {
                            return;
                        }
                        let (stopped, _) = cvar
                            .wait_timeout(stopped, interval)
                            .expect("reaper shutdown flag poisoned");
                        if *stopped {
                            return;
                        }
                    }
                    sweep(&transactions);
                }
            })
            .expect("failed to spawn transaction reaper");
        Self { shutdown, handle }
    }

    fn stop(self) {
        let (flag, cvar) = &*self.shutdown;
        *flag.lock().expect("reaper shutdown flag poisoned") = true;
        cvar.notify_all();
        if self.handle.join().is_err() {
            warn!("transaction reaper panicked");
        }
    }
}
