use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::RwLock;

use ark_types::time::now_seconds;
use ark_types::{ResourceId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IndexResult;
use crate::journal::Journal;

/// One interval in the containment history of a `(parent, child)` pair.
///
/// An open interval (`end_time` unset) is a live containment relationship;
/// a closed interval is a tombstone. For a given child at most one interval
/// is open at any instant. Entries are appended, then closed, never edited
/// in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainmentEntry {
    pub parent: ResourceId,
    pub child: ResourceId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Durable record of one committed index mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum LogRecord {
    Add(ContainmentEntry),
    Close {
        parent: ResourceId,
        child: ResourceId,
        end_time: DateTime<Utc>,
    },
    Purge {
        parent: ResourceId,
        child: ResourceId,
    },
    Touch {
        resource: ResourceId,
        at: DateTime<Utc>,
    },
}

/// A mutation staged inside a transaction, invisible to everyone else
/// until that transaction commits.
#[derive(Clone, Debug, PartialEq, Eq)]
enum PendingOp {
    Add(ContainmentEntry),
    Delete {
        parent: ResourceId,
        child: ResourceId,
        end_time: DateTime<Utc>,
    },
    Purge {
        parent: ResourceId,
        child: ResourceId,
    },
}

#[derive(Default)]
struct ContainmentState {
    committed: Vec<ContainmentEntry>,
    /// Instant of the last committed containment change per parent.
    updated: HashMap<ResourceId, DateTime<Utc>>,
    pending: HashMap<TransactionId, Vec<PendingOp>>,
}

/// The sole source of truth for repository hierarchy.
///
/// Reads take an optional transaction: with one, the view is committed
/// state plus that transaction's own pending additions minus its pending
/// deletes and purges; with `None`, only committed state is visible.
/// Pending rows of other transactions are never visible to anyone.
pub struct ContainmentIndex {
    inner: RwLock<ContainmentState>,
    journal: Journal<LogRecord>,
}

impl ContainmentIndex {
    /// Open the index, replaying the journal at `path` into memory.
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let (journal, records) = Journal::open(path)?;
        let mut state = ContainmentState::default();
        for record in records {
            apply(&mut state, record);
        }
        debug!(entries = state.committed.len(), "containment index loaded");
        Ok(Self {
            inner: RwLock::new(state),
            journal,
        })
    }

    // ---- Reads ----

    /// The live parent of `child`, if any.
    pub fn get_contained_by(
        &self,
        tx: Option<&TransactionId>,
        child: &ResourceId,
    ) -> Option<ResourceId> {
        let state = self.read();
        let ops = tx.and_then(|t| state.pending.get(t));

        let committed = state
            .committed
            .iter()
            .filter(|e| e.end_time.is_none() && &e.child == child)
            .map(|e| e.parent.clone());
        let staged = ops.into_iter().flatten().filter_map(|op| match op {
            PendingOp::Add(e) if &e.child == child && e.end_time.is_none() => {
                Some(e.parent.clone())
            }
            _ => None,
        });

        committed
            .chain(staged)
            .find(|parent| !hidden_in_tx(ops, parent, child))
    }

    /// Live children of `parent`, sorted by identifier.
    pub fn get_contains(
        &self,
        tx: Option<&TransactionId>,
        parent: &ResourceId,
    ) -> Vec<ResourceId> {
        let state = self.read();
        let ops = tx.and_then(|t| state.pending.get(t));

        let mut children: BTreeSet<ResourceId> = state
            .committed
            .iter()
            .filter(|e| e.end_time.is_none() && &e.parent == parent)
            .map(|e| e.child.clone())
            .collect();

        for op in ops.into_iter().flatten() {
            match op {
                PendingOp::Add(e) if &e.parent == parent && e.end_time.is_none() => {
                    children.insert(e.child.clone());
                }
                PendingOp::Delete {
                    parent: p, child, ..
                }
                | PendingOp::Purge { parent: p, child } if p == parent => {
                    children.remove(child);
                }
                _ => {}
            }
        }

        children.into_iter().collect()
    }

    /// Tombstoned children of `parent`, sorted by identifier.
    pub fn get_contains_deleted(
        &self,
        tx: Option<&TransactionId>,
        parent: &ResourceId,
    ) -> Vec<ResourceId> {
        let state = self.read();
        let ops = tx.and_then(|t| state.pending.get(t));

        let mut children: BTreeSet<ResourceId> = state
            .committed
            .iter()
            .filter(|e| e.end_time.is_some() && &e.parent == parent)
            .map(|e| e.child.clone())
            .collect();

        for op in ops.into_iter().flatten() {
            match op {
                PendingOp::Delete {
                    parent: p, child, ..
                } if p == parent => {
                    children.insert(child.clone());
                }
                PendingOp::Purge { parent: p, child } if p == parent => {
                    children.remove(child);
                }
                _ => {}
            }
        }

        children.into_iter().collect()
    }

    /// Whether `id` exists: live only, or including tombstones.
    pub fn resource_exists(
        &self,
        tx: Option<&TransactionId>,
        id: &ResourceId,
        include_deleted: bool,
    ) -> bool {
        let state = self.read();
        let ops = tx.and_then(|t| state.pending.get(t));

        let staged_add = ops.into_iter().flatten().any(|op| match op {
            PendingOp::Add(e) => &e.child == id && (include_deleted || e.end_time.is_none()),
            _ => false,
        });

        let committed = state
            .committed
            .iter()
            .any(|e| &e.child == id && (include_deleted || e.end_time.is_none()));

        if include_deleted {
            (committed || staged_add) && !purged_in_tx(ops, id)
        } else {
            staged_add || (committed && !deleted_or_purged_in_tx(ops, id))
        }
    }

    /// Resolve the nearest existing ancestor of `id` by dropping trailing
    /// path segments, falling back to the repository root.
    pub fn get_container_id_by_path(
        &self,
        tx: Option<&TransactionId>,
        id: &ResourceId,
        check_deleted: bool,
    ) -> ResourceId {
        let mut current = id.parent();
        while let Some(candidate) = current {
            if candidate.is_root() || self.resource_exists(tx, &candidate, check_deleted) {
                return candidate;
            }
            current = candidate.parent();
        }
        ResourceId::root()
    }

    /// Whether any live resource exists strictly below `id`.
    pub fn has_resources_starting_with(
        &self,
        tx: Option<&TransactionId>,
        id: &ResourceId,
    ) -> bool {
        let state = self.read();
        let ops = tx.and_then(|t| state.pending.get(t));

        let under = |child: &ResourceId| child != id && child.starts_with(id);

        let staged = ops.into_iter().flatten().any(|op| match op {
            PendingOp::Add(e) => e.end_time.is_none() && under(&e.child),
            _ => false,
        });

        staged
            || state.committed.iter().any(|e| {
                e.end_time.is_none()
                    && under(&e.child)
                    && !deleted_or_purged_in_tx(ops, &e.child)
            })
    }

    /// Instant of the most recent containment change under `id`, taking
    /// the transaction's own staged changes into account.
    pub fn containment_last_updated(
        &self,
        tx: Option<&TransactionId>,
        id: &ResourceId,
    ) -> Option<DateTime<Utc>> {
        let state = self.read();
        let committed = state.updated.get(id).copied();

        let staged = tx
            .and_then(|t| state.pending.get(t))
            .into_iter()
            .flatten()
            .filter_map(|op| match op {
                PendingOp::Add(e) if &e.parent == id => Some(e.end_time.unwrap_or(e.start_time)),
                PendingOp::Delete {
                    parent, end_time, ..
                } if parent == id => Some(*end_time),
                _ => None,
            })
            .max();

        committed.max(staged)
    }

    // ---- Staged mutations ----

    /// Stage a live containment entry opening now.
    pub fn add_contained_by(&self, tx: &TransactionId, parent: ResourceId, child: ResourceId) {
        self.add_contained_by_between(tx, parent, child, now_seconds(), None);
    }

    /// Stage a containment entry with an explicit interval. A closed
    /// interval records historical containment without making the child
    /// live; used by repair and migration flows.
    pub fn add_contained_by_between(
        &self,
        tx: &TransactionId,
        parent: ResourceId,
        child: ResourceId,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
    ) {
        let mut state = self.write();
        let ops = state.pending.entry(tx.clone()).or_default();

        // Re-adding a pair purged earlier in this transaction cancels the
        // purge instead of stacking both.
        ops.retain(
            |op| !matches!(op, PendingOp::Purge { parent: p, child: c } if *p == parent && *c == child),
        );

        debug!(tx = %tx, parent = %parent, child = %child, "staging containment add");
        ops.push(PendingOp::Add(ContainmentEntry {
            parent,
            child,
            start_time,
            end_time,
        }));
    }

    /// Stage a tombstone for `(parent, child)`. An entry added earlier in
    /// the same transaction is simply withdrawn.
    pub fn remove_contained_by(&self, tx: &TransactionId, parent: &ResourceId, child: &ResourceId) {
        let mut state = self.write();
        let ops = state.pending.entry(tx.clone()).or_default();

        let before = ops.len();
        ops.retain(
            |op| !matches!(op, PendingOp::Add(e) if e.parent == *parent && e.child == *child),
        );
        if ops.len() == before {
            ops.push(PendingOp::Delete {
                parent: parent.clone(),
                child: child.clone(),
                end_time: now_seconds(),
            });
        }
    }

    /// Tombstone every live entry naming `resource` as a child.
    pub fn remove_resource(&self, tx: &TransactionId, resource: &ResourceId) {
        let parent = {
            let mut state = self.write();
            let ops = state.pending.entry(tx.clone()).or_default();
            let before = ops.len();
            ops.retain(|op| !matches!(op, PendingOp::Add(e) if e.child == *resource));
            if ops.len() != before {
                return;
            }
            drop(state);
            self.get_contained_by(Some(tx), resource)
        };

        if let Some(parent) = parent {
            debug!(tx = %tx, parent = %parent, child = %resource, "staging containment delete");
            let mut state = self.write();
            state
                .pending
                .entry(tx.clone())
                .or_default()
                .push(PendingOp::Delete {
                    parent,
                    child: resource.clone(),
                    end_time: now_seconds(),
                });
        }
    }

    /// Stage physical removal of a tombstoned resource's history.
    pub fn purge_resource(&self, tx: &TransactionId, resource: &ResourceId) {
        let parent = self.get_contained_by_deleted(Some(tx), resource);

        let mut state = self.write();
        let ops = state.pending.entry(tx.clone()).or_default();
        ops.retain(|op| !matches!(op, PendingOp::Delete { child, .. } if child == resource));

        if let Some(parent) = parent {
            debug!(tx = %tx, parent = %parent, child = %resource, "staging containment purge");
            ops.push(PendingOp::Purge {
                parent,
                child: resource.clone(),
            });
        }
    }

    fn get_contained_by_deleted(
        &self,
        tx: Option<&TransactionId>,
        child: &ResourceId,
    ) -> Option<ResourceId> {
        let state = self.read();
        let ops = tx.and_then(|t| state.pending.get(t));

        state
            .committed
            .iter()
            .filter(|e| e.end_time.is_some() && &e.child == child)
            .map(|e| e.parent.clone())
            .chain(ops.into_iter().flatten().filter_map(|op| match op {
                PendingOp::Delete { parent, child: c, .. } if c == child => Some(parent.clone()),
                _ => None,
            }))
            .next()
    }

    // ---- Transaction boundaries ----

    /// Durably apply every mutation staged by `tx`: purges, then interval
    /// closes, then additions; bump each touched parent's update stamp;
    /// discard the staged rows.
    pub fn commit_transaction(&self, tx: &TransactionId) -> IndexResult<()> {
        let mut state = self.write();
        let Some(ops) = state.pending.remove(tx) else {
            return Ok(());
        };

        let mut records: Vec<LogRecord> = Vec::with_capacity(ops.len());
        for op in &ops {
            if let PendingOp::Purge { parent, child } = op {
                records.push(LogRecord::Purge {
                    parent: parent.clone(),
                    child: child.clone(),
                });
            }
        }
        for op in &ops {
            if let PendingOp::Delete {
                parent,
                child,
                end_time,
            } = op
            {
                records.push(LogRecord::Close {
                    parent: parent.clone(),
                    child: child.clone(),
                    end_time: *end_time,
                });
            }
        }
        for op in &ops {
            if let PendingOp::Add(entry) = op {
                records.push(LogRecord::Add(entry.clone()));
            }
        }

        let mut touched: HashMap<ResourceId, DateTime<Utc>> = HashMap::new();
        for op in &ops {
            let (parent, at) = match op {
                PendingOp::Add(e) => (&e.parent, Some(e.end_time.unwrap_or(e.start_time))),
                PendingOp::Delete {
                    parent, end_time, ..
                } => (parent, Some(*end_time)),
                PendingOp::Purge { parent, .. } => (parent, None),
            };
            if let Some(at) = at {
                touched
                    .entry(parent.clone())
                    .and_modify(|t| *t = (*t).max(at))
                    .or_insert(at);
            }
        }
        for (resource, at) in touched {
            records.push(LogRecord::Touch { resource, at });
        }

        if let Err(e) = self.journal.append_batch(&records) {
            // Nothing was applied; put the staged rows back so a retry or
            // rollback still sees them.
            state.pending.insert(tx.clone(), ops);
            return Err(e);
        }

        let count = records.len();
        for record in records {
            apply(&mut state, record);
        }
        debug!(tx = %tx, records = count, "containment index committed");
        Ok(())
    }

    /// Discard every mutation staged by `tx`.
    pub fn rollback_transaction(&self, tx: &TransactionId) {
        let mut state = self.write();
        if state.pending.remove(tx).is_some() {
            debug!(tx = %tx, "containment index rolled back");
        }
    }

    /// Drop all state, committed and staged, and truncate the journal.
    /// Only used when the index is rebuilt from the backend.
    pub fn reset(&self) -> IndexResult<()> {
        let mut state = self.write();
        self.journal.reset()?;
        *state = ContainmentState::default();
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ContainmentState> {
        self.inner.read().expect("containment lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ContainmentState> {
        self.inner.write().expect("containment lock poisoned")
    }
}

fn apply(state: &mut ContainmentState, record: LogRecord) {
    match record {
        LogRecord::Add(entry) => state.committed.push(entry),
        LogRecord::Close {
            parent,
            child,
            end_time,
        } => {
            for entry in state
                .committed
                .iter_mut()
                .filter(|e| e.parent == parent && e.child == child && e.end_time.is_none())
            {
                entry.end_time = Some(end_time);
            }
        }
        LogRecord::Purge { parent, child } => {
            state
                .committed
                .retain(|e| !(e.parent == parent && e.child == child));
        }
        LogRecord::Touch { resource, at } => {
            state
                .updated
                .entry(resource)
                .and_modify(|t| *t = (*t).max(at))
                .or_insert(at);
        }
    }
}

fn deleted_or_purged_in_tx(ops: Option<&Vec<PendingOp>>, child: &ResourceId) -> bool {
    ops.into_iter().flatten().any(|op| match op {
        PendingOp::Delete { child: c, .. } | PendingOp::Purge { child: c, .. } => c == child,
        _ => false,
    })
}

fn purged_in_tx(ops: Option<&Vec<PendingOp>>, child: &ResourceId) -> bool {
    ops.into_iter()
        .flatten()
        .any(|op| matches!(op, PendingOp::Purge { child: c, .. } if c == child))
}

fn hidden_in_tx(ops: Option<&Vec<PendingOp>>, parent: &ResourceId, child: &ResourceId) -> bool {
    ops.into_iter().flatten().any(|op| match op {
        PendingOp::Delete {
            parent: p,
            child: c,
            ..
        }
        | PendingOp::Purge {
            parent: p,
            child: c,
        } => p == parent && c == child,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn rid(path: &str) -> ResourceId {
        ResourceId::parse(format!("info:ark/{path}")).unwrap()
    }

    fn make_index() -> (TempDir, ContainmentIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = ContainmentIndex::open(dir.path().join("containment.log")).unwrap();
        (dir, index)
    }

    fn tx() -> TransactionId {
        TransactionId::mint()
    }

    // ---- visibility ----

    #[test]
    fn staged_add_visible_only_inside_its_transaction() {
        let (_dir, index) = make_index();
        let t1 = tx();
        let t2 = tx();
        let root = ResourceId::root();

        index.add_contained_by(&t1, root.clone(), rid("a"));

        assert_eq!(index.get_contains(Some(&t1), &root), vec![rid("a")]);
        assert!(index.get_contains(Some(&t2), &root).is_empty());
        assert!(index.get_contains(None, &root).is_empty());
        assert!(index.resource_exists(Some(&t1), &rid("a"), false));
        assert!(!index.resource_exists(None, &rid("a"), false));
    }

    #[test]
    fn commit_publishes_staged_entries() {
        let (_dir, index) = make_index();
        let t1 = tx();
        let root = ResourceId::root();

        index.add_contained_by(&t1, root.clone(), rid("a"));
        index.commit_transaction(&t1).unwrap();

        assert_eq!(index.get_contains(None, &root), vec![rid("a")]);
        assert_eq!(index.get_contained_by(None, &rid("a")), Some(root));
        assert!(index.resource_exists(None, &rid("a"), false));
    }

    #[test]
    fn rollback_discards_staged_entries() {
        let (_dir, index) = make_index();
        let t1 = tx();
        let root = ResourceId::root();

        index.add_contained_by(&t1, root.clone(), rid("a"));
        index.rollback_transaction(&t1);

        assert!(index.get_contains(Some(&t1), &root).is_empty());
        assert!(index.get_contains(None, &root).is_empty());
    }

    // ---- tombstones ----

    #[test]
    fn tombstone_closes_interval() {
        let (_dir, index) = make_index();
        let root = ResourceId::root();

        let t1 = tx();
        index.add_contained_by(&t1, root.clone(), rid("a"));
        index.commit_transaction(&t1).unwrap();

        let t2 = tx();
        index.remove_contained_by(&t2, &root, &rid("a"));
        // Still live outside t2 until commit.
        assert_eq!(index.get_contains(None, &root), vec![rid("a")]);
        assert!(index.get_contains(Some(&t2), &root).is_empty());
        index.commit_transaction(&t2).unwrap();

        assert!(index.get_contains(None, &root).is_empty());
        assert_eq!(index.get_contains_deleted(None, &root), vec![rid("a")]);
        assert!(!index.resource_exists(None, &rid("a"), false));
        assert!(index.resource_exists(None, &rid("a"), true));
    }

    #[test]
    fn remove_withdraws_same_transaction_add() {
        let (_dir, index) = make_index();
        let t1 = tx();
        let root = ResourceId::root();

        index.add_contained_by(&t1, root.clone(), rid("a"));
        index.remove_contained_by(&t1, &root, &rid("a"));
        index.commit_transaction(&t1).unwrap();

        assert!(index.get_contains(None, &root).is_empty());
        assert!(index.get_contains_deleted(None, &root).is_empty());
    }

    #[test]
    fn add_cancels_same_transaction_purge() {
        let (_dir, index) = make_index();
        let root = ResourceId::root();

        let t1 = tx();
        index.add_contained_by(&t1, root.clone(), rid("a"));
        index.commit_transaction(&t1).unwrap();
        let t2 = tx();
        index.remove_resource(&t2, &rid("a"));
        index.commit_transaction(&t2).unwrap();

        let t3 = tx();
        index.purge_resource(&t3, &rid("a"));
        index.add_contained_by(&t3, root.clone(), rid("a"));
        index.commit_transaction(&t3).unwrap();

        // The purge was withdrawn, so history remains along with the new
        // live entry.
        assert_eq!(index.get_contains(None, &root), vec![rid("a")]);
        assert_eq!(index.get_contains_deleted(None, &root), vec![rid("a")]);
    }

    #[test]
    fn purge_erases_history() {
        let (_dir, index) = make_index();
        let root = ResourceId::root();

        let t1 = tx();
        index.add_contained_by(&t1, root.clone(), rid("a"));
        index.commit_transaction(&t1).unwrap();
        let t2 = tx();
        index.remove_resource(&t2, &rid("a"));
        index.commit_transaction(&t2).unwrap();
        let t3 = tx();
        index.purge_resource(&t3, &rid("a"));
        index.commit_transaction(&t3).unwrap();

        assert!(index.get_contains_deleted(None, &root).is_empty());
        assert!(!index.resource_exists(None, &rid("a"), true));
    }

    #[test]
    fn remove_resource_finds_parent_itself() {
        let (_dir, index) = make_index();
        let t1 = tx();
        index.add_contained_by(&t1, rid("p"), rid("p/c"));
        index.commit_transaction(&t1).unwrap();

        let t2 = tx();
        index.remove_resource(&t2, &rid("p/c"));
        index.commit_transaction(&t2).unwrap();

        assert_eq!(index.get_contains_deleted(None, &rid("p")), vec![rid("p/c")]);
    }

    // ---- path and prefix queries ----

    #[test]
    fn container_id_by_path_walks_upward() {
        let (_dir, index) = make_index();
        let t1 = tx();
        index.add_contained_by(&t1, ResourceId::root(), rid("a"));
        index.add_contained_by(&t1, rid("a"), rid("a/b"));
        index.commit_transaction(&t1).unwrap();

        let deep = rid("a/b/x/y/z");
        assert_eq!(index.get_container_id_by_path(None, &deep, false), rid("a/b"));
        assert_eq!(
            index.get_container_id_by_path(None, &rid("nowhere/at/all"), false),
            ResourceId::root()
        );
    }

    #[test]
    fn container_id_by_path_can_see_tombstones() {
        let (_dir, index) = make_index();
        let t1 = tx();
        index.add_contained_by(&t1, ResourceId::root(), rid("a"));
        index.add_contained_by(&t1, rid("a"), rid("a/b"));
        index.commit_transaction(&t1).unwrap();
        let t2 = tx();
        index.remove_resource(&t2, &rid("a/b"));
        index.commit_transaction(&t2).unwrap();

        let deep = rid("a/b/x");
        assert_eq!(index.get_container_id_by_path(None, &deep, false), rid("a"));
        assert_eq!(index.get_container_id_by_path(None, &deep, true), rid("a/b"));
    }

    #[test]
    fn prefix_query_respects_segment_boundaries() {
        let (_dir, index) = make_index();
        let t1 = tx();
        index.add_contained_by(&t1, rid("a"), rid("a/b"));
        index.commit_transaction(&t1).unwrap();

        assert!(index.has_resources_starting_with(None, &rid("a")));
        // "a/b" itself has nothing under it, and "a" is not under "a".
        assert!(!index.has_resources_starting_with(None, &rid("a/b")));
        // No resource under the unrelated sibling prefix.
        assert!(!index.has_resources_starting_with(None, &rid("ab")));
    }

    #[test]
    fn prefix_query_sees_staged_adds() {
        let (_dir, index) = make_index();
        let t1 = tx();
        index.add_contained_by(&t1, rid("a"), rid("a/b"));
        assert!(index.has_resources_starting_with(Some(&t1), &rid("a")));
        assert!(!index.has_resources_starting_with(None, &rid("a")));
    }

    // ---- movement and historical entries ----

    #[test]
    fn reparent_within_one_transaction() {
        let (_dir, index) = make_index();
        let t1 = tx();
        index.add_contained_by(&t1, rid("old"), rid("old/x"));
        index.commit_transaction(&t1).unwrap();

        let t2 = tx();
        index.remove_contained_by(&t2, &rid("old"), &rid("old/x"));
        index.add_contained_by(&t2, rid("new"), rid("old/x"));

        assert_eq!(index.get_contained_by(Some(&t2), &rid("old/x")), Some(rid("new")));
        assert_eq!(index.get_contained_by(None, &rid("old/x")), Some(rid("old")));
    }

    #[test]
    fn recreate_after_remove_in_one_transaction_stays_live() {
        let (_dir, index) = make_index();
        let root = ResourceId::root();
        let t1 = tx();
        index.add_contained_by(&t1, root.clone(), rid("a"));
        index.commit_transaction(&t1).unwrap();

        let t2 = tx();
        index.remove_contained_by(&t2, &root, &rid("a"));
        index.add_contained_by(&t2, root.clone(), rid("a"));
        assert_eq!(index.get_contains(Some(&t2), &root), vec![rid("a")]);
        index.commit_transaction(&t2).unwrap();

        // Live again, with the closed interval kept as history.
        assert_eq!(index.get_contains(None, &root), vec![rid("a")]);
        assert_eq!(index.get_contains_deleted(None, &root), vec![rid("a")]);
    }

    #[test]
    fn historical_interval_is_not_live() {
        let (_dir, index) = make_index();
        let t1 = tx();
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        index.add_contained_by_between(&t1, rid("p"), rid("p/old"), start, Some(end));
        index.commit_transaction(&t1).unwrap();

        assert!(index.get_contains(None, &rid("p")).is_empty());
        assert_eq!(index.get_contains_deleted(None, &rid("p")), vec![rid("p/old")]);
        assert!(index.resource_exists(None, &rid("p/old"), true));
    }

    // ---- update stamps ----

    #[test]
    fn commit_bumps_parent_update_stamp() {
        let (_dir, index) = make_index();
        let root = ResourceId::root();
        assert!(index.containment_last_updated(None, &root).is_none());

        let t1 = tx();
        index.add_contained_by(&t1, root.clone(), rid("a"));
        // Visible to the transaction before commit, not outside it.
        assert!(index.containment_last_updated(Some(&t1), &root).is_some());
        assert!(index.containment_last_updated(None, &root).is_none());

        index.commit_transaction(&t1).unwrap();
        let first = index.containment_last_updated(None, &root).unwrap();

        let t2 = tx();
        index.remove_contained_by(&t2, &root, &rid("a"));
        index.commit_transaction(&t2).unwrap();
        let second = index.containment_last_updated(None, &root).unwrap();
        assert!(second >= first);
    }

    // ---- durability ----

    #[test]
    fn committed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("containment.log");
        let root = ResourceId::root();

        {
            let index = ContainmentIndex::open(&path).unwrap();
            let t1 = tx();
            index.add_contained_by(&t1, root.clone(), rid("a"));
            index.add_contained_by(&t1, root.clone(), rid("b"));
            index.commit_transaction(&t1).unwrap();
            let t2 = tx();
            index.remove_contained_by(&t2, &root, &rid("b"));
            index.commit_transaction(&t2).unwrap();

            // Staged-but-uncommitted state must not survive.
            let t3 = tx();
            index.add_contained_by(&t3, root.clone(), rid("c"));
        }

        let index = ContainmentIndex::open(&path).unwrap();
        assert_eq!(index.get_contains(None, &root), vec![rid("a")]);
        assert_eq!(index.get_contains_deleted(None, &root), vec![rid("b")]);
        assert!(index.containment_last_updated(None, &root).is_some());
    }

    #[test]
    fn reset_clears_committed_state_and_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("containment.log");

        {
            let index = ContainmentIndex::open(&path).unwrap();
            let t1 = tx();
            index.add_contained_by(&t1, ResourceId::root(), rid("a"));
            index.commit_transaction(&t1).unwrap();
            index.reset().unwrap();
            assert!(index.get_contains(None, &ResourceId::root()).is_empty());
        }

        let index = ContainmentIndex::open(&path).unwrap();
        assert!(index.get_contains(None, &ResourceId::root()).is_empty());
    }
}
