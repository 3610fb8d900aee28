use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use ark_types::{ResourceId, TransactionId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IndexError, IndexResult};
use crate::journal::Journal;

/// Where a resource lives in the backend: the object that holds it and
/// the resource at that object's root. For an archival group member the
/// root resource is the group; otherwise it is the resource itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcflMapping {
    pub ocfl_object_id: String,
    pub root_resource_id: ResourceId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum LogRecord {
    Put {
        resource: ResourceId,
        mapping: OcflMapping,
    },
    Remove {
        resource: ResourceId,
    },
}

#[derive(Clone, Debug)]
enum PendingOp {
    Put {
        resource: ResourceId,
        mapping: OcflMapping,
    },
    Remove {
        resource: ResourceId,
    },
}

#[derive(Default)]
struct MappingState {
    committed: HashMap<ResourceId, OcflMapping>,
    pending: HashMap<TransactionId, Vec<PendingOp>>,
}

/// Index from resource identifiers to backend objects.
///
/// A mapping is written once when a resource is first persisted and
/// removed only on purge; it never changes while the resource exists.
/// Reads inside a transaction see that transaction's staged mappings
/// layered over committed state.
pub struct OcflObjectMap {
    inner: RwLock<MappingState>,
    journal: Journal<LogRecord>,
}

impl OcflObjectMap {
    /// Open the map, replaying the journal at `path` into memory.
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let (journal, records) = Journal::open(path)?;
        let mut state = MappingState::default();
        for record in records {
            apply(&mut state, record);
        }
        debug!(mappings = state.committed.len(), "object map loaded");
        Ok(Self {
            inner: RwLock::new(state),
            journal,
        })
    }

    /// Resolve the backend location of `resource`.
    pub fn get_mapping(
        &self,
        tx: Option<&TransactionId>,
        resource: &ResourceId,
    ) -> IndexResult<OcflMapping> {
        let state = self.read();
        let ops = tx.and_then(|t| state.pending.get(t));

        // Later staged ops win, so scan the transaction's rows backwards.
        for op in ops.into_iter().flatten().rev() {
            match op {
                PendingOp::Put { resource: r, mapping } if r == resource => {
                    return Ok(mapping.clone());
                }
                PendingOp::Remove { resource: r } if r == resource => {
                    return Err(IndexError::MappingNotFound(resource.clone()));
                }
                _ => {}
            }
        }

        state
            .committed
            .get(resource)
            .cloned()
            .ok_or_else(|| IndexError::MappingNotFound(resource.clone()))
    }

    /// Stage a mapping for `resource`.
    pub fn add_mapping(
        &self,
        tx: &TransactionId,
        resource: ResourceId,
        root_resource_id: ResourceId,
        ocfl_object_id: String,
    ) {
        let mut state = self.write();
        debug!(tx = %tx, resource = %resource, object = %ocfl_object_id, "staging mapping");
        state.pending.entry(tx.clone()).or_default().push(PendingOp::Put {
            resource,
            mapping: OcflMapping {
                ocfl_object_id,
                root_resource_id,
            },
        });
    }

    /// Stage removal of the mapping for `resource`.
    pub fn remove_mapping(&self, tx: &TransactionId, resource: &ResourceId) {
        let mut state = self.write();
        state.pending.entry(tx.clone()).or_default().push(PendingOp::Remove {
            resource: resource.clone(),
        });
    }

    /// Durably apply the mappings staged by `tx`: removals first, then
    /// additions, then discard the staged rows.
    pub fn commit_transaction(&self, tx: &TransactionId) -> IndexResult<()> {
        let mut state = self.write();
        let Some(ops) = state.pending.remove(tx) else {
            return Ok(());
        };

        let mut records: Vec<LogRecord> = Vec::with_capacity(ops.len());
        for op in &ops {
            if let PendingOp::Remove { resource } = op {
                records.push(LogRecord::Remove {
                    resource: resource.clone(),
                });
            }
        }
        for op in &ops {
            if let PendingOp::Put { resource, mapping } = op {
                records.push(LogRecord::Put {
                    resource: resource.clone(),
                    mapping: mapping.clone(),
                });
            }
        }

        if let Err(e) = self.journal.append_batch(&records) {
            state.pending.insert(tx.clone(), ops);
            return Err(e);
        }

        let count = records.len();
        for record in records {
            apply(&mut state, record);
        }
        debug!(tx = %tx, records = count, "object map committed");
        Ok(())
    }

    /// Discard the mappings staged by `tx`.
    pub fn rollback_transaction(&self, tx: &TransactionId) {
        let mut state = self.write();
        if state.pending.remove(tx).is_some() {
            debug!(tx = %tx, "object map rolled back");
        }
    }

    /// Drop all state and truncate the journal.
    pub fn reset(&self) -> IndexResult<()> {
        let mut state = self.write();
        self.journal.reset()?;
        *state = MappingState::default();
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MappingState> {
        self.inner.read().expect("object map lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MappingState> {
        self.inner.write().expect("object map lock poisoned")
    }
}

fn apply(state: &mut MappingState, record: LogRecord) {
    match record {
        LogRecord::Put { resource, mapping } => {
            state.committed.insert(resource, mapping);
        }
        LogRecord::Remove { resource } => {
            state.committed.remove(&resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rid(path: &str) -> ResourceId {
        ResourceId::parse(format!("info:ark/{path}")).unwrap()
    }

    fn make_map() -> (TempDir, OcflObjectMap) {
        let dir = tempfile::tempdir().unwrap();
        let map = OcflObjectMap::open(dir.path().join("mappings.log")).unwrap();
        (dir, map)
    }

    #[test]
    fn staged_mapping_visible_only_inside_its_transaction() {
        let (_dir, map) = make_map();
        let t1 = TransactionId::mint();
        let t2 = TransactionId::mint();

        map.add_mapping(&t1, rid("a"), rid("a"), "info:ark/a".into());

        let found = map.get_mapping(Some(&t1), &rid("a")).unwrap();
        assert_eq!(found.ocfl_object_id, "info:ark/a");
        assert_eq!(found.root_resource_id, rid("a"));

        assert!(matches!(
            map.get_mapping(Some(&t2), &rid("a")),
            Err(IndexError::MappingNotFound(_))
        ));
        assert!(map.get_mapping(None, &rid("a")).is_err());
    }

    #[test]
    fn commit_publishes_mapping() {
        let (_dir, map) = make_map();
        let t1 = TransactionId::mint();
        map.add_mapping(&t1, rid("ag/part"), rid("ag"), "info:ark/ag".into());
        map.commit_transaction(&t1).unwrap();

        let found = map.get_mapping(None, &rid("ag/part")).unwrap();
        assert_eq!(found.root_resource_id, rid("ag"));
    }

    #[test]
    fn staged_removal_hides_committed_mapping() {
        let (_dir, map) = make_map();
        let t1 = TransactionId::mint();
        map.add_mapping(&t1, rid("a"), rid("a"), "info:ark/a".into());
        map.commit_transaction(&t1).unwrap();

        let t2 = TransactionId::mint();
        map.remove_mapping(&t2, &rid("a"));
        assert!(map.get_mapping(Some(&t2), &rid("a")).is_err());
        assert!(map.get_mapping(None, &rid("a")).is_ok());

        map.commit_transaction(&t2).unwrap();
        assert!(map.get_mapping(None, &rid("a")).is_err());
    }

    #[test]
    fn later_staged_op_wins() {
        let (_dir, map) = make_map();
        let t1 = TransactionId::mint();
        map.add_mapping(&t1, rid("a"), rid("a"), "info:ark/a".into());
        map.remove_mapping(&t1, &rid("a"));
        assert!(map.get_mapping(Some(&t1), &rid("a")).is_err());

        map.add_mapping(&t1, rid("a"), rid("a"), "info:ark/a".into());
        assert!(map.get_mapping(Some(&t1), &rid("a")).is_ok());
    }

    #[test]
    fn rollback_discards_staged_rows() {
        let (_dir, map) = make_map();
        let t1 = TransactionId::mint();
        map.add_mapping(&t1, rid("a"), rid("a"), "info:ark/a".into());
        map.rollback_transaction(&t1);
        assert!(map.get_mapping(Some(&t1), &rid("a")).is_err());
    }

    #[test]
    fn committed_mappings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.log");

        {
            let map = OcflObjectMap::open(&path).unwrap();
            let t1 = TransactionId::mint();
            map.add_mapping(&t1, rid("a"), rid("a"), "info:ark/a".into());
            map.add_mapping(&t1, rid("b"), rid("b"), "info:ark/b".into());
            map.commit_transaction(&t1).unwrap();
            let t2 = TransactionId::mint();
            map.remove_mapping(&t2, &rid("b"));
            map.commit_transaction(&t2).unwrap();
        }

        let map = OcflObjectMap::open(&path).unwrap();
        assert!(map.get_mapping(None, &rid("a")).is_ok());
        assert!(map.get_mapping(None, &rid("b")).is_err());
    }

    #[test]
    fn reset_clears_mappings() {
        let (_dir, map) = make_map();
        let t1 = TransactionId::mint();
        map.add_mapping(&t1, rid("a"), rid("a"), "info:ark/a".into());
        map.commit_transaction(&t1).unwrap();

        map.reset().unwrap();
        assert!(map.get_mapping(None, &rid("a")).is_err());
    }
}
