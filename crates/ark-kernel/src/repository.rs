//! The assembled repository.
//!
//! [`Repository::open`] wires the object store, both indexes, the
//! session factory, the lock table, and the transaction manager from
//! one [`RepositoryConfig`]. [`Repository::initialize`] creates the
//! root container on first run, and [`Repository::rebuild_index`]
//! reconstructs the indexes from the header sidecars in storage.

use std::sync::Arc;

use tracing::{debug, info, warn};

use ark_index::{ContainmentIndex, OcflObjectMap};
use ark_ocfl::{OcflError, OcflRepository};
use ark_types::time::now_seconds;
use ark_types::{
    CreateRdfOperation, CreateVersionOperation, ResourceHeaders, ResourceId, ResourceOperation,
    TransactionId,
};

use crate::config::RepositoryConfig;
use crate::error::{KernelError, KernelResult};
use crate::locks::ResourceLockManager;
use crate::manager::TransactionManager;
use crate::session::SessionFactory;
use crate::transaction::Transaction;

/// The persistence kernel, fully assembled.
pub struct Repository {
    config: RepositoryConfig,
    storage: Arc<OcflRepository>,
    containment: Arc<ContainmentIndex>,
    mapping: Arc<OcflObjectMap>,
    transactions: TransactionManager,
}

impl Repository {
    /// Open (or create) the repository rooted at `config.home`.
    pub fn open(config: RepositoryConfig) -> KernelResult<Self> {
        let storage = Arc::new(OcflRepository::open(
            config.ocfl_root(),
            config.digest_algorithm,
        )?);
        let containment = Arc::new(ContainmentIndex::open(
            config.index_dir().join("containment.log"),
        )?);
        let mapping = Arc::new(OcflObjectMap::open(config.index_dir().join("mapping.log"))?);
        let sessions = Arc::new(SessionFactory::new(
            Arc::clone(&storage),
            Arc::clone(&containment),
            Arc::clone(&mapping),
            config.staging_dir(),
            config.default_commit_type(),
            config.digest_algorithm,
        ));
        let locks = Arc::new(ResourceLockManager::new());
        let transactions = TransactionManager::new(
            sessions,
            locks,
            config.session_timeout(),
            config.reaper_interval(),
        );
        info!(home = %config.home.display(), "repository opened");
        Ok(Self {
            config,
            storage,
            containment,
            mapping,
            transactions,
        })
    }

    /// Create the root container on first run. Later runs verify it is
    /// present and issue zero writes. A storage failure during the
    /// probe aborts startup rather than shadowing the real state.
    pub fn initialize(&self) -> KernelResult<()> {
        let root = ResourceId::root();
        match self.transactions.read_only().storage().get_headers(&root) {
            Ok(_) => {
                debug!("root container already present");
                return Ok(());
            }
            Err(KernelError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        info!("creating root container");
        self.do_in_tx(|tx| {
            tx.execute(&ResourceOperation::CreateRdf(CreateRdfOperation::new(
                root.clone(),
                root.clone(),
                "",
            )))?;
            if !self.config.auto_versioning {
                tx.execute(&ResourceOperation::CreateVersion(
                    CreateVersionOperation::new(root.clone()),
                ))?;
            }
            Ok(())
        })
    }

    /// Drop both indexes and rebuild them from the header sidecars of
    /// every object in the backend. Used when the journals are lost or
    /// corrupt.
    pub fn rebuild_index(&self) -> KernelResult<()> {
        info!("rebuilding indexes from storage");
        self.containment.reset()?;
        self.mapping.reset()?;

        let tx = TransactionId::mint();
        let mut objects = 0usize;
        let mut resources = 0usize;
        for object_id in self.storage.list_objects()? {
            let root = ResourceId::parse(&object_id)?;
            for logical in self.storage.list_files(&object_id, None)? {
                let Some(rel) = logical.strip_prefix(".ark/") else {
                    continue;
                };
                if !rel.ends_with(".json") {
                    continue;
                }
                let bytes = self.storage.read_file(&object_id, &logical)?;
                let headers: ResourceHeaders =
                    serde_json::from_slice(&bytes).map_err(|e| OcflError::Io(e.into()))?;
                self.mapping
                    .add_mapping(&tx, headers.id.clone(), root.clone(), object_id.clone());
                if let Some(parent) = headers.parent.clone() {
                    let start = headers.created_date.unwrap_or_else(now_seconds);
                    let end = headers
                        .deleted
                        .then(|| headers.last_modified_date.unwrap_or_else(now_seconds));
                    self.containment
                        .add_contained_by_between(&tx, parent, headers.id, start, end);
                }
                resources += 1;
            }
            objects += 1;
        }
        self.containment.commit_transaction(&tx)?;
        self.mapping.commit_transaction(&tx)?;
        info!(objects, resources, "index rebuild complete");
        Ok(())
    }

    // ---- transactions ----

    /// Open a long-running transaction.
    pub fn new_tx(&self) -> Arc<Transaction> {
        self.transactions.create(false)
    }

    /// The shared read-only transaction for latest-committed reads.
    pub fn read_only_tx(&self) -> Arc<Transaction> {
        self.transactions.read_only()
    }

    /// Look up a live transaction by id.
    pub fn get_tx(&self, id: &TransactionId) -> KernelResult<Arc<Transaction>> {
        self.transactions.get(id)
    }

    /// Run `action` in a fresh short-lived transaction, committing on
    /// success and rolling back on error. Locks are held until the
    /// outcome lands.
    pub fn do_in_tx<T>(
        &self,
        action: impl FnOnce(&Transaction) -> KernelResult<T>,
    ) -> KernelResult<T> {
        let tx = self.transactions.create(true);
        let out = match action(&tx) {
            Ok(value) => tx.commit_if_short_lived().map(|_| value),
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    warn!(tx = %tx.id(), error = %rb, "rollback after failed action also failed");
                }
                Err(e)
            }
        };
        tx.release_locks_if_short_lived();
        out
    }

    // ---- accessors ----

    /// The transaction registry.
    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// The containment index, also consumed by indexing collaborators.
    pub fn containment(&self) -> &ContainmentIndex {
        &self.containment
    }

    /// Resource-to-object mappings.
    pub fn mapping(&self) -> &OcflObjectMap {
        &self.mapping
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_types::{CreateBinaryOperation, DeleteOperation, UpdateRdfOperation};
    use tempfile::TempDir;

    fn open_repo(dir: &TempDir) -> Repository {
        open_repo_with(dir, true)
    }

    fn open_repo_with(dir: &TempDir, auto_versioning: bool) -> Repository {
        let config = RepositoryConfig {
            home: dir.path().join("ark-data"),
            auto_versioning,
            ..RepositoryConfig::default()
        };
        let repo = Repository::open(config).unwrap();
        repo.initialize().unwrap();
        repo
    }

    fn rid(path: &str) -> ResourceId {
        ResourceId::parse(format!("info:ark/{path}")).unwrap()
    }

    fn create_rdf(id: &ResourceId, parent: &ResourceId, triples: &'static str) -> ResourceOperation {
        ResourceOperation::CreateRdf(CreateRdfOperation::new(id.clone(), parent.clone(), triples))
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(&dir);

        let root = ResourceId::root();
        let reader = repo.read_only_tx();
        reader.storage().get_headers(&root).unwrap();
        let before = reader.storage().list_versions(&root).unwrap();

        repo.initialize().unwrap();
        let after = reader.storage().list_versions(&root).unwrap();
        assert_eq!(before.len(), after.len());
    }

    #[test]
    fn work_done_in_tx_is_visible_afterwards() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(&dir);

        let a = rid("a");
        repo.do_in_tx(|tx| tx.execute(&create_rdf(&a, &ResourceId::root(), "<a> <p> <o> .")))
            .unwrap();

        let reader = repo.read_only_tx();
        assert_eq!(reader.storage().get_triples(&a).unwrap(), b"<a> <p> <o> .");
        assert_eq!(
            repo.containment().get_contains(None, &ResourceId::root()),
            vec![a]
        );
    }

    #[test]
    fn do_in_tx_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(&dir);

        let a = rid("a");
        let err = repo
            .do_in_tx(|tx| {
                tx.execute(&create_rdf(&a, &ResourceId::root(), ""))?;
                Err::<(), _>(KernelError::Conflict("validation failed".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, KernelError::Conflict(_)));

        let reader = repo.read_only_tx();
        assert!(matches!(
            reader.storage().get_headers(&a),
            Err(KernelError::NotFound(_))
        ));
    }

    #[test]
    fn delete_in_flight_blocks_child_create_until_committed() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(&dir);

        let r = rid("r");
        let child = rid("r/x");
        repo.do_in_tx(|tx| tx.execute(&create_rdf(&r, &ResourceId::root(), "")))
            .unwrap();

        // The staged delete still holds its locks, so a concurrent
        // create under `r` contends.
        let bystander = repo.transactions().create(true);
        repo.do_in_tx(|tx| {
            tx.execute(&ResourceOperation::Delete(DeleteOperation::new(r.clone())))?;
            let err = bystander.execute(&create_rdf(&child, &r, "")).unwrap_err();
            assert!(matches!(err, KernelError::ConcurrentUpdate { .. }));
            Ok(())
        })
        .unwrap();

        // Once the auto-commit lands, the retry sees the tombstone.
        let err = bystander.execute(&create_rdf(&child, &r, "")).unwrap_err();
        assert!(matches!(err, KernelError::NotFound(_)));
        bystander.rollback().unwrap();

        assert!(repo.containment().get_contains(None, &r).is_empty());
        assert_eq!(
            repo.containment()
                .get_contains_deleted(None, &ResourceId::root()),
            vec![r.clone()]
        );
        assert!(matches!(
            repo.read_only_tx().storage().get_headers(&child),
            Err(KernelError::NotFound(_))
        ));
    }

    #[test]
    fn unversioned_mode_defers_versions_until_requested() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo_with(&dir, false);

        let root = ResourceId::root();
        let reader = repo.read_only_tx();
        // initialize issued an explicit version for the root container.
        assert_eq!(reader.storage().list_versions(&root).unwrap().len(), 1);

        repo.do_in_tx(|tx| {
            tx.execute(&ResourceOperation::UpdateRdf(UpdateRdfOperation::new(
                root.clone(),
                "<r> <p> <o> .",
            )))
        })
        .unwrap();
        assert_eq!(reader.storage().list_versions(&root).unwrap().len(), 1);
        assert_eq!(reader.storage().get_triples(&root).unwrap(), b"<r> <p> <o> .");

        repo.do_in_tx(|tx| {
            tx.execute(&ResourceOperation::CreateVersion(
                CreateVersionOperation::new(root.clone()),
            ))
        })
        .unwrap();
        assert_eq!(reader.storage().list_versions(&root).unwrap().len(), 2);
    }

    #[test]
    fn rebuild_index_restores_containment_and_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_repo(&dir);

        let ag = rid("ag");
        let member = rid("ag/member");
        let gone = rid("ag/gone");
        let solo = rid("solo");
        repo.do_in_tx(|tx| {
            let mut op = CreateRdfOperation::new(ag.clone(), ResourceId::root(), "");
            op.archival_group = true;
            tx.execute(&ResourceOperation::CreateRdf(op))
        })
        .unwrap();
        repo.do_in_tx(|tx| tx.execute(&create_rdf(&member, &ag, "<m> <p> <o> .")))
            .unwrap();
        repo.do_in_tx(|tx| tx.execute(&create_rdf(&gone, &ag, "")))
            .unwrap();
        repo.do_in_tx(|tx| {
            tx.execute(&ResourceOperation::Delete(DeleteOperation::new(
                gone.clone(),
            )))
        })
        .unwrap();
        repo.do_in_tx(|tx| {
            tx.execute(&ResourceOperation::CreateBinary(CreateBinaryOperation::new(
                solo.clone(),
                ResourceId::root(),
                "payload",
            )))
        })
        .unwrap();

        repo.rebuild_index().unwrap();

        let root = ResourceId::root();
        let mut top = repo.containment().get_contains(None, &root);
        top.sort();
        assert_eq!(top, vec![ag.clone(), solo.clone()]);
        assert_eq!(
            repo.containment().get_contains(None, &ag),
            vec![member.clone()]
        );
        assert_eq!(
            repo.containment().get_contains_deleted(None, &ag),
            vec![gone.clone()]
        );

        let mapping = repo.mapping().get_mapping(None, &member).unwrap();
        assert_eq!(mapping.ocfl_object_id, ag.as_str());
        assert_eq!(mapping.root_resource_id, ag);
        let mapping = repo.mapping().get_mapping(None, &solo).unwrap();
        assert_eq!(mapping.ocfl_object_id, solo.as_str());

        let reader = repo.read_only_tx();
        assert_eq!(
            reader.storage().get_triples(&member).unwrap(),
            b"<m> <p> <o> ."
        );
    }
}
