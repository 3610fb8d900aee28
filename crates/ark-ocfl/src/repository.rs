use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ark_types::DigestAlgorithm;
use sha2::{Digest as _, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{OcflError, OcflResult};
use crate::inventory::{
    version_name, version_number, Inventory, MutableHead, Version, VersionDetails, VersionMeta,
};

const OBJECTS_DIR: &str = "objects";
const INVENTORY_FILE: &str = "inventory.json";
const MUTABLE_HEAD_DIR: &str = "extensions/mutable-head";

/// One staged file handed over at commit: where the content sits on disk
/// and its digest under the repository algorithm.
#[derive(Debug)]
pub struct StagedWrite {
    pub source: PathBuf,
    pub digest: String,
}

/// The changes one commit applies to an object.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// Logical path to staged content.
    pub writes: BTreeMap<String, StagedWrite>,
    /// Logical paths removed from the new state.
    pub deletes: BTreeSet<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

/// Versioned, content-addressed object store over a directory tree.
///
/// Each object lives at `objects/<sha256(object id)>/` with an
/// `inventory.json` describing its versions, content files under
/// `v<N>/content/`, and any uncommitted head content under
/// `extensions/mutable-head/r<N>/content/`. Content is deduplicated by
/// digest: a write whose digest already appears in the manifest
/// references the existing file instead of storing a second copy. The
/// inventory is always rewritten atomically, and last.
pub struct OcflRepository {
    root: PathBuf,
    algorithm: DigestAlgorithm,
}

impl OcflRepository {
    /// Open (or initialize) a repository rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, algorithm: DigestAlgorithm) -> OcflResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        Ok(Self { root, algorithm })
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn object_exists(&self, object_id: &str) -> bool {
        self.object_dir(object_id).join(INVENTORY_FILE).is_file()
    }

    /// Create `object_id` with its first version.
    pub fn create_object(
        &self,
        object_id: &str,
        changes: ChangeSet,
        meta: VersionMeta,
    ) -> OcflResult<String> {
        if self.object_exists(object_id) {
            return Err(OcflError::ObjectAlreadyExists(object_id.to_string()));
        }
        if changes.writes.is_empty() {
            return Err(OcflError::EmptyObject(object_id.to_string()));
        }
        let inventory = Inventory::new(object_id, self.algorithm.urn_name());
        self.apply_version(inventory, object_id, changes, meta)
    }

    /// Record a new immutable version of an existing object, folding any
    /// mutable head into it first.
    pub fn update_object(
        &self,
        object_id: &str,
        changes: ChangeSet,
        meta: VersionMeta,
    ) -> OcflResult<String> {
        let inventory = self.load_inventory(object_id)?;
        self.apply_version(inventory, object_id, changes, meta)
    }

    /// Accumulate changes into the mutable head without minting a
    /// version. Creates the object (headless) when it does not exist yet.
    pub fn stage_changes(
        &self,
        object_id: &str,
        changes: ChangeSet,
        meta: VersionMeta,
    ) -> OcflResult<()> {
        let mut inventory = if self.object_exists(object_id) {
            self.load_inventory(object_id)?
        } else {
            if changes.writes.is_empty() {
                return Err(OcflError::EmptyObject(object_id.to_string()));
            }
            Inventory::new(object_id, self.algorithm.urn_name())
        };

        let mut head = inventory.mutable_head.take().unwrap_or_else(|| MutableHead {
            revision: 0,
            version: Version {
                created: meta.created,
                message: None,
                user: None,
                state: inventory.head_state(),
            },
        });
        head.revision += 1;
        let content_prefix = format!("{MUTABLE_HEAD_DIR}/r{}/content", head.revision);

        let dir = self.object_dir(object_id);
        for logical in &changes.deletes {
            Inventory::unbind(&mut head.version.state, logical);
        }
        ingest_writes(
            &dir,
            &mut inventory.manifest,
            &mut head.version.state,
            &changes.writes,
            &content_prefix,
        )?;
        head.version.created = meta.created;
        head.version.message = meta.message;
        head.version.user = meta.user;

        let revision = head.revision;
        inventory.mutable_head = Some(head);
        self.store_inventory(object_id, &inventory)?;
        debug!(object = object_id, revision, "mutable head updated");
        Ok(())
    }

    /// Convert the accumulated mutable head into the next immutable
    /// version. Without a mutable head this still mints a version whose
    /// state duplicates the current head.
    pub fn commit_staged_changes(&self, object_id: &str, meta: VersionMeta) -> OcflResult<String> {
        let inventory = self.load_inventory(object_id)?;
        self.apply_version(inventory, object_id, ChangeSet::default(), meta)
    }

    /// Remove the object and its entire history. Absent objects are fine.
    pub fn purge_object(&self, object_id: &str) -> OcflResult<()> {
        let dir = self.object_dir(object_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            debug!(object = object_id, "object purged");
        }
        Ok(())
    }

    /// Content of `logical` at the current head, mutable or immutable.
    pub fn read_file(&self, object_id: &str, logical: &str) -> OcflResult<Vec<u8>> {
        let inventory = self.load_inventory(object_id)?;
        let state = inventory.head_state();
        self.read_from_state(&inventory, object_id, &state, logical)
    }

    /// Content of `logical` as of the named immutable version.
    pub fn read_file_version(
        &self,
        object_id: &str,
        logical: &str,
        version: &str,
    ) -> OcflResult<Vec<u8>> {
        let inventory = self.load_inventory(object_id)?;
        let state = self.version_state(&inventory, object_id, version)?;
        self.read_from_state(&inventory, object_id, &state, logical)
    }

    pub fn file_exists(&self, object_id: &str, logical: &str) -> bool {
        self.load_inventory(object_id)
            .map(|inv| Inventory::digest_for(&inv.head_state(), logical).is_some())
            .unwrap_or(false)
    }

    /// Immutable versions, oldest first. The mutable head never appears.
    pub fn list_versions(&self, object_id: &str) -> OcflResult<Vec<VersionDetails>> {
        let inventory = self.load_inventory(object_id)?;
        let mut details: Vec<VersionDetails> = inventory
            .versions
            .iter()
            .map(|(name, v)| VersionDetails {
                version: name.clone(),
                created: v.created,
                message: v.message.clone(),
                user: v.user.clone(),
            })
            .collect();
        details.sort_by_key(|d| version_number(&d.version).unwrap_or(0));
        Ok(details)
    }

    pub fn version_details(&self, object_id: &str, version: &str) -> OcflResult<VersionDetails> {
        let inventory = self.load_inventory(object_id)?;
        inventory
            .versions
            .get(version)
            .map(|v| VersionDetails {
                version: version.to_string(),
                created: v.created,
                message: v.message.clone(),
                user: v.user.clone(),
            })
            .ok_or_else(|| OcflError::VersionNotFound {
                object: object_id.to_string(),
                version: version.to_string(),
            })
    }

    /// Logical paths at the head, or at a named version.
    pub fn list_files(&self, object_id: &str, version: Option<&str>) -> OcflResult<Vec<String>> {
        let inventory = self.load_inventory(object_id)?;
        let state = match version {
            None => inventory.head_state(),
            Some(name) => self.version_state(&inventory, object_id, name)?,
        };
        Ok(Inventory::logical_paths(&state))
    }

    /// Ids of every object in the store, found by walking the storage
    /// tree for inventories. Stored content always sits under a
    /// `content` directory, so anything below one is not an inventory
    /// even if it shares the name.
    pub fn list_objects(&self) -> OcflResult<Vec<String>> {
        let objects_root = self.root.join(OBJECTS_DIR);
        let mut ids = Vec::new();
        for entry in WalkDir::new(&objects_root) {
            let entry = entry.map_err(|e| OcflError::Io(e.into()))?;
            if !entry.file_type().is_file() || entry.file_name() != INVENTORY_FILE {
                continue;
            }
            let under_content = entry
                .path()
                .strip_prefix(&objects_root)
                .map(|rel| rel.components().any(|c| c.as_os_str() == "content"))
                .unwrap_or(false);
            if under_content {
                continue;
            }
            let inventory: Inventory =
                serde_json::from_slice(&fs::read(entry.path())?).map_err(|e| {
                    OcflError::CorruptInventory {
                        object: entry.path().display().to_string(),
                        reason: e.to_string(),
                    }
                })?;
            ids.push(inventory.id);
        }
        ids.sort();
        Ok(ids)
    }

    // ---- internals ----

    /// Objects are keyed by the hash of their id so arbitrary identifiers
    /// stay filesystem-safe.
    fn object_dir(&self, object_id: &str) -> PathBuf {
        let digest = Sha256::digest(object_id.as_bytes());
        self.root.join(OBJECTS_DIR).join(hex::encode(digest))
    }

    fn load_inventory(&self, object_id: &str) -> OcflResult<Inventory> {
        let path = self.object_dir(object_id).join(INVENTORY_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(OcflError::ObjectNotFound(object_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| OcflError::CorruptInventory {
            object: object_id.to_string(),
            reason: e.to_string(),
        })
    }

    fn store_inventory(&self, object_id: &str, inventory: &Inventory) -> OcflResult<()> {
        let dir = self.object_dir(object_id);
        fs::create_dir_all(&dir)?;
        let json =
            serde_json::to_vec_pretty(inventory).map_err(|e| OcflError::CorruptInventory {
                object: object_id.to_string(),
                reason: e.to_string(),
            })?;
        let tmp = tempfile::NamedTempFile::new_in(&dir)?;
        fs::write(tmp.path(), &json)?;
        tmp.persist(dir.join(INVENTORY_FILE))
            .map_err(|e| OcflError::Io(e.error))?;
        Ok(())
    }

    fn apply_version(
        &self,
        mut inventory: Inventory,
        object_id: &str,
        changes: ChangeSet,
        meta: VersionMeta,
    ) -> OcflResult<String> {
        let name = version_name(inventory.head_number() + 1);
        let content_prefix = format!("{name}/content");
        let dir = self.object_dir(object_id);
        fs::create_dir_all(&dir)?;

        let mut state = inventory.head_state();
        if inventory.mutable_head.take().is_some() {
            relocate_head_content(&dir, &mut inventory.manifest, &content_prefix)?;
        }

        for logical in &changes.deletes {
            Inventory::unbind(&mut state, logical);
        }
        ingest_writes(
            &dir,
            &mut inventory.manifest,
            &mut state,
            &changes.writes,
            &content_prefix,
        )?;

        inventory.versions.insert(
            name.clone(),
            Version {
                created: meta.created,
                message: meta.message,
                user: meta.user,
                state,
            },
        );
        inventory.head = name.clone();
        self.store_inventory(object_id, &inventory)?;
        debug!(object = object_id, version = %name, "version committed");
        Ok(name)
    }

    fn version_state(
        &self,
        inventory: &Inventory,
        object_id: &str,
        version: &str,
    ) -> OcflResult<BTreeMap<String, Vec<String>>> {
        inventory
            .versions
            .get(version)
            .map(|v| v.state.clone())
            .ok_or_else(|| OcflError::VersionNotFound {
                object: object_id.to_string(),
                version: version.to_string(),
            })
    }

    fn read_from_state(
        &self,
        inventory: &Inventory,
        object_id: &str,
        state: &BTreeMap<String, Vec<String>>,
        logical: &str,
    ) -> OcflResult<Vec<u8>> {
        let digest =
            Inventory::digest_for(state, logical).ok_or_else(|| OcflError::FileNotFound {
                object: object_id.to_string(),
                path: logical.to_string(),
            })?;
        let storage =
            inventory
                .storage_path(&digest)
                .ok_or_else(|| OcflError::CorruptInventory {
                    object: object_id.to_string(),
                    reason: format!("manifest has no entry for digest {digest}"),
                })?;
        Ok(fs::read(self.object_dir(object_id).join(storage))?)
    }
}

/// Move staged files into `content_prefix` and bind them in `state`,
/// skipping the copy for content the manifest already holds.
fn ingest_writes(
    dir: &Path,
    manifest: &mut BTreeMap<String, Vec<String>>,
    state: &mut BTreeMap<String, Vec<String>>,
    writes: &BTreeMap<String, StagedWrite>,
    content_prefix: &str,
) -> OcflResult<()> {
    for (logical, write) in writes {
        if !manifest.contains_key(&write.digest) {
            let storage = format!("{content_prefix}/{logical}");
            let dest = dir.join(&storage);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            // Staging may sit on another filesystem; fall back to a copy.
            if fs::rename(&write.source, &dest).is_err() {
                fs::copy(&write.source, &dest)?;
            }
            manifest.insert(write.digest.clone(), vec![storage]);
        }
        Inventory::bind(state, &write.digest, logical);
    }
    Ok(())
}

/// Rehome mutable-head content under the version being minted and drop
/// the extensions directory.
fn relocate_head_content(
    dir: &Path,
    manifest: &mut BTreeMap<String, Vec<String>>,
    content_prefix: &str,
) -> OcflResult<()> {
    for paths in manifest.values_mut() {
        for storage in paths.iter_mut() {
            let Some(tail) = storage
                .strip_prefix(MUTABLE_HEAD_DIR)
                .and_then(|s| s.trim_start_matches('/').split_once("content/"))
                .map(|(_, logical)| logical)
            else {
                continue;
            };
            let relocated = format!("{content_prefix}/{tail}");
            let from = dir.join(storage.as_str());
            let to = dir.join(&relocated);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&from, &to)?;
            *storage = relocated;
        }
    }
    let extensions = dir.join(MUTABLE_HEAD_DIR);
    if extensions.exists() {
        fs::remove_dir_all(&extensions)?;
    }
    Ok(())
}
