use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inventory of one stored object: the full version history plus the
/// manifest mapping content digests to storage paths.
///
/// The inventory is the object's single source of truth. Content files
/// are immutable once written; every mutation lands as a new version (or
/// accumulates in the mutable head) and is published by atomically
/// rewriting `inventory.json` last, so a crash mid-update leaves the
/// previous inventory intact and at worst orphans unreferenced content.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Inventory {
    pub id: String,
    /// Name of the most recent immutable version, `"v0"` before any exist.
    pub head: String,
    pub digest_algorithm: String,
    pub versions: BTreeMap<String, Version>,
    /// Content digest to storage paths relative to the object directory.
    pub manifest: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutable_head: Option<MutableHead>,
}

/// One immutable version: metadata plus the logical state at that point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Version {
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Content digest to the logical paths bound to it in this version.
    pub state: BTreeMap<String, Vec<String>>,
}

/// Uncommitted head state accumulated by unversioned commits. Its content
/// lives under `extensions/mutable-head/r<N>/content/` until an explicit
/// version commit folds it into the next immutable version.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MutableHead {
    pub revision: u32,
    pub version: Version,
}

/// Metadata attached to a version at commit time.
#[derive(Clone, Debug)]
pub struct VersionMeta {
    pub created: DateTime<Utc>,
    pub message: Option<String>,
    pub user: Option<String>,
}

impl VersionMeta {
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            created,
            message: None,
            user: None,
        }
    }
}

/// Listing entry for one immutable version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionDetails {
    pub version: String,
    pub created: DateTime<Utc>,
    pub message: Option<String>,
    pub user: Option<String>,
}

impl Inventory {
    pub fn new(id: impl Into<String>, digest_algorithm: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            head: version_name(0),
            digest_algorithm: digest_algorithm.into(),
            versions: BTreeMap::new(),
            manifest: BTreeMap::new(),
            mutable_head: None,
        }
    }

    /// Number of the most recent immutable version, 0 when none exist.
    pub fn head_number(&self) -> u32 {
        version_number(&self.head).unwrap_or(0)
    }

    /// Logical state currently visible at the head: the mutable head when
    /// present, else the latest immutable version, else empty.
    pub fn head_state(&self) -> BTreeMap<String, Vec<String>> {
        if let Some(mh) = &self.mutable_head {
            return mh.version.state.clone();
        }
        self.versions
            .get(&self.head)
            .map(|v| v.state.clone())
            .unwrap_or_default()
    }

    /// Digest bound to `logical` in the given state, if any.
    pub fn digest_for(state: &BTreeMap<String, Vec<String>>, logical: &str) -> Option<String> {
        state.iter().find_map(|(digest, paths)| {
            paths
                .iter()
                .any(|p| p == logical)
                .then(|| digest.clone())
        })
    }

    /// First storage path recorded for `digest` in the manifest.
    pub fn storage_path(&self, digest: &str) -> Option<&str> {
        self.manifest
            .get(digest)
            .and_then(|paths| paths.first())
            .map(String::as_str)
    }

    /// Bind `logical` to `digest` in `state`, displacing any prior binding.
    pub fn bind(state: &mut BTreeMap<String, Vec<String>>, digest: &str, logical: &str) {
        Self::unbind(state, logical);
        state
            .entry(digest.to_string())
            .or_default()
            .push(logical.to_string());
    }

    /// Remove the binding for `logical` from `state`, if any.
    pub fn unbind(state: &mut BTreeMap<String, Vec<String>>, logical: &str) {
        state.retain(|_, paths| {
            paths.retain(|p| p != logical);
            !paths.is_empty()
        });
    }

    /// Sorted logical paths present in `state`.
    pub fn logical_paths(state: &BTreeMap<String, Vec<String>>) -> Vec<String> {
        let mut paths: Vec<String> = state.values().flatten().cloned().collect();
        paths.sort();
        paths
    }
}

/// Format a version number as its name, `3` to `"v3"`.
pub fn version_name(number: u32) -> String {
    format!("v{number}")
}

/// Parse a version name back to its number.
pub fn version_number(name: &str) -> Option<u32> {
    name.strip_prefix('v')?.parse().ok()
}
