use std::path::{Path, PathBuf};
use std::time::Duration;

use ark_ocfl::CommitType;
use ark_types::DigestAlgorithm;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Configuration for a repository instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Base directory; object store, staging, and index journals live
    /// beneath it.
    pub home: PathBuf,
    /// Digest algorithm for storage fixity and default resource digests.
    pub digest_algorithm: DigestAlgorithm,
    /// When `true` every commit mints an immutable version; otherwise
    /// commits accumulate in the mutable head until an explicit
    /// create-version operation.
    pub auto_versioning: bool,
    /// Idle seconds before a long-running transaction expires.
    pub session_timeout_secs: u64,
    /// Seconds between reaper sweeps over expired transactions.
    pub reaper_interval_secs: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("ark-data"),
            digest_algorithm: DigestAlgorithm::Sha512,
            auto_versioning: true,
            session_timeout_secs: 180,
            reaper_interval_secs: 10,
        }
    }
}

impl RepositoryConfig {
    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> KernelResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| KernelError::Config(format!("{}: {e}", path.as_ref().display())))?;
        toml::from_str(&text).map_err(|e| KernelError::Config(e.to_string()))
    }

    pub fn ocfl_root(&self) -> PathBuf {
        self.home.join("ocfl")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.home.join("staging")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.home.join("index")
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    /// Commit discipline implied by the auto-versioning flag.
    pub fn default_commit_type(&self) -> CommitType {
        if self.auto_versioning {
            CommitType::NewVersion
        } else {
            CommitType::Unversioned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = RepositoryConfig::default();
        assert_eq!(c.digest_algorithm, DigestAlgorithm::Sha512);
        assert!(c.auto_versioning);
        assert_eq!(c.session_timeout(), Duration::from_secs(180));
        assert_eq!(c.default_commit_type(), CommitType::NewVersion);
        assert_eq!(c.ocfl_root(), PathBuf::from("ark-data/ocfl"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: RepositoryConfig =
            toml::from_str("home = \"/srv/ark\"\nauto_versioning = false\n").unwrap();
        assert_eq!(c.home, PathBuf::from("/srv/ark"));
        assert_eq!(c.default_commit_type(), CommitType::Unversioned);
        assert_eq!(c.session_timeout_secs, 180);
    }

    #[test]
    fn algorithm_uses_urn_spelling() {
        let c: RepositoryConfig = toml::from_str("digest_algorithm = \"sha-256\"\n").unwrap();
        assert_eq!(c.digest_algorithm, DigestAlgorithm::Sha256);
        let rendered = toml::to_string(&c).unwrap();
        assert!(rendered.contains("sha-256"));
    }
}
