use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known identifier of the distinguished read-only transaction.
pub const READ_ONLY_TX_ID: &str = "read-only";

/// Identifier of a unit of work.
///
/// Ordinary transactions carry a UUIDv7; the singleton read-only
/// transaction carries the fixed [`READ_ONLY_TX_ID`] string. Index and
/// session operations are keyed by this id, so it lives here rather than
/// in the kernel crate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Mint a fresh time-ordered identifier.
    pub fn mint() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// The read-only transaction's identifier.
    pub fn read_only() -> Self {
        Self(READ_ONLY_TX_ID.to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn is_read_only(&self) -> bool {
        self.0 == READ_ONLY_TX_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
