//! Content-addressed versioned object storage.
//!
//! An [`OcflRepository`] keeps each stored object as an inventory plus
//! immutable content files, one directory per object, with full version
//! history and digest-deduplicated content. An [`OcflObjectSession`]
//! stages changes to one object and applies them in a single commit,
//! either as a new immutable version or accumulated into the object's
//! mutable head. [`paths`] defines where resources land inside their
//! object.

pub mod error;
pub mod inventory;
pub mod paths;
pub mod repository;
pub mod session;

pub use error::{OcflError, OcflResult};
pub use inventory::{Inventory, VersionDetails, VersionMeta};
pub use repository::{ChangeSet, OcflRepository, StagedWrite};
pub use session::{CommitType, OcflObjectSession};
