//! Durable in-memory indexes over repository state.
//!
//! Two indexes back the repository: [`ContainmentIndex`] records the
//! parent/child hierarchy as intervals with tombstones, and
//! [`OcflObjectMap`] records which backend object holds each resource.
//! Both stage per-transaction mutations that become visible to other
//! readers only at commit, and both persist committed state through an
//! append-only [`journal::Journal`] replayed at startup.

pub mod containment;
pub mod error;
pub mod journal;
pub mod mapping;

pub use containment::{ContainmentEntry, ContainmentIndex};
pub use error::{IndexError, IndexResult};
pub use mapping::{OcflMapping, OcflObjectMap};
