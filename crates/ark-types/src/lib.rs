//! Foundation types for the Ark repository engine.
//!
//! This crate provides the identifier, metadata, and operation types used
//! throughout the engine. Every other Ark crate depends on `ark-types`.
//!
//! # Key Types
//!
//! - [`ResourceId`] — Hierarchical, URI-shaped resource identifier
//! - [`InteractionModel`] — Container / binary classification of a resource
//! - [`Digest`] / [`DigestAlgorithm`] — Content digests as `urn:<alg>:<hex>`
//! - [`ResourceHeaders`] — Server-managed metadata persisted beside content
//! - [`ResourceOperation`] — Immutable description of a requested mutation
//! - [`TransactionId`] — Identifier of the unit of work an operation runs in

pub mod digest;
pub mod error;
pub mod headers;
pub mod id;
pub mod model;
pub mod operation;
pub mod time;
pub mod transaction;

pub use digest::{Digest, DigestAlgorithm, MultiDigestWriter};
pub use error::TypeError;
pub use headers::ResourceHeaders;
pub use id::ResourceId;
pub use model::InteractionModel;
pub use operation::{
    CreateBinaryOperation, CreateRdfOperation, CreateVersionOperation, DeleteOperation,
    OperationType, PurgeOperation, ResourceOperation, UpdateBinaryOperation, UpdateRdfOperation,
};
pub use transaction::TransactionId;
