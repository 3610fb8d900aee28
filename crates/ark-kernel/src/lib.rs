//! Transactions, locking, and persistence orchestration.
//!
//! A [`Repository`] assembles the object store, the containment and
//! mapping indexes, and a [`TransactionManager`] from one
//! [`RepositoryConfig`]. Work happens inside a [`Transaction`], which
//! locks resources through the [`ResourceLockManager`] and stages
//! changes in a [`StorageSession`]; the session routes each operation
//! to a [`persisters::Persister`] and lands everything in the backend
//! on commit. All staged state is isolated until then and discarded on
//! rollback.

pub mod config;
pub mod error;
pub mod locks;
pub mod manager;
pub mod persisters;
pub mod repository;
pub mod session;
pub mod transaction;

pub use config::RepositoryConfig;
pub use error::{KernelError, KernelResult};
pub use locks::ResourceLockManager;
pub use manager::TransactionManager;
pub use repository::Repository;
pub use session::{SessionFactory, StorageSession};
pub use transaction::{Transaction, TxState};
