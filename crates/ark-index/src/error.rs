use ark_types::ResourceId;
use thiserror::Error;

/// Errors raised by the index crates.
#[derive(Debug, Error)]
pub enum IndexError {
    /// No object mapping is recorded for the resource.
    #[error("no object mapping found for resource '{0}'")]
    MappingNotFound(ResourceId),

    #[error("index journal i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("index journal serialization failure: {0}")]
    Serialization(String),
}

pub type IndexResult<T> = Result<T, IndexError>;
