use thiserror::Error;

/// Errors raised while constructing or parsing foundation types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid resource id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("invalid digest urn '{0}'")]
    InvalidDigestUrn(String),

    #[error("unknown digest algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("unknown interaction model '{0}'")]
    UnknownInteractionModel(String),
}
