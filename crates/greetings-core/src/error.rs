//! Error types for the greetings pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An external collaborator (build engine, registry, host, vault) failed.
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A single build matrix cell failed.
    #[error("variant {variant} failed: {source}")]
    Variant {
        variant: String,
        #[source]
        source: Box<Error>,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a collaborator failure.
    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
