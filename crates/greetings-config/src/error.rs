//! Errors raised while loading `greetings.kdl`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("greetings.kdl is not valid KDL: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is required")]
    MissingField(String),

    #[error("bad value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("{0} is defined more than once")]
    Duplicate(String),

    #[error("unknown command '{0}' in commands block")]
    UnknownCommand(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
