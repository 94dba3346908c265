//! Store errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the configuration store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML, or a value could not be converted
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Dotted path with an empty segment
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// A path segment names a scalar or sequence where a mapping is needed
    #[error("{0} is not a mapping")]
    NotAMapping(String),

    /// The document root must be a mapping
    #[error("{path}: document root is not a mapping")]
    InvalidRoot {
        /// File involved
        path: PathBuf,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Store result alias
pub type Result<T> = std::result::Result<T, StoreError>;
