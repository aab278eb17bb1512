use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}: not found")]
    NotFound(String),

    /// The path names a directory; callers archive it instead of streaming it
    #[error("{0}: is a directory")]
    IsDirectory(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("object store {path}: {source}")]
    ObjectStore {
        path: String,
        #[source]
        source: opendal::Error,
    },

    #[error("invalid object store configuration: {0}")]
    Config(String),
}

impl StorageError {
    pub(crate) fn io(path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return StorageError::NotFound(path.to_string());
        }
        StorageError::Io {
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn object_store(path: &str, source: opendal::Error) -> Self {
        if source.kind() == opendal::ErrorKind::NotFound {
            return StorageError::NotFound(path.to_string());
        }
        StorageError::ObjectStore {
            path: path.to_string(),
            source,
        }
    }
}
