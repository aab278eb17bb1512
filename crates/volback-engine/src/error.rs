use std::fmt;

use thiserror::Error;
use volback_archive::ArchiveError;
use volback_core::ConfigError;
use volback_crypto::CipherError;
use volback_pipeline::PipelineError;
use volback_storage::StorageError;

/// One component that could not be constructed
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("source endpoint: {0}")]
    Source(#[source] StorageError),

    #[error("destination endpoint: {0}")]
    Destination(#[source] StorageError),

    #[error("stream encryptor: {0}")]
    Encryptor(#[source] CipherError),

    #[error("stream decryptor: {0}")]
    Decryptor(#[source] CipherError),
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Every component that failed to build, not just the first
    #[error("setup failed: {}", SetupList(.0))]
    Setup(Vec<SetupError>),

    #[error("pulling {path}: {source}")]
    Pull {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("pushing {path}: {source}")]
    Push {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("unpacking into {path}: {source}")]
    Unpack {
        path: String,
        #[source]
        source: ArchiveError,
    },

    #[error("transform {0}")]
    Pipeline(#[from] PipelineError),

    #[error("reading transformed stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is a directory; only filesystem directories can be archived")]
    UnsupportedDirectory(String),
}

struct SetupList<'a>(&'a [SetupError]);

impl fmt::Display for SetupList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}
