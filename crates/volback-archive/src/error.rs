use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("writing archive entry {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("reading archive: {0}")]
    Corrupt(#[source] io::Error),

    #[error("unpacking {path}: {source}")]
    Unpack {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Entry path is absolute or climbs out of the target root
    #[error("refusing to unpack unsafe path: {0}")]
    UnsafePath(PathBuf),

    #[error("nothing to archive at {0}: not a file or directory")]
    Unsupported(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
