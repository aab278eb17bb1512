//! volback-archive: linear tar encoding of a file or directory tree
//!
//! - `pack`: walk a path and write one tar entry per directory and regular
//!   file, streaming each file's content straight into the writer
//! - `unpack`: recreate the tree under a target root, aborting on the first
//!   entry that cannot be read or written
//! - [`is_archive`]: sniff the first block of a stream for a tar header

pub mod error;
pub mod pack;
pub mod unpack;

pub use error::ArchiveError;
pub use pack::{pack, PackSummary};
pub use unpack::{unpack, UnpackSummary};

/// Size of one tar block
pub const BLOCK_SIZE: usize = 512;

const MAGIC_OFFSET: usize = 257;
const MAGIC: &[u8] = b"ustar";

/// Whether `head`, the first bytes of a stream, looks like a tar archive.
///
/// Matches a POSIX or GNU header (`ustar` magic at offset 257), or the
/// two zero blocks that make up the archive of an empty directory. Needs
/// at least [`BLOCK_SIZE`] bytes (two blocks for the empty case).
pub fn is_archive(head: &[u8]) -> bool {
    if head.len() < BLOCK_SIZE {
        return false;
    }
    if &head[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()] == MAGIC {
        return true;
    }
    head.len() >= 2 * BLOCK_SIZE && head.iter().all(|&b| b == 0)
}
