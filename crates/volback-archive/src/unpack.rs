//! Recreate a packed tree under a target root

use std::io;
use std::path::{Component, Path, PathBuf};

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_tar::{Archive, EntryType};
use tracing::{debug, warn};

use crate::error::ArchiveError;
use crate::BLOCK_SIZE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
}

/// Unpack the tar stream `reader` into `root`.
///
/// `root` and any missing parents are created first. Entries are processed
/// in stream order; the first entry that cannot be read or written aborts
/// the whole unpack. Directory modes are applied last so read-only
/// directories can still be filled.
///
/// A stream that ends on an entry boundary without the end-of-archive
/// marker is rejected as truncated. On success `reader` has been drained
/// to EOF.
pub async fn unpack<R>(reader: R, root: &Path) -> Result<UnpackSummary, ArchiveError>
where
    R: AsyncRead + Unpin + Send,
{
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|source| ArchiveError::Unpack {
            path: root.to_path_buf(),
            source,
        })?;

    let mut archive = Archive::new(reader);
    let mut entries = archive.entries().map_err(ArchiveError::Corrupt)?;
    let mut summary = UnpackSummary::default();
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    while let Some(entry) = entries.next().await {
        let mut entry = entry.map_err(ArchiveError::Corrupt)?;
        let raw = entry.path().map_err(ArchiveError::Corrupt)?.into_owned();
        let rel = sanitize(&raw)?;
        let target = root.join(&rel);
        let header = entry.header();
        let kind = header.entry_type();
        let mode = header.mode().map_err(ArchiveError::Corrupt)?;

        let unpack_err = |source| ArchiveError::Unpack {
            path: target.clone(),
            source,
        };

        match kind {
            EntryType::Directory => {
                tokio::fs::create_dir_all(&target).await.map_err(unpack_err)?;
                dir_modes.push((target.clone(), mode));
                summary.directories += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(unpack_err)?;
                }
                let mut file = tokio::fs::File::create(&target)
                    .await
                    .map_err(unpack_err)?;
                let bytes = tokio::io::copy(&mut entry, &mut file)
                    .await
                    .map_err(unpack_err)?;
                file.flush().await.map_err(unpack_err)?;
                drop(file);
                set_mode(&target, mode).await.map_err(unpack_err)?;

                summary.files += 1;
                summary.bytes += bytes;
            }
            EntryType::XGlobalHeader | EntryType::XHeader => {}
            other => {
                warn!(path = %rel.display(), kind = ?other, "skipping unsupported archive entry");
            }
        }
    }

    drop(entries);
    let mut rest = archive.into_inner().map_err(|_| {
        ArchiveError::Corrupt(io::Error::other("archive reader still in use"))
    })?;
    expect_end_marker(&mut rest).await?;
    // Anything after the marker is padding; consume it so the producer finishes.
    tokio::io::copy(&mut rest, &mut tokio::io::sink())
        .await
        .map_err(ArchiveError::Corrupt)?;

    // Deepest first, so a read-only parent is locked only after its children.
    for (dir, mode) in dir_modes.iter().rev() {
        set_mode(dir, *mode)
            .await
            .map_err(|source| ArchiveError::Unpack {
                path: dir.clone(),
                source,
            })?;
    }

    debug!(
        root = %root.display(),
        files = summary.files,
        directories = summary.directories,
        bytes = summary.bytes,
        "archive unpacked"
    );
    Ok(summary)
}

/// The entry iterator stops at the first zero block, or silently at EOF on
/// a header boundary. A complete archive still has its second zero block.
async fn expect_end_marker<R>(reader: &mut R) -> Result<(), ArchiveError>
where
    R: AsyncRead + Unpin,
{
    let mut block = [0u8; BLOCK_SIZE];
    match reader.read_exact(&mut block).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(ArchiveError::Corrupt(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated archive: missing end-of-archive marker",
            )));
        }
        Err(e) => return Err(ArchiveError::Corrupt(e)),
    }
    if block.iter().any(|&b| b != 0) {
        return Err(ArchiveError::Corrupt(io::Error::new(
            io::ErrorKind::InvalidData,
            "malformed end-of-archive marker",
        )));
    }
    Ok(())
}

/// Strip `.` components; reject absolute paths and `..`.
fn sanitize(path: &Path) -> Result<PathBuf, ArchiveError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafePath(path.to_path_buf()));
            }
        }
    }
    Ok(clean)
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
