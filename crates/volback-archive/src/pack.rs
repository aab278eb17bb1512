//! Tar encoding of a file or directory tree

use std::ffi::OsString;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::UNIX_EPOCH;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, Take};
use tokio_tar::{Builder, EntryType, Header};
use tracing::{debug, warn};

use crate::error::ArchiveError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackSummary {
    pub files: u64,
    pub directories: u64,
    /// File content bytes, excluding headers and padding
    pub bytes: u64,
    /// Symlinks and special files left out of the archive
    pub skipped: u64,
}

/// Write `path` as a tar stream into `writer`.
///
/// A regular file becomes a single entry named after its base name. A
/// directory is walked depth-first in sorted name order; every directory
/// entry precedes its children and paths are relative to `path`, so the
/// root itself gets no entry. Only one file is open at a time.
pub async fn pack<W>(path: &Path, writer: W) -> Result<PackSummary, ArchiveError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|source| ArchiveError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let mut builder = Builder::new(writer);
    let mut summary = PackSummary::default();

    if meta.is_file() {
        let name = path
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| ArchiveError::Unsupported(path.to_path_buf()))?;
        append_file(&mut builder, path, &name, &meta, &mut summary).await?;
    } else if meta.is_dir() {
        pack_tree(&mut builder, path, &mut summary).await?;
    } else {
        return Err(ArchiveError::Unsupported(path.to_path_buf()));
    }

    let mut writer = builder.into_inner().await?;
    writer.flush().await?;

    debug!(
        path = %path.display(),
        files = summary.files,
        directories = summary.directories,
        bytes = summary.bytes,
        "archive packed"
    );
    Ok(summary)
}

async fn pack_tree<W>(
    builder: &mut Builder<W>,
    root: &Path,
    summary: &mut PackSummary,
) -> Result<(), ArchiveError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    // Relative paths still to visit; popped in sorted order.
    let mut pending = sorted_children(root, Path::new("")).await?;

    while let Some(rel) = pending.pop() {
        let full = root.join(&rel);
        let meta = tokio::fs::symlink_metadata(&full)
            .await
            .map_err(|source| ArchiveError::Read {
                path: full.clone(),
                source,
            })?;

        if meta.is_dir() {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            header.set_mode(mode_of(&meta, 0o755));
            header.set_mtime(mtime_of(&meta));
            builder
                .append_data(&mut header, &rel, tokio::io::empty())
                .await
                .map_err(|source| ArchiveError::Append {
                    path: rel.clone(),
                    source,
                })?;
            summary.directories += 1;

            pending.extend(sorted_children(root, &rel).await?);
        } else if meta.is_file() {
            append_file(builder, &full, &rel, &meta, summary).await?;
        } else {
            warn!(path = %full.display(), "skipping symlink or special file");
            summary.skipped += 1;
        }
    }

    Ok(())
}

/// Children of `root/rel` as relative paths, reverse-sorted for popping.
async fn sorted_children(root: &Path, rel: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let dir = root.join(rel);
    let read_err = |source| ArchiveError::Read {
        path: dir.clone(),
        source,
    };

    let mut names: Vec<OsString> = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await.map_err(read_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        names.push(entry.file_name());
    }
    names.sort_unstable_by(|a, b| b.cmp(a));

    Ok(names.into_iter().map(|name| rel.join(name)).collect())
}

async fn append_file<W>(
    builder: &mut Builder<W>,
    full: &Path,
    name: &Path,
    meta: &Metadata,
    summary: &mut PackSummary,
) -> Result<(), ArchiveError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let file = tokio::fs::File::open(full)
        .await
        .map_err(|source| ArchiveError::Read {
            path: full.to_path_buf(),
            source,
        })?;

    let size = meta.len();
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(size);
    header.set_mode(mode_of(meta, 0o644));
    header.set_mtime(mtime_of(meta));

    // The header promises exactly `size` bytes; a file that grew or shrank
    // since stat must not desync the stream.
    builder
        .append_data(&mut header, name, SizedReader::new(file, size))
        .await
        .map_err(|source| ArchiveError::Append {
            path: name.to_path_buf(),
            source,
        })?;

    summary.files += 1;
    summary.bytes += size;
    Ok(())
}

/// Reads exactly `size` bytes from `inner`: stops there, and fails with
/// `UnexpectedEof` if `inner` ends first.
struct SizedReader<R> {
    inner: Take<R>,
    remaining: u64,
}

impl<R: AsyncRead + Unpin> SizedReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner: inner.take(size),
            remaining: size,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for SizedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let n = (buf.filled().len() - before) as u64;
        if n == 0 && this.remaining > 0 && buf.remaining() > 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "file shrank while being archived: {} bytes missing",
                    this.remaining
                ),
            )));
        }
        this.remaining -= n;
        Poll::Ready(Ok(()))
    }
}

#[cfg(unix)]
fn mode_of(meta: &Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata, default: u32) -> u32 {
    if meta.permissions().readonly() {
        default & !0o222
    } else {
        default
    }
}

fn mtime_of(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
