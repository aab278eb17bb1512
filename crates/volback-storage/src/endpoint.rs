//! Pull and push byte streams at a location

use std::path::Path;

use bytes::Bytes;
use opendal::Operator;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use volback_core::{Location, LocationKind};

use crate::error::StorageError;
use crate::operator::{build_operator, StorageConfig};

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Read size for pushes into the object store
const PUSH_BUF_SIZE: usize = 256 * 1024;

/// Multipart part size; S3 rejects parts under 5 MiB
const PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub enum Endpoint {
    Fs(FsEndpoint),
    ObjectStore(ObjectStoreEndpoint),
}

impl Endpoint {
    pub fn fs() -> Self {
        Endpoint::Fs(FsEndpoint)
    }

    pub fn object_store(op: Operator) -> Self {
        Endpoint::ObjectStore(ObjectStoreEndpoint::new(op))
    }

    /// Build the endpoint a configured location names.
    pub fn from_location(location: &Location, force_path_style: bool) -> Result<Self, StorageError> {
        match location.kind {
            Some(LocationKind::Fs) => Ok(Endpoint::fs()),
            Some(LocationKind::S3) => {
                let cfg = StorageConfig::from_location(location, force_path_style);
                build_operator(&cfg).map(Endpoint::object_store)
            }
            None => Err(StorageError::Config("location kind is required".into())),
        }
    }

    /// Open `path` for streaming.
    ///
    /// Fails with [`StorageError::NotFound`] when nothing is there and
    /// [`StorageError::IsDirectory`] when `path` is a directory.
    pub async fn pull(&self, path: &str) -> Result<BoxReader, StorageError> {
        match self {
            Endpoint::Fs(fs) => fs.pull(path).await,
            Endpoint::ObjectStore(store) => store.pull(path).await,
        }
    }

    /// Drain `reader` into `path`, replacing whatever was there.
    ///
    /// Returns the number of bytes written. On failure, bytes already
    /// written are left in place.
    pub async fn push<R>(&self, reader: R, path: &str) -> Result<u64, StorageError>
    where
        R: AsyncRead + Unpin + Send,
    {
        match self {
            Endpoint::Fs(fs) => fs.push(reader, path).await,
            Endpoint::ObjectStore(store) => store.push(reader, path).await,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Endpoint::Fs(_) => "fs",
            Endpoint::ObjectStore(_) => "s3",
        }
    }
}

/// The local filesystem; paths are used as given.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsEndpoint;

impl FsEndpoint {
    pub async fn pull(&self, path: &str) -> Result<BoxReader, StorageError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        if meta.is_dir() {
            return Err(StorageError::IsDirectory(path.to_string()));
        }

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        debug!(path, size = meta.len(), "pulling file");
        Ok(Box::new(file))
    }

    pub async fn push<R>(&self, mut reader: R, path: &str) -> Result<u64, StorageError>
    where
        R: AsyncRead + Unpin + Send,
    {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(path, e))?;
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        file.flush().await.map_err(|e| StorageError::io(path, e))?;

        debug!(path, bytes = written, "pushed file");
        Ok(written)
    }
}

/// One S3-compatible bucket; paths are object keys.
#[derive(Debug, Clone)]
pub struct ObjectStoreEndpoint {
    op: Operator,
}

impl ObjectStoreEndpoint {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub async fn pull(&self, path: &str) -> Result<BoxReader, StorageError> {
        let meta = self
            .op
            .stat(path)
            .await
            .map_err(|e| StorageError::object_store(path, e))?;
        if meta.is_dir() {
            return Err(StorageError::IsDirectory(path.to_string()));
        }

        let stream = self
            .op
            .reader(path)
            .await
            .map_err(|e| StorageError::object_store(path, e))?
            .into_bytes_stream(..)
            .await
            .map_err(|e| StorageError::object_store(path, e))?;

        debug!(path, size = meta.content_length(), "pulling object");
        Ok(Box::new(StreamReader::<_, Bytes>::new(Box::pin(stream))))
    }

    pub async fn push<R>(&self, mut reader: R, path: &str) -> Result<u64, StorageError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut writer = self
            .op
            .writer_with(path)
            .chunk(PART_SIZE)
            .await
            .map_err(|e| StorageError::object_store(path, e))?;

        let mut buf = vec![0u8; PUSH_BUF_SIZE];
        let mut written = 0u64;
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    abort_upload(&mut writer, path).await;
                    return Err(StorageError::io(path, e));
                }
            };
            if let Err(e) = writer.write(Bytes::copy_from_slice(&buf[..n])).await {
                abort_upload(&mut writer, path).await;
                return Err(StorageError::object_store(path, e));
            }
            written += n as u64;
        }

        writer
            .close()
            .await
            .map_err(|e| StorageError::object_store(path, e))?;

        debug!(path, bytes = written, "pushed object");
        Ok(written)
    }
}

/// Discard the parts uploaded so far; a failure here is only logged.
async fn abort_upload(writer: &mut opendal::Writer, path: &str) {
    if let Err(abort) = writer.abort().await {
        warn!(path, error = %abort, "aborting object upload failed");
    }
}
