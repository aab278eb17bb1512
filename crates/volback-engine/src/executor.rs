//! Backup and restore runs

use std::io;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use volback_archive::{is_archive, ArchiveError, BLOCK_SIZE};
use volback_core::{Location, VolbackConfig};
use volback_crypto::{KdfParams, StreamDecryptor, StreamEncryptor};
use volback_pipeline::{BoxReader, Pipeline, PipelineError};
use volback_storage::{Endpoint, StorageError};

use crate::error::{ExecutorError, SetupError};
use crate::progress::{ProgressFn, ProgressReader};
use crate::transforms::{archive_stage, decrypt_stage, encrypt_stage};

/// Bytes inspected to decide whether a restored payload is an archive
const SNIFF_LEN: usize = 2 * BLOCK_SIZE;

/// An endpoint together with the path used on it
#[derive(Debug, Clone)]
pub struct Binding {
    pub endpoint: Endpoint,
    pub path: String,
}

impl Binding {
    pub fn new(endpoint: Endpoint, path: impl Into<String>) -> Self {
        Self {
            endpoint,
            path: path.into(),
        }
    }

    fn from_location(location: &Location, force_path_style: bool) -> Result<Self, StorageError> {
        let endpoint = Endpoint::from_location(location, force_path_style)?;
        Ok(Self::new(endpoint, location.path.clone()))
    }
}

/// Outcome of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Bytes delivered to the destination (file content only when unpacked)
    pub bytes: u64,
    /// Whether the payload went through the archive transform
    pub archived: bool,
}

#[derive(Debug)]
pub struct Executor {
    source: Binding,
    destination: Binding,
    encryptor: StreamEncryptor,
    decryptor: StreamDecryptor,
}

impl Executor {
    /// Validate `cfg` and build every component it names.
    ///
    /// All setup failures are collected and reported together.
    pub fn from_config(cfg: &VolbackConfig) -> Result<Self, ExecutorError> {
        cfg.validate()?;
        let force_path_style = cfg.s3_force_path_style;
        Self::assemble(
            Binding::from_location(&cfg.source, force_path_style),
            Binding::from_location(&cfg.destination, force_path_style),
            &cfg.encryption.key,
            KdfParams::default(),
        )
    }

    pub fn new(
        source: Binding,
        destination: Binding,
        passphrase: &str,
    ) -> Result<Self, ExecutorError> {
        Self::assemble(Ok(source), Ok(destination), passphrase, KdfParams::default())
    }

    /// Like [`Executor::new`] with explicit KDF costs. Streams written with
    /// non-default costs can only be restored with the same costs.
    pub fn with_kdf_params(
        source: Binding,
        destination: Binding,
        passphrase: &str,
        params: KdfParams,
    ) -> Result<Self, ExecutorError> {
        Self::assemble(Ok(source), Ok(destination), passphrase, params)
    }

    fn assemble(
        source: Result<Binding, StorageError>,
        destination: Result<Binding, StorageError>,
        passphrase: &str,
        params: KdfParams,
    ) -> Result<Self, ExecutorError> {
        let encryptor =
            StreamEncryptor::with_params(SecretString::from(passphrase.to_owned()), params.clone());
        let decryptor =
            StreamDecryptor::with_params(SecretString::from(passphrase.to_owned()), params);

        match (source, destination, encryptor, decryptor) {
            (Ok(source), Ok(destination), Ok(encryptor), Ok(decryptor)) => Ok(Self {
                source,
                destination,
                encryptor,
                decryptor,
            }),
            (source, destination, encryptor, decryptor) => {
                let errors: Vec<SetupError> = [
                    source.err().map(SetupError::Source),
                    destination.err().map(SetupError::Destination),
                    encryptor.err().map(SetupError::Encryptor),
                    decryptor.err().map(SetupError::Decryptor),
                ]
                .into_iter()
                .flatten()
                .collect();
                Err(ExecutorError::Setup(errors))
            }
        }
    }

    pub fn source(&self) -> &Binding {
        &self.source
    }

    pub fn destination(&self) -> &Binding {
        &self.destination
    }

    /// Source → (archive) → encrypt → destination.
    ///
    /// A source path that is a filesystem directory is archived first; a
    /// single file is encrypted as-is.
    pub async fn backup(
        &self,
        cancel: CancellationToken,
        progress: Option<&ProgressFn>,
    ) -> Result<Transfer, ExecutorError> {
        let src = &self.source.path;
        let dst = &self.destination.path;
        info!(src = %src, dst = %dst, "backing up");

        let (input, pipeline, archived): (BoxReader, Pipeline, bool) =
            match self.source.endpoint.pull(src).await {
                Ok(reader) => (
                    reader,
                    Pipeline::new(vec![encrypt_stage(self.encryptor.clone())])?,
                    false,
                ),
                Err(StorageError::IsDirectory(_)) => match self.source.endpoint {
                    Endpoint::Fs(_) => (
                        Box::new(tokio::io::empty()),
                        Pipeline::new(vec![
                            archive_stage(PathBuf::from(src)),
                            encrypt_stage(self.encryptor.clone()),
                        ])?,
                        true,
                    ),
                    Endpoint::ObjectStore(_) => {
                        return Err(ExecutorError::UnsupportedDirectory(src.clone()))
                    }
                },
                Err(source) => {
                    return Err(ExecutorError::Pull {
                        path: src.clone(),
                        source,
                    })
                }
            };

        let (output, stages) = pipeline.execute(cancel, input).into_parts();
        let output = ProgressReader::new(output, "backup", progress);
        let pushed = self.destination.endpoint.push(output, dst).await;
        stages.join().await;
        let bytes = pushed.map_err(|e| push_error(dst, e))?;

        info!(src = %src, dst = %dst, bytes, archived, "backup complete");
        Ok(Transfer { bytes, archived })
    }

    /// Source → decrypt → destination.
    ///
    /// When the destination is the filesystem and the plaintext is an
    /// archive, it is unpacked with the destination path as root.
    pub async fn restore(
        &self,
        cancel: CancellationToken,
        progress: Option<&ProgressFn>,
    ) -> Result<Transfer, ExecutorError> {
        let src = &self.source.path;
        let dst = &self.destination.path;
        info!(src = %src, dst = %dst, "restoring");

        let input = self
            .source
            .endpoint
            .pull(src)
            .await
            .map_err(|source| ExecutorError::Pull {
                path: src.clone(),
                source,
            })?;
        let pipeline = Pipeline::new(vec![decrypt_stage(self.decryptor.clone())])?;
        let (output, stages) = pipeline.execute(cancel, input).into_parts();
        let output = ProgressReader::new(output, "restore", progress);

        let delivered = self.deliver_plaintext(output, dst).await;
        stages.join().await;
        let transfer = delivered?;

        info!(src = %src, dst = %dst, bytes = transfer.bytes, archived = transfer.archived, "restore complete");
        Ok(transfer)
    }

    /// Write decrypted `output` to the destination, unpacking it when it is
    /// an archive headed for the filesystem. Consumes `output` either way.
    async fn deliver_plaintext<R>(
        &self,
        mut output: R,
        dst: &str,
    ) -> Result<Transfer, ExecutorError>
    where
        R: AsyncRead + Unpin + Send,
    {
        match self.destination.endpoint {
            Endpoint::Fs(_) => {
                let mut head = Vec::with_capacity(SNIFF_LEN);
                (&mut output)
                    .take(SNIFF_LEN as u64)
                    .read_to_end(&mut head)
                    .await
                    .map_err(surface_pipeline)?;
                let archived = is_archive(&head);
                debug!(archived, sniffed = head.len(), "inspected restored payload");

                let reader = io::Cursor::new(head).chain(output);
                if archived {
                    let summary = volback_archive::unpack(reader, Path::new(dst))
                        .await
                        .map_err(|e| unpack_error(dst, e))?;
                    Ok(Transfer {
                        bytes: summary.bytes,
                        archived,
                    })
                } else {
                    let bytes = self.push_plain(reader, dst).await?;
                    Ok(Transfer { bytes, archived })
                }
            }
            Endpoint::ObjectStore(_) => {
                let bytes = self.push_plain(output, dst).await?;
                Ok(Transfer {
                    bytes,
                    archived: false,
                })
            }
        }
    }

    async fn push_plain<R>(&self, reader: R, dst: &str) -> Result<u64, ExecutorError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.destination
            .endpoint
            .push(reader, dst)
            .await
            .map_err(|e| push_error(dst, e))
    }
}

/// A failed stage reaches the caller as an I/O error; report it as the
/// pipeline failure it is.
fn surface_pipeline(err: io::Error) -> ExecutorError {
    match PipelineError::try_from_io(err) {
        Ok(pipeline) => ExecutorError::Pipeline(pipeline),
        Err(io) => ExecutorError::Io(io),
    }
}

fn push_error(path: &str, err: StorageError) -> ExecutorError {
    match err {
        StorageError::Io { source, path: at } => match PipelineError::try_from_io(source) {
            Ok(pipeline) => ExecutorError::Pipeline(pipeline),
            Err(source) => ExecutorError::Push {
                path: path.to_string(),
                source: StorageError::Io { path: at, source },
            },
        },
        other => ExecutorError::Push {
            path: path.to_string(),
            source: other,
        },
    }
}

fn unpack_error(path: &str, err: ArchiveError) -> ExecutorError {
    match err {
        ArchiveError::Corrupt(source) => match PipelineError::try_from_io(source) {
            Ok(pipeline) => ExecutorError::Pipeline(pipeline),
            Err(source) => ExecutorError::Unpack {
                path: path.to_string(),
                source: ArchiveError::Corrupt(source),
            },
        },
        other => ExecutorError::Unpack {
            path: path.to_string(),
            source: other,
        },
    }
}
