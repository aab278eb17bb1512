//! Whole-stream encryption and decryption
//!
//! [`StreamEncryptor`] and [`StreamDecryptor`] hold only the passphrase and
//! KDF parameters. Every call builds its own [`CipherSession`], so one
//! instance can serve any number of independent, concurrent streams.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::CipherError;
use crate::kdf::KdfParams;
use crate::session::CipherSession;
use crate::KEY_SIZE;

fn check_setup(passphrase: &SecretString, params: &KdfParams) -> Result<(), CipherError> {
    if passphrase.expose_secret().is_empty() {
        return Err(CipherError::EmptyPassphrase);
    }
    params.validate(KEY_SIZE)
}

#[derive(Debug, Clone)]
pub struct StreamEncryptor {
    passphrase: Arc<SecretString>,
    params: KdfParams,
}

impl StreamEncryptor {
    pub fn new(passphrase: SecretString) -> Result<Self, CipherError> {
        Self::with_params(passphrase, KdfParams::default())
    }

    /// Non-default KDF costs produce streams that only a decryptor with the
    /// same costs can read; this exists for tests and benchmarks.
    pub fn with_params(passphrase: SecretString, params: KdfParams) -> Result<Self, CipherError> {
        check_setup(&passphrase, &params)?;
        Ok(Self {
            passphrase: Arc::new(passphrase),
            params,
        })
    }

    /// A fresh session with random salt and IV.
    pub async fn session(&self) -> Result<CipherSession, CipherError> {
        CipherSession::generate(self.passphrase.clone(), self.params.clone()).await
    }

    /// Encrypt all of `reader` into `writer` under a fresh session.
    ///
    /// Returns the number of plaintext bytes encrypted.
    pub async fn encrypt<R, W>(&self, reader: R, writer: &mut W) -> Result<u64, CipherError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let session = self.session().await?;
        encrypt_with(session, reader, writer).await
    }
}

/// Write `iv ++ salt`, then the keystream-XORed contents of `reader`.
pub async fn encrypt_with<R, W>(
    session: CipherSession,
    reader: R,
    writer: &mut W,
) -> Result<u64, CipherError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&session.header()).await?;

    let mut reader = session.into_reader(reader);
    let bytes = tokio::io::copy(&mut reader, writer).await?;
    writer.flush().await?;

    debug!(bytes, "stream encrypted");
    Ok(bytes)
}

#[derive(Debug, Clone)]
pub struct StreamDecryptor {
    passphrase: Arc<SecretString>,
    params: KdfParams,
}

impl StreamDecryptor {
    pub fn new(passphrase: SecretString) -> Result<Self, CipherError> {
        Self::with_params(passphrase, KdfParams::default())
    }

    pub fn with_params(passphrase: SecretString, params: KdfParams) -> Result<Self, CipherError> {
        check_setup(&passphrase, &params)?;
        Ok(Self {
            passphrase: Arc::new(passphrase),
            params,
        })
    }

    /// Read the header from `reader`, then decrypt the rest into `writer`.
    ///
    /// Returns the number of plaintext bytes written. Without an
    /// authentication tag a wrong passphrase is not detected here; it yields
    /// garbage of the right length.
    pub async fn decrypt<R, W>(&self, mut reader: R, writer: &mut W) -> Result<u64, CipherError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let session =
            CipherSession::from_header(&mut reader, self.passphrase.clone(), self.params.clone())
                .await?;

        let mut reader = session.into_reader(reader);
        let bytes = tokio::io::copy(&mut reader, writer).await?;
        writer.flush().await?;

        debug!(bytes, "stream decrypted");
        Ok(bytes)
    }
}
