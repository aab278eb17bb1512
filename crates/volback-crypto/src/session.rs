//! Cipher sessions: one keystream per encrypt/decrypt invocation
//!
//! A session owns the salt, IV and the AES-128-CTR keystream built from the
//! derived key. The keystream tracks its own byte offset, so callers may feed
//! it buffers of any size in any split and get identical output.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use aes::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use secrecy::SecretString;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::error::CipherError;
use crate::kdf::{derive_key, DerivedKey, KdfParams};
use crate::{HEADER_SIZE, IV_SIZE, KEY_SIZE, SALT_SIZE};

/// AES-128 with a big-endian 128-bit counter spanning the whole IV block
type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

pub struct CipherSession {
    salt: [u8; SALT_SIZE],
    iv: [u8; IV_SIZE],
    keystream: Aes128Ctr,
}

impl std::fmt::Debug for CipherSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherSession")
            .field("salt", &self.salt)
            .field("iv", &self.iv)
            .field("keystream", &"[REDACTED]")
            .finish()
    }
}

impl CipherSession {
    /// Build a session from an already-derived key and explicit header values.
    pub fn new(
        key: &DerivedKey,
        salt: [u8; SALT_SIZE],
        iv: [u8; IV_SIZE],
    ) -> Result<Self, CipherError> {
        let keystream = Aes128Ctr::new_from_slices(key.as_bytes(), &iv)
            .map_err(|e| CipherError::InvalidLength(format!("{e} (key is {} bytes)", key.len())))?;
        Ok(Self {
            salt,
            iv,
            keystream,
        })
    }

    /// Derive the key for `salt` on the blocking pool and build a session.
    pub async fn establish(
        passphrase: Arc<SecretString>,
        salt: [u8; SALT_SIZE],
        iv: [u8; IV_SIZE],
        params: KdfParams,
    ) -> Result<Self, CipherError> {
        let key = tokio::task::spawn_blocking(move || {
            derive_key(&passphrase, &salt, KEY_SIZE, &params)
        })
        .await??;
        Self::new(&key, salt, iv)
    }

    /// Fresh session for encryption: random salt and IV.
    pub async fn generate(
        passphrase: Arc<SecretString>,
        params: KdfParams,
    ) -> Result<Self, CipherError> {
        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        {
            // ThreadRng is !Send; it must not live across the await below.
            let mut rng = rand::thread_rng();
            rng.fill_bytes(&mut salt);
            rng.fill_bytes(&mut iv);
        }
        Self::establish(passphrase, salt, iv, params).await
    }

    /// Rebuild the session for decryption from the head of `reader`.
    ///
    /// Consumes exactly [`HEADER_SIZE`] bytes on success. Fails with
    /// [`CipherError::TruncatedStream`] if the reader ends first.
    pub async fn from_header<R>(
        reader: &mut R,
        passphrase: Arc<SecretString>,
        params: KdfParams,
    ) -> Result<Self, CipherError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            let n = reader.read(&mut header[filled..]).await?;
            if n == 0 {
                return Err(CipherError::TruncatedStream { read: filled });
            }
            filled += n;
        }

        let mut iv = [0u8; IV_SIZE];
        let mut salt = [0u8; SALT_SIZE];
        iv.copy_from_slice(&header[..IV_SIZE]);
        salt.copy_from_slice(&header[IV_SIZE..]);

        Self::establish(passphrase, salt, iv, params).await
    }

    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// The inline header: `iv ++ salt`
    pub fn header(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[..IV_SIZE].copy_from_slice(&self.iv);
        header[IV_SIZE..].copy_from_slice(&self.salt);
        header
    }

    /// XOR the next `buf.len()` keystream bytes into `buf`.
    pub fn apply_keystream(&mut self, buf: &mut [u8]) {
        self.keystream.apply_keystream(buf);
    }

    /// Wrap `inner` so every byte read through it passes the keystream.
    pub fn into_reader<R>(self, inner: R) -> CipherReader<R> {
        CipherReader {
            session: self,
            inner,
            processed: 0,
        }
    }
}

/// `AsyncRead` adapter applying a session's keystream as bytes are read.
///
/// Encryption and decryption are the same operation in counter mode.
#[derive(Debug)]
pub struct CipherReader<R> {
    session: CipherSession,
    inner: R,
    processed: u64,
}

impl<R> CipherReader<R> {
    /// Bytes transformed so far
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CipherReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let fresh = &mut buf.filled_mut()[before..];
        this.session.apply_keystream(fresh);
        this.processed += fresh.len() as u64;
        Poll::Ready(Ok(()))
    }
}
