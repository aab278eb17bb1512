//! Key derivation: Argon2id passphrase + salt → stream key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::CipherError;

/// Key material derived from a passphrase via Argon2id.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: Vec<u8>,
}

impl DerivedKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / passes (default: 1)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// The fixed parameters every volback stream is encrypted with.
    fn default() -> Self {
        Self {
            mem_cost_kib: 64 * 1024,
            time_cost: 1,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    fn to_argon2(&self, output_len: usize) -> Result<Params, CipherError> {
        Params::new(
            self.mem_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(output_len),
        )
        .map_err(|e| CipherError::Kdf(format!("invalid Argon2id params: {e}")))
    }

    /// Reject parameter sets Argon2 would refuse, before any data is read.
    pub fn validate(&self, output_len: usize) -> Result<(), CipherError> {
        self.to_argon2(output_len).map(|_| ())
    }
}

/// Derive `output_len` bytes from a passphrase and salt using Argon2id v1.3.
///
/// Pure: identical inputs always yield identical output. Each output length
/// is an independent derivation, not a prefix of a longer one. This is
/// CPU- and memory-heavy; async callers should run it on the blocking pool.
pub fn derive_key(
    passphrase: &SecretString,
    salt: &[u8],
    output_len: usize,
    params: &KdfParams,
) -> Result<DerivedKey, CipherError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2(output_len)?);

    let mut key = vec![0u8; output_len];
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| CipherError::Kdf(format!("Argon2id KDF failed: {e}")))?;

    Ok(DerivedKey::from_bytes(key))
}
