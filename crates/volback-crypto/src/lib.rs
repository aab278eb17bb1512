//! volback-crypto: self-describing stream encryption for volback
//!
//! Confidentiality only: AES-128 in counter mode, no authentication tag.
//! Every encrypted stream carries the parameters needed to decrypt it:
//!
//! ```text
//! offset 0..16   : initialization vector (raw bytes)
//! offset 16..32  : Argon2id salt (raw bytes)
//! offset 32..end : keystream XOR plaintext
//! ```
//!
//! The key is `Argon2id(passphrase, salt)` with fixed cost parameters (see
//! [`KdfParams::default`]), so only the passphrase has to be shared.

pub mod error;
pub mod kdf;
pub mod session;
pub mod stream;

pub use error::CipherError;
pub use kdf::{derive_key, DerivedKey, KdfParams};
pub use session::{CipherReader, CipherSession};
pub use stream::{StreamDecryptor, StreamEncryptor};

/// AES-128 key size in bytes
pub const KEY_SIZE: usize = 16;

/// Argon2id salt size in bytes
pub const SALT_SIZE: usize = 16;

/// Counter-mode IV size in bytes (one AES block)
pub const IV_SIZE: usize = 16;

/// Length of the inline `iv ++ salt` header
pub const HEADER_SIZE: usize = IV_SIZE + SALT_SIZE;
