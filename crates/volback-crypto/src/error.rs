use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    /// The input ended before the 32-byte `iv ++ salt` header was complete
    #[error("truncated stream: expected a 32-byte header, got {read} bytes")]
    TruncatedStream { read: usize },

    #[error("passphrase must not be empty")]
    EmptyPassphrase,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("invalid cipher key or iv length: {0}")]
    InvalidLength(String),

    #[error("key derivation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
