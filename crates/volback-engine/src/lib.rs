//! volback-engine: backup and restore orchestration
//!
//! An [`Executor`] owns a source binding, a destination binding and the
//! passphrase-derived cipher. `backup` pulls from the source, archives
//! directories, encrypts and pushes; `restore` pulls, decrypts and either
//! pushes the plaintext or unpacks it when it is an archive bound for the
//! filesystem.

pub mod error;
pub mod executor;
pub mod progress;
pub mod transforms;

pub use error::{ExecutorError, SetupError};
pub use executor::{Binding, Executor, Transfer};
pub use progress::ProgressFn;
