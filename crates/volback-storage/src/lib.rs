//! volback-storage: where payloads come from and go to
//!
//! A closed set of endpoints, each able to `pull` a byte stream from a path
//! and `push` a byte stream to a path:
//! - [`FsEndpoint`]: the local filesystem
//! - [`ObjectStoreEndpoint`]: an S3-compatible bucket through OpenDAL

pub mod endpoint;
pub mod error;
pub mod operator;

pub use endpoint::{BoxReader, Endpoint, FsEndpoint, ObjectStoreEndpoint};
pub use error::StorageError;
pub use operator::{build_operator, StorageConfig};
