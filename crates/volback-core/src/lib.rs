pub mod config;
pub mod error;
pub mod types;

pub use config::{Location, S3Location, VolbackConfig};
pub use error::{ConfigError, ConfigResult};
pub use types::LocationKind;
