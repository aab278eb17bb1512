//! OpenDAL Operator factory for S3-compatible endpoints

use opendal::Operator;
use volback_core::Location;

use crate::error::StorageError;

const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for one bucket
#[derive(Clone, Default)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Path-style addressing (`endpoint/bucket/key`), needed by MinIO,
    /// SeaweedFS and LocalStack. Virtual-host style otherwise.
    pub force_path_style: bool,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

impl StorageConfig {
    pub fn from_location(location: &Location, force_path_style: bool) -> Self {
        Self {
            endpoint: location.s3.s3_endpoint.clone(),
            region: location.s3.s3_region.clone(),
            bucket: location.s3.s3_bucket.clone(),
            access_key_id: location.s3.s3_access_key_id.clone(),
            secret_access_key: location.s3.s3_secret_access_key.clone(),
            force_path_style,
        }
    }
}

/// Build an OpenDAL Operator for an S3-compatible bucket
///
/// Empty credentials are left unset so OpenDAL falls back to the usual AWS
/// environment and profile lookup. Plain-HTTP endpoints are allowed with a
/// warning.
pub fn build_operator(cfg: &StorageConfig) -> Result<Operator, StorageError> {
    if cfg.bucket.is_empty() {
        return Err(StorageError::Config("bucket is required".into()));
    }
    if cfg.endpoint.starts_with("http://") {
        tracing::warn!(
            endpoint = %cfg.endpoint,
            "S3 endpoint uses plaintext HTTP: credentials and ciphertext travel unencrypted"
        );
    }

    let region = if cfg.region.is_empty() {
        DEFAULT_REGION
    } else {
        &cfg.region
    };

    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let mut builder = opendal::services::S3::default()
        .bucket(&cfg.bucket)
        .region(region);
    if !cfg.endpoint.is_empty() {
        builder = builder.endpoint(&cfg.endpoint);
    }
    if !cfg.access_key_id.is_empty() {
        builder = builder.access_key_id(&cfg.access_key_id);
    }
    if !cfg.secret_access_key.is_empty() {
        builder = builder.secret_access_key(&cfg.secret_access_key);
    }
    // Path-style is the opendal default.
    if !cfg.force_path_style {
        builder = builder.enable_virtual_host_style();
    }

    let op = Operator::new(builder)
        .map_err(|e| StorageError::Config(format!("creating OpenDAL S3 operator: {e}")))?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use volback_core::S3Location;

    fn cfg() -> StorageConfig {
        StorageConfig {
            endpoint: "http://localhost:4566".to_string(),
            region: "us-east-1".to_string(),
            bucket: "test-bucket".to_string(),
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
            force_path_style: true,
        }
    }

    #[test]
    fn test_build_operator_valid() {
        assert!(build_operator(&cfg()).is_ok(), "operator construction should succeed");
    }

    #[test]
    fn test_build_operator_virtual_host_default_region() {
        let cfg = StorageConfig {
            region: String::new(),
            force_path_style: false,
            ..cfg()
        };
        assert!(build_operator(&cfg).is_ok());
    }

    #[test]
    fn test_build_operator_requires_bucket() {
        let cfg = StorageConfig {
            bucket: String::new(),
            ..cfg()
        };
        assert!(matches!(build_operator(&cfg), Err(StorageError::Config(_))));
    }

    #[test]
    fn test_from_location() {
        let location = Location {
            kind: Some(volback_core::LocationKind::S3),
            path: "backups/home.ct".into(),
            s3: S3Location {
                s3_access_key_id: "id".into(),
                s3_secret_access_key: "secret".into(),
                s3_endpoint: "https://s3.example.com".into(),
                s3_bucket: "bucket".into(),
                s3_region: "eu-west-1".into(),
            },
        };

        let cfg = StorageConfig::from_location(&location, false);
        assert_eq!(cfg.bucket, "bucket");
        assert_eq!(cfg.region, "eu-west-1");
        assert!(!cfg.force_path_style);
        assert!(!format!("{cfg:?}").contains("secret\""));
    }
}
