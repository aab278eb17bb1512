use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::LocationKind;

/// Top-level configuration for one backup or restore run.
///
/// Loaded from an optional JSON or TOML file and then overlaid with
/// command-line flags (see [`VolbackConfig::merge`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolbackConfig {
    pub source: Location,
    /// Restore a backup instead of creating one
    pub restore: bool,
    pub encryption: EncryptionConfig,
    pub destination: Location,
    /// Use path-style S3 addressing (required by MinIO, SeaweedFS, LocalStack)
    pub s3_force_path_style: bool,
}

/// Where a payload is read from or written to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub kind: Option<LocationKind>,
    /// Filesystem path, or object key for S3 locations
    pub path: String,
    #[serde(flatten)]
    pub s3: S3Location,
}

/// S3 connection settings; only consulted when `kind = "s3"`
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Location {
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,
    pub s3_endpoint: String,
    pub s3_bucket: String,
    pub s3_region: String,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Passphrase the stream key is derived from
    pub key: String,
}

impl fmt::Debug for S3Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Location")
            .field("s3_access_key_id", &self.s3_access_key_id)
            .field("s3_secret_access_key", &redacted(&self.s3_secret_access_key))
            .field("s3_endpoint", &self.s3_endpoint)
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_region", &self.s3_region)
            .finish()
    }
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key", &redacted(&self.key))
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "[REDACTED]"
    }
}

impl VolbackConfig {
    /// Load a config file. `.json` files are parsed as JSON, everything else
    /// as TOML.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };

        parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Overlay `overrides` on top of `self`.
    ///
    /// Any non-empty value in `overrides` wins; empty strings and unset kinds
    /// fall back to `self`. Boolean switches are on if either side sets them.
    pub fn merge(self, overrides: VolbackConfig) -> VolbackConfig {
        VolbackConfig {
            source: self.source.merge(overrides.source),
            restore: self.restore || overrides.restore,
            encryption: EncryptionConfig {
                key: weak_assign(self.encryption.key, overrides.encryption.key),
            },
            destination: self.destination.merge(overrides.destination),
            s3_force_path_style: self.s3_force_path_style || overrides.s3_force_path_style,
        }
    }

    /// Check that everything needed to run is present.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.source.kind.is_none() {
            return Err(ConfigError::Missing("source kind"));
        }
        if self.source.path.is_empty() {
            return Err(ConfigError::Missing("source path"));
        }
        if self.destination.kind.is_none() {
            return Err(ConfigError::Missing("destination kind"));
        }
        if self.destination.path.is_empty() {
            return Err(ConfigError::Missing("destination path"));
        }
        if self.encryption.key.is_empty() {
            return Err(ConfigError::Missing("encryption key"));
        }
        if self.source.kind == Some(LocationKind::S3) && self.source.s3.s3_bucket.is_empty() {
            return Err(ConfigError::Missing("source s3 bucket"));
        }
        if self.destination.kind == Some(LocationKind::S3)
            && self.destination.s3.s3_bucket.is_empty()
        {
            return Err(ConfigError::Missing("destination s3 bucket"));
        }
        Ok(())
    }
}

impl Location {
    fn merge(self, overrides: Location) -> Location {
        Location {
            kind: overrides.kind.or(self.kind),
            path: weak_assign(self.path, overrides.path),
            s3: S3Location {
                s3_access_key_id: weak_assign(
                    self.s3.s3_access_key_id,
                    overrides.s3.s3_access_key_id,
                ),
                s3_secret_access_key: weak_assign(
                    self.s3.s3_secret_access_key,
                    overrides.s3.s3_secret_access_key,
                ),
                s3_endpoint: weak_assign(self.s3.s3_endpoint, overrides.s3.s3_endpoint),
                s3_bucket: weak_assign(self.s3.s3_bucket, overrides.s3.s3_bucket),
                s3_region: weak_assign(self.s3.s3_region, overrides.s3.s3_region),
            },
        }
    }
}

/// `over` unless it is the zero value, else `base`
fn weak_assign<T: Default + PartialEq>(base: T, over: T) -> T {
    if over == T::default() {
        base
    } else {
        over
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> VolbackConfig {
        VolbackConfig {
            source: Location {
                kind: Some(LocationKind::Fs),
                path: "data".into(),
                ..Default::default()
            },
            destination: Location {
                kind: Some(LocationKind::Fs),
                path: "data.ct".into(),
                ..Default::default()
            },
            encryption: EncryptionConfig {
                key: "hunter2".into(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_json_config() {
        let json = r#"
        {
            "source": { "kind": "fs", "path": "Makefile" },
            "restore": false,
            "encryption": { "key": "temp size 16 key" },
            "destination": {
                "kind": "s3",
                "path": "testing/backups/Makefile.backup",
                "s3_access_key_id": "keyid",
                "s3_secret_access_key": "secretkey",
                "s3_endpoint": "s3.us-east-005.backblazeb2.com",
                "s3_bucket": "backups",
                "s3_region": "us-east-1"
            }
        }"#;
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = VolbackConfig::from_file(file.path()).unwrap();

        assert_eq!(config.source.kind, Some(LocationKind::Fs));
        assert_eq!(config.source.path, "Makefile");
        assert!(!config.restore);
        assert_eq!(config.encryption.key, "temp size 16 key");
        assert_eq!(config.destination.kind, Some(LocationKind::S3));
        assert_eq!(config.destination.s3.s3_bucket, "backups");
        assert_eq!(config.destination.s3.s3_secret_access_key, "secretkey");
        assert!(config.source.s3.s3_bucket.is_empty());
    }

    #[test]
    fn test_parse_toml_config() {
        let toml_str = r#"
restore = true
s3_force_path_style = true

[source]
kind = "s3"
path = "backups/home.ct"
s3_endpoint = "http://localhost:4566"
s3_bucket = "bucket-a"

[encryption]
key = "correct-horse-battery"

[destination]
kind = "fs"
path = "/srv/restore"
"#;
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(toml_str.as_bytes()).unwrap();

        let config = VolbackConfig::from_file(file.path()).unwrap();

        assert!(config.restore);
        assert!(config.s3_force_path_style);
        assert_eq!(config.source.kind, Some(LocationKind::S3));
        assert_eq!(config.source.s3.s3_endpoint, "http://localhost:4566");
        assert_eq!(config.destination.path, "/srv/restore");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_defaults() {
        let config: VolbackConfig = toml::from_str("").unwrap();

        assert_eq!(config, VolbackConfig::default());
        assert!(config.source.kind.is_none());
        assert!(!config.restore);
        assert!(!config.s3_force_path_style);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = VolbackConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_from_file_malformed() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(b"{ not json").unwrap();

        let err = VolbackConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_merge_flags_override_file() {
        let file = valid_config();
        let flags = VolbackConfig {
            source: Location {
                s3: S3Location {
                    s3_endpoint: "overridden-endpoint".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
            destination: Location {
                path: "elsewhere.ct".into(),
                ..Default::default()
            },
            ..Default::default()
        };

        let merged = file.merge(flags);

        // Overridden
        assert_eq!(merged.source.s3.s3_endpoint, "overridden-endpoint");
        assert_eq!(merged.destination.path, "elsewhere.ct");
        // Kept from file
        assert_eq!(merged.source.kind, Some(LocationKind::Fs));
        assert_eq!(merged.source.path, "data");
        assert_eq!(merged.encryption.key, "hunter2");
    }

    #[test]
    fn test_merge_kind_and_switches() {
        let file = VolbackConfig {
            restore: true,
            ..valid_config()
        };
        let flags = VolbackConfig {
            destination: Location {
                kind: Some(LocationKind::S3),
                ..Default::default()
            },
            s3_force_path_style: true,
            ..Default::default()
        };

        let merged = file.merge(flags);

        assert_eq!(merged.destination.kind, Some(LocationKind::S3));
        assert!(merged.restore);
        assert!(merged.s3_force_path_style);
    }

    #[test]
    fn test_validate_missing_fields() {
        assert!(valid_config().validate().is_ok());

        let mut config = valid_config();
        config.source.kind = None;
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "source kind is required"
        );

        let mut config = valid_config();
        config.destination.kind = None;
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "destination kind is required"
        );

        let mut config = valid_config();
        config.encryption.key.clear();
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "encryption key is required"
        );
    }

    #[test]
    fn test_validate_s3_requires_bucket() {
        let mut config = valid_config();
        config.destination.kind = Some(LocationKind::S3);
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "destination s3 bucket is required"
        );

        config.destination.s3.s3_bucket = "bucket-b".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = valid_config();
        config.destination.s3.s3_secret_access_key = "very-secret".into();

        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
