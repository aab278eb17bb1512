//! volback: encrypted volume backup and restore
//!
//! Usage:
//!   volback [-f config.{json,toml}] --src.kind fs --src.path ./data \
//!           --dst.kind s3 --dst.path backups/data.ct --dst.s3-bucket b ...
//!   volback --restore [-f config] --src.kind s3 --src.path backups/data.ct ...
//!
//! Flags override values from the config file.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use volback_core::config::EncryptionConfig;
use volback_core::{Location, LocationKind, S3Location, VolbackConfig};
use volback_engine::{Executor, ProgressFn};

#[derive(Parser, Debug)]
#[command(
    name = "volback",
    version,
    about = "Encrypted backup and restore of files and directories",
    long_about = "volback: stream a file or directory through archive and encryption \
                  transforms to the filesystem or an S3-compatible bucket, and back"
)]
struct Cli {
    /// Path to a volback configuration file (.json or .toml)
    #[arg(long, short = 'f')]
    file: Option<PathBuf>,

    /// Restore a backup instead of creating one
    #[arg(long)]
    restore: bool,

    #[command(flatten)]
    src: SourceArgs,

    #[command(flatten)]
    dst: DestinationArgs,

    /// Passphrase the encryption key is derived from
    #[arg(long = "enc.key", env = "VOLBACK_ENC_KEY", hide_env_values = true)]
    enc_key: Option<String>,

    /// Use path-style S3 addressing (MinIO, SeaweedFS, LocalStack)
    #[arg(
        long,
        env = "S3_FORCE_PATH_STYLE",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    s3_force_path_style: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "VOLBACK_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "VOLBACK_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(clap::Args, Debug)]
struct SourceArgs {
    /// Kind of source (fs, s3)
    #[arg(id = "src.kind", long = "src.kind")]
    kind: Option<LocationKind>,
    /// File or directory to back up, or the backup to restore
    #[arg(id = "src.path", long = "src.path")]
    path: Option<String>,
    /// Endpoint of the S3-compatible source
    #[arg(id = "src.s3-endpoint", long = "src.s3-endpoint")]
    s3_endpoint: Option<String>,
    /// Bucket to read from
    #[arg(id = "src.s3-bucket", long = "src.s3-bucket")]
    s3_bucket: Option<String>,
    #[arg(id = "src.s3-access-key-id", long = "src.s3-access-key-id")]
    s3_access_key_id: Option<String>,
    #[arg(id = "src.s3-secret-access-key", long = "src.s3-secret-access-key")]
    s3_secret_access_key: Option<String>,
    #[arg(id = "src.s3-region", long = "src.s3-region")]
    s3_region: Option<String>,
}

#[derive(clap::Args, Debug)]
struct DestinationArgs {
    /// Kind of destination (fs, s3)
    #[arg(id = "dst.kind", long = "dst.kind")]
    kind: Option<LocationKind>,
    /// Where to write the backup, or where to restore to
    #[arg(id = "dst.path", long = "dst.path")]
    path: Option<String>,
    /// Endpoint of the S3-compatible destination
    #[arg(id = "dst.s3-endpoint", long = "dst.s3-endpoint")]
    s3_endpoint: Option<String>,
    /// Bucket to write to
    #[arg(id = "dst.s3-bucket", long = "dst.s3-bucket")]
    s3_bucket: Option<String>,
    #[arg(id = "dst.s3-access-key-id", long = "dst.s3-access-key-id")]
    s3_access_key_id: Option<String>,
    #[arg(id = "dst.s3-secret-access-key", long = "dst.s3-secret-access-key")]
    s3_secret_access_key: Option<String>,
    #[arg(id = "dst.s3-region", long = "dst.s3-region")]
    s3_region: Option<String>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

impl Cli {
    /// The flag layer of the configuration; unset flags are left empty so
    /// the file value wins during the merge.
    fn overrides(&self) -> VolbackConfig {
        VolbackConfig {
            source: location(
                self.src.kind,
                &self.src.path,
                &self.src.s3_endpoint,
                &self.src.s3_bucket,
                &self.src.s3_access_key_id,
                &self.src.s3_secret_access_key,
                &self.src.s3_region,
            ),
            restore: self.restore,
            encryption: EncryptionConfig {
                key: self.enc_key.clone().unwrap_or_default(),
            },
            destination: location(
                self.dst.kind,
                &self.dst.path,
                &self.dst.s3_endpoint,
                &self.dst.s3_bucket,
                &self.dst.s3_access_key_id,
                &self.dst.s3_secret_access_key,
                &self.dst.s3_region,
            ),
            s3_force_path_style: self.s3_force_path_style,
        }
    }
}

fn location(
    kind: Option<LocationKind>,
    path: &Option<String>,
    endpoint: &Option<String>,
    bucket: &Option<String>,
    access_key_id: &Option<String>,
    secret_access_key: &Option<String>,
    region: &Option<String>,
) -> Location {
    let value = |v: &Option<String>| v.clone().unwrap_or_default();
    Location {
        kind,
        path: value(path),
        s3: S3Location {
            s3_access_key_id: value(access_key_id),
            s3_secret_access_key: value(secret_access_key),
            s3_endpoint: value(endpoint),
            s3_bucket: value(bucket),
            s3_region: value(region),
        },
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, &cli.log_format);

    let mut config = load_config(&cli)?;
    if config.encryption.key.is_empty() && std::io::stdin().is_terminal() {
        config.encryption.key = prompt_key(!config.restore)?;
    }
    config.validate().context("configuration error")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        restore = config.restore,
        src_kind = ?config.source.kind,
        dst_kind = ?config.destination.kind,
        "volback starting"
    );

    let executor = Executor::from_config(&config).context("setting up executor")?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let verb = if config.restore { "restore" } else { "backup" };
    let spinner = std::io::stderr().is_terminal().then(|| make_spinner(verb));
    let progress: Option<ProgressFn> = spinner.clone().map(|pb| {
        Box::new(move |done: u64, _stage: &str| {
            pb.set_message(format!("{} processed", HumanBytes(done)));
        }) as ProgressFn
    });

    let result = if config.restore {
        executor.restore(cancel, progress.as_ref()).await
    } else {
        executor.backup(cancel, progress.as_ref()).await
    };

    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }

    let transfer = result.with_context(|| {
        format!(
            "{verb} of {} to {} failed",
            config.source.path, config.destination.path
        )
    })?;

    println!(
        "{verb}: {} → {} ({}{})",
        config.source.path,
        config.destination.path,
        HumanBytes(transfer.bytes),
        if transfer.archived { ", archive" } else { "" }
    );
    Ok(())
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// File (if given) overlaid with command-line flags.
fn load_config(cli: &Cli) -> Result<VolbackConfig> {
    let base = match &cli.file {
        Some(path) => VolbackConfig::from_file(path)
            .with_context(|| format!("loading config: {}", path.display()))?,
        None => VolbackConfig::default(),
    };
    Ok(base.merge(cli.overrides()))
}

/// Ask for the passphrase on the terminal; twice when creating a backup.
fn prompt_key(confirm: bool) -> Result<String> {
    let key = rpassword::prompt_password("Encryption key: ").context("reading encryption key")?;
    if confirm {
        let again =
            rpassword::prompt_password("Confirm encryption key: ").context("reading encryption key")?;
        if again != key {
            anyhow::bail!("encryption keys do not match");
        }
    }
    Ok(key)
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });
}

// ── Progress display ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("volback").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_become_overrides() {
        let cli = parse(&[
            "--src.kind",
            "fs",
            "--src.path",
            "Makefile",
            "--dst.kind",
            "s3",
            "--dst.path",
            "testing/backups/Makefile.backup",
            "--dst.s3-bucket",
            "backups",
            "--dst.s3-region",
            "us-east-1",
            "--enc.key",
            "temp size 16 key",
        ]);
        let config = cli.overrides();

        assert_eq!(config.source.kind, Some(LocationKind::Fs));
        assert_eq!(config.source.path, "Makefile");
        assert_eq!(config.destination.kind, Some(LocationKind::S3));
        assert_eq!(config.destination.s3.s3_bucket, "backups");
        assert_eq!(config.encryption.key, "temp size 16 key");
        assert!(!config.restore);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_restore_and_path_style_switches() {
        let cli = parse(&["--restore", "--s3-force-path-style"]);
        assert!(cli.restore);
        assert!(cli.s3_force_path_style);

        let cli = parse(&["--s3-force-path-style", "false"]);
        assert!(!cli.s3_force_path_style);
    }

    #[test]
    fn test_invalid_kind_rejected() {
        let result =
            Cli::try_parse_from(["volback", "--src.kind", "ftp", "--src.path", "x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "source": { "kind": "fs", "path": "from-file" },
                "destination": { "kind": "fs", "path": "dst-from-file" },
                "encryption": { "key": "file key" }
            }"#,
        )
        .unwrap();

        let cli = parse(&["-f", path.to_str().unwrap(), "--src.path", "from-flag"]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.source.path, "from-flag");
        assert_eq!(config.destination.path, "dst-from-file");
        assert_eq!(config.encryption.key, "file key");
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = parse(&["-f", "/nonexistent/volback.toml"]);
        assert!(load_config(&cli).is_err());
    }
}
