//! Integration test: backup → restore round trips through the executor
//!
//! Covers single files and directory trees on the filesystem, and objects
//! in OpenDAL's in-memory backend so no live S3 endpoint is required.

use std::path::Path;

use opendal::Operator;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use volback_core::{Location, LocationKind, VolbackConfig};
use volback_crypto::KdfParams;
use volback_engine::{Binding, Executor, ExecutorError, ProgressFn, SetupError};
use volback_storage::Endpoint;

fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

fn fast_params() -> KdfParams {
    KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

fn fs(path: &Path) -> Binding {
    Binding::new(Endpoint::fs(), path.to_str().unwrap())
}

fn executor(src: Binding, dst: Binding, key: &str) -> Executor {
    Executor::with_kdf_params(src, dst, key, fast_params()).expect("executor")
}

fn write_file(path: &Path, content: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn roundtrip_single_file_fs() {
    let tmp = TempDir::new().unwrap();
    let original = b"hello world, this is a small test file for a volback round-trip";
    let src = tmp.path().join("data/small.txt");
    write_file(&src, original);
    let backup = tmp.path().join("backups/small.txt.ct");
    let restored = tmp.path().join("restored/small.txt");

    let transfer = executor(fs(&src), fs(&backup), "test key")
        .backup(CancellationToken::new(), None)
        .await
        .expect("backup should succeed");
    assert!(!transfer.archived);
    assert_eq!(transfer.bytes, original.len() as u64 + 32);

    let ciphertext = std::fs::read(&backup).unwrap();
    assert_eq!(ciphertext.len(), original.len() + 32);
    assert_ne!(&ciphertext[32..], &original[..]);

    let transfer = executor(fs(&backup), fs(&restored), "test key")
        .restore(CancellationToken::new(), None)
        .await
        .expect("restore should succeed");
    assert!(!transfer.archived);
    assert_eq!(std::fs::read(&restored).unwrap(), original);
}

#[tokio::test]
async fn roundtrip_directory_fs() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("volume");
    write_file(&src.join("a/a.txt"), b"alpha");
    write_file(&src.join("b.txt"), b"bravo");
    let big: Vec<u8> = (0..300_000u32).map(|i| (i % 241) as u8).collect();
    write_file(&src.join("a/nested/big.bin"), &big);

    let backup = tmp.path().join("volume.ct");
    let restored = tmp.path().join("restored/volume");

    let transfer = executor(fs(&src), fs(&backup), "dir key")
        .backup(CancellationToken::new(), None)
        .await
        .expect("backup should succeed");
    assert!(transfer.archived);

    let transfer = executor(fs(&backup), fs(&restored), "dir key")
        .restore(CancellationToken::new(), None)
        .await
        .expect("restore should succeed");
    assert!(transfer.archived);
    assert_eq!(transfer.bytes, 10 + big.len() as u64);

    assert_eq!(std::fs::read(restored.join("a/a.txt")).unwrap(), b"alpha");
    assert_eq!(std::fs::read(restored.join("b.txt")).unwrap(), b"bravo");
    assert_eq!(std::fs::read(restored.join("a/nested/big.bin")).unwrap(), big);
}

#[tokio::test]
async fn roundtrip_empty_directory_fs() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("empty");
    std::fs::create_dir(&src).unwrap();
    let backup = tmp.path().join("empty.ct");
    let restored = tmp.path().join("restored");

    executor(fs(&src), fs(&backup), "k")
        .backup(CancellationToken::new(), None)
        .await
        .unwrap();
    executor(fs(&backup), fs(&restored), "k")
        .restore(CancellationToken::new(), None)
        .await
        .unwrap();

    assert!(restored.is_dir());
    assert_eq!(std::fs::read_dir(&restored).unwrap().count(), 0);
}

#[tokio::test]
async fn roundtrip_object_store() {
    let tmp = TempDir::new().unwrap();
    let op = memory_operator();
    let original: Vec<u8> = (0..1_000_000u32).map(|i| (i.wrapping_mul(31) >> 3) as u8).collect();
    let src = tmp.path().join("blob.bin");
    write_file(&src, &original);
    let restored = tmp.path().join("restored.bin");

    let remote = || Binding::new(Endpoint::object_store(op.clone()), "backups/blob.bin.ct");

    executor(fs(&src), remote(), "s3 key")
        .backup(CancellationToken::new(), None)
        .await
        .expect("backup to object store");

    let stored = op.read("backups/blob.bin.ct").await.unwrap().to_vec();
    assert_eq!(stored.len(), original.len() + 32);

    executor(remote(), fs(&restored), "s3 key")
        .restore(CancellationToken::new(), None)
        .await
        .expect("restore from object store");
    assert_eq!(std::fs::read(&restored).unwrap(), original);
}

#[tokio::test]
async fn restore_into_object_store_keeps_plaintext_stream() {
    let tmp = TempDir::new().unwrap();
    let op = memory_operator();
    let src = tmp.path().join("tree");
    write_file(&src.join("x.txt"), b"x marks the spot");

    let backup = Binding::new(Endpoint::object_store(op.clone()), "tree.ct");
    executor(fs(&src), backup.clone(), "k")
        .backup(CancellationToken::new(), None)
        .await
        .unwrap();

    let plain = Binding::new(Endpoint::object_store(op.clone()), "tree.tar");
    let transfer = executor(backup, plain, "k")
        .restore(CancellationToken::new(), None)
        .await
        .unwrap();
    assert!(!transfer.archived);

    let tar = op.read("tree.tar").await.unwrap().to_vec();
    assert!(volback_archive::is_archive(&tar));
}

#[tokio::test]
async fn backup_from_config_with_default_kdf() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("Makefile");
    write_file(&src, b"all:\n\techo hello\n");
    let backup = tmp.path().join("Makefile.backup");
    let restored = tmp.path().join("Makefile.restored");

    let config = |from: &Path, to: &Path, restore: bool| VolbackConfig {
        source: Location {
            kind: Some(LocationKind::Fs),
            path: from.to_str().unwrap().into(),
            ..Default::default()
        },
        destination: Location {
            kind: Some(LocationKind::Fs),
            path: to.to_str().unwrap().into(),
            ..Default::default()
        },
        restore,
        encryption: volback_core::config::EncryptionConfig {
            key: "temp size 16 key".into(),
        },
        ..Default::default()
    };

    Executor::from_config(&config(&src, &backup, false))
        .unwrap()
        .backup(CancellationToken::new(), None)
        .await
        .unwrap();
    Executor::from_config(&config(&backup, &restored, true))
        .unwrap()
        .restore(CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&restored).unwrap(), b"all:\n\techo hello\n");
}

#[tokio::test]
async fn progress_reports_bytes() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("p.bin");
    write_file(&src, &vec![1u8; 50_000]);
    let backup = tmp.path().join("p.ct");

    let last = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
    let seen = last.clone();
    let cb: ProgressFn = Box::new(move |done, _| {
        seen.store(done, std::sync::atomic::Ordering::SeqCst);
    });

    executor(fs(&src), fs(&backup), "k")
        .backup(CancellationToken::new(), Some(&cb))
        .await
        .unwrap();
    assert_eq!(last.load(std::sync::atomic::Ordering::SeqCst), 50_032);
}

#[tokio::test]
async fn wrong_passphrase_restores_garbage() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("secret.txt");
    write_file(&src, b"attack at dawn");
    let backup = tmp.path().join("secret.ct");
    let restored = tmp.path().join("secret.out");

    executor(fs(&src), fs(&backup), "right")
        .backup(CancellationToken::new(), None)
        .await
        .unwrap();
    executor(fs(&backup), fs(&restored), "wrong")
        .restore(CancellationToken::new(), None)
        .await
        .unwrap();

    let out = std::fs::read(&restored).unwrap();
    assert_eq!(out.len(), 14);
    assert_ne!(out, b"attack at dawn");
}

#[tokio::test]
async fn restore_truncated_backup_fails_in_decrypt() {
    let tmp = TempDir::new().unwrap();
    let backup = tmp.path().join("short.ct");
    write_file(&backup, &[0u8; 20]);

    let err = executor(fs(&backup), fs(&tmp.path().join("out")), "k")
        .restore(CancellationToken::new(), None)
        .await
        .unwrap_err();

    match &err {
        ExecutorError::Pipeline(pipeline) => assert_eq!(pipeline.origin_stage(), Some("decrypt")),
        other => panic!("expected pipeline error, got {other:?}"),
    }
    let chain = format!("{:#}", anyhow::Error::from(err));
    assert!(chain.contains("truncated"), "chain was: {chain}");
}

#[tokio::test]
async fn restore_archive_cut_on_entry_boundary_fails() {
    let tmp = TempDir::new().unwrap();
    let vol = tmp.path().join("vol");
    write_file(&vol.join("a/a.txt"), &[b'a'; 5000]);
    write_file(&vol.join("b.txt"), &[b'b'; 5000]);
    let backup = tmp.path().join("vol.ct");

    let transfer = executor(fs(&vol), fs(&backup), "k")
        .backup(CancellationToken::new(), None)
        .await
        .unwrap();
    assert!(transfer.archived);

    // header, then the `a` directory entry and `a/a.txt` (one header block
    // plus 5000 bytes padded to 5120); `b.txt` would start right here
    let mut ciphertext = std::fs::read(&backup).unwrap();
    ciphertext.truncate(32 + 1024 + 5120);
    std::fs::write(&backup, &ciphertext).unwrap();

    let out = tmp.path().join("out");
    let err = executor(fs(&backup), fs(&out), "k")
        .restore(CancellationToken::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Unpack { .. }), "got {err:?}");
    let chain = format!("{:#}", anyhow::Error::from(err));
    assert!(chain.contains("end-of-archive"), "chain was: {chain}");
    assert!(!out.join("b.txt").exists());
}

#[tokio::test]
async fn backup_missing_source() {
    let tmp = TempDir::new().unwrap();
    let err = executor(
        fs(&tmp.path().join("nope")),
        fs(&tmp.path().join("out.ct")),
        "k",
    )
    .backup(CancellationToken::new(), None)
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        ExecutorError::Pull {
            source: volback_storage::StorageError::NotFound(_),
            ..
        }
    ));
    assert!(!tmp.path().join("out.ct").exists());
}

#[test]
fn setup_errors_are_aggregated() {
    let bad_s3 = Location {
        kind: Some(LocationKind::S3),
        path: "key".into(),
        ..Default::default()
    };
    let config = VolbackConfig {
        source: bad_s3.clone(),
        destination: bad_s3,
        encryption: volback_core::config::EncryptionConfig { key: "k".into() },
        ..Default::default()
    };

    // validate() catches the missing bucket first
    assert!(matches!(
        Executor::from_config(&config),
        Err(ExecutorError::Config(_))
    ));

    let err = Executor::new(fs(Path::new("a")), fs(Path::new("b")), "").unwrap_err();
    match err {
        ExecutorError::Setup(errors) => {
            assert_eq!(errors.len(), 2);
            assert!(matches!(errors[0], SetupError::Encryptor(_)));
            assert!(matches!(errors[1], SetupError::Decryptor(_)));
        }
        other => panic!("expected setup error, got {other:?}"),
    }
}
