//! Pipeline stages for backup and restore

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tracing::info;
use volback_crypto::{StreamDecryptor, StreamEncryptor};
use volback_pipeline::Stage;

pub const ARCHIVE_STAGE: &str = "archive";
pub const ENCRYPT_STAGE: &str = "encrypt";
pub const DECRYPT_STAGE: &str = "decrypt";

/// Packs `root` into a tar stream. Generates its output from the
/// filesystem and ignores its input.
pub fn archive_stage(root: PathBuf) -> Stage {
    Stage::new(ARCHIVE_STAGE, move |_cancel, _input, writer| {
        let root = root.clone();
        async move {
            let summary = volback_archive::pack(&root, writer).await?;
            info!(
                path = %root.display(),
                files = summary.files,
                directories = summary.directories,
                skipped = summary.skipped,
                "archived directory"
            );
            Ok(())
        }
    })
}

/// `iv ++ salt ++ ciphertext` of its input, under a fresh session per run
pub fn encrypt_stage(encryptor: StreamEncryptor) -> Stage {
    Stage::new(ENCRYPT_STAGE, move |_cancel, input, mut writer| {
        let encryptor = encryptor.clone();
        async move {
            encryptor.encrypt(input, &mut writer).await?;
            writer.shutdown().await?;
            Ok(())
        }
    })
}

pub fn decrypt_stage(decryptor: StreamDecryptor) -> Stage {
    Stage::new(DECRYPT_STAGE, move |_cancel, input, mut writer| {
        let decryptor = decryptor.clone();
        async move {
            decryptor.decrypt(input, &mut writer).await?;
            writer.shutdown().await?;
            Ok(())
        }
    })
}
