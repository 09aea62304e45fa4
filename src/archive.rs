//! Password-protected compression of raw dumps.

use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tracing::{error, info, warn};

use crate::artifact::{ArtifactNames, ArtifactState, BackupArtifact};
use crate::error::{BackupError, Result};
use crate::fsutil;
use crate::process::capability::SEVEN_ZIP;
use crate::process::{CommandRunner, CommandSpec, EnsureCapability};

/// Turns a raw dump into one AES-256 encrypted zip.
///
/// An `Archiver` cannot exist without a passphrase; a cycle with no
/// passphrase fails before anything is dumped.
pub struct Archiver {
    runner: Arc<dyn CommandRunner>,
    capabilities: Arc<dyn EnsureCapability>,
    passphrase: String,
}

impl Archiver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        capabilities: Arc<dyn EnsureCapability>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            capabilities,
            passphrase: passphrase.into(),
        }
    }

    /// Encrypt `dump` into `<stem>.zip` next to it.
    ///
    /// The raw dump is consumed: it is deleted before this returns, whether
    /// or not encryption succeeded.
    pub async fn archive(&self, dump: BackupArtifact, names: &ArtifactNames) -> Result<BackupArtifact> {
        let encrypted = self.encrypt(&dump, names).await;

        if let Err(e) = fsutil::remove_file_if_exists(&dump.path).await {
            error!(path = %dump.path.display(), error = %e, "Failed to delete raw dump");
            if let Ok(artifact) = &encrypted {
                discard(&artifact.path).await;
            }
            return Err(BackupError::io(&dump.path, e));
        }

        encrypted
    }

    async fn encrypt(&self, dump: &BackupArtifact, names: &ArtifactNames) -> Result<BackupArtifact> {
        self.capabilities.ensure(&SEVEN_ZIP).await?;

        let dir = dump
            .path
            .parent()
            .ok_or_else(|| BackupError::Archive("raw dump has no parent directory".to_string()))?;
        let final_path = dir.join(names.archive());
        let partial_path = dir.join(ArtifactNames::partial(&names.archive()));

        if fs::try_exists(&final_path).await.unwrap_or(false) {
            return Err(BackupError::Archive(format!(
                "{} already exists",
                final_path.display()
            )));
        }

        // 7z appends to an existing archive, so start from nothing.
        fsutil::remove_file_if_exists(&partial_path)
            .await
            .map_err(|e| BackupError::io(&partial_path, e))?;

        let spec = CommandSpec::new(SEVEN_ZIP.binary)
            .args(["a", "-tzip", "-mem=AES256", "-mx=9", "-bd", "-y"])
            .arg(format!("-p{}", self.passphrase))
            .arg(partial_path.display().to_string())
            .arg(dump.file_name())
            .cwd(dir);

        info!(dump = %dump.path.display(), "Encrypting dump");

        let failure = match self.runner.run(&spec).await {
            Ok(result) if result.success() => None,
            Ok(result) => Some(result.failure_summary()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            discard(&partial_path).await;
            return Err(BackupError::Archive(reason));
        }

        if let Err(e) = fs::rename(&partial_path, &final_path).await {
            discard(&partial_path).await;
            return Err(BackupError::Archive(format!(
                "archiver reported success but {} is unusable: {e}",
                partial_path.display()
            )));
        }
        if let Err(e) = fsutil::restrict_to_owner(&final_path).await {
            discard(&final_path).await;
            return Err(BackupError::io(&final_path, e));
        }

        info!(artifact = %final_path.display(), "Artifact encrypted");
        Ok(BackupArtifact::new(
            dump.created_at,
            final_path,
            ArtifactState::Encrypted,
        ))
    }
}

async fn discard(path: &Path) {
    if let Err(e) = fsutil::remove_file_if_exists(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove unusable archive");
    }
}
