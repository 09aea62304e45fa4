//! Keep/delete decisions for encrypted artifacts.
//!
//! Two independent rules:
//! - after delivery, an uploaded artifact is deleted and anything else is
//!   kept;
//! - every artifact older than the retention window is deleted, whatever
//!   happened to it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactState, BackupArtifact, archive_timestamp};
use crate::delivery::DeliveryOutcome;
use crate::error::{BackupError, Result};
use crate::fsutil;

/// Settle an artifact after its single delivery attempt.
pub async fn apply_outcome(
    mut artifact: BackupArtifact,
    outcome: &DeliveryOutcome,
) -> Result<BackupArtifact> {
    match outcome {
        DeliveryOutcome::Uploaded => {
            fsutil::remove_file_if_exists(&artifact.path)
                .await
                .map_err(|e| BackupError::io(&artifact.path, e))?;
            info!(artifact = %artifact.path.display(), "Delivered artifact removed locally");
            artifact.state = ArtifactState::Deleted;
        }
        DeliveryOutcome::Skipped | DeliveryOutcome::Failed { .. } => {
            debug!(artifact = %artifact.path.display(), "Artifact retained");
            artifact.state = ArtifactState::Retained;
        }
    }
    Ok(artifact)
}

/// Delete every artifact in `dir` created more than `retention` before
/// `now`. Age comes from the timestamp in the file name.
///
/// A missing directory has nothing to sweep. Files that fail to delete are
/// logged and skipped. Returns the removed paths.
pub async fn sweep_expired(
    dir: &Path,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<PathBuf>> {
    let Some(cutoff) = now.checked_sub_signed(retention) else {
        return Ok(Vec::new());
    };

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BackupError::io(dir, e)),
    };

    let mut removed = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| BackupError::io(dir, e))?
    {
        let path = entry.path();
        let Some(created_at) = archive_timestamp(&path) else {
            continue;
        };
        if created_at >= cutoff {
            continue;
        }
        if !entry.file_type().await.is_ok_and(|t| t.is_file()) {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(artifact = %path.display(), created_at = %created_at, "Expired artifact deleted");
                removed.push(path);
            }
            Err(e) => warn!(artifact = %path.display(), error = %e, "Failed to delete expired artifact"),
        }
    }

    removed.sort();
    Ok(removed)
}
