//! Cycle history as a JSONL file, one entry per cycle.
//!
//! The file is pruned to the most recent entries once it grows past a size
//! threshold.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::backup::CycleOutcome;
use crate::delivery::DeliveryOutcome;
use crate::error::BackupError;
use crate::fsutil;

/// Maximum history file size before pruning (1MB).
const MAX_HISTORY_SIZE: u64 = 1_024 * 1_024;

/// Number of entries to keep when pruning.
const ENTRIES_TO_KEEP: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Ok,
    Error,
}

/// One line of the history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: CycleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryOutcome>,
    #[serde(default)]
    pub expired: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleRecord {
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        result: &Result<CycleOutcome, BackupError>,
    ) -> Self {
        match result {
            Ok(outcome) => Self {
                started_at,
                finished_at,
                status: if outcome.succeeded() {
                    CycleStatus::Ok
                } else {
                    CycleStatus::Error
                },
                artifact: Some(outcome.artifact.clone()),
                delivery: Some(outcome.delivery.clone()),
                expired: outcome.expired.len(),
                error_kind: None,
                error: None,
            },
            Err(e) => Self {
                started_at,
                finished_at,
                status: CycleStatus::Error,
                artifact: None,
                delivery: None,
                expired: 0,
                error_kind: Some(e.kind().to_string()),
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize history entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl HistoryError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Append-only cycle history.
pub struct CycleHistory {
    path: PathBuf,
    /// Serializes appends and pruning.
    lock: Mutex<()>,
}

impl CycleHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &CycleRecord) -> Result<(), HistoryError> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HistoryError::io(parent, e))?;
        }

        if let Ok(metadata) = fs::metadata(&self.path).await
            && metadata.len() > MAX_HISTORY_SIZE
            && let Err(e) = self.prune().await
        {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to prune cycle history");
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| HistoryError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| HistoryError::io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| HistoryError::io(&self.path, e))?;

        Ok(())
    }

    /// Most recent `limit` entries, oldest first. Unparseable lines are
    /// skipped.
    pub async fn load_recent(&self, limit: usize) -> Result<Vec<CycleRecord>, HistoryError> {
        let _guard = self.lock.lock().await;

        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HistoryError::io(&self.path, e)),
        };

        let entries: Vec<CycleRecord> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let start = entries.len().saturating_sub(limit);
        Ok(entries[start..].to_vec())
    }

    async fn prune(&self) -> Result<(), HistoryError> {
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| HistoryError::io(&self.path, e))?;
        let entries: Vec<&str> = content.lines().collect();
        if entries.len() <= ENTRIES_TO_KEEP {
            return Ok(());
        }

        let kept = &entries[entries.len() - ENTRIES_TO_KEEP..];
        let new_content = kept.join("\n") + "\n";

        let temp = self.path.with_extension("jsonl.tmp");
        fsutil::atomic_write_file(&temp, &self.path, new_content.as_bytes())
            .await
            .map_err(|e| HistoryError::io(&self.path, e))?;

        tracing::debug!(
            path = %self.path.display(),
            before = entries.len(),
            after = kept.len(),
            "Pruned cycle history"
        );
        Ok(())
    }
}
