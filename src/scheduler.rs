//! Cycle driver: trim logs, run the pipeline, trim logs again.
//!
//! One-shot mode runs a single cycle. Continuous mode sleeps a fixed
//! interval after every cycle and stops only when the shutdown future
//! resolves, which is observed between cycles.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::artifact::is_stale_cycle_file;
use crate::backup::BackupPipeline;
use crate::config::{Config, LogCap};
use crate::fsutil;
use crate::history::{CycleHistory, CycleRecord};
use crate::log_trim::LogTrimmer;

pub struct Scheduler {
    pipeline: BackupPipeline,
    log_trimmer: Option<LogTrimmer>,
    history: Option<CycleHistory>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(pipeline: BackupPipeline, config: &Config) -> Self {
        let log_trimmer = match (config.logs.cap(), &config.logs.dir) {
            (LogCap::Bytes(cap), Some(dir)) => {
                info!(dir = %dir.display(), cap_bytes = cap, "Log trimming enabled");
                Some(LogTrimmer::new(dir, cap))
            }
            (LogCap::Invalid(value), _) => {
                warn!(%value, "Log size cap is not a positive integer, log trimming disabled");
                None
            }
            _ => None,
        };

        Self {
            pipeline,
            log_trimmer,
            history: config.history.path.as_ref().map(CycleHistory::new),
            interval: Duration::from_secs(config.schedule.interval_seconds),
        }
    }

    /// Delete raw dumps and `.partial` files left by a cycle that was killed.
    pub async fn recover_stale_files(&self) -> Vec<PathBuf> {
        let dir = self.pipeline.backup_dir();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), error = %e, "Cannot scan backup directory for leftovers");
                }
                return Vec::new();
            }
        };

        let mut removed = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !is_stale_cycle_file(&path) {
                continue;
            }
            match fsutil::remove_file_if_exists(&path).await {
                Ok(true) => {
                    warn!(path = %path.display(), "Removed leftover from an interrupted cycle");
                    removed.push(path);
                }
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove leftover file"),
            }
        }
        removed.sort();
        removed
    }

    /// Run one cycle. Returns whether every stage succeeded.
    pub async fn run_cycle(&self) -> bool {
        self.trim_logs().await;

        let started_at = Utc::now();
        info!("Backup cycle started");
        let result = self.pipeline.create_backup(started_at).await;
        let finished_at = Utc::now();

        let succeeded = match &result {
            Ok(outcome) if outcome.succeeded() => {
                info!(
                    artifact = %outcome.artifact,
                    state = ?outcome.state,
                    expired = outcome.expired.len(),
                    "Backup cycle finished"
                );
                true
            }
            Ok(outcome) => {
                error!(artifact = %outcome.artifact, "Backup cycle finished but delivery failed");
                false
            }
            Err(e) => {
                error!(stage = e.kind(), error = %e, "Backup cycle failed");
                false
            }
        };

        if let Some(history) = &self.history {
            let record = CycleRecord::new(started_at, finished_at, &result);
            if let Err(e) = history.append(&record).await {
                warn!(path = %history.path().display(), error = %e, "Failed to record cycle history");
            }
        }

        self.trim_logs().await;
        succeeded
    }

    pub async fn run_once(&self) -> bool {
        self.recover_stale_files().await;
        self.run_cycle().await
    }

    /// Cycle until `shutdown` resolves. A running cycle is never
    /// interrupted; shutdown is checked while sleeping between cycles.
    pub async fn run_forever<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.recover_stale_files().await;

        info!(interval_secs = self.interval.as_secs(), "Continuous backup mode");
        loop {
            self.run_cycle().await;

            debug!(sleep_secs = self.interval.as_secs(), "Waiting for next cycle");
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping between cycles");
                    break;
                }
            }
        }
    }

    async fn trim_logs(&self) {
        if let Some(trimmer) = &self.log_trimmer {
            trimmer.trim().await;
        }
    }
}
