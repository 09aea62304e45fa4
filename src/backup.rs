//! One backup cycle: Snapshot -> Archive -> Deliver -> Retain.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::archive::Archiver;
use crate::artifact::{ArtifactNames, ArtifactState, BackupArtifact};
use crate::config::Config;
use crate::delivery::{DeliveryOutcome, TelegramDelivery};
use crate::error::{BackupError, Result};
use crate::process::{CommandRunner, EnsureCapability};
use crate::retention;
use crate::snapshot::SnapshotProducer;

/// What a finished pipeline run produced.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    /// File name of this cycle's artifact.
    pub artifact: String,
    pub state: ArtifactState,
    pub delivery: DeliveryOutcome,
    /// Artifacts removed by the age sweep.
    pub expired: Vec<PathBuf>,
}

impl CycleOutcome {
    /// A failed delivery fails the cycle even though the artifact was kept.
    pub fn succeeded(&self) -> bool {
        !self.delivery.is_failed()
    }
}

pub struct BackupPipeline {
    dir: PathBuf,
    prefix: String,
    retention: Duration,
    producer: SnapshotProducer,
    /// `None` when no passphrase is configured.
    archiver: Option<Archiver>,
    delivery: TelegramDelivery,
}

impl BackupPipeline {
    pub fn new(
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        capabilities: Arc<dyn EnsureCapability>,
    ) -> Result<Self> {
        let delivery = TelegramDelivery::new(config.delivery.clone())
            .map_err(|e| BackupError::Configuration(format!("cannot build HTTP client: {e}")))?;
        if !delivery.is_configured() {
            info!(dir = %config.backup.dir.display(), "Telegram delivery not configured, artifacts stay local");
        }
        let archiver = config
            .backup
            .passphrase()
            .map(|passphrase| Archiver::new(runner.clone(), capabilities, passphrase));

        Ok(Self {
            dir: config.backup.dir.clone(),
            prefix: config.backup.artifact_prefix(&config.database),
            retention: config.backup.retention(),
            producer: SnapshotProducer::new(runner, config.database.clone()),
            archiver,
            delivery,
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.dir
    }

    /// Run one full cycle stamped `now`.
    ///
    /// The age sweep runs only once delivery has returned. A cycle that stops
    /// at an earlier stage leaves the backup directory as it found it.
    pub async fn create_backup(&self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let (artifact, delivery) = self.produce_and_deliver(now).await?;
        let expired = retention::sweep_expired(&self.dir, self.retention, now).await?;

        Ok(CycleOutcome {
            artifact: artifact.file_name(),
            state: artifact.state,
            delivery,
            expired,
        })
    }

    async fn produce_and_deliver(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(BackupArtifact, DeliveryOutcome)> {
        // Checked first so a missing passphrase produces no output at all.
        let archiver = self.archiver.as_ref().ok_or_else(|| {
            BackupError::Configuration("backup passphrase (BACKUP_PASSWORD) is not set".to_string())
        })?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BackupError::io(&self.dir, e))?;

        let names = ArtifactNames::new(&self.prefix, now);
        let dump = self.producer.produce(&self.dir, &names, now).await?;
        let mut artifact = archiver.archive(dump, &names).await?;

        let delivery = self.delivery.deliver(&artifact).await;
        if delivery != DeliveryOutcome::Skipped {
            artifact.state = ArtifactState::DeliveryAttempted;
        }

        let artifact = retention::apply_outcome(artifact, &delivery).await?;
        info!(
            artifact = %artifact.file_name(),
            state = ?artifact.state,
            "Backup pipeline finished"
        );
        Ok((artifact, delivery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{FixedCapability, ScriptedRunner, exit};
    use crate::process::{CommandSpec, ExecResult, ProcessError};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.database.name = Some("shop".to_string());
        config.backup.dir = dir.path().join("backups");
        config.backup.passphrase = Some("hunter2".to_string());
        config
    }

    /// Dump tool and archiver that write their outputs.
    fn working_tools(spec: &CommandSpec) -> std::result::Result<ExecResult, ProcessError> {
        if let Some(target) = spec.args.iter().find_map(|a| a.strip_prefix("--result-file=")) {
            std::fs::write(target, "-- dump").unwrap();
        } else if let Some(target) = spec.args.iter().find(|a| a.ends_with(".zip.partial")) {
            std::fs::write(target, "PK").unwrap();
        }
        exit(0, "")
    }

    fn files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|rd| {
                rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn unconfigured_delivery_keeps_the_artifact() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let pipeline = BackupPipeline::new(
            &config,
            ScriptedRunner::new(working_tools),
            Arc::new(FixedCapability(true)),
        )
        .unwrap();

        let outcome = pipeline.create_backup(now()).await.unwrap();

        assert_eq!(outcome.delivery, DeliveryOutcome::Skipped);
        assert_eq!(outcome.state, ArtifactState::Retained);
        assert!(outcome.succeeded());
        assert_eq!(
            files(&config.backup.dir),
            vec!["shop_backup_20240601_120000.zip"]
        );
    }

    #[tokio::test]
    async fn missing_passphrase_fails_before_dumping() {
        let tmp = TempDir::new().unwrap();
        let mut config = config(&tmp);
        config.backup.passphrase = None;
        let runner = ScriptedRunner::new(working_tools);
        let pipeline =
            BackupPipeline::new(&config, runner.clone(), Arc::new(FixedCapability(true))).unwrap();

        let err = pipeline.create_backup(now()).await.unwrap_err();

        assert_eq!(err.kind(), "configuration");
        assert!(runner.calls().is_empty());
        assert!(files(&config.backup.dir).is_empty());
    }

    #[tokio::test]
    async fn snapshot_failure_stops_the_cycle() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let runner = ScriptedRunner::new(|_| exit(2, "access denied"));
        let pipeline =
            BackupPipeline::new(&config, runner.clone(), Arc::new(FixedCapability(true))).unwrap();

        let err = pipeline.create_backup(now()).await.unwrap_err();

        assert_eq!(err.kind(), "producer");
        assert_eq!(runner.calls().len(), 1);
        assert!(files(&config.backup.dir).is_empty());
    }

    #[tokio::test]
    async fn failed_cycle_leaves_expired_artifacts_alone() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        std::fs::create_dir_all(&config.backup.dir).unwrap();
        let expired = config
            .backup
            .dir
            .join(ArtifactNames::new("shop", now() - Duration::days(30)).archive());
        std::fs::write(&expired, "PK").unwrap();

        let pipeline = BackupPipeline::new(
            &config,
            ScriptedRunner::new(|_| exit(2, "access denied")),
            Arc::new(FixedCapability(true)),
        )
        .unwrap();

        assert!(pipeline.create_backup(now()).await.is_err());
        assert!(expired.exists());
    }

    #[tokio::test]
    async fn missing_passphrase_leaves_the_directory_unchanged() {
        let tmp = TempDir::new().unwrap();
        let mut config = config(&tmp);
        config.backup.passphrase = None;
        std::fs::create_dir_all(&config.backup.dir).unwrap();
        let name = ArtifactNames::new("shop", now() - Duration::days(30)).archive();
        std::fs::write(config.backup.dir.join(&name), "PK").unwrap();

        let pipeline = BackupPipeline::new(
            &config,
            ScriptedRunner::new(working_tools),
            Arc::new(FixedCapability(true)),
        )
        .unwrap();

        let err = pipeline.create_backup(now()).await.unwrap_err();

        assert_eq!(err.kind(), "configuration");
        assert_eq!(files(&config.backup.dir), vec![name]);
    }

    #[tokio::test]
    async fn sweep_reports_expired_artifacts() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        std::fs::create_dir_all(&config.backup.dir).unwrap();
        let expired = config
            .backup
            .dir
            .join(ArtifactNames::new("shop", now() - Duration::days(8)).archive());
        std::fs::write(&expired, "PK").unwrap();

        let pipeline = BackupPipeline::new(
            &config,
            ScriptedRunner::new(working_tools),
            Arc::new(FixedCapability(true)),
        )
        .unwrap();

        let outcome = pipeline.create_backup(now()).await.unwrap();
        assert_eq!(outcome.expired, vec![expired]);
    }
}
