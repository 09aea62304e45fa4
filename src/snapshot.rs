//! Consistent logical dumps of the database.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{info, warn};

use crate::artifact::{ArtifactNames, ArtifactState, BackupArtifact};
use crate::config::DatabaseConfig;
use crate::error::{BackupError, Result};
use crate::fsutil;
use crate::process::{CommandRunner, CommandSpec};

/// Produces one raw dump per call using `mysqldump` / `mariadb-dump`.
///
/// The dump runs in a single transaction without table locks, so
/// application writes are never blocked, and includes stored routines and
/// triggers.
pub struct SnapshotProducer {
    runner: Arc<dyn CommandRunner>,
    database: DatabaseConfig,
}

impl SnapshotProducer {
    pub fn new(runner: Arc<dyn CommandRunner>, database: DatabaseConfig) -> Self {
        Self { runner, database }
    }

    /// Dump the database into `dir`, named after `names`.
    ///
    /// On failure nothing is left behind: the partially written file is
    /// removed before the error is returned.
    pub async fn produce(
        &self,
        dir: &Path,
        names: &ArtifactNames,
        created_at: DateTime<Utc>,
    ) -> Result<BackupArtifact> {
        let database = self
            .database
            .name()
            .ok_or_else(|| BackupError::Configuration("database name is not set".to_string()))?;

        let final_path = dir.join(names.dump());
        let partial_path = dir.join(ArtifactNames::partial(&names.dump()));
        let spec = self.command(database, &partial_path);

        info!(
            database,
            host = %self.database.host,
            tool = %spec.program,
            "Dumping database"
        );

        let failure = match self.runner.run(&spec).await {
            Ok(result) if result.success() => None,
            Ok(result) => Some(result.failure_summary()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            discard(&partial_path).await;
            return Err(BackupError::Producer(reason));
        }

        if let Err(e) = fs::rename(&partial_path, &final_path).await {
            discard(&partial_path).await;
            return Err(BackupError::Producer(format!(
                "dump tool reported success but {} is unusable: {e}",
                partial_path.display()
            )));
        }
        if let Err(e) = fsutil::restrict_to_owner(&final_path).await {
            warn!(path = %final_path.display(), error = %e, "Failed to restrict dump permissions");
        }

        Ok(BackupArtifact::new(
            created_at,
            final_path,
            ArtifactState::RawDump,
        ))
    }

    fn command(&self, database: &str, result_file: &Path) -> CommandSpec {
        let db = &self.database;
        let mut spec = CommandSpec::new(db.engine.dump_tool())
            .args([
                "--single-transaction",
                "--skip-lock-tables",
                "--routines",
                "--triggers",
            ])
            .arg(format!("--host={}", db.host))
            .arg(format!("--port={}", db.port));

        if let Some(user) = db.user() {
            spec = spec.arg(format!("--user={user}"));
        }
        // Passed through the environment so it never shows up in `ps`.
        if let Some(password) = db.password() {
            spec = spec.env("MYSQL_PWD", password);
        }

        spec.arg(format!("--result-file={}", result_file.display()))
            .arg(database)
    }
}

async fn discard(path: &Path) {
    if let Err(e) = fsutil::remove_file_if_exists(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove partial dump");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseEngine;
    use crate::process::ProcessError;
    use crate::process::testing::{ScriptedRunner, exit};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn database() -> DatabaseConfig {
        DatabaseConfig {
            name: Some("shop".to_string()),
            user: Some("backup".to_string()),
            password: Some("dbpass".to_string()),
            ..Default::default()
        }
    }

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    /// Behaves like a dump tool: writes to the `--result-file` path.
    fn write_result_file(spec: &CommandSpec, contents: &str) {
        let target = spec
            .args
            .iter()
            .find_map(|a| a.strip_prefix("--result-file="))
            .unwrap();
        std::fs::write(target, contents).unwrap();
    }

    #[tokio::test]
    async fn successful_dump_is_renamed_into_place() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(|spec| {
            write_result_file(spec, "CREATE TABLE t (id INT);");
            exit(0, "")
        });
        let producer = SnapshotProducer::new(runner.clone(), database());
        let names = ArtifactNames::new("shop", created_at());

        let artifact = producer
            .produce(tmp.path(), &names, created_at())
            .await
            .unwrap();

        assert_eq!(artifact.state, ArtifactState::RawDump);
        assert_eq!(artifact.path, tmp.path().join("shop_backup_20240102_030405.sql"));
        assert_eq!(
            std::fs::read_to_string(&artifact.path).unwrap(),
            "CREATE TABLE t (id INT);"
        );
        assert!(!tmp.path().join("shop_backup_20240102_030405.sql.partial").exists());
    }

    #[tokio::test]
    async fn dump_is_consistent_and_lock_free() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(|spec| {
            write_result_file(spec, "--");
            exit(0, "")
        });
        let producer = SnapshotProducer::new(runner.clone(), database());

        producer
            .produce(tmp.path(), &ArtifactNames::new("shop", created_at()), created_at())
            .await
            .unwrap();

        let spec = &runner.calls()[0];
        assert_eq!(spec.program, "mysqldump");
        for flag in [
            "--single-transaction",
            "--skip-lock-tables",
            "--routines",
            "--triggers",
            "--host=localhost",
            "--port=3306",
            "--user=backup",
        ] {
            assert!(spec.args.iter().any(|a| a == flag), "missing {flag}");
        }
        assert_eq!(spec.args.last().unwrap(), "shop");
        assert!(!spec.args.iter().any(|a| a.contains("dbpass")));
        assert_eq!(
            spec.env,
            vec![("MYSQL_PWD".to_string(), "dbpass".to_string())]
        );
    }

    #[tokio::test]
    async fn mariadb_uses_its_own_tool() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(|spec| {
            write_result_file(spec, "--");
            exit(0, "")
        });
        let db = DatabaseConfig {
            engine: DatabaseEngine::MariaDb,
            password: None,
            ..database()
        };
        let producer = SnapshotProducer::new(runner.clone(), db);

        producer
            .produce(tmp.path(), &ArtifactNames::new("shop", created_at()), created_at())
            .await
            .unwrap();

        let spec = &runner.calls()[0];
        assert_eq!(spec.program, "mariadb-dump");
        assert!(spec.env.is_empty());
    }

    #[tokio::test]
    async fn tool_failure_leaves_no_file() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(|spec| {
            write_result_file(spec, "-- half a dump");
            exit(2, "mysqldump: Got error: 2002: Can't connect")
        });
        let producer = SnapshotProducer::new(runner, database());

        let err = producer
            .produce(tmp.path(), &ArtifactNames::new("shop", created_at()), created_at())
            .await
            .unwrap_err();

        match err {
            BackupError::Producer(reason) => assert!(reason.contains("Can't connect")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_tool_is_a_producer_error() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(|spec| {
            Err(ProcessError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        });
        let producer = SnapshotProducer::new(runner, database());

        let err = producer
            .produce(tmp.path(), &ArtifactNames::new("shop", created_at()), created_at())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "producer");
    }

    #[tokio::test]
    async fn missing_database_name_is_a_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(|_| exit(0, ""));
        let db = DatabaseConfig {
            name: None,
            ..database()
        };
        let producer = SnapshotProducer::new(runner.clone(), db);

        let err = producer
            .produce(tmp.path(), &ArtifactNames::new("shop", created_at()), created_at())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(runner.calls().is_empty());
    }
}
