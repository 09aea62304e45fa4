//! Common test utilities.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::http::{StatusCode, Uri};

use dumpwarden::backup::BackupPipeline;
use dumpwarden::config::Config;
use dumpwarden::process::{
    Capability, CommandRunner, CommandSpec, DependencyError, EnsureCapability, ExecResult,
    ProcessError,
};

/// Dump tool and archiver stand-in: writes the files the real tools would.
#[derive(Default)]
pub struct FakeTools {
    pub fail_dump: bool,
}

#[async_trait]
impl CommandRunner for FakeTools {
    async fn run(&self, spec: &CommandSpec) -> Result<ExecResult, ProcessError> {
        let mut exit_code = 0;
        let mut stderr = String::new();

        if let Some(target) = spec.args.iter().find_map(|a| a.strip_prefix("--result-file=")) {
            if self.fail_dump {
                exit_code = 2;
                stderr = "mysqldump: Got error: 1045: Access denied".to_string();
            } else {
                std::fs::write(target, "CREATE TABLE orders (id INT);").unwrap();
            }
        } else if let Some(target) = spec.args.iter().find(|a| a.ends_with(".zip.partial")) {
            std::fs::write(target, b"PK\x03\x04").unwrap();
        }

        Ok(ExecResult {
            exit_code,
            stdout: String::new(),
            stderr,
        })
    }
}

/// Every capability is already installed.
pub struct Installed;

#[async_trait]
impl EnsureCapability for Installed {
    async fn ensure(&self, _capability: &Capability) -> Result<(), DependencyError> {
        Ok(())
    }
}

/// In-process stand-in for the Telegram Bot API.
pub struct FakeTelegram {
    pub url: String,
    requests: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeTelegram {
    /// Answer every request with `reply`.
    pub async fn spawn(status: StatusCode, reply: &'static str) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let sink = requests.clone();
        let app = Router::new().fallback(move |uri: Uri, body: Bytes| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push((
                    uri.path().to_string(),
                    String::from_utf8_lossy(&body).into_owned(),
                ));
                (status, reply)
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, requests }
    }

    /// (path, body) of every request received.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

/// Fully configured except for delivery.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.database.name = Some("shop".to_string());
    config.database.user = Some("backup".to_string());
    config.backup.dir = root.join("backups");
    config.backup.passphrase = Some("correct horse".to_string());
    config.history.path = Some(root.join("history.jsonl"));
    config
}

pub fn with_telegram(mut config: Config, api_url: &str) -> Config {
    config.delivery.bot_token = Some("123456:TEST".to_string());
    config.delivery.chat_id = Some("-100200300".to_string());
    config.delivery.api_url = api_url.to_string();
    config
}

pub fn pipeline(config: &Config, tools: FakeTools) -> BackupPipeline {
    BackupPipeline::new(config, Arc::new(tools), Arc::new(Installed)).unwrap()
}

/// Sorted file names directly under `dir`; empty if it does not exist.
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

pub fn history_lines(path: &PathBuf) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}
