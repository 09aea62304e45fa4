//! `dumpwarden check`: validate configuration and tool availability.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::Serialize;

use dumpwarden::build_info::BuildInfo;
use dumpwarden::config::{Config, ConfigError, LogCap};
use dumpwarden::delivery::DeliveryOutcome;
use dumpwarden::history::{CycleHistory, CycleRecord, CycleStatus, HistoryError};
use dumpwarden::process::capability::SEVEN_ZIP;
use dumpwarden::process::{Capability, HostRunner, Provisioner};

// ============================================================================
// Report Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: CheckStatus,
    message: String,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Ok,
            message: message.into(),
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Warn,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Section {
    name: &'static str,
    checks: Vec<CheckResult>,
}

#[derive(Debug, Serialize)]
struct Summary {
    ok: usize,
    warn: usize,
    error: usize,
}

#[derive(Debug, Serialize)]
struct Report {
    status: CheckStatus,
    build: BuildInfo,
    sections: Vec<Section>,
    summary: Summary,
}

impl Report {
    fn from_sections(sections: Vec<Section>) -> Self {
        let mut summary = Summary {
            ok: 0,
            warn: 0,
            error: 0,
        };
        for check in sections.iter().flat_map(|s| &s.checks) {
            match check.status {
                CheckStatus::Ok => summary.ok += 1,
                CheckStatus::Warn => summary.warn += 1,
                CheckStatus::Error => summary.error += 1,
            }
        }
        let status = if summary.error > 0 {
            CheckStatus::Error
        } else if summary.warn > 0 {
            CheckStatus::Warn
        } else {
            CheckStatus::Ok
        };
        Report {
            status,
            build: BuildInfo::default(),
            sections,
            summary,
        }
    }

    fn render(&self, format: &str) -> Result<()> {
        match format {
            "json" => println!("{}", serde_json::to_string_pretty(self)?),
            _ => print!("{}", self.render_text()),
        }
        Ok(())
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("dumpwarden check ({})\n", self.build.version));
        out.push_str(&"=".repeat(50));
        out.push('\n');

        for section in self.sections.iter().filter(|s| !s.checks.is_empty()) {
            out.push('\n');
            out.push_str(section.name);
            out.push('\n');
            out.push_str(&"-".repeat(section.name.len()));
            out.push('\n');
            for check in &section.checks {
                let label = match check.status {
                    CheckStatus::Ok => "  OK   ",
                    CheckStatus::Warn => "  WARN ",
                    CheckStatus::Error => "  ERROR",
                };
                out.push_str(&format!("{label} {}\n", check.message));
            }
        }

        let status_label = match self.status {
            CheckStatus::Ok => "PASS",
            CheckStatus::Warn => "PASS (with warnings)",
            CheckStatus::Error => "FAIL",
        };
        out.push_str(&format!(
            "\n{status_label}: {} ok, {} warning(s), {} error(s)\n",
            self.summary.ok, self.summary.warn, self.summary.error,
        ));
        out
    }
}

/// Which external tools were found on `PATH`.
#[derive(Debug, Clone, Copy)]
struct ToolAvailability {
    dump_tool: bool,
    archiver: bool,
}

// ============================================================================
// Entry Point
// ============================================================================

pub async fn run(config_path: &Path, format: &str) -> Result<()> {
    let mut sections = Vec::new();
    let config_found = config_path.exists();

    match Config::load(config_path).await {
        Ok(config) => {
            sections.push(check_config_source(config_path, config_found, None));

            let provisioner = Provisioner::new(Arc::new(HostRunner::new())).detect_only();
            let dump_tool = Capability {
                binary: config.database.engine.dump_tool(),
                packages: &[],
            };
            let tools = ToolAvailability {
                dump_tool: provisioner.is_available(&dump_tool).await,
                archiver: provisioner.is_available(&SEVEN_ZIP).await,
            };
            sections.extend(check_loaded(&config, tools));

            if let Some(path) = &config.history.path {
                let last = CycleHistory::new(path).load_recent(1).await;
                sections.push(check_history(path, last.map(|mut recent| recent.pop())));
            }
        }
        Err(e) => sections.push(check_config_source(config_path, config_found, Some(&e))),
    }

    let report = Report::from_sections(sections);
    report.render(format)?;

    if report.summary.error > 0 {
        bail!("{} error(s) found", report.summary.error);
    }
    Ok(())
}

fn check_loaded(config: &Config, tools: ToolAvailability) -> Vec<Section> {
    vec![
        check_database(config, tools),
        check_backup(config, tools),
        check_delivery(config),
        check_logs(config),
    ]
}

// ============================================================================
// Checks
// ============================================================================

fn check_config_source(path: &Path, found: bool, error: Option<&ConfigError>) -> Section {
    let mut checks = Vec::new();
    if found {
        checks.push(CheckResult::ok(format!(
            "Config file '{}' found",
            path.display()
        )));
    } else {
        checks.push(CheckResult::warn(format!(
            "Config file '{}' not found, reading environment variables",
            path.display()
        )));
    }

    match error {
        None => checks.push(CheckResult::ok("Configuration loaded")),
        Some(e @ ConfigError::Yaml(_)) => checks.push(CheckResult::error(format!("Invalid YAML: {e}"))),
        Some(e) => checks.push(CheckResult::error(format!("Failed to load config: {e}"))),
    }

    Section {
        name: "Configuration",
        checks,
    }
}

fn check_database(config: &Config, tools: ToolAvailability) -> Section {
    let db = &config.database;
    let mut checks = Vec::new();

    match db.name() {
        Some(name) => checks.push(CheckResult::ok(format!(
            "Database '{name}' on {}:{}",
            db.host, db.port
        ))),
        None => checks.push(CheckResult::error("Database name is not set (DB_NAME)")),
    }
    if db.user().is_none() {
        checks.push(CheckResult::warn(
            "Database user is not set (DB_USER), the dump tool will use its default",
        ));
    }

    let tool = db.engine.dump_tool();
    if tools.dump_tool {
        checks.push(CheckResult::ok(format!("'{tool}' found")));
    } else {
        checks.push(CheckResult::error(format!("'{tool}' not found on PATH")));
    }

    Section {
        name: "Database",
        checks,
    }
}

fn check_backup(config: &Config, tools: ToolAvailability) -> Section {
    let backup = &config.backup;
    let mut checks = Vec::new();

    if backup.passphrase().is_some() {
        checks.push(CheckResult::ok("Archive passphrase set"));
    } else {
        checks.push(CheckResult::error(
            "Archive passphrase is not set (BACKUP_PASSWORD), every cycle will fail",
        ));
    }

    if backup.dir.is_dir() {
        checks.push(CheckResult::ok(format!(
            "Backup directory '{}' exists",
            backup.dir.display()
        )));
    } else {
        checks.push(CheckResult::warn(format!(
            "Backup directory '{}' does not exist yet, it will be created",
            backup.dir.display()
        )));
    }

    checks.push(CheckResult::ok(format!(
        "Artifacts named '{}_backup_<timestamp>.zip', kept up to {} minute(s)",
        backup.artifact_prefix(&config.database),
        backup.retention_minutes
    )));

    if tools.archiver {
        checks.push(CheckResult::ok(format!("'{}' found", SEVEN_ZIP.binary)));
    } else {
        checks.push(CheckResult::warn(format!(
            "'{}' not found, it will be installed before the first archive",
            SEVEN_ZIP.binary
        )));
    }

    Section {
        name: "Backup",
        checks,
    }
}

fn check_delivery(config: &Config) -> Section {
    let delivery = &config.delivery;
    let mut checks = Vec::new();

    match (&delivery.bot_token, &delivery.chat_id) {
        (Some(_), Some(chat_id)) => {
            let topic = delivery
                .thread_id()
                .map(|t| format!(", topic {t}"))
                .unwrap_or_default();
            checks.push(CheckResult::ok(format!(
                "Telegram delivery enabled (chat {chat_id}{topic})"
            )));
        }
        (Some(_), None) | (None, Some(_)) => checks.push(CheckResult::warn(
            "Only one of TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID is set, delivery is disabled",
        )),
        (None, None) => checks.push(CheckResult::warn(
            "Telegram delivery disabled, artifacts are only kept locally",
        )),
    }

    Section {
        name: "Delivery",
        checks,
    }
}

fn check_logs(config: &Config) -> Section {
    let mut checks = Vec::new();

    match (config.logs.cap(), &config.logs.dir) {
        (LogCap::Bytes(cap), Some(dir)) => {
            let mb = cap / (1024 * 1024);
            if dir.is_dir() {
                checks.push(CheckResult::ok(format!(
                    "Log directory '{}' capped at {mb} MB",
                    dir.display()
                )));
            } else {
                checks.push(CheckResult::warn(format!(
                    "Log directory '{}' does not exist, nothing to trim",
                    dir.display()
                )));
            }
        }
        (LogCap::Invalid(value), _) => checks.push(CheckResult::warn(format!(
            "Log size cap '{value}' is not a positive integer, trimming disabled"
        ))),
        _ => checks.push(CheckResult::ok("Log trimming disabled (LOG_DIR not set)")),
    }

    Section {
        name: "Logs",
        checks,
    }
}

fn check_history(path: &Path, last: Result<Option<CycleRecord>, HistoryError>) -> Section {
    let check = match last {
        Err(e) => CheckResult::warn(format!("Cannot read cycle history: {e}")),
        Ok(None) => CheckResult::ok(format!("No cycles recorded yet in '{}'", path.display())),
        Ok(Some(record)) => {
            let finished = record.finished_at.format("%Y-%m-%d %H:%M:%S UTC");
            match record.status {
                CycleStatus::Ok => CheckResult::ok(format!(
                    "Last cycle at {finished} succeeded ({})",
                    record.artifact.as_deref().unwrap_or("no artifact")
                )),
                CycleStatus::Error => CheckResult::warn(format!(
                    "Last cycle at {finished} failed: {}",
                    failure_reason(&record)
                )),
            }
        }
    };

    Section {
        name: "History",
        checks: vec![check],
    }
}

fn failure_reason(record: &CycleRecord) -> String {
    if let Some(error) = &record.error {
        return error.clone();
    }
    match &record.delivery {
        Some(DeliveryOutcome::Failed {
            reason: Some(reason),
        }) => format!("delivery failed: {reason}"),
        _ => "delivery failed".to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
