use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

/// Immutable runtime configuration, built once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,

    #[error("invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// A missing file is not an error: the configuration is then read from the
    /// process environment instead (see [`Config::from_env`]).
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok()).await
    }

    async fn load_with<F>(path: impl AsRef<Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Self::from_env(lookup),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents, &lookup)?;
        let config: Config = serde_saphyr::from_str(&expanded)?;
        config.validate("schedule.interval_seconds")
    }

    /// Build configuration from environment-style variables.
    ///
    /// `lookup` resolves a variable name to its value; pass
    /// `|name| std::env::var(name).ok()` for the real environment.
    pub fn from_env<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(engine) = var("DB_ENGINE") {
            config.database.engine = match engine.trim().to_ascii_lowercase().as_str() {
                "mysql" => DatabaseEngine::MySql,
                "mariadb" => DatabaseEngine::MariaDb,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "DB_ENGINE",
                        value: engine,
                    });
                }
            };
        }
        if let Some(host) = var("DB_HOST") {
            config.database.host = host;
        }
        if let Some(port) = var("DB_PORT") {
            config.database.port = parse_number("DB_PORT", &port)?;
        }
        config.database.user = var("DB_USER");
        config.database.password = var("DB_PASSWORD");
        config.database.name = var("DB_NAME");

        if let Some(dir) = var("BACKUP_DIR") {
            config.backup.dir = PathBuf::from(dir);
        }
        config.backup.prefix = var("BACKUP_PREFIX");
        config.backup.passphrase = var("BACKUP_PASSWORD");
        if let Some(minutes) = var("BACKUP_RETENTION_MINUTES") {
            config.backup.retention_minutes = parse_number("BACKUP_RETENTION_MINUTES", &minutes)?;
        }

        if let Some(secs) = var("BACKUP_INTERVAL_SECONDS") {
            config.schedule.interval_seconds = parse_number("BACKUP_INTERVAL_SECONDS", &secs)?;
        }
        if let Some(flag) = var("BACKUP_RUN_ONCE") {
            config.schedule.run_once = parse_flag("BACKUP_RUN_ONCE", &flag)?;
        }

        config.logs.dir = var("LOG_DIR").map(PathBuf::from);
        if let Some(cap) = var("LOG_MAX_SIZE_MB") {
            config.logs.max_size_mb = Some(SizeSetting::Text(cap));
        }

        config.delivery.bot_token = var("TELEGRAM_BOT_TOKEN");
        config.delivery.chat_id = var("TELEGRAM_CHAT_ID");
        config.delivery.thread_id = var("TELEGRAM_THREAD_ID");
        if let Some(prefix) = var("TELEGRAM_CAPTION_PREFIX") {
            config.delivery.caption_prefix = prefix;
        }
        if let Some(url) = var("TELEGRAM_API_URL") {
            config.delivery.api_url = url;
        }
        if let Some(secs) = var("DELIVERY_TIMEOUT_SECONDS") {
            config.delivery.timeout_seconds = parse_number("DELIVERY_TIMEOUT_SECONDS", &secs)?;
        }

        config.history.path = var("BACKUP_HISTORY_PATH").map(PathBuf::from);

        config.validate("BACKUP_INTERVAL_SECONDS")
    }

    /// Two cycles in the same second would share an artifact name.
    fn validate(self, interval_name: &'static str) -> Result<Self, ConfigError> {
        if self.schedule.interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                name: interval_name,
                value: "0".to_string(),
            });
        }
        Ok(self)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

/// Treat empty strings (e.g. from `${VAR:-}`) as unset.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("/backups")
}

fn default_retention_minutes() -> u64 {
    7 * 24 * 60
}

fn default_interval_seconds() -> u64 {
    24 * 60 * 60
}

fn default_log_cap() -> Option<SizeSetting> {
    Some(SizeSetting::Number(500))
}

fn default_caption_prefix() -> String {
    "Database backup".to_string()
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_delivery_timeout() -> u64 {
    300
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports the following syntax (shell-compatible):
/// - `${VAR}` - Required variable, errors if not set
/// - `${VAR:-default}` - Optional variable with default value
/// - `${VAR:-}` - Optional variable, empty string if not set
/// - `$$` - Escaped `$` (only needed before `{` to prevent expansion)
///
/// Nested expansion (`${VAR:-${DEFAULT}}`) is not supported.
///
/// ```yaml
/// backup:
///   passphrase: ${BACKUP_PASSWORD}
/// delivery:
///   thread_id: ${TELEGRAM_THREAD_ID:-}
/// ```
fn expand_env_vars(
    input: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    chars.next();
                    let expanded = parse_var_reference(&mut chars, lookup)?;
                    result.push_str(&expanded);
                }
                _ => {
                    result.push('$');
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

/// Parse a variable reference after seeing `${`.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut var_name = String::new();
    let mut default_value: Option<String> = None;
    let mut found_closing_brace = false;

    while let Some(&c) = chars.peek() {
        match c {
            '}' => {
                chars.next();
                found_closing_brace = true;
                break;
            }
            ':' if default_value.is_none() => {
                chars.next();
                if chars.peek() == Some(&'-') {
                    chars.next();
                    default_value = Some(String::new());
                } else {
                    var_name.push(':');
                }
            }
            _ => {
                chars.next();
                match default_value.as_mut() {
                    Some(default) => default.push(c),
                    None => var_name.push(c),
                }
            }
        }
    }

    if !found_closing_brace {
        return Err(ConfigError::UnclosedVarReference);
    }

    match lookup(&var_name) {
        Some(value) => Ok(value),
        None => default_value.ok_or(ConfigError::MissingEnvVar(var_name)),
    }
}

// ============================================================================
// DatabaseConfig
// ============================================================================

/// Database flavour; selects the dump tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    #[default]
    MySql,
    MariaDb,
}

impl DatabaseEngine {
    /// Name of the dump binary for this engine.
    pub fn dump_tool(self) -> &'static str {
        match self {
            DatabaseEngine::MySql => "mysqldump",
            DatabaseEngine::MariaDb => "mariadb-dump",
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub engine: DatabaseEngine,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::default(),
            host: default_db_host(),
            port: default_db_port(),
            user: None,
            password: None,
            name: None,
        }
    }
}

impl DatabaseConfig {
    pub fn name(&self) -> Option<&str> {
        non_empty(&self.name)
    }

    pub fn user(&self) -> Option<&str> {
        non_empty(&self.user)
    }

    pub fn password(&self) -> Option<&str> {
        non_empty(&self.password)
    }
}

// Keeps the password out of logs.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("name", &self.name)
            .finish()
    }
}

// ============================================================================
// BackupConfig
// ============================================================================

#[derive(Clone, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
    /// Artifact name prefix; defaults to the database name.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Archive encryption passphrase. Every cycle fails without it.
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            prefix: None,
            passphrase: None,
            retention_minutes: default_retention_minutes(),
        }
    }
}

impl BackupConfig {
    pub fn passphrase(&self) -> Option<&str> {
        non_empty(&self.passphrase)
    }

    /// Prefix used for artifact file names.
    pub fn artifact_prefix(&self, database: &DatabaseConfig) -> String {
        non_empty(&self.prefix)
            .or_else(|| database.name())
            .unwrap_or("database")
            .to_string()
    }

    pub fn retention(&self) -> chrono::Duration {
        i64::try_from(self.retention_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl fmt::Debug for BackupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupConfig")
            .field("dir", &self.dir)
            .field("prefix", &self.prefix)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("retention_minutes", &self.retention_minutes)
            .finish()
    }
}

// ============================================================================
// ScheduleConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub run_once: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            run_once: false,
        }
    }
}

// ============================================================================
// LogsConfig
// ============================================================================

/// A size limit as written by the operator, validated lazily.
///
/// Any YAML value is accepted here; [`LogsConfig::cap`] decides whether it
/// is usable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SizeSetting {
    Number(i64),
    Text(String),
    Other(serde_json::Value),
}

/// Resolved log size cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCap {
    /// No log directory configured.
    Disabled,
    /// Enforce at most this many bytes.
    Bytes(u64),
    /// The configured cap is not a positive integer; enforcement is off.
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_log_cap")]
    pub max_size_mb: Option<SizeSetting>,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_size_mb: default_log_cap(),
        }
    }
}

impl LogsConfig {
    pub fn cap(&self) -> LogCap {
        if self.dir.is_none() {
            return LogCap::Disabled;
        }
        let megabytes = match &self.max_size_mb {
            None => return LogCap::Disabled,
            Some(SizeSetting::Number(n)) => Some(*n),
            Some(SizeSetting::Text(s)) => s.trim().parse::<i64>().ok(),
            Some(SizeSetting::Other(_)) => None,
        };
        match megabytes.and_then(|mb| u64::try_from(mb).ok()).filter(|mb| *mb > 0) {
            Some(mb) => LogCap::Bytes(mb.saturating_mul(1024 * 1024)),
            None => LogCap::Invalid(match &self.max_size_mb {
                Some(SizeSetting::Number(n)) => n.to_string(),
                Some(SizeSetting::Text(s)) => s.clone(),
                Some(SizeSetting::Other(v)) => v.to_string(),
                None => String::new(),
            }),
        }
    }
}

// ============================================================================
// DeliveryConfig
// ============================================================================

#[derive(Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Forum topic to post into.
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default = "default_caption_prefix")]
    pub caption_prefix: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_delivery_timeout")]
    pub timeout_seconds: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            thread_id: None,
            caption_prefix: default_caption_prefix(),
            api_url: default_api_url(),
            timeout_seconds: default_delivery_timeout(),
        }
    }
}

impl DeliveryConfig {
    /// Bot token and chat id, only when both are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((non_empty(&self.bot_token)?, non_empty(&self.chat_id)?))
    }

    pub fn thread_id(&self) -> Option<&str> {
        non_empty(&self.thread_id)
    }
}

impl fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryConfig")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("chat_id", &self.chat_id)
            .field("thread_id", &self.thread_id)
            .field("caption_prefix", &self.caption_prefix)
            .field("api_url", &self.api_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

// ============================================================================
// HistoryConfig
// ============================================================================

/// Optional JSONL record of cycle outcomes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ============================================================================
// Tests
// ============================================================================
