//! Backup artifact naming and lifecycle.
//!
//! Every cycle's files share one stem: `<prefix>_backup_<YYYYMMDD_HHMMSS>`.
//! The raw dump is `<stem>.sql`, the encrypted artifact `<stem>.zip`.
//! Files being written carry an extra `.partial` suffix until renamed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// Timestamp layout embedded in file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const STEM_MARKER: &str = "_backup_";
const DUMP_EXTENSION: &str = "sql";
const ARCHIVE_EXTENSION: &str = "zip";
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Where an artifact is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    RawDump,
    Encrypted,
    DeliveryAttempted,
    Retained,
    Deleted,
}

/// One cycle's output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    pub state: ArtifactState,
}

impl BackupArtifact {
    pub fn new(created_at: DateTime<Utc>, path: PathBuf, state: ArtifactState) -> Self {
        Self {
            created_at,
            path,
            state,
        }
    }

    /// Human-readable timestamp label used in delivery captions.
    pub fn label(&self) -> String {
        timestamp_label(self.created_at)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Names of the files belonging to one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    stem: String,
}

impl ArtifactNames {
    pub fn new(prefix: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            stem: format!("{prefix}{STEM_MARKER}{}", timestamp_label(created_at)),
        }
    }

    pub fn dump(&self) -> String {
        format!("{}.{DUMP_EXTENSION}", self.stem)
    }

    pub fn archive(&self) -> String {
        format!("{}.{ARCHIVE_EXTENSION}", self.stem)
    }

    /// In-progress name for a file that is renamed into place on success.
    pub fn partial(name: &str) -> String {
        format!("{name}{PARTIAL_SUFFIX}")
    }
}

pub fn timestamp_label(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse the creation time out of a finished artifact's file name.
///
/// Returns `None` for anything that is not `<prefix>_backup_<ts>.zip`.
pub fn archive_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(&format!(".{ARCHIVE_EXTENSION}"))?;
    let (_, ts) = stem.rsplit_once(STEM_MARKER)?;
    NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whether a file is debris from an interrupted cycle: a raw dump or an
/// unfinished `.partial` file following the naming scheme.
pub fn is_stale_cycle_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.contains(STEM_MARKER)
        && (name.ends_with(PARTIAL_SUFFIX) || name.ends_with(&format!(".{DUMP_EXTENSION}")))
}
