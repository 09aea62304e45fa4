//! Byte cap for a rotating log directory that shares the backup volume.
//!
//! While the tree is over its cap, the oldest file (by mtime, then path) is
//! dealt with: rotated archives are deleted, live logs are truncated in
//! place so writers holding them open keep valid handles.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions of rotated, compressed logs that are deleted instead of
/// truncated.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["gz", "zip", "bz2", "xz", "zst", "tgz", "7z", "lz4", "tar"];

/// One regular file under the log root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub len: u64,
    pub archived: bool,
}

/// Snapshot of the log tree at one instant.
#[derive(Debug, Clone, Default)]
pub struct LogDirectoryState {
    pub files: Vec<LogFile>,
}

impl LogDirectoryState {
    /// Walk `root` recursively. Symlinks are not followed; unreadable
    /// entries are skipped. A missing root is an empty tree.
    pub fn scan(root: &Path) -> Self {
        let files = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                Some(LogFile {
                    archived: is_archived(entry.path()),
                    path: entry.into_path(),
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    len: metadata.len(),
                })
            })
            .collect();
        Self { files }
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.len).sum()
    }

    /// Oldest non-empty file not in `exclude`.
    fn oldest_candidate(&self, exclude: &HashSet<PathBuf>) -> Option<&LogFile> {
        self.files
            .iter()
            .filter(|f| f.len > 0 && !exclude.contains(&f.path))
            .min_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)))
    }
}

fn is_archived(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ARCHIVE_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Something the trimmer did to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrimAction {
    Deleted { path: PathBuf, bytes: u64 },
    Truncated { path: PathBuf, bytes: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub before_bytes: u64,
    pub after_bytes: u64,
    pub actions: Vec<TrimAction>,
}

/// Enforces a byte cap on one directory tree.
#[derive(Debug, Clone)]
pub struct LogTrimmer {
    root: PathBuf,
    cap: u64,
}

impl LogTrimmer {
    pub fn new(root: impl Into<PathBuf>, cap: u64) -> Self {
        Self {
            root: root.into(),
            cap,
        }
    }

    /// Bring the tree under its cap. Never fails: problems with individual
    /// files are logged and the file is skipped for the rest of this pass.
    pub async fn trim(&self) -> TrimReport {
        let root = self.root.clone();
        let cap = self.cap;
        match tokio::task::spawn_blocking(move || trim_blocking(&root, cap)).await {
            Ok(report) => report,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Log trim task failed");
                TrimReport::default()
            }
        }
    }
}

fn trim_blocking(root: &Path, cap: u64) -> TrimReport {
    let mut state = LogDirectoryState::scan(root);
    let mut report = TrimReport {
        before_bytes: state.total_bytes(),
        ..Default::default()
    };
    // Each file is handled at most once per pass, so a writer refilling
    // a truncated file cannot keep the loop alive.
    let mut handled = HashSet::new();

    while state.total_bytes() > cap {
        let Some(file) = state.oldest_candidate(&handled).cloned() else {
            warn!(
                root = %root.display(),
                total_bytes = state.total_bytes(),
                cap,
                "Log directory over cap with nothing left to trim"
            );
            break;
        };
        handled.insert(file.path.clone());

        let result = if file.archived {
            fs::remove_file(&file.path).map(|()| TrimAction::Deleted {
                path: file.path.clone(),
                bytes: file.len,
            })
        } else {
            OpenOptions::new()
                .write(true)
                .open(&file.path)
                .and_then(|f| f.set_len(0))
                .map(|()| TrimAction::Truncated {
                    path: file.path.clone(),
                    bytes: file.len,
                })
        };

        match result {
            Ok(action) => {
                info!(path = %file.path.display(), bytes = file.len, archived = file.archived, "Log file trimmed");
                report.actions.push(action);
            }
            Err(e) => warn!(path = %file.path.display(), error = %e, "Failed to trim log file"),
        }

        state = LogDirectoryState::scan(root);
    }

    report.after_bytes = state.total_bytes();
    debug!(
        root = %root.display(),
        before = report.before_bytes,
        after = report.after_bytes,
        actions = report.actions.len(),
        "Log trim finished"
    );
    report
}
