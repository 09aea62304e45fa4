use serde::Serialize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = match option_env!("BUILD_COMMIT") {
    Some(c) => c,
    None => "unknown",
};

pub fn version_string() -> String {
    format!("{VERSION} (commit: {COMMIT})")
}

/// Version block embedded in `check --format json` output.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit: &'static str,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            version: VERSION,
            commit: COMMIT,
        }
    }
}
