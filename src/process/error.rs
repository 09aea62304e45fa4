use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}
