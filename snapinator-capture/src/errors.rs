use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Why a capture produced no artifact.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Navigation or rendering exceeded the load timeout.
    #[error("capture timed out after {} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    /// The target URL could not be reached.
    #[error("unable to reach {url}: {message}")]
    Network { url: String, message: String },

    /// The artifact (or its directory) could not be written.
    #[error("unable to write artifact to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The automation backend failed for reasons unrelated to the page.
    #[error("browser automation failed: {0}")]
    Browser(String),
}

impl CaptureError {
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CaptureError::Write {
            path: path.into(),
            source,
        }
    }

    /// Only unreachable targets are worth another attempt within the same run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CaptureError::Network { .. })
    }
}
