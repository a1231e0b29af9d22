use std::path::PathBuf;
use thiserror::Error;

/// Conditions that abort the whole run rather than a single file
#[derive(Debug, Error)]
pub enum RunError {
    /// The directory to post-process does not exist
    #[error("destination directory {0} doesn't exist")]
    DestinationMissing(PathBuf),

    /// Width falls outside every CRF bucket
    #[error("could not set crf for {path}: unsupported resolution {width}x{height}")]
    UnsupportedResolution {
        path: PathBuf,
        width: u32,
        height: u32,
    },

    /// The swap of an accepted artifact failed part way; the tree may need manual attention
    #[error("failed to commit {path}: {reason:#}")]
    Commit {
        path: PathBuf,
        reason: anyhow::Error,
    },
}

impl RunError {
    pub(crate) fn commit(path: impl Into<PathBuf>, reason: anyhow::Error) -> Self {
        RunError::Commit {
            path: path.into(),
            reason,
        }
    }
}
