use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SorterError>;

#[derive(Error, Debug)]
pub enum SorterError {
    #[error("invalid configuration {}: {reason}", .path.display())]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("no valid target directories found")]
    NoValidRoots,

    #[error("failed to compare contents of {}: {source}", .path.display())]
    ComparisonFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("source disappeared before it could be placed: {}", .0.display())]
    SourceVanished(PathBuf),

    #[error("failed to place {}: {source}", .path.display())]
    PlacementFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write archive bundle {}: {reason}", .path.display())]
    ArchiveWriteFailed { path: PathBuf, reason: String },

    #[error("failed to watch {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

impl SorterError {
    pub fn config_invalid(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ConfigInvalid {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn archive_write_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ArchiveWriteFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the error means the file being handled no longer exists.
    pub fn is_source_vanished(&self) -> bool {
        match self {
            Self::SourceVanished(_) => true,
            Self::ComparisonFailed { source, .. } | Self::PlacementFailed { source, .. } => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}
