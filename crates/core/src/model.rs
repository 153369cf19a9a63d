use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where a path handed to the event processor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Live change notification; the producer may still be writing.
    Live,
    /// Start-up directory scan; the file is assumed complete.
    Scan,
}

impl EventSource {
    pub fn needs_settling(self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Change notifications the core acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsNotification {
    Created(PathBuf),
    MovedTo(PathBuf),
}

impl FsNotification {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Created(path) | Self::MovedTo(path) => path,
        }
    }
}

/// A file event in flight between classification and placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub path: PathBuf,
    pub file_name: String,
    pub extension: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementFailure {
    SourceVanished,
    PlacementFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementOutcome {
    Moved { final_name: String },
    DiscardedAsDuplicate { matched: String },
    Failed(PlacementFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    OutsideWatchedRoot,
    Hidden,
    InProgressDownload,
    IgnorePattern,
    NotAFile,
    Missing,
    StillWriting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    Moved { category: String, final_name: String },
    Duplicate { category: String, matched: String },
    Ignored(IgnoreReason),
    Failed(String),
}

/// Counts for a batch of processed paths, e.g. one start-up scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizeSummary {
    pub moved: u64,
    pub duplicates: u64,
    pub ignored: u64,
    pub failed: u64,
}

impl OrganizeSummary {
    pub fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Moved { .. } => self.moved += 1,
            ProcessOutcome::Duplicate { .. } => self.duplicates += 1,
            ProcessOutcome::Ignored(_) => self.ignored += 1,
            ProcessOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &OrganizeSummary) {
        self.moved += other.moved;
        self.duplicates += other.duplicates;
        self.ignored += other.ignored;
        self.failed += other.failed;
    }
}

/// Result of one archival sweep across every watched root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub sweep_id: String,
    pub started_at: String,
    pub directories_visited: u64,
    pub directories_archived: u64,
    pub files_archived: u64,
    pub files_deleted: u64,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub failures: Vec<String>,
}
