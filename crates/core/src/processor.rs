use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, warn};

use crate::categorize::{classify, extension_of};
use crate::config::SorterConfig;
use crate::filter::IgnoreMatcher;
use crate::model::{
    EventSource, IgnoreReason, PendingFile, PlacementFailure, PlacementOutcome, ProcessOutcome,
};
use crate::placer::place;

/// Turns one path into a terminal outcome: filter, settle, classify, place.
///
/// Only files whose parent directory is one of the watched roots are organized;
/// anything nested deeper is left alone.
#[derive(Debug, Clone)]
pub struct EventProcessor {
    config: Arc<SorterConfig>,
    roots: Vec<PathBuf>,
    ignore: IgnoreMatcher,
}

impl EventProcessor {
    pub fn new(config: Arc<SorterConfig>, roots: Vec<PathBuf>) -> Self {
        let ignore = IgnoreMatcher::new(&config.in_progress_suffixes, &config.ignore_patterns);
        Self {
            config,
            roots,
            ignore,
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn config(&self) -> &SorterConfig {
        &self.config
    }

    pub fn process(&self, path: &Path, source: EventSource) -> ProcessOutcome {
        let (root, file_name) = match self.accept(path) {
            Ok(accepted) => accepted,
            Err(reason) => {
                debug!("ignoring {} ({reason:?})", path.display());
                return ProcessOutcome::Ignored(reason);
            }
        };

        if let Err(outcome) = check_regular_file(path) {
            return outcome;
        }

        if source.needs_settling() {
            if let Some(reason) = self.settle(path) {
                if reason == IgnoreReason::StillWriting {
                    warn!(
                        "{} is still being written; leaving it for a later pass",
                        path.display()
                    );
                }
                return ProcessOutcome::Ignored(reason);
            }
            if let Err(outcome) = check_regular_file(path) {
                return outcome;
            }
        }

        let pending = self.classify(path, &file_name);
        debug!(
            "classified {} as {} (extension '{}')",
            pending.path.display(),
            pending.category,
            pending.extension
        );

        let dest_folder = root.join(&pending.category);
        match place(&pending.path, &dest_folder, &pending.file_name) {
            PlacementOutcome::Moved { final_name } => ProcessOutcome::Moved {
                category: pending.category,
                final_name,
            },
            PlacementOutcome::DiscardedAsDuplicate { matched } => ProcessOutcome::Duplicate {
                category: pending.category,
                matched,
            },
            PlacementOutcome::Failed(PlacementFailure::SourceVanished) => {
                ProcessOutcome::Failed("source vanished before placement".to_string())
            }
            PlacementOutcome::Failed(PlacementFailure::PlacementFailed(reason)) => {
                ProcessOutcome::Failed(reason)
            }
        }
    }

    /// Root-membership and name filters. Returns the owning root and the file name.
    fn accept<'a>(&'a self, path: &Path) -> Result<(&'a Path, String), IgnoreReason> {
        let root = path
            .parent()
            .and_then(|parent| self.owning_root(parent))
            .ok_or(IgnoreReason::OutsideWatchedRoot)?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or(IgnoreReason::NotAFile)?;

        if let Some(reason) = self.ignore.check(&file_name) {
            return Err(reason);
        }
        Ok((root, file_name))
    }

    fn owning_root(&self, parent: &Path) -> Option<&Path> {
        if let Some(root) = self.roots.iter().find(|root| root.as_path() == parent) {
            return Some(root.as_path());
        }
        let canonical = fs::canonicalize(parent).ok()?;
        self.roots
            .iter()
            .find(|root| **root == canonical)
            .map(PathBuf::as_path)
    }

    fn classify(&self, path: &Path, file_name: &str) -> PendingFile {
        let extension = extension_of(file_name).to_lowercase();
        let category = classify(&extension, &self.config.categories).to_string();
        PendingFile {
            path: path.to_path_buf(),
            file_name: file_name.to_string(),
            extension,
            category,
        }
    }

    /// Waits for the producer to finish writing. `None` means the file settled.
    fn settle(&self, path: &Path) -> Option<IgnoreReason> {
        let settings = self.config.settle;
        let delay = settings.delay();

        if !settings.stability_check {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            return None;
        }

        let mut previous = match file_size(path) {
            Some(size) => size,
            None => return Some(IgnoreReason::Missing),
        };
        for _ in 0..settings.max_rounds {
            thread::sleep(delay);
            let current = match file_size(path) {
                Some(size) => size,
                None => return Some(IgnoreReason::Missing),
            };
            if current == previous {
                return None;
            }
            previous = current;
        }
        Some(IgnoreReason::StillWriting)
    }
}

fn check_regular_file(path: &Path) -> Result<(), ProcessOutcome> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => Ok(()),
        Ok(_) => Err(ProcessOutcome::Ignored(IgnoreReason::NotAFile)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("{} no longer exists", path.display());
            Err(ProcessOutcome::Ignored(IgnoreReason::Missing))
        }
        Err(err) => {
            error!("Error processing {}: {err}", path.display());
            Err(ProcessOutcome::Failed(err.to_string()))
        }
    }
}

fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|metadata| metadata.len())
}
