use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Datelike, Local, SecondsFormat, Timelike, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;
use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::{ArchiveSettings, CategoryMap};
use crate::error::{Result, SorterError};
use crate::filter::is_hidden;
use crate::model::SweepSummary;
use crate::naming::allocate_with;

pub const BUNDLE_FILE_NAME: &str = "archive.zip";

#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Reference time for ages; fixed at the start of the sweep.
    pub now: SystemTime,
    pub retention: Duration,
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl SweepOptions {
    pub fn from_settings(settings: &ArchiveSettings) -> Self {
        Self {
            now: SystemTime::now(),
            retention: settings.retention(),
            cancel_flag: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    name: String,
    size_bytes: u64,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct DirectoryArchive {
    archived: u64,
    deleted: u64,
    warnings: Vec<String>,
}

/// A file is eligible once its age is strictly greater than the retention period.
/// Modification times in the future are never eligible.
pub fn is_eligible(modified: SystemTime, now: SystemTime, retention: Duration) -> bool {
    now.duration_since(modified)
        .map(|age| age > retention)
        .unwrap_or(false)
}

/// Archives aged files under every category folder of every root. Failures are
/// isolated per directory and collected in the summary.
pub fn run_sweep(roots: &[PathBuf], categories: &CategoryMap, options: &SweepOptions) -> SweepSummary {
    let mut summary = SweepSummary {
        sweep_id: Uuid::new_v4().to_string(),
        started_at: DateTime::<Utc>::from(options.now).to_rfc3339_opts(SecondsFormat::Secs, true),
        ..SweepSummary::default()
    };
    info!(
        "Starting archival process (retention {} days)...",
        options.retention.as_secs() / 86_400
    );

    'roots: for root in roots {
        info!("Archiving in {}...", root.display());
        for folder in category_folders(root, categories) {
            for dir in walk_directories(&folder, &mut summary.failures) {
                if is_cancelled(options) {
                    warn!("archival sweep cancelled; remaining directories skipped");
                    summary.cancelled = true;
                    break 'roots;
                }

                summary.directories_visited += 1;
                match archive_directory(&dir, options) {
                    Ok(None) => {}
                    Ok(Some(result)) => {
                        summary.directories_archived += 1;
                        summary.files_archived += result.archived;
                        summary.files_deleted += result.deleted;
                        summary.failures.extend(result.warnings);
                    }
                    Err(err) => {
                        error!("Failed to archive in {}: {err}", dir.display());
                        summary.failures.push(err.to_string());
                    }
                }
            }
        }
    }

    info!(
        "Archival process finished: {} file(s) archived in {} director(ies), {} failure(s).",
        summary.files_archived,
        summary.directories_archived,
        summary.failures.len()
    );
    summary
}

fn category_folders(root: &Path, categories: &CategoryMap) -> Vec<PathBuf> {
    categories
        .folder_names()
        .into_iter()
        .map(|name| root.join(name))
        .filter(|path| fs::symlink_metadata(path).is_ok_and(|metadata| metadata.is_dir()))
        .collect()
}

fn walk_directories(folder: &Path, failures: &mut Vec<String>) -> Vec<PathBuf> {
    let mut directories = Vec::new();
    for item in WalkDir::new(folder).follow_links(false).sort_by_file_name() {
        match item {
            Ok(entry) if entry.file_type().is_dir() => directories.push(entry.into_path()),
            Ok(_) => {}
            Err(err) => {
                warn!("walk error under {}: {err}", folder.display());
                failures.push(format!("walk error under {}: {err}", folder.display()));
            }
        }
    }
    directories
}

fn archive_directory(dir: &Path, options: &SweepOptions) -> Result<Option<DirectoryArchive>> {
    let candidates = collect_candidates(dir, options)
        .map_err(|err| SorterError::archive_write_failed(dir.join(BUNDLE_FILE_NAME), err))?;
    if candidates.is_empty() {
        return Ok(None);
    }

    info!("Archiving {} files in {}...", candidates.len(), dir.display());
    let bundle = dir.join(BUNDLE_FILE_NAME);
    append_to_bundle(&bundle, &candidates)?;

    let mut result = DirectoryArchive {
        archived: candidates.len() as u64,
        ..DirectoryArchive::default()
    };
    for candidate in &candidates {
        match fs::remove_file(&candidate.path) {
            Ok(()) => {
                info!("Deleted original {}", candidate.name);
                result.deleted += 1;
            }
            Err(err) => {
                warn!(
                    "archived {} but could not delete it: {err}",
                    candidate.path.display()
                );
                result.warnings.push(format!(
                    "failed to delete archived original {}: {err}",
                    candidate.path.display()
                ));
            }
        }
    }
    Ok(Some(result))
}

/// Regular, non-hidden files directly in `dir` that are past retention. Files whose
/// modification time cannot be read are skipped.
fn collect_candidates(dir: &Path, options: &SweepOptions) -> io::Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("failed to read entry in {}: {err}", dir.display());
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if name == BUNDLE_FILE_NAME || is_hidden(&name) {
            continue;
        }

        let path = entry.path();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(err) => {
                debug!("skipping {}: {err}", path.display());
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                debug!("skipping {}: modification time unavailable ({err})", path.display());
                continue;
            }
        };

        if is_eligible(modified, options.now, options.retention) {
            candidates.push(Candidate {
                path,
                name,
                size_bytes: metadata.len(),
                modified,
            });
        }
    }
    candidates.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(candidates)
}

/// Appends every candidate to the bundle under its base name. A bundle created by
/// this call is removed again if writing fails, so a broken first write does not
/// block later sweeps.
fn append_to_bundle(bundle: &Path, candidates: &[Candidate]) -> Result<()> {
    let existed = bundle.exists();
    let written = write_entries(bundle, existed, candidates);
    if written.is_err() && !existed {
        let _ = fs::remove_file(bundle);
    }
    written.map_err(|err| SorterError::archive_write_failed(bundle, err))
}

fn write_entries(bundle: &Path, existed: bool, candidates: &[Candidate]) -> ZipResult<()> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut writer = if existed {
        let existing = ZipArchive::new(File::open(bundle)?)?;
        taken.extend(existing.file_names().map(str::to_string));
        let file = OpenOptions::new().read(true).write(true).open(bundle)?;
        ZipWriter::new_append(file)?
    } else {
        ZipWriter::new(File::create(bundle)?)
    };

    for candidate in candidates {
        let entry_name = allocate_with(&candidate.name, |name| taken.contains(name));
        let mut options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(candidate.size_bytes >= u64::from(u32::MAX));
        if let Some(timestamp) = zip_timestamp(candidate.modified) {
            options = options.last_modified_time(timestamp);
        }

        writer.start_file(entry_name.as_str(), options)?;
        let mut source = File::open(&candidate.path)?;
        io::copy(&mut source, &mut writer)?;
        info!("Archived {}", candidate.name);
        taken.insert(entry_name);
    }

    writer.finish()?;
    Ok(())
}

fn zip_timestamp(modified: SystemTime) -> Option<zip::DateTime> {
    let local: DateTime<Local> = modified.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

fn is_cancelled(options: &SweepOptions) -> bool {
    options
        .cancel_flag
        .as_ref()
        .is_some_and(|flag| flag.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::is_eligible;

    #[test]
    fn eligibility_boundary_is_exclusive() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000_000);
        let retention = Duration::from_secs(5 * 86_400);
        let boundary = now - retention;

        assert!(!is_eligible(boundary, now, retention));
        assert!(is_eligible(boundary - Duration::from_secs(1), now, retention));
        assert!(!is_eligible(boundary + Duration::from_secs(1), now, retention));
    }

    #[test]
    fn future_modification_time_is_never_eligible() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let future = now + Duration::from_secs(60);
        assert!(!is_eligible(future, now, Duration::ZERO));
    }
}
