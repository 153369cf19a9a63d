use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::config::SorterConfig;
use crate::error::{Result, SorterError};
use crate::model::{EventSource, FsNotification, OrganizeSummary, ProcessOutcome};
use crate::processor::EventProcessor;

/// How often the event loop wakes up to check for cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub type RawEvents = Receiver<notify::Result<Event>>;

/// Owns the watched roots and feeds their change notifications to the processor.
#[derive(Debug, Clone)]
pub struct WatchCoordinator {
    processor: EventProcessor,
}

impl WatchCoordinator {
    pub fn new(config: Arc<SorterConfig>) -> Result<Self> {
        let roots = resolve_roots(&config.target_directories)?;
        Ok(Self {
            processor: EventProcessor::new(config, roots),
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        self.processor.roots()
    }

    pub fn processor(&self) -> &EventProcessor {
        &self.processor
    }

    /// Registers the roots and hands back the watcher with its event stream. Events
    /// are buffered in the channel until `serve` drains them, so a start-up scan run
    /// in between loses nothing. Dropping the watcher stops notifications.
    pub fn watch(&self) -> Result<(RecommendedWatcher, RawEvents)> {
        let (tx, rx) = mpsc::channel();
        let watcher = self.register(tx)?;
        Ok((watcher, rx))
    }

    /// Non-recursive registration of every root. Fails only when no root could be
    /// registered.
    pub fn register(&self, tx: Sender<notify::Result<Event>>) -> Result<RecommendedWatcher> {
        let first_root = self.roots().first().cloned().unwrap_or_default();
        let mut watcher = notify::recommended_watcher(tx).map_err(|source| SorterError::Watch {
            path: first_root.clone(),
            source,
        })?;

        let mut last_error = None;
        let mut registered = 0_usize;
        for root in self.roots() {
            match watcher.watch(root, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    info!("Started organizing {}", root.display());
                    registered += 1;
                }
                Err(err) => {
                    error!("Failed to watch {}: {err}", root.display());
                    last_error = Some(SorterError::Watch {
                        path: root.clone(),
                        source: err,
                    });
                }
            }
        }

        match (registered, last_error) {
            (0, Some(err)) => Err(err),
            (0, None) => Err(SorterError::NoValidRoots),
            _ => Ok(watcher),
        }
    }

    /// Organizes the direct file children of every root once, without settling.
    pub fn scan_existing(&self) -> OrganizeSummary {
        info!("Scanning existing files...");
        let mut summary = OrganizeSummary::default();
        for root in self.roots() {
            info!("Scanning {}...", root.display());
            summary.merge(&self.scan_root(root));
        }
        info!(
            "Finished scanning existing files: {} moved, {} duplicates removed, {} failed",
            summary.moved, summary.duplicates, summary.failed
        );
        summary
    }

    fn scan_root(&self, root: &Path) -> OrganizeSummary {
        let mut summary = OrganizeSummary::default();
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                error!("Failed to scan {}: {err}", root.display());
                summary.failed += 1;
                return summary;
            }
        };

        let mut files = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| fs::metadata(path).is_ok_and(|metadata| metadata.is_file()))
            .collect::<Vec<_>>();
        files.sort();

        for path in files {
            let outcome = self.processor.process(&path, EventSource::Scan);
            summary.record(&outcome);
        }
        summary
    }

    /// Handles raw events in arrival order until cancelled or the sender goes away.
    /// An event being processed when cancellation arrives is finished first.
    pub fn serve(&self, rx: &RawEvents, cancel: &AtomicBool) -> OrganizeSummary {
        let mut summary = OrganizeSummary::default();
        loop {
            if cancel.load(Ordering::SeqCst) {
                info!("watch loop stopping");
                break;
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => {
                    for notification in translate_event(&event) {
                        summary.record(&self.handle(&notification));
                    }
                }
                Ok(Err(err)) => warn!("watch error: {err}"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("change notification source closed; watch loop stopping");
                    break;
                }
            }
        }
        summary
    }

    pub fn handle(&self, notification: &FsNotification) -> ProcessOutcome {
        debug!("notification: {notification:?}");
        self.processor
            .process(notification.path(), EventSource::Live)
    }
}

/// Maps a raw notify event onto the create / rename-completion notifications the
/// processor acts on. Everything else is dropped.
pub fn translate_event(event: &Event) -> Vec<FsNotification> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .cloned()
            .map(FsNotification::Created)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event
            .paths
            .iter()
            .cloned()
            .map(FsNotification::MovedTo)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event
            .paths
            .get(1)
            .cloned()
            .map(FsNotification::MovedTo)
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

/// Canonicalizes, validates and deduplicates the configured roots. Missing roots
/// and roots nested inside another root are skipped with a warning; only an empty
/// result is an error.
pub fn resolve_roots(raw_roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    for raw in raw_roots {
        let canonical = match fs::canonicalize(raw) {
            Ok(path) => path,
            Err(_) => {
                warn!("Target directory {} does not exist. Skipping.", raw.display());
                continue;
            }
        };
        if !canonical.is_dir() {
            warn!("Target {} is not a directory. Skipping.", raw.display());
            continue;
        }
        if candidates.contains(&canonical) {
            debug!("Target directory {} listed more than once", raw.display());
            continue;
        }
        candidates.push(canonical);
    }

    let mut roots = Vec::with_capacity(candidates.len());
    for root in &candidates {
        if let Some(outer) = candidates
            .iter()
            .find(|other| *other != root && root.starts_with(other))
        {
            warn!(
                "Target directory {} is inside {}. Skipping to avoid processing files twice.",
                root.display(),
                outer.display()
            );
            continue;
        }
        roots.push(root.clone());
    }

    if roots.is_empty() {
        error!("No valid target directories found.");
        return Err(SorterError::NoValidRoots);
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
    use notify::{Event, EventKind};
    use tempfile::TempDir;

    use super::{resolve_roots, translate_event, WatchCoordinator};
    use crate::config::SorterConfig;
    use crate::error::SorterError;
    use crate::model::FsNotification;

    #[test]
    fn translates_create_and_rename_completion_only() {
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path("/in/a.pdf".into());
        let folder = Event::new(EventKind::Create(CreateKind::Folder)).add_path("/in/Images".into());
        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/in/a.pdf.part".into())
            .add_path("/in/a.pdf".into());
        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/in/b.pdf".into());

        assert_eq!(
            translate_event(&created),
            vec![FsNotification::Created(PathBuf::from("/in/a.pdf"))]
        );
        assert!(translate_event(&folder).is_empty());
        assert_eq!(
            translate_event(&renamed),
            vec![FsNotification::MovedTo(PathBuf::from("/in/a.pdf"))]
        );
        assert!(translate_event(&removed).is_empty());
    }

    #[test]
    fn resolve_roots_skips_missing_duplicate_and_nested() {
        let temp = TempDir::new().expect("tempdir");
        let outer = temp.path().join("outer");
        let inner = outer.join("inner");
        fs::create_dir_all(&inner).expect("mkdir");

        let roots = resolve_roots(&[
            outer.clone(),
            temp.path().join("missing"),
            outer.join("."),
            inner,
        ])
        .expect("one root survives");

        assert_eq!(roots, vec![fs::canonicalize(&outer).expect("canonical")]);
    }

    #[test]
    fn resolve_roots_fails_without_any_valid_root() {
        let temp = TempDir::new().expect("tempdir");
        let err = resolve_roots(&[temp.path().join("nope")]).expect_err("must fail");
        assert!(matches!(err, SorterError::NoValidRoots));
    }

    #[test]
    fn serve_processes_events_until_cancelled() {
        let temp = TempDir::new().expect("tempdir");
        let root = fs::canonicalize(temp.path()).expect("canonical");
        let config = Arc::new(SorterConfig::for_roots([root.clone()]));
        let coordinator = WatchCoordinator::new(config).expect("coordinator");

        let file = root.join("slides.pptx");
        fs::write(&file, b"deck").expect("write");

        let (tx, rx) = mpsc::channel();
        tx.send(Ok(Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone())))
            .expect("send");
        tx.send(Ok(Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(file.clone())))
            .expect("send");

        let cancel = AtomicBool::new(false);
        let summary = thread::scope(|scope| {
            let (coordinator, cancel_flag) = (&coordinator, &cancel);
            let worker = scope.spawn(move || coordinator.serve(&rx, cancel_flag));
            thread::sleep(Duration::from_millis(600));
            cancel.store(true, std::sync::atomic::Ordering::SeqCst);
            worker.join().expect("serve thread")
        });

        assert_eq!(summary.moved, 1);
        assert_eq!(summary.ignored, 1);
        assert!(root.join("Documents").join("slides.pptx").is_file());
        drop(tx);
    }

    #[test]
    fn scan_existing_organizes_top_level_files_only() {
        let temp = TempDir::new().expect("tempdir");
        let root = fs::canonicalize(temp.path()).expect("canonical");
        fs::write(root.join("a.png"), b"a").expect("write");
        fs::write(root.join("b.pdf"), b"b").expect("write");
        fs::write(root.join("c.part"), b"c").expect("write");
        fs::create_dir(root.join("Projects")).expect("mkdir");
        fs::write(root.join("Projects").join("d.png"), b"d").expect("write");

        let coordinator =
            WatchCoordinator::new(Arc::new(SorterConfig::for_roots([root.clone()])))
                .expect("coordinator");
        let summary = coordinator.scan_existing();

        assert_eq!(summary.moved, 2);
        assert_eq!(summary.ignored, 1);
        assert!(root.join("Images").join("a.png").is_file());
        assert!(root.join("Documents").join("b.pdf").is_file());
        assert!(root.join("c.part").is_file());
        assert!(root.join("Projects").join("d.png").is_file());
    }
}
