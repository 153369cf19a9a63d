use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use storage_sorter_core::{
    run_sweep, ArchiveSettings, CategoryMap, OrganizeSummary, SorterConfig, SweepOptions,
    SweepSummary, WatchCoordinator,
};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Running,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub run_id: String,
    pub status: ServiceStatus,
    pub roots: Vec<PathBuf>,
    pub startup_scan: Option<OrganizeSummary>,
    pub live: Option<OrganizeSummary>,
    pub last_sweep: Option<SweepSummary>,
    pub sweeps_completed: u64,
    pub error: Option<String>,
}

#[derive(Debug)]
struct ServiceState {
    status: ServiceStatus,
    startup_scan: Option<OrganizeSummary>,
    live: Option<OrganizeSummary>,
    last_sweep: Option<SweepSummary>,
    sweeps_completed: u64,
    error: Option<String>,
}

type SharedState = Arc<Mutex<ServiceState>>;

/// A running organizer: one watch thread plus, when archival is enabled, one
/// archive scheduler thread. Both stop on `shutdown`.
pub struct SorterService {
    run_id: String,
    roots: Vec<PathBuf>,
    state: SharedState,
    cancel_flag: Arc<AtomicBool>,
    watch_thread: Option<JoinHandle<()>>,
    scheduler: Option<ArchiveScheduler>,
}

impl SorterService {
    /// Resolves the roots and registers the watcher before returning, so a
    /// configuration that cannot be watched fails here rather than in the
    /// background.
    pub fn start(config: SorterConfig) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let config = Arc::new(config);
        let coordinator = WatchCoordinator::new(Arc::clone(&config))
            .context("failed to resolve target directories")?;
        let (watcher, events) = coordinator
            .watch()
            .context("failed to register change notifications")?;
        let roots = coordinator.roots().to_vec();

        let cancel_flag = Arc::new(AtomicBool::new(false));
        let state: SharedState = Arc::new(Mutex::new(ServiceState {
            status: ServiceStatus::Running,
            startup_scan: None,
            live: None,
            last_sweep: None,
            sweeps_completed: 0,
            error: None,
        }));
        info!(run_id = %run_id, roots = roots.len(), "organizer started");

        let thread_state = Arc::clone(&state);
        let thread_cancel = Arc::clone(&cancel_flag);
        let watch_thread = thread::Builder::new()
            .name("sorter-watch".to_string())
            .spawn(move || {
                let _watcher = watcher;
                let scanned = coordinator.scan_existing();
                if let Ok(mut state) = lock_state(&thread_state) {
                    state.startup_scan = Some(scanned);
                }

                let live = coordinator.serve(&events, &thread_cancel);
                if let Ok(mut state) = lock_state(&thread_state) {
                    state.live = Some(live);
                    if !thread_cancel.load(Ordering::SeqCst) {
                        state.status = ServiceStatus::Failed;
                        state.error = Some("change notification stream closed".to_string());
                    }
                }
            })
            .context("failed to spawn watch thread")?;

        let scheduler = if config.archive.enabled {
            let sweep_state = Arc::clone(&state);
            Some(ArchiveScheduler::spawn(
                roots.clone(),
                config.categories.clone(),
                config.archive,
                Arc::clone(&cancel_flag),
                move |summary| {
                    if let Ok(mut state) = lock_state(&sweep_state) {
                        state.sweeps_completed += 1;
                        state.last_sweep = Some(summary);
                    }
                },
            )?)
        } else {
            info!("archival disabled");
            None
        };

        Ok(Self {
            run_id,
            roots,
            state,
            cancel_flag,
            watch_thread: Some(watch_thread),
            scheduler,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// True once the watch thread has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.watch_thread
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    pub fn snapshot(&self) -> Result<ServiceSnapshot> {
        let state = lock_state(&self.state)?;
        Ok(ServiceSnapshot {
            run_id: self.run_id.clone(),
            status: state.status.clone(),
            roots: self.roots.clone(),
            startup_scan: state.startup_scan.clone(),
            live: state.live.clone(),
            last_sweep: state.last_sweep.clone(),
            sweeps_completed: state.sweeps_completed,
            error: state.error.clone(),
        })
    }

    /// Signals both threads and waits for them. Work already in progress finishes
    /// first, so no file is left half-moved.
    pub fn shutdown(mut self) -> Result<ServiceSnapshot> {
        info!(run_id = %self.run_id, "shutting down");
        self.cancel_flag.store(true, Ordering::SeqCst);
        if let Ok(mut state) = lock_state(&self.state) {
            if state.status == ServiceStatus::Running {
                state.status = ServiceStatus::Stopping;
            }
        }

        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
        if let Some(handle) = self.watch_thread.take() {
            if handle.join().is_err() {
                error!("watch thread panicked");
                let mut state = lock_state(&self.state)?;
                state.status = ServiceStatus::Failed;
                state.error = Some("watch thread panicked".to_string());
            }
        }

        {
            let mut state = lock_state(&self.state)?;
            if state.status == ServiceStatus::Stopping {
                state.status = ServiceStatus::Stopped;
            }
        }
        info!(run_id = %self.run_id, "organizer stopped");
        self.snapshot()
    }
}

impl Drop for SorterService {
    fn drop(&mut self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }
}

/// Runs an archival sweep at start-up and then once per configured period until
/// stopped. A sweep in progress observes the shared cancel flag between
/// directories.
pub struct ArchiveScheduler {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl ArchiveScheduler {
    pub fn spawn<F>(
        roots: Vec<PathBuf>,
        categories: CategoryMap,
        settings: ArchiveSettings,
        cancel_flag: Arc<AtomicBool>,
        mut on_summary: F,
    ) -> Result<Self>
    where
        F: FnMut(SweepSummary) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let period = settings.period();
        info!(
            "archival scheduled every {}h with {} day retention",
            settings.interval_hours, settings.days
        );

        let handle = thread::Builder::new()
            .name("sorter-archive".to_string())
            .spawn(move || loop {
                let options = SweepOptions {
                    cancel_flag: Some(Arc::clone(&cancel_flag)),
                    ..SweepOptions::from_settings(&settings)
                };
                on_summary(run_sweep(&roots, &categories, &options));

                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if cancel_flag.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .context("failed to spawn archive scheduler")?;

        Ok(Self { stop_tx, handle })
    }

    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            warn!("archive scheduler panicked");
        }
    }
}

fn lock_state(state: &SharedState) -> Result<MutexGuard<'_, ServiceState>> {
    state
        .lock()
        .map_err(|_| anyhow!("service state lock poisoned"))
}
