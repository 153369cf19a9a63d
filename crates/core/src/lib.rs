pub mod archive;
pub mod categorize;
pub mod config;
pub mod dedupe;
pub mod doctor;
pub mod error;
pub mod filter;
pub mod model;
pub mod naming;
pub mod placer;
pub mod processor;
pub mod watch;

pub use archive::{is_eligible, run_sweep, SweepOptions, BUNDLE_FILE_NAME};
pub use categorize::{classify, classify_path, extension_of};
pub use config::{
    load_config, load_config_or_default, parse_config, validate_folder_name, ArchiveSettings,
    CategoryMap, CategoryRule, SettleSettings, SorterConfig, DEFAULT_CATEGORY,
};
pub use dedupe::{hash_file, is_duplicate, ContentComparator};
pub use doctor::{collect_doctor_info, DoctorInfo, RootStatus};
pub use error::{Result, SorterError};
pub use filter::IgnoreMatcher;
pub use model::{
    EventSource, FsNotification, IgnoreReason, OrganizeSummary, PendingFile, PlacementFailure,
    PlacementOutcome, ProcessOutcome, SweepSummary,
};
pub use naming::{allocate, allocate_with, split_name};
pub use placer::place;
pub use processor::EventProcessor;
pub use watch::{resolve_roots, translate_event, WatchCoordinator};
