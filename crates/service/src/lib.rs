pub mod service;

pub use service::{ArchiveScheduler, ServiceSnapshot, ServiceStatus, SorterService};
