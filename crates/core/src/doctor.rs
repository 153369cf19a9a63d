use std::env;
use std::fs;
use std::path::Path;

use serde::Serialize;
use sysinfo::Disks;

use crate::config::{ArchiveSettings, SettleSettings, SorterConfig};
use crate::watch::resolve_roots;

#[derive(Debug, Clone, Serialize)]
pub struct DoctorInfo {
    pub os: String,
    pub arch: String,
    pub config_source: Option<String>,
    pub categories: Vec<String>,
    pub default_category: String,
    pub archive: ArchiveSettings,
    pub settle: SettleSettings,
    pub roots: Vec<RootStatus>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RootStatus {
    pub configured: String,
    pub resolved: Option<String>,
    pub watched: bool,
    pub disk_mount: Option<String>,
    pub free_space_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
struct MountedDisk {
    mount_point: String,
    free_space_bytes: u64,
}

pub fn collect_doctor_info(config: &SorterConfig) -> DoctorInfo {
    let disks = enumerate_disks();
    let accepted = resolve_roots(&config.target_directories).unwrap_or_default();

    let roots = config
        .target_directories
        .iter()
        .map(|configured| {
            let resolved = fs::canonicalize(configured).ok();
            let disk = resolved
                .as_deref()
                .and_then(|path| match_disk(path, &disks));
            RootStatus {
                configured: configured.to_string_lossy().to_string(),
                watched: resolved
                    .as_ref()
                    .is_some_and(|path| accepted.contains(path)),
                resolved: resolved.map(|path| path.to_string_lossy().to_string()),
                disk_mount: disk.map(|disk| disk.mount_point.clone()),
                free_space_bytes: disk.map(|disk| disk.free_space_bytes),
            }
        })
        .collect::<Vec<_>>();

    let mut notes = vec![
        "Only files directly inside a watched directory are organized.".to_string(),
        "Duplicates are detected by size and BLAKE3 digest and the newer copy is deleted."
            .to_string(),
    ];
    if accepted.is_empty() {
        notes.push("No usable target directory; `run` would exit with an error.".to_string());
    }
    if !config.archive.enabled {
        notes.push("Archival is disabled.".to_string());
    }
    if disks.is_empty() {
        notes.push("No disks detected by sysinfo; free space is unknown.".to_string());
    }

    DoctorInfo {
        os: env::consts::OS.to_string(),
        arch: env::consts::ARCH.to_string(),
        config_source: config
            .source
            .as_ref()
            .map(|path| path.to_string_lossy().to_string()),
        categories: config
            .categories
            .rules()
            .iter()
            .map(|rule| rule.name.clone())
            .collect(),
        default_category: config.categories.fallback().to_string(),
        archive: config.archive,
        settle: config.settle,
        roots,
        notes,
    }
}

fn enumerate_disks() -> Vec<MountedDisk> {
    Disks::new_with_refreshed_list()
        .list()
        .iter()
        .map(|disk| MountedDisk {
            mount_point: disk.mount_point().to_string_lossy().to_string(),
            free_space_bytes: disk.available_space(),
        })
        .collect()
}

/// Longest mount point that prefixes `path`.
fn match_disk<'a>(path: &Path, disks: &'a [MountedDisk]) -> Option<&'a MountedDisk> {
    disks
        .iter()
        .filter(|disk| path.starts_with(Path::new(&disk.mount_point)))
        .max_by_key(|disk| disk.mount_point.len())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use super::{collect_doctor_info, match_disk, MountedDisk};
    use crate::config::SorterConfig;

    #[test]
    fn picks_longest_matching_mount() {
        let disks = vec![
            MountedDisk {
                mount_point: "/".to_string(),
                free_space_bytes: 1,
            },
            MountedDisk {
                mount_point: "/home".to_string(),
                free_space_bytes: 2,
            },
        ];
        let disk = match_disk(Path::new("/home/me/Downloads"), &disks).expect("match");
        assert_eq!(disk.mount_point, "/home");
        assert_eq!(
            match_disk(Path::new("/var/tmp"), &disks).map(|disk| disk.free_space_bytes),
            Some(1)
        );
    }

    #[test]
    fn reports_missing_and_watched_roots() {
        let temp = TempDir::new().expect("tempdir");
        let config = SorterConfig::for_roots([temp.path().to_path_buf(), temp.path().join("nope")]);

        let info = collect_doctor_info(&config);

        assert_eq!(info.roots.len(), 2);
        assert!(info.roots[0].watched);
        assert!(!info.roots[1].watched);
        assert!(info.roots[1].resolved.is_none());
        assert_eq!(info.default_category, "Others");
    }
}
