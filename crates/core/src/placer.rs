use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::archive::BUNDLE_FILE_NAME;
use crate::dedupe::ContentComparator;
use crate::error::{Result, SorterError};
use crate::model::{PlacementFailure, PlacementOutcome};
use crate::naming::allocate_with;

/// How many times a freshly allocated name may be lost to a racing creator.
const MAX_COLLISION_RETRIES: usize = 8;

/// Moves `source` into `dest_folder`, or deletes it when a byte-identical file is
/// already there. Never panics and never surfaces an error to the caller's loop;
/// re-running it on the same path converges on the same result.
pub fn place(source: &Path, dest_folder: &Path, desired_name: &str) -> PlacementOutcome {
    let source_name = display_name(source);
    let category = display_name(dest_folder);

    match try_place(source, dest_folder, desired_name) {
        Ok(PlacementOutcome::Moved { final_name }) => {
            info!("Moved {source_name} to {category}/{final_name}");
            PlacementOutcome::Moved { final_name }
        }
        Ok(PlacementOutcome::DiscardedAsDuplicate { matched }) => {
            info!("Duplicate found: {source_name} is same as {matched}. Deleted new file.");
            PlacementOutcome::DiscardedAsDuplicate { matched }
        }
        Ok(failed @ PlacementOutcome::Failed(_)) => failed,
        Err(err) if err.is_source_vanished() => {
            warn!("{} vanished before it could be placed", source.display());
            PlacementOutcome::Failed(PlacementFailure::SourceVanished)
        }
        Err(err) => {
            error!("Error processing {}: {err}", source.display());
            PlacementOutcome::Failed(PlacementFailure::PlacementFailed(err.to_string()))
        }
    }
}

fn try_place(source: &Path, dest_folder: &Path, desired_name: &str) -> Result<PlacementOutcome> {
    let metadata = fs::metadata(source).map_err(|err| placement_error(source, err))?;
    if !metadata.is_file() {
        return Err(placement_error(
            source,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }

    fs::create_dir_all(dest_folder).map_err(|err| SorterError::PlacementFailed {
        path: dest_folder.to_path_buf(),
        source: err,
    })?;

    if is_own_folder(source, dest_folder) {
        return Err(placement_error(
            source,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "destination folder is the folder the file is already in",
            ),
        ));
    }

    if let Some(matched) = find_duplicate(source, dest_folder)? {
        fs::remove_file(source).map_err(|err| placement_error(source, err))?;
        return Ok(PlacementOutcome::DiscardedAsDuplicate { matched });
    }

    for _ in 0..MAX_COLLISION_RETRIES {
        let final_name = allocate_with(desired_name, |candidate| {
            is_reserved_name(candidate) || dest_folder.join(candidate).symlink_metadata().is_ok()
        });
        let target = dest_folder.join(&final_name);
        match relocate(source, &target) {
            Ok(()) => return Ok(PlacementOutcome::Moved { final_name }),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!(
                    "{} was taken while placing {}; allocating again",
                    target.display(),
                    source.display()
                );
            }
            Err(err) => return Err(placement_error(source, err)),
        }
    }

    Err(placement_error(
        source,
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination name kept colliding after {MAX_COLLISION_RETRIES} attempts"),
        ),
    ))
}

/// First regular file directly inside `dest_folder` with the same content as `source`.
/// Candidates are checked in name order. A candidate that cannot be read counts as
/// distinct.
fn find_duplicate(source: &Path, dest_folder: &Path) -> Result<Option<String>> {
    let mut comparator = ContentComparator::for_source(source)?;
    let source_canonical = fs::canonicalize(source).ok();

    let mut candidates = fs::read_dir(dest_folder)
        .map_err(|err| SorterError::PlacementFailed {
            path: dest_folder.to_path_buf(),
            source: err,
        })?
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(err) => {
                warn!("failed to read entry in {}: {err}", dest_folder.display());
                None
            }
        })
        .filter(|path| fs::metadata(path).is_ok_and(|metadata| metadata.is_file()))
        .collect::<Vec<_>>();
    candidates.sort();

    for candidate in candidates {
        if candidate.as_path() == source
            || (source_canonical.is_some() && fs::canonicalize(&candidate).ok() == source_canonical)
        {
            continue;
        }
        match comparator.matches(&candidate) {
            Ok(true) => return Ok(Some(display_name(&candidate))),
            Ok(false) => {}
            Err(err) if !source.exists() => {
                debug!("comparison aborted: {err}");
                return Err(SorterError::SourceVanished(source.to_path_buf()));
            }
            Err(err) => warn!("{err}; treating {} as distinct", candidate.display()),
        }
    }
    Ok(None)
}

/// Publishes `source` at `target` in one step without ever replacing an existing
/// `target`. Hard-linking fails with `AlreadyExists` on a taken name; filesystems
/// without hard links fall back to a checked rename.
fn relocate(source: &Path, target: &Path) -> io::Result<()> {
    match fs::hard_link(source, target) {
        Ok(()) => match fs::remove_file(source) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(target);
                Err(err)
            }
        },
        Err(err) if matches!(err.kind(), io::ErrorKind::AlreadyExists | io::ErrorKind::NotFound) => {
            Err(err)
        }
        Err(err) => {
            debug!(
                "hard link unavailable for {} ({err}); falling back to rename",
                target.display()
            );
            if target.symlink_metadata().is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "destination already exists",
                ));
            }
            fs::rename(source, target)
        }
    }
}

/// The archive bundle name is kept free so a user file never poses as the bundle.
fn is_reserved_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(BUNDLE_FILE_NAME)
}

fn is_own_folder(source: &Path, dest_folder: &Path) -> bool {
    let Some(parent) = source.parent() else {
        return false;
    };
    match (fs::canonicalize(parent), fs::canonicalize(dest_folder)) {
        (Ok(parent), Ok(dest)) => parent == dest,
        _ => false,
    }
}

fn placement_error(source: &Path, err: io::Error) -> SorterError {
    if err.kind() == io::ErrorKind::NotFound && !source.exists() {
        return SorterError::SourceVanished(source.to_path_buf());
    }
    SorterError::PlacementFailed {
        path: source.to_path_buf(),
        source: err,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{find_duplicate, place};
    use crate::model::{PlacementFailure, PlacementOutcome};

    fn entries(dir: &std::path::Path) -> Vec<String> {
        let mut names = fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn moves_into_lazily_created_folder() {
        let temp = TempDir::new().expect("tempdir");
        let source = temp.path().join("photo.jpg");
        fs::write(&source, b"pixels").expect("write");
        let dest = temp.path().join("Images");

        let outcome = place(&source, &dest, "photo.jpg");

        assert_eq!(
            outcome,
            PlacementOutcome::Moved {
                final_name: "photo.jpg".to_string()
            }
        );
        assert!(!source.exists());
        assert_eq!(fs::read(dest.join("photo.jpg")).expect("read"), b"pixels");
    }

    #[test]
    fn discards_duplicate_content_under_another_name() {
        let temp = TempDir::new().expect("tempdir");
        let dest = temp.path().join("Documents");
        fs::create_dir(&dest).expect("mkdir");
        fs::write(dest.join("original.pdf"), b"same bytes").expect("write existing");
        let source = temp.path().join("copy.pdf");
        fs::write(&source, b"same bytes").expect("write source");

        let outcome = place(&source, &dest, "copy.pdf");

        assert_eq!(
            outcome,
            PlacementOutcome::DiscardedAsDuplicate {
                matched: "original.pdf".to_string()
            }
        );
        assert!(!source.exists());
        assert_eq!(entries(&dest), vec!["original.pdf".to_string()]);
        assert_eq!(fs::read(dest.join("original.pdf")).expect("read"), b"same bytes");
    }

    #[test]
    fn suffixes_name_collision_with_distinct_content() {
        let temp = TempDir::new().expect("tempdir");
        let dest = temp.path().join("Documents");
        fs::create_dir(&dest).expect("mkdir");
        fs::write(dest.join("report.pdf"), b"first").expect("write");

        for (index, body) in [b"second".as_slice(), b"third".as_slice()].iter().enumerate() {
            let source = temp.path().join("report.pdf");
            fs::write(&source, body).expect("write source");
            let outcome = place(&source, &dest, "report.pdf");
            assert_eq!(
                outcome,
                PlacementOutcome::Moved {
                    final_name: format!("report ({}).pdf", index + 1)
                }
            );
        }

        assert_eq!(
            entries(&dest),
            vec![
                "report (1).pdf".to_string(),
                "report (2).pdf".to_string(),
                "report.pdf".to_string()
            ]
        );
        assert_eq!(fs::read(dest.join("report (2).pdf")).expect("read"), b"third");
    }

    #[test]
    fn vanished_source_is_reported_not_raised() {
        let temp = TempDir::new().expect("tempdir");
        let outcome = place(
            &temp.path().join("never-existed.txt"),
            &temp.path().join("Documents"),
            "never-existed.txt",
        );
        assert_eq!(
            outcome,
            PlacementOutcome::Failed(PlacementFailure::SourceVanished)
        );
    }

    #[test]
    fn destination_blocked_by_file_fails_and_keeps_source() {
        let temp = TempDir::new().expect("tempdir");
        let blocker = temp.path().join("Images");
        fs::write(&blocker, b"not a folder").expect("write blocker");
        let source = temp.path().join("pic.png");
        fs::write(&source, b"png").expect("write source");

        let outcome = place(&source, &blocker, "pic.png");

        assert!(matches!(
            outcome,
            PlacementOutcome::Failed(PlacementFailure::PlacementFailed(_))
        ));
        assert!(source.exists());
    }

    #[test]
    fn retrying_after_success_is_a_no_op() {
        let temp = TempDir::new().expect("tempdir");
        let source = temp.path().join("song.mp3");
        fs::write(&source, b"audio").expect("write");
        let dest = temp.path().join("Audio");

        assert!(matches!(
            place(&source, &dest, "song.mp3"),
            PlacementOutcome::Moved { .. }
        ));
        assert_eq!(
            place(&source, &dest, "song.mp3"),
            PlacementOutcome::Failed(PlacementFailure::SourceVanished)
        );
        assert_eq!(entries(&dest), vec!["song.mp3".to_string()]);
    }

    #[test]
    fn source_is_never_its_own_duplicate() {
        let temp = TempDir::new().expect("tempdir");
        let source = temp.path().join("tax-return.pdf");
        fs::write(&source, b"only copy").expect("write");

        let matched = find_duplicate(&source, temp.path()).expect("compare");

        assert_eq!(matched, None);
        assert!(source.exists());
    }

    #[test]
    fn placing_into_own_folder_fails_and_keeps_the_file() {
        let temp = TempDir::new().expect("tempdir");
        let source = temp.path().join("tax-return.pdf");
        fs::write(&source, b"only copy").expect("write");

        let outcome = place(&source, &temp.path().join("."), "tax-return.pdf");

        assert!(matches!(
            outcome,
            PlacementOutcome::Failed(PlacementFailure::PlacementFailed(_))
        ));
        assert_eq!(fs::read(&source).expect("read"), b"only copy");
        assert_eq!(entries(temp.path()), vec!["tax-return.pdf".to_string()]);
    }

    #[test]
    fn bundle_file_name_is_never_handed_out() {
        let temp = TempDir::new().expect("tempdir");
        let source = temp.path().join("archive.zip");
        fs::write(&source, b"user zip").expect("write");
        let dest = temp.path().join("Archives");

        let outcome = place(&source, &dest, "archive.zip");

        assert_eq!(
            outcome,
            PlacementOutcome::Moved {
                final_name: "archive (1).zip".to_string()
            }
        );
        assert_eq!(entries(&dest), vec!["archive (1).zip".to_string()]);
    }
}
