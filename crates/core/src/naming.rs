use std::path::Path;

/// Splits a file name into stem and extension (extension keeps its dot).
/// Leading dots belong to the stem, so `.profile` has no extension.
pub fn split_name(name: &str) -> (&str, &str) {
    let leading_dots = name.len() - name.trim_start_matches('.').len();
    match name[leading_dots..].rfind('.') {
        Some(index) => name.split_at(leading_dots + index),
        None => (name, ""),
    }
}

/// Returns `desired` if it is free in `dest_folder`, else the first free
/// `"{stem} ({n}){ext}"` for n = 1, 2, 3, ...
///
/// The probe reads the live directory on every call. A racing creator can still
/// take the name before the caller uses it; callers re-allocate on collision.
pub fn allocate(dest_folder: &Path, desired: &str) -> String {
    allocate_with(desired, |candidate| {
        dest_folder.join(candidate).symlink_metadata().is_ok()
    })
}

/// Same probing scheme against an arbitrary "is this name taken" check.
pub fn allocate_with<F>(desired: &str, mut is_taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    if !is_taken(desired) {
        return desired.to_string();
    }

    let (stem, ext) = split_name(desired);
    let mut counter: u64 = 1;
    loop {
        let candidate = format!("{stem} ({counter}){ext}");
        if !is_taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;

    use tempfile::TempDir;

    use super::{allocate, allocate_with, split_name};

    #[test]
    fn splits_on_last_dot_but_keeps_leading_dots() {
        assert_eq!(split_name("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_name("backup.tar.gz"), ("backup.tar", ".gz"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name(".profile"), (".profile", ""));
        assert_eq!(split_name("..hidden.txt"), ("..hidden", ".txt"));
    }

    #[test]
    fn free_name_is_returned_unchanged() {
        let temp = TempDir::new().expect("tempdir");
        assert_eq!(allocate(temp.path(), "report.pdf"), "report.pdf");
    }

    #[test]
    fn probes_numbered_suffixes_in_order() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(temp.path().join("report.pdf"), b"v0").expect("write");
        assert_eq!(allocate(temp.path(), "report.pdf"), "report (1).pdf");

        fs::write(temp.path().join("report (1).pdf"), b"v1").expect("write");
        assert_eq!(allocate(temp.path(), "report.pdf"), "report (2).pdf");
    }

    #[test]
    fn fills_gaps_left_by_removed_files() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(temp.path().join("notes"), b"a").expect("write");
        fs::write(temp.path().join("notes (2)"), b"c").expect("write");
        assert_eq!(allocate(temp.path(), "notes"), "notes (1)");
    }

    #[test]
    fn allocates_against_custom_name_sets() {
        let taken: HashSet<&str> = ["a.txt", "a (1).txt"].into_iter().collect();
        assert_eq!(allocate_with("a.txt", |name| taken.contains(name)), "a (2).txt");
        assert_eq!(allocate_with("b.txt", |name| taken.contains(name)), "b.txt");
    }
}
