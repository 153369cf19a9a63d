use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;

use crate::model::IgnoreReason;

pub const HIDDEN_PREFIX: char = '.';

/// Decides which file names are never organized, whatever their extension.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    in_progress_suffixes: Vec<String>,
    globset: Option<GlobSet>,
}

impl IgnoreMatcher {
    pub fn new(in_progress_suffixes: &[String], patterns: &[String]) -> Self {
        let in_progress_suffixes = in_progress_suffixes
            .iter()
            .map(|suffix| suffix.trim().to_lowercase())
            .filter(|suffix| !suffix.is_empty())
            .collect();

        Self {
            in_progress_suffixes,
            globset: build_globset(patterns),
        }
    }

    pub fn check(&self, file_name: &str) -> Option<IgnoreReason> {
        if is_hidden(file_name) {
            return Some(IgnoreReason::Hidden);
        }

        let lowered = file_name.to_lowercase();
        if self
            .in_progress_suffixes
            .iter()
            .any(|suffix| lowered.ends_with(suffix.as_str()))
        {
            return Some(IgnoreReason::InProgressDownload);
        }

        if self
            .globset
            .as_ref()
            .is_some_and(|globset| globset.is_match(file_name))
        {
            return Some(IgnoreReason::IgnorePattern);
        }

        None
    }
}

pub fn is_hidden(file_name: &str) -> bool {
    file_name.starts_with(HIDDEN_PREFIX)
}

fn build_globset(patterns: &[String]) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let mut added = 0_usize;
    for pattern in patterns {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
                added += 1;
            }
            Err(err) => warn!("invalid ignore pattern '{pattern}': {err}; skipping it"),
        }
    }

    if added == 0 {
        return None;
    }
    match builder.build() {
        Ok(set) => Some(set),
        Err(err) => {
            warn!("failed to compile ignore patterns: {err}; pattern ignores disabled");
            None
        }
    }
}
