use std::path::Path;

use crate::config::CategoryMap;

/// Extension of a file name: the text after the last `.`, or empty when there is none.
pub fn extension_of(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(index) => &file_name[index + 1..],
        None => "",
    }
}

/// Resolves the category for an extension. The first category in definition order
/// that lists the extension wins; unmatched extensions go to the fallback category.
pub fn classify<'m>(extension: &str, categories: &'m CategoryMap) -> &'m str {
    let lowered = extension.to_lowercase();
    categories
        .rules()
        .iter()
        .find(|rule| rule.claims(&lowered))
        .map(|rule| rule.name.as_str())
        .unwrap_or_else(|| categories.fallback())
}

pub fn classify_path<'m>(path: &Path, categories: &'m CategoryMap) -> &'m str {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    classify(extension_of(&file_name), categories)
}
