use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SorterError};

pub const DEFAULT_CATEGORY: &str = "Others";
pub const CONFIG_DIR_NAME: &str = "storage-sorter";
pub const CONFIG_FILE_NAME: &str = "config.json";

const SECONDS_PER_DAY: u64 = 86_400;

/// One named bucket and the lower-cased extensions (without the leading dot) it claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub extensions: Vec<String>,
}

impl CategoryRule {
    pub fn new(name: impl Into<String>, extensions: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self {
            name: name.into(),
            extensions,
        }
    }

    pub fn claims(&self, extension: &str) -> bool {
        self.extensions.iter().any(|candidate| candidate == extension)
    }
}

/// Ordered category definitions plus the fallback bucket for unmapped extensions.
///
/// Definition order is significant: when an extension appears under several
/// categories, the first definition wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMap {
    rules: Vec<CategoryRule>,
    fallback: String,
}

impl CategoryMap {
    pub fn new(rules: Vec<CategoryRule>, fallback: impl Into<String>) -> Self {
        Self {
            rules,
            fallback: fallback.into(),
        }
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every folder name this map can produce, in definition order, fallback last.
    pub fn folder_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(self.rules.len() + 1);
        for name in self
            .rules
            .iter()
            .map(|rule| rule.name.as_str())
            .chain(std::iter::once(self.fallback.as_str()))
        {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }
}

impl Default for CategoryMap {
    fn default() -> Self {
        let rules = vec![
            CategoryRule::new(
                "Images",
                ["jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "heic", "tiff", "ico"],
            ),
            CategoryRule::new(
                "Documents",
                [
                    "pdf", "doc", "docx", "txt", "rtf", "odt", "xls", "xlsx", "csv", "ppt",
                    "pptx", "md", "pages", "numbers", "key", "epub",
                ],
            ),
            CategoryRule::new(
                "Videos",
                ["mp4", "mkv", "avi", "mov", "webm", "flv", "wmv", "m4v", "mpg", "mpeg"],
            ),
            CategoryRule::new("Audio", ["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma"]),
            CategoryRule::new(
                "Archives",
                ["zip", "rar", "7z", "tar", "gz", "bz2", "xz", "tgz"],
            ),
            CategoryRule::new(
                "Code",
                [
                    "rs", "py", "js", "ts", "html", "css", "json", "yaml", "yml", "toml", "sh",
                    "c", "cpp", "h", "java", "go",
                ],
            ),
            CategoryRule::new(
                "Installers",
                ["dmg", "pkg", "exe", "msi", "deb", "rpm", "appimage"],
            ),
        ];
        Self::new(rules, DEFAULT_CATEGORY)
    }
}

impl Serialize for CategoryMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.rules
                .iter()
                .map(|rule| (rule.name.as_str(), &rule.extensions)),
        )
    }
}

impl<'de> Deserialize<'de> for CategoryMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RulesVisitor;

        impl<'de> Visitor<'de> for RulesVisitor {
            type Value = Vec<CategoryRule>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of category name to a list of extensions")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut rules: Vec<CategoryRule> = Vec::new();
                while let Some((name, extensions)) = map.next_entry::<String, Vec<String>>()? {
                    if rules.iter().any(|rule| rule.name == name) {
                        return Err(de::Error::custom(format!(
                            "category '{name}' is defined more than once"
                        )));
                    }
                    rules.push(CategoryRule::new(name, extensions));
                }
                Ok(rules)
            }
        }

        let rules = deserializer.deserialize_map(RulesVisitor)?;
        Ok(Self::new(rules, DEFAULT_CATEGORY))
    }
}

/// Top-level keys of the legacy layout that hold a list of strings.
#[derive(Debug, Default)]
struct LegacyCategories(Vec<CategoryRule>);

impl<'de> Deserialize<'de> for LegacyCategories {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct LegacyVisitor;

        impl<'de> Visitor<'de> for LegacyVisitor {
            type Value = LegacyCategories;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("top-level category lists")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut rules = Vec::new();
                while let Some(key) = map.next_key::<String>()? {
                    let value: serde_json::Value = map.next_value()?;
                    let Some(items) = value.as_array() else {
                        continue;
                    };
                    let extensions = items
                        .iter()
                        .filter_map(|item| item.as_str())
                        .collect::<Vec<_>>();
                    if extensions.len() == items.len() {
                        rules.push(CategoryRule::new(key, extensions));
                    }
                }
                Ok(LegacyCategories(rules))
            }
        }

        deserializer.deserialize_map(LegacyVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    pub enabled: bool,
    pub days: u64,
    pub interval_hours: u64,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            days: 5,
            interval_hours: 24,
        }
    }
}

impl ArchiveSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.days.saturating_mul(SECONDS_PER_DAY))
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.interval_hours.max(1).saturating_mul(3_600))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettleSettings {
    pub delay_ms: u64,
    pub stability_check: bool,
    pub max_rounds: u32,
}

impl Default for SettleSettings {
    fn default() -> Self {
        Self {
            delay_ms: 1_000,
            stability_check: true,
            max_rounds: 5,
        }
    }
}

impl SettleSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// On-disk shape of the configuration file.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    target_directories: Vec<PathBuf>,
    #[serde(default)]
    target_directory: Option<PathBuf>,
    #[serde(default)]
    categories: Option<CategoryMap>,
    #[serde(default = "default_category_name")]
    default_category: String,
    #[serde(default)]
    archive: ArchiveSettings,
    #[serde(default = "default_settle_delay_ms")]
    settle_delay_ms: u64,
    #[serde(default = "default_stability_check")]
    stability_check: bool,
    #[serde(default = "default_max_settle_rounds")]
    max_settle_rounds: u32,
    #[serde(default = "default_in_progress_suffixes")]
    in_progress_suffixes: Vec<String>,
    #[serde(default)]
    ignore_patterns: Vec<String>,
    #[serde(flatten)]
    legacy_categories: LegacyCategories,
}

fn default_category_name() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_settle_delay_ms() -> u64 {
    SettleSettings::default().delay_ms
}

fn default_stability_check() -> bool {
    SettleSettings::default().stability_check
}

fn default_max_settle_rounds() -> u32 {
    SettleSettings::default().max_rounds
}

fn default_in_progress_suffixes() -> Vec<String> {
    [".download", ".crdownload", ".part"]
        .iter()
        .map(|suffix| suffix.to_string())
        .collect()
}

/// Resolved runtime configuration. Built once at start-up and shared read-only.
#[derive(Debug, Clone, Serialize)]
pub struct SorterConfig {
    pub source: Option<PathBuf>,
    pub target_directories: Vec<PathBuf>,
    pub categories: CategoryMap,
    pub archive: ArchiveSettings,
    pub settle: SettleSettings,
    pub in_progress_suffixes: Vec<String>,
    pub ignore_patterns: Vec<String>,
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            source: None,
            target_directories: vec![default_target_directory()],
            categories: CategoryMap::default(),
            archive: ArchiveSettings::default(),
            settle: SettleSettings::default(),
            in_progress_suffixes: default_in_progress_suffixes(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl SorterConfig {
    /// Config rooted at the given directories with built-in categories and no settle delay.
    pub fn for_roots(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            target_directories: roots.into_iter().collect(),
            settle: SettleSettings {
                delay_ms: 0,
                stability_check: false,
                max_rounds: 1,
            },
            ..Self::default()
        }
    }

    fn from_file(file: ConfigFile, origin: &Path) -> Result<Self> {
        validate_folder_name(&file.default_category)
            .map_err(|reason| SorterError::config_invalid(origin, format!("default_category {reason}")))?;

        let legacy = file.legacy_categories.0;
        let categories = match file.categories {
            Some(categories) => {
                if !legacy.is_empty() {
                    tracing::warn!(
                        "{}: both `categories` and top-level category lists are present; using `categories`",
                        origin.display()
                    );
                }
                categories
            }
            None if !legacy.is_empty() => CategoryMap::new(legacy, DEFAULT_CATEGORY),
            None => CategoryMap::default(),
        }
        .with_fallback(file.default_category);
        for rule in categories.rules() {
            validate_folder_name(&rule.name)
                .map_err(|reason| SorterError::config_invalid(origin, format!("category {reason}")))?;
        }

        let mut raw_targets = file.target_directories;
        raw_targets.extend(file.target_directory);

        Ok(Self {
            source: Some(origin.to_path_buf()),
            target_directories: normalize_targets(raw_targets),
            categories,
            archive: file.archive,
            settle: SettleSettings {
                delay_ms: file.settle_delay_ms,
                stability_check: file.stability_check,
                max_rounds: file.max_settle_rounds.max(1),
            },
            in_progress_suffixes: file
                .in_progress_suffixes
                .into_iter()
                .map(|suffix| suffix.to_lowercase())
                .filter(|suffix| !suffix.is_empty())
                .collect(),
            ignore_patterns: file.ignore_patterns,
        })
    }
}

/// Category names become folders directly under a root, so each must be exactly
/// one plain path component.
pub fn validate_folder_name(name: &str) -> std::result::Result<(), String> {
    if name.trim().is_empty() {
        return Err(format!("'{name}' must not be empty"));
    }
    if name.contains(['/', '\\']) {
        return Err(format!("'{name}' must not contain path separators"));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(format!("'{name}' is not a plain folder name")),
    }
}

pub fn parse_config(text: &str, origin: &Path) -> Result<SorterConfig> {
    let file: ConfigFile =
        serde_json::from_str(text).map_err(|err| SorterError::config_invalid(origin, err))?;
    SorterConfig::from_file(file, origin)
}

pub fn load_config(path: &Path) -> Result<SorterConfig> {
    let text = fs::read_to_string(path).map_err(|err| SorterError::config_invalid(path, err))?;
    parse_config(&text, path)
}

/// Loads the explicit file if one is given, else the per-user default file when it
/// exists, else the built-in defaults.
pub fn load_config_or_default(explicit: Option<&Path>) -> Result<SorterConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match default_config_path() {
        Some(path) if path.is_file() => load_config(&path),
        _ => {
            tracing::info!("no configuration file found; using built-in defaults");
            Ok(SorterConfig::default())
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn default_target_directory() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("Downloads"))
}

pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn normalize_targets(raw: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for path in raw.iter().map(|path| expand_home(path)) {
        if seen.insert(path.clone()) {
            targets.push(path);
        }
    }
    if targets.is_empty() {
        targets.push(default_target_directory());
    }
    targets
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{expand_home, parse_config, CategoryMap, DEFAULT_CATEGORY};
    use crate::error::SorterError;

    #[test]
    fn parses_example_fixture() {
        let config = parse_config(
            include_str!("../../../fixtures/config.example.json"),
            Path::new("config.example.json"),
        )
        .expect("fixture parses");

        let names = config
            .categories
            .rules()
            .iter()
            .map(|rule| rule.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Images", "Documents", "Videos", "Archives"]);
        assert_eq!(config.categories.fallback(), "Others");
        assert!(config.archive.enabled);
        assert_eq!(config.archive.days, 5);
        assert_eq!(config.settle.delay_ms, 1_000);
        assert!(config.in_progress_suffixes.contains(&".crdownload".to_string()));
    }

    #[test]
    fn reads_legacy_top_level_categories_and_target() {
        let config = parse_config(
            r#"{
                "target_directory": "/tmp/inbox",
                "Pictures": ["JPG", ".png"],
                "Text": ["txt"],
                "archive": {"enabled": false}
            }"#,
            Path::new("legacy.json"),
        )
        .expect("legacy layout parses");

        assert_eq!(config.target_directories, vec![PathBuf::from("/tmp/inbox")]);
        let rules = config.categories.rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "Pictures");
        assert_eq!(rules[0].extensions, vec!["jpg".to_string(), "png".to_string()]);
        assert_eq!(rules[1].name, "Text");
    }

    #[test]
    fn explicit_categories_win_over_legacy_keys() {
        let config = parse_config(
            r#"{"categories": {"Docs": ["pdf"]}, "Pictures": ["jpg"]}"#,
            Path::new("mixed.json"),
        )
        .expect("parses");
        assert_eq!(config.categories.rules().len(), 1);
        assert_eq!(config.categories.rules()[0].name, "Docs");
    }

    #[test]
    fn falls_back_to_builtin_categories_when_none_configured() {
        let config = parse_config("{}", Path::new("empty.json")).expect("parses");
        assert_eq!(config.categories, CategoryMap::default());
        assert_eq!(config.categories.fallback(), DEFAULT_CATEGORY);
        assert_eq!(config.target_directories.len(), 1);
    }

    #[test]
    fn merges_and_dedupes_target_directories() {
        let config = parse_config(
            r#"{"target_directories": ["/data/a", "/data/b", "/data/a"], "target_directory": "/data/b"}"#,
            Path::new("targets.json"),
        )
        .expect("parses");
        assert_eq!(
            config.target_directories,
            vec![PathBuf::from("/data/a"), PathBuf::from("/data/b")]
        );
    }

    #[test]
    fn rejects_duplicate_category_names() {
        let err = parse_config(
            r#"{"categories": {"Docs": ["pdf"], "Docs": ["txt"]}}"#,
            Path::new("dup.json"),
        )
        .expect_err("duplicate category must fail");
        assert!(matches!(err, SorterError::ConfigInvalid { .. }));
    }

    #[test]
    fn rejects_category_names_that_are_not_plain_folders() {
        for name in ["", " ", ".", "..", "/tmp", "a/b", "a\\b", "../Escaped"] {
            let text = serde_json::json!({ "categories": { name: ["pdf"] } }).to_string();
            let err = parse_config(&text, Path::new("bad.json"))
                .expect_err("invalid category name must fail");
            assert!(matches!(err, SorterError::ConfigInvalid { .. }), "{name:?}");
        }
    }

    #[test]
    fn rejects_default_category_that_resolves_to_the_root() {
        for name in [".", "..", "", "/"] {
            let text = serde_json::json!({ "default_category": name }).to_string();
            let err = parse_config(&text, Path::new("bad.json"))
                .expect_err("invalid default category must fail");
            assert!(matches!(err, SorterError::ConfigInvalid { .. }), "{name:?}");
        }
        assert!(parse_config(r#"{"default_category": "Misc Stuff"}"#, Path::new("ok.json")).is_ok());
    }

    #[test]
    fn legacy_category_names_are_validated_too() {
        let err = parse_config(r#"{"..": ["pdf"]}"#, Path::new("legacy.json"))
            .expect_err("legacy name must fail");
        assert!(matches!(err, SorterError::ConfigInvalid { .. }));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_config("{ not json", Path::new("broken.json")).expect_err("must fail");
        assert!(matches!(err, SorterError::ConfigInvalid { .. }));
    }

    #[test]
    fn custom_default_category_becomes_fallback() {
        let config = parse_config(
            r#"{"categories": {"Docs": ["pdf"]}, "default_category": "Misc"}"#,
            Path::new("fallback.json"),
        )
        .expect("parses");
        assert_eq!(config.categories.fallback(), "Misc");
        assert_eq!(config.categories.folder_names(), vec!["Docs", "Misc"]);
    }

    #[test]
    fn expands_home_prefix_only() {
        let absolute = Path::new("/var/tmp");
        assert_eq!(expand_home(absolute), absolute.to_path_buf());
        assert_eq!(expand_home(Path::new("~user/x")), PathBuf::from("~user/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/Downloads")), home.join("Downloads"));
        }
    }
}
