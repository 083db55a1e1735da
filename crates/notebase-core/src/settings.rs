use crate::classify::TocMarkers;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSettings {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub layout: LayoutSettings,
    #[serde(default)]
    pub toc: TocSettings,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// File and folder names of the knowledge base, relative to its root.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayoutSettings {
    #[serde(default = "default_notes_dir")]
    pub notes_dir: String,
    #[serde(default = "default_index_file")]
    pub index_file: String,
    #[serde(default = "default_note_doc_file")]
    pub note_doc_file: String,
    #[serde(default = "default_note_meta_file")]
    pub note_meta_file: String,
    #[serde(default = "default_outline_file")]
    pub outline_file: String,
    #[serde(default = "default_sidebar_file")]
    pub sidebar_file: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TocSettings {
    #[serde(default = "default_toc_start_marker")]
    pub start_marker: String,
    #[serde(default = "default_toc_end_marker")]
    pub end_marker: String,
    #[serde(default = "default_first_section_number")]
    pub first_section_number: u32,
    #[serde(default = "default_toc_max_level")]
    pub max_level: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSettings {
    #[serde(default = "default_catch_all_heading")]
    pub catch_all_heading: String,
    #[serde(default = "default_deprecated_mark")]
    pub deprecated_mark: String,
    #[serde(default = "default_outline_title")]
    pub outline_title: String,
    #[serde(default = "default_sidebar_collapse_depth")]
    pub sidebar_collapse_depth: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    #[serde(default = "default_incremental_threshold_percent")]
    pub incremental_threshold_percent: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_min_update_interval_ms")]
    pub min_update_interval_ms: u64,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            notes_dir: default_notes_dir(),
            index_file: default_index_file(),
            note_doc_file: default_note_doc_file(),
            note_meta_file: default_note_meta_file(),
            outline_file: default_outline_file(),
            sidebar_file: default_sidebar_file(),
        }
    }
}

impl Default for TocSettings {
    fn default() -> Self {
        Self {
            start_marker: default_toc_start_marker(),
            end_marker: default_toc_end_marker(),
            first_section_number: default_first_section_number(),
            max_level: default_toc_max_level(),
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            catch_all_heading: default_catch_all_heading(),
            deprecated_mark: default_deprecated_mark(),
            outline_title: default_outline_title(),
            sidebar_collapse_depth: default_sidebar_collapse_depth(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            incremental_threshold_percent: default_incremental_threshold_percent(),
            batch_size: default_batch_size(),
            debounce_ms: default_debounce_ms(),
            min_update_interval_ms: default_min_update_interval_ms(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            layout: LayoutSettings::default(),
            toc: TocSettings::default(),
            index: IndexSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn toc_markers(&self) -> TocMarkers {
        TocMarkers::new(&self.toc.start_marker, &self.toc.end_marker)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.sync.debounce_ms)
    }

    pub fn min_update_interval(&self) -> Duration {
        Duration::from_millis(self.sync.min_update_interval_ms)
    }

    pub fn batch_size(&self) -> usize {
        self.sync.batch_size.max(1)
    }

    pub fn notes_root(&self, root: &Path) -> PathBuf {
        root.join(&self.layout.notes_dir)
    }

    pub fn index_path(&self, root: &Path) -> PathBuf {
        root.join(&self.layout.index_file)
    }

    pub fn outline_path(&self, root: &Path) -> PathBuf {
        root.join(&self.layout.outline_file)
    }

    pub fn sidebar_path(&self, root: &Path) -> PathBuf {
        root.join(&self.layout.sidebar_file)
    }
}

pub fn settings_path(root: &Path) -> PathBuf {
    root.join(".notebase").join("settings.json")
}

pub fn load_settings(root: &Path) -> Result<EngineSettings> {
    load_settings_from_path(&settings_path(root))
}

fn load_settings_from_path(path: &Path) -> Result<EngineSettings> {
    if !path.exists() {
        return Ok(EngineSettings::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("read settings file: {}", path.display()))?;
    let settings: EngineSettings = serde_json::from_str(&raw)
        .with_context(|| format!("parse settings file: {}", path.display()))?;
    Ok(settings)
}

const fn default_schema_version() -> u32 {
    1
}

fn default_notes_dir() -> String {
    "notes".to_string()
}

fn default_index_file() -> String {
    "README.md".to_string()
}

fn default_note_doc_file() -> String {
    "README.md".to_string()
}

fn default_note_meta_file() -> String {
    "note.json".to_string()
}

fn default_outline_file() -> String {
    "OUTLINE.md".to_string()
}

fn default_sidebar_file() -> String {
    "sidebar.json".to_string()
}

fn default_toc_start_marker() -> String {
    "<!-- TOC:start -->".to_string()
}

fn default_toc_end_marker() -> String {
    "<!-- TOC:end -->".to_string()
}

const fn default_first_section_number() -> u32 {
    2
}

const fn default_toc_max_level() -> u8 {
    3
}

fn default_catch_all_heading() -> String {
    "## Uncategorized".to_string()
}

fn default_deprecated_mark() -> String {
    "(deprecated)".to_string()
}

fn default_outline_title() -> String {
    "Outline".to_string()
}

const fn default_sidebar_collapse_depth() -> usize {
    1
}

const fn default_incremental_threshold_percent() -> u32 {
    30
}

const fn default_batch_size() -> usize {
    10
}

const fn default_debounce_ms() -> u64 {
    500
}

const fn default_min_update_interval_ms() -> u64 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(dir.path()).expect("load defaults");
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.sync.incremental_threshold_percent, 30);
        assert_eq!(settings.batch_size(), 10);
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = settings_path(dir.path());
        fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
        fs::write(
            &path,
            r#"{ "layout": { "notes_dir": "topics" }, "sync": { "debounce_ms": 50 } }"#,
        )
        .expect("write settings");

        let settings = load_settings(dir.path()).expect("load settings");
        assert_eq!(settings.layout.notes_dir, "topics");
        assert_eq!(settings.layout.note_meta_file, "note.json");
        assert_eq!(settings.debounce(), Duration::from_millis(50));
        assert_eq!(settings.sync.min_update_interval_ms, 2000);
        assert_eq!(settings.toc.first_section_number, 2);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = settings_path(dir.path());
        fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
        fs::write(&path, "{ not json").expect("write settings");

        let err = load_settings(dir.path()).expect_err("malformed settings");
        assert!(format!("{err:#}").contains("parse settings file"));
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let mut settings = EngineSettings::default();
        settings.sync.batch_size = 0;
        assert_eq!(settings.batch_size(), 1);
    }
}
