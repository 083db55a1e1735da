use crate::error::EngineError;
use crate::history::HistoryProvider;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

pub const FIELD_STABLE_ID: &str = "stableId";
const FIELD_CREATED_AT: &str = "createdAt";
const FIELD_UPDATED_AT: &str = "updatedAt";

/// Optional fields with the value written when a record lacks them.
fn optional_field_defaults() -> [(&'static str, Value); 8] {
    [
        ("done", Value::Bool(false)),
        ("deprecated", Value::Bool(false)),
        ("enableDiscussions", Value::Bool(false)),
        ("category", Value::Null),
        ("description", Value::Null),
        ("videoRefs", Value::Array(Vec::new())),
        ("crossRepoRefs", Value::Array(Vec::new())),
        ("articleRefs", Value::Array(Vec::new())),
    ]
}

/// Per-note metadata record. Field declaration order is the canonical order
/// on disk; unknown fields are kept and written after the known ones.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteConfig {
    pub stable_id: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub enable_discussions: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub video_refs: Vec<String>,
    #[serde(default)]
    pub cross_repo_refs: Vec<String>,
    #[serde(default)]
    pub article_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NoteConfig {
    pub fn new(stable_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            stable_id: stable_id.into(),
            done: false,
            deprecated: false,
            enable_discussions: false,
            category: None,
            description: None,
            video_refs: Vec::new(),
            cross_repo_refs: Vec::new(),
            article_refs: Vec::new(),
            created_at: Some(now_ms),
            updated_at: Some(now_ms),
            extra: Map::new(),
        }
    }

    pub fn canonical_json(&self) -> serde_json::Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }

    pub fn has_references(&self) -> bool {
        !(self.video_refs.is_empty() && self.cross_repo_refs.is_empty() && self.article_refs.is_empty())
    }
}

/// Partial update applied through the index cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub done: Option<bool>,
    pub deprecated: Option<bool>,
    pub enable_discussions: Option<bool>,
    pub category: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub video_refs: Option<Vec<String>>,
    pub cross_repo_refs: Option<Vec<String>>,
    pub article_refs: Option<Vec<String>>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merges the patch into `config`; returns whether any field changed.
    pub fn apply(&self, config: &mut NoteConfig) -> bool {
        let before = config.clone();
        if let Some(v) = self.done {
            config.done = v;
        }
        if let Some(v) = self.deprecated {
            config.deprecated = v;
        }
        if let Some(v) = self.enable_discussions {
            config.enable_discussions = v;
        }
        if let Some(v) = &self.category {
            config.category = v.clone();
        }
        if let Some(v) = &self.description {
            config.description = v.clone();
        }
        if let Some(v) = &self.video_refs {
            config.video_refs = v.clone();
        }
        if let Some(v) = &self.cross_repo_refs {
            config.cross_repo_refs = v.clone();
        }
        if let Some(v) = &self.article_refs {
            config.article_refs = v.clone();
        }
        *config != before
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepairOptions {
    /// Overwrite existing timestamps whenever history has data for the note.
    pub refresh_timestamps: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RepairOutcome {
    pub config: NoteConfig,
    pub canonical: String,
    /// The canonical text differs from the input and must be written back.
    pub changed: bool,
    pub filled_defaults: Vec<&'static str>,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn generate_stable_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Parses a record without repairing it.
pub fn parse_config(raw: &str, path: &Path) -> Result<NoteConfig, EngineError> {
    let map = parse_object(raw, path)?;
    require_stable_id(&map, path)?;
    from_map(map, path)
}

/// Validates a record, inserts defaults for absent optional fields, back-fills
/// timestamps from history of `doc_path` and canonicalizes field order.
///
/// Re-running on the returned canonical text yields `changed == false`.
pub fn repair_config(
    raw: &str,
    path: &Path,
    doc_path: &Path,
    history: &dyn HistoryProvider,
    options: RepairOptions,
    now_ms: i64,
) -> Result<RepairOutcome, EngineError> {
    let mut map = parse_object(raw, path)?;
    require_stable_id(&map, path)?;

    let mut filled_defaults = Vec::new();
    for (field, default) in optional_field_defaults() {
        if !map.contains_key(field) {
            map.insert(field.to_string(), default);
            filled_defaults.push(field);
        }
    }

    let needs_created = options.refresh_timestamps || !map.contains_key(FIELD_CREATED_AT);
    let needs_updated = options.refresh_timestamps || !map.contains_key(FIELD_UPDATED_AT);
    if needs_created {
        match history.first_commit_time(doc_path) {
            Some(ts) => {
                map.insert(FIELD_CREATED_AT.to_string(), Value::from(ts));
            }
            None if !map.contains_key(FIELD_CREATED_AT) => {
                map.insert(FIELD_CREATED_AT.to_string(), Value::from(now_ms));
            }
            None => {}
        }
    }
    if needs_updated {
        match history.last_commit_time(doc_path) {
            Some(ts) => {
                map.insert(FIELD_UPDATED_AT.to_string(), Value::from(ts));
            }
            None if !map.contains_key(FIELD_UPDATED_AT) => {
                map.insert(FIELD_UPDATED_AT.to_string(), Value::from(now_ms));
            }
            None => {}
        }
    }

    let config = from_map(map, path)?;
    let canonical = config
        .canonical_json()
        .map_err(|err| malformed(path, err.to_string()))?;
    let changed = canonical != raw;

    Ok(RepairOutcome {
        config,
        canonical,
        changed,
        filled_defaults,
    })
}

fn parse_object(raw: &str, path: &Path) -> Result<Map<String, Value>, EngineError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(malformed(path, "expected a JSON object".to_string())),
        Err(err) => Err(malformed(path, err.to_string())),
    }
}

fn require_stable_id(map: &Map<String, Value>, path: &Path) -> Result<(), EngineError> {
    let present = map
        .get(FIELD_STABLE_ID)
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty());
    if present {
        Ok(())
    } else {
        Err(EngineError::MissingStableId {
            path: path.display().to_string(),
        })
    }
}

fn from_map(map: Map<String, Value>, path: &Path) -> Result<NoteConfig, EngineError> {
    serde_json::from_value(Value::Object(map)).map_err(|err| malformed(path, err.to_string()))
}

fn malformed(path: &Path, message: String) -> EngineError {
    EngineError::MalformedConfig {
        path: path.display().to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct FixedHistory {
        first: Option<i64>,
        last: Option<i64>,
    }

    impl HistoryProvider for FixedHistory {
        fn first_commit_time(&self, _path: &Path) -> Option<i64> {
            self.first
        }

        fn last_commit_time(&self, _path: &Path) -> Option<i64> {
            self.last
        }

        fn changed_paths_since(&self, _rev: &str) -> Vec<PathBuf> {
            Vec::new()
        }
    }

    fn meta_path() -> PathBuf {
        PathBuf::from("notes/0001. A/note.json")
    }

    fn doc_path() -> PathBuf {
        PathBuf::from("notes/0001. A/README.md")
    }

    #[test]
    fn repair_fills_defaults_and_history_timestamps() {
        let history = FixedHistory {
            first: Some(1_000),
            last: Some(5_000),
        };
        let raw = r#"{"stableId":"u-1","done":true}"#;
        let outcome = repair_config(
            raw,
            &meta_path(),
            &doc_path(),
            &history,
            RepairOptions::default(),
            99_000,
        )
        .expect("repair");

        assert!(outcome.changed);
        assert!(outcome.config.done);
        assert_eq!(outcome.config.created_at, Some(1_000));
        assert_eq!(outcome.config.updated_at, Some(5_000));
        assert_eq!(
            outcome.filled_defaults,
            vec![
                "deprecated",
                "enableDiscussions",
                "category",
                "description",
                "videoRefs",
                "crossRepoRefs",
                "articleRefs"
            ]
        );
    }

    #[test]
    fn repair_falls_back_to_wall_clock_without_history() {
        let history = FixedHistory {
            first: None,
            last: None,
        };
        let outcome = repair_config(
            r#"{"stableId":"u-1"}"#,
            &meta_path(),
            &doc_path(),
            &history,
            RepairOptions::default(),
            42,
        )
        .expect("repair");
        assert_eq!(outcome.config.created_at, Some(42));
        assert_eq!(outcome.config.updated_at, Some(42));
    }

    #[test]
    fn repair_is_idempotent() {
        let history = FixedHistory {
            first: Some(1_000),
            last: Some(2_000),
        };
        let raw = r#"{"articleRefs":["https://a.dev"],"custom":{"k":1},"stableId":"u-1"}"#;
        let first = repair_config(
            raw,
            &meta_path(),
            &doc_path(),
            &history,
            RepairOptions::default(),
            7,
        )
        .expect("first pass");
        let second = repair_config(
            &first.canonical,
            &meta_path(),
            &doc_path(),
            &history,
            RepairOptions::default(),
            8,
        )
        .expect("second pass");

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(first.canonical, second.canonical);
        assert!(second.filled_defaults.is_empty());
    }

    #[test]
    fn canonical_order_puts_identity_first_and_unknown_fields_last() {
        let history = FixedHistory {
            first: None,
            last: None,
        };
        let raw = r#"{"zeta":true,"updatedAt":2,"createdAt":1,"stableId":"u-1"}"#;
        let outcome = repair_config(
            raw,
            &meta_path(),
            &doc_path(),
            &history,
            RepairOptions::default(),
            0,
        )
        .expect("repair");

        let text = &outcome.canonical;
        let pos = |needle: &str| text.find(needle).expect(needle);
        assert!(pos("\"stableId\"") < pos("\"done\""));
        assert!(pos("\"articleRefs\"") < pos("\"createdAt\""));
        assert!(pos("\"createdAt\"") < pos("\"updatedAt\""));
        assert!(pos("\"updatedAt\"") < pos("\"zeta\""));
        assert_eq!(outcome.config.created_at, Some(1));
    }

    #[test]
    fn refresh_replaces_existing_timestamps_only_when_history_has_data() {
        let raw = r#"{"stableId":"u-1","createdAt":1,"updatedAt":2}"#;
        let options = RepairOptions {
            refresh_timestamps: true,
        };

        let with_history = FixedHistory {
            first: Some(10),
            last: Some(20),
        };
        let outcome =
            repair_config(raw, &meta_path(), &doc_path(), &with_history, options, 99).expect("repair");
        assert_eq!(outcome.config.created_at, Some(10));
        assert_eq!(outcome.config.updated_at, Some(20));

        let without_history = FixedHistory {
            first: None,
            last: None,
        };
        let outcome = repair_config(raw, &meta_path(), &doc_path(), &without_history, options, 99)
            .expect("repair");
        assert_eq!(outcome.config.created_at, Some(1));
        assert_eq!(outcome.config.updated_at, Some(2));
    }

    #[test]
    fn missing_stable_id_is_fatal_and_garbage_is_malformed() {
        let history = FixedHistory {
            first: None,
            last: None,
        };
        let err = repair_config(
            r#"{"done":true}"#,
            &meta_path(),
            &doc_path(),
            &history,
            RepairOptions::default(),
            0,
        )
        .expect_err("missing stable id");
        assert!(matches!(err, EngineError::MissingStableId { .. }));
        assert!(err.is_fatal());

        let err = parse_config("{not json", &meta_path()).expect_err("malformed");
        assert!(matches!(err, EngineError::MalformedConfig { .. }));
        assert!(!err.is_fatal());

        let err = parse_config(r#"{"stableId":"u","done":"yes"}"#, &meta_path())
            .expect_err("wrong type");
        assert!(matches!(err, EngineError::MalformedConfig { .. }));
    }

    #[test]
    fn patch_merges_only_given_fields() {
        let mut config = NoteConfig::new("u-1", 0);
        config.category = Some("arrays".to_string());
        let patch = ConfigPatch {
            done: Some(true),
            ..ConfigPatch::default()
        };
        assert!(patch.apply(&mut config));
        assert!(config.done);
        assert_eq!(config.category.as_deref(), Some("arrays"));
        assert!(!patch.apply(&mut config));
    }
}
