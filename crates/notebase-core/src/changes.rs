//! Decides between a targeted update and a full rebuild for a set of changed
//! paths.

use crate::cache::NoteIndex;
use crate::note_config::NoteConfig;
use crate::notes::{NoteManager, NoteRecord, PathRole};
use crate::paths::parse_note_folder;
use anyhow::Result;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// How far a change reaches. Ordered so the widest scope wins with `max`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeScope {
    /// Nothing derived from the note changes (timestamps only).
    #[default]
    Unchanged,
    /// Only the note's own TOC region needs recompiling.
    Local,
    /// The master index, outline and sidebar must be rebuilt too.
    Global,
}

/// Changed paths collected by the watcher or read from history.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub paths: BTreeSet<PathBuf>,
    /// The watcher lost events; nothing about the tree can be assumed.
    pub rescan: bool,
}

impl ChangeSet {
    pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
            rescan: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && !self.rescan
    }

    pub fn merge(&mut self, other: ChangeSet) {
        self.paths.extend(other.paths);
        self.rescan |= other.rescan;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdatePlan {
    Nothing,
    Local { ids: BTreeSet<String> },
    Full { reason: String },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeAnalysis {
    pub affected: BTreeSet<String>,
    pub scope: ChangeScope,
    /// Set when notes appeared, disappeared or moved, or the index changed.
    pub structural: Option<String>,
    /// Freshly read metadata to store in the cache before updating.
    pub refreshed: Vec<(String, Option<NoteConfig>)>,
}

impl ChangeAnalysis {
    /// Local updates only when nothing is global or structural and fewer than
    /// `threshold_percent` of all notes are affected.
    pub fn plan(&self, total_notes: usize, threshold_percent: u32) -> UpdatePlan {
        if let Some(reason) = &self.structural {
            return UpdatePlan::Full {
                reason: reason.clone(),
            };
        }
        if self.affected.is_empty() {
            return UpdatePlan::Nothing;
        }
        if self.scope == ChangeScope::Global {
            return UpdatePlan::Full {
                reason: "status or grouping of a note changed".to_string(),
            };
        }
        if self.affected.len() * 100 < threshold_percent as usize * total_notes {
            return UpdatePlan::Local {
                ids: self.affected.clone(),
            };
        }
        UpdatePlan::Full {
            reason: format!(
                "{} of {} notes changed",
                self.affected.len(),
                total_notes
            ),
        }
    }
}

/// Compares two versions of a note's metadata.
///
/// Reference lists are local; timestamps have no effect; every other field,
/// including ones this version does not know, is global.
pub fn classify_config_change(old: Option<&NoteConfig>, new: Option<&NoteConfig>) -> ChangeScope {
    let (old, new) = match (old, new) {
        (None, None) => return ChangeScope::Unchanged,
        (Some(old), Some(new)) => (old, new),
        _ => return ChangeScope::Global,
    };

    let global = old.stable_id != new.stable_id
        || old.done != new.done
        || old.deprecated != new.deprecated
        || old.category != new.category
        || old.enable_discussions != new.enable_discussions
        || old.description != new.description
        || old.extra != new.extra;
    if global {
        return ChangeScope::Global;
    }

    let local = old.video_refs != new.video_refs
        || old.cross_repo_refs != new.cross_repo_refs
        || old.article_refs != new.article_refs;
    if local {
        ChangeScope::Local
    } else {
        ChangeScope::Unchanged
    }
}

/// Sorts changed paths into note documents and metadata records, re-reads the
/// changed metadata and compares it with the cached copy.
pub fn analyze_changes(
    changes: &ChangeSet,
    manager: &NoteManager,
    index: &NoteIndex,
) -> Result<ChangeAnalysis> {
    let mut analysis = ChangeAnalysis::default();
    if changes.rescan {
        analysis.structural = Some("file watcher requested a rescan".to_string());
        return Ok(analysis);
    }

    for path in &changes.paths {
        match manager.path_role(path) {
            PathRole::Unrelated => {}
            PathRole::MasterIndex => {
                analysis.structural = Some("master index changed".to_string());
            }
            PathRole::NoteFolder { folder } => {
                let known = known_record(index, &folder).is_some();
                if !known || !manager.notes_root().join(&folder).is_dir() {
                    analysis.structural = Some(format!("note folder {folder} added, removed or renamed"));
                }
            }
            PathRole::NoteDocument { folder } => match known_record(index, &folder) {
                Some(record) if record.doc_path.is_file() => {
                    tracing::debug!(id = %record.id, "note document changed");
                    analysis.affected.insert(record.id.clone());
                    analysis.scope = analysis.scope.max(ChangeScope::Local);
                }
                _ => {
                    analysis.structural = Some(format!("note document in {folder} appeared or disappeared"));
                }
            },
            PathRole::NoteMetadata { folder } => {
                let Some(record) = known_record(index, &folder) else {
                    analysis.structural = Some(format!("metadata for unknown note folder {folder}"));
                    continue;
                };
                let fresh = manager.load_config(&record.metadata_path)?;
                let scope = classify_config_change(record.config.as_ref(), fresh.as_ref());
                tracing::debug!(id = %record.id, ?scope, "note metadata changed");
                if scope != ChangeScope::Unchanged {
                    analysis.affected.insert(record.id.clone());
                    analysis.scope = analysis.scope.max(scope);
                }
                analysis.refreshed.push((record.id.clone(), fresh));
            }
        }
    }
    Ok(analysis)
}

fn known_record<'a>(index: &'a NoteIndex, folder: &str) -> Option<&'a NoteRecord> {
    let (id, _) = parse_note_folder(folder)?;
    index.get_by_id(id).filter(|r| r.folder_name == folder)
}
