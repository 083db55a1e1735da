//! Composition root: owns the settings, the note index and the history
//! provider, and runs every update pass.

use crate::batch::{run_batched, tally, BatchReport};
use crate::cache::NoteIndex;
use crate::changes::{analyze_changes, classify_config_change, ChangeScope, ChangeSet, UpdatePlan};
use crate::classify::{classify_line, LineKind};
use crate::error::{is_fatal_error, EngineError};
use crate::history::HistoryProvider;
use crate::master_index::{index_outline, reconcile, renumber_references, ReconcileOptions};
use crate::note_config::{now_millis, repair_config, ConfigPatch, RepairOptions};
use crate::notes::{NoteManager, NoteRecord};
use crate::outline::render_outline;
use crate::paths::{note_folder_name, parse_note_folder, write_atomic, write_if_changed};
use crate::settings::EngineSettings;
use crate::sidebar::{build_tree, render_sidebar_json};
use crate::toc::{compile, TocOptions};
use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

const DEFAULT_INDEX_TITLE: &str = "Notes";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebuildReport {
    pub plan: UpdatePlan,
    pub notes: BatchReport,
    /// Every file this pass rewrote, for the watcher to ignore.
    pub written: Vec<PathBuf>,
    pub orphans: Vec<String>,
    pub dropped: Vec<String>,
}

impl RebuildReport {
    fn new(plan: UpdatePlan) -> Self {
        Self {
            plan,
            notes: BatchReport::default(),
            written: Vec::new(),
            orphans: Vec::new(),
            dropped: Vec::new(),
        }
    }

    fn absorb_views(&mut self, views: ViewReport) {
        self.written.extend(views.written);
        self.orphans = views.orphans;
        self.dropped = views.dropped;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewReport {
    pub written: Vec<PathBuf>,
    pub orphans: Vec<String>,
    pub dropped: Vec<String>,
}

pub struct Engine {
    root: PathBuf,
    settings: EngineSettings,
    manager: NoteManager,
    index: NoteIndex,
    history: Box<dyn HistoryProvider>,
}

impl Engine {
    /// Scans the notes folder and builds the index. Duplicate ids, duplicate
    /// stable ids and records without a stable id abort here.
    pub fn open(
        root: impl AsRef<Path>,
        settings: EngineSettings,
        history: Box<dyn HistoryProvider>,
    ) -> Result<Self> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root)
            .with_context(|| format!("resolve knowledge base root: {}", root.display()))?;
        let manager = NoteManager::open(&root, &settings)?;

        let mut index = NoteIndex::empty();
        index.initialize(manager.scan()?)?;
        tracing::info!(root = %root.display(), notes = index.note_count(), "note index loaded");

        Ok(Self {
            root,
            settings,
            manager,
            index,
            history,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn index(&self) -> &NoteIndex {
        &self.index
    }

    pub fn manager(&self) -> &NoteManager {
        &self.manager
    }

    fn toc_options(&self) -> TocOptions {
        TocOptions::from_settings(&self.settings)
    }

    /// Repairs every metadata record in bounded batches. A fatal record stops
    /// the run; other failures are counted.
    pub fn validate_all(&mut self, options: RepairOptions) -> Result<BatchReport> {
        let records = self
            .index
            .records_sorted()
            .into_iter()
            .filter(|r| r.metadata_path.is_file())
            .cloned()
            .collect::<Vec<_>>();
        let names = records.iter().map(|r| r.folder_name.clone()).collect::<Vec<_>>();
        let history = &*self.history;
        let now = now_millis();

        let mut results = run_batched(&records, self.settings.batch_size(), |record| {
            let raw = std::fs::read_to_string(&record.metadata_path)
                .with_context(|| format!("read {}", record.metadata_path.display()))?;
            let outcome = repair_config(
                &raw,
                &record.metadata_path,
                &record.doc_path,
                history,
                options,
                now,
            )?;
            if outcome.changed {
                write_atomic(&record.metadata_path, &outcome.canonical)?;
                tracing::info!(
                    id = %record.id,
                    filled = ?outcome.filled_defaults,
                    "metadata record repaired"
                );
            }
            Ok((record.id.clone(), outcome.config))
        });

        if let Some(pos) = results
            .iter()
            .position(|r| matches!(r, Err(err) if is_fatal_error(err)))
        {
            if let Err(err) = results.swap_remove(pos) {
                return Err(err);
            }
        }

        let (report, configs) = tally(&names, results);
        for (id, config) in configs {
            self.index.set_config(&id, config)?;
        }
        tracing::info!(
            ok = report.succeeded,
            failed = report.failed_count(),
            "metadata validation finished"
        );
        Ok(report)
    }

    /// Rescans every note, recompiles every note document and regenerates the
    /// master index, outline and sidebar.
    pub fn full_rebuild(&mut self, reason: &str) -> Result<RebuildReport> {
        tracing::info!(reason, "full rebuild");
        self.index.initialize(self.manager.scan()?)?;

        let mut report = RebuildReport::new(UpdatePlan::Full {
            reason: reason.to_string(),
        });
        let ids = self.index.ids_sorted();
        let (notes, written) = self.update_notes(&ids)?;
        report.notes = notes;
        report.written = written;
        report.absorb_views(self.rebuild_views()?);
        Ok(report)
    }

    /// Recompiles the TOC region of each listed note. Returns the batch counts
    /// and the documents that were rewritten.
    pub fn update_notes(&self, ids: &[String]) -> Result<(BatchReport, Vec<PathBuf>)> {
        let records = ids
            .iter()
            .map(|id| {
                self.index
                    .get_by_id(id)
                    .cloned()
                    .ok_or_else(|| EngineError::UnknownNote { id: id.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let names = records.iter().map(|r| r.folder_name.clone()).collect::<Vec<_>>();
        let options = self.toc_options();

        let results = run_batched(&records, self.settings.batch_size(), |record| {
            compile_note(record, &options)
        });
        let (report, written) = tally(&names, results);
        Ok((report, written.into_iter().flatten().collect()))
    }

    /// Reconciles the master index with the cache, regenerates its TOC and
    /// writes the outline document and the sidebar when they changed.
    pub fn rebuild_views(&self) -> Result<ViewReport> {
        let index_path = self.settings.index_path(&self.root);
        let markers = self.settings.toc_markers();
        let text = match std::fs::read_to_string(&index_path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %index_path.display(), "creating master index");
                format!("# {DEFAULT_INDEX_TITLE}\n\n{}\n{}\n", markers.start, markers.end)
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", index_path.display()))
            }
        };

        let reconciled = reconcile(&text, &self.index, &ReconcileOptions::from_settings(&self.settings));
        let compiled = compile(&reconciled.text, None, &self.toc_options());

        let mut views = ViewReport {
            written: Vec::new(),
            orphans: reconciled.orphans,
            dropped: reconciled.dropped,
        };
        if write_if_changed(&index_path, &compiled.text)? {
            views.written.push(index_path);
        }

        let mark = &self.settings.index.deprecated_mark;
        let outline = index_outline(&compiled.text, &markers, mark);

        let outline_path = self.settings.outline_path(&self.root);
        let outline_doc = render_outline(&self.settings.index.outline_title, &outline, mark);
        if write_if_changed(&outline_path, &outline_doc)? {
            views.written.push(outline_path);
        }

        let tree = build_tree(&outline, self.settings.index.sidebar_collapse_depth);
        let sidebar_path = self.settings.sidebar_path(&self.root);
        let json = render_sidebar_json(&tree).context("serialize sidebar")?;
        if write_if_changed(&sidebar_path, &json)? {
            views.written.push(sidebar_path);
        }

        tracing::debug!(written = views.written.len(), "views rebuilt");
        Ok(views)
    }

    /// Picks local or full updates for a set of changed paths and runs them.
    pub fn apply_changes(&mut self, changes: &ChangeSet) -> Result<RebuildReport> {
        let analysis = analyze_changes(changes, &self.manager, &self.index)?;
        for (id, config) in analysis.refreshed.iter().cloned() {
            if let Some(mut record) = self.index.get_by_id(&id).cloned() {
                record.config = config;
                self.index.upsert(record)?;
            }
        }

        let plan = analysis.plan(
            self.index.note_count(),
            self.settings.sync.incremental_threshold_percent,
        );
        match plan {
            UpdatePlan::Nothing => {
                tracing::debug!("no derived document affected");
                Ok(RebuildReport::new(UpdatePlan::Nothing))
            }
            UpdatePlan::Local { ids } => {
                tracing::info!(notes = ids.len(), "local update");
                let ids = ids.into_iter().collect::<Vec<_>>();
                let (notes, written) = self.update_notes(&ids)?;
                let mut report = RebuildReport::new(UpdatePlan::Local {
                    ids: ids.into_iter().collect(),
                });
                report.notes = notes;
                report.written = written;
                Ok(report)
            }
            UpdatePlan::Full { reason } => self.full_rebuild(&reason),
        }
    }

    /// Update from the paths version control reports as changed since `rev`.
    pub fn update_since(&mut self, rev: &str) -> Result<RebuildReport> {
        let paths = self
            .history
            .changed_paths_since(rev)
            .into_iter()
            .map(|p| self.root.join(p))
            .collect::<Vec<_>>();
        tracing::info!(rev, paths = paths.len(), "changes since revision");
        self.apply_changes(&ChangeSet::from_paths(paths))
    }

    pub fn create_note(&mut self, title: &str) -> Result<(NoteRecord, RebuildReport)> {
        self.manager.ensure_structure()?;
        let record = self.manager.create_note(title, &self.settings, now_millis())?;
        self.index.add(record.clone())?;

        let report = self.refresh_note(&record.id, ChangeScope::Global)?;
        Ok((record, report))
    }

    /// Applies a metadata patch, persists it and refreshes whatever the change
    /// reaches. The cache only sees the patch once the record is on disk.
    pub fn set_status(&mut self, id: &str, patch: &ConfigPatch) -> Result<RebuildReport> {
        let now = now_millis();
        let Some(config) = self.index.patched_config(id, patch, now)? else {
            tracing::info!(id, "note metadata already up to date");
            return Ok(RebuildReport::new(UpdatePlan::Nothing));
        };
        let record = self
            .index
            .get_by_id(id)
            .ok_or_else(|| EngineError::UnknownNote { id: id.to_string() })?;
        let scope = classify_config_change(record.config.as_ref(), Some(&config));
        let metadata_path = record.metadata_path.clone();

        self.manager.write_config(&metadata_path, &config)?;
        self.index.update_config(id, patch, now)?;
        let mut report = match scope {
            ChangeScope::Unchanged => RebuildReport::new(UpdatePlan::Nothing),
            scope => self.refresh_note(id, scope)?,
        };
        report.written.push(metadata_path);
        Ok(report)
    }

    /// Renames a note folder, keeping its id.
    pub fn rename_note(&mut self, id: &str, title: &str) -> Result<RebuildReport> {
        let record = self
            .index
            .get_by_id(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownNote { id: id.to_string() })?;
        let folder_name = note_folder_name(id, title);
        if folder_name == record.folder_name {
            return Ok(RebuildReport::new(UpdatePlan::Nothing));
        }

        self.manager.rename_folder(&record.folder_name, &folder_name)?;
        self.index.rename_folder(id, &folder_name)?;
        self.retitle(id, &record.folder_name, &folder_name)?;
        tracing::info!(id, from = %record.folder_name, to = %folder_name, "note renamed");
        self.refresh_note(id, ChangeScope::Global)
    }

    /// Moves a note to another numeric id. Its stable id is unchanged.
    pub fn renumber_note(&mut self, id: &str, new_id: &str) -> Result<RebuildReport> {
        let record = self
            .index
            .get_by_id(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownNote { id: id.to_string() })?;
        if !matches!(parse_note_folder(new_id), Some((parsed, "")) if parsed == new_id) {
            anyhow::bail!("note id must be four digits: {new_id}");
        }
        if self.index.contains(new_id) || self.manager.find_folder(new_id)?.is_some() {
            return Err(EngineError::IdTaken {
                id: new_id.to_string(),
            }
            .into());
        }

        let folder_name = note_folder_name(new_id, record.title());
        self.manager.rename_folder(&record.folder_name, &folder_name)?;
        self.index.change_id(id, new_id, &folder_name)?;
        self.retitle(new_id, &record.folder_name, &folder_name)?;

        let index_path = self.settings.index_path(&self.root);
        if index_path.is_file() {
            let text = std::fs::read_to_string(&index_path)
                .with_context(|| format!("read {}", index_path.display()))?;
            let markers = self.settings.toc_markers();
            write_if_changed(&index_path, &renumber_references(&text, &markers, id, new_id))?;
        }
        tracing::info!(from = id, to = new_id, "note renumbered");
        self.refresh_note(new_id, ChangeScope::Global)
    }

    /// Rewrites the document title when it still shows the old folder name.
    fn retitle(&self, id: &str, old_folder: &str, new_folder: &str) -> Result<()> {
        let Some(record) = self.index.get_by_id(id) else {
            return Ok(());
        };
        let text = std::fs::read_to_string(&record.doc_path)
            .with_context(|| format!("read {}", record.doc_path.display()))?;
        let markers = self.settings.toc_markers();
        let mut changed = false;
        let lines = text
            .split_inclusive('\n')
            .map(|line| {
                let body = line.trim_end_matches(['\n', '\r']);
                match classify_line(body, &markers) {
                    LineKind::Heading { level: 1, text } if !changed && text == old_folder => {
                        changed = true;
                        format!("# {new_folder}{}", &line[body.len()..])
                    }
                    _ => line.to_string(),
                }
            })
            .collect::<String>();
        if changed {
            write_atomic(&record.doc_path, &lines)?;
        }
        Ok(())
    }

    fn refresh_note(&mut self, id: &str, scope: ChangeScope) -> Result<RebuildReport> {
        let ids = [id.to_string()];
        let (notes, written) = self.update_notes(&ids)?;
        let plan = match scope {
            ChangeScope::Global => UpdatePlan::Full {
                reason: format!("note {id} changed status, name or id"),
            },
            _ => UpdatePlan::Local {
                ids: ids.iter().cloned().collect(),
            },
        };
        let mut report = RebuildReport::new(plan);
        report.notes = notes;
        report.written = written;
        if scope == ChangeScope::Global {
            report.absorb_views(self.rebuild_views()?);
        }
        Ok(report)
    }
}

/// Recompiles one note document; returns its path when it was rewritten.
fn compile_note(record: &NoteRecord, options: &TocOptions) -> Result<Option<PathBuf>> {
    let text = std::fs::read_to_string(&record.doc_path)
        .with_context(|| format!("read {}", record.doc_path.display()))?;
    let compiled = compile(&text, record.config.as_ref(), options);
    if compiled.region.is_none() {
        tracing::debug!(id = %record.id, "note has no TOC region, leaving it untouched");
        return Ok(None);
    }
    if !compiled.changed {
        return Ok(None);
    }
    write_atomic(&record.doc_path, &compiled.text)?;
    tracing::debug!(id = %record.id, "note TOC updated");
    Ok(Some(record.doc_path.clone()))
}
