//! Master index reconciliation: status markers, links after renames, dropped
//! references and orphaned notes.

use crate::cache::NoteIndex;
use crate::classify::{
    classify_document, classify_line, escape_label, unescape_label, LineKind, TocMarker, TocMarkers,
};
use crate::markdown::Document;
use crate::notes::NoteRecord;
use crate::numbering::strip_number;
use crate::paths::note_link;
use crate::settings::EngineSettings;
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub markers: TocMarkers,
    pub catch_all_heading: String,
    pub deprecated_mark: String,
    pub notes_dir: String,
    pub doc_file: String,
}

impl ReconcileOptions {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            markers: settings.toc_markers(),
            catch_all_heading: settings.index.catch_all_heading.clone(),
            deprecated_mark: settings.index.deprecated_mark.clone(),
            notes_dir: settings.layout.notes_dir.clone(),
            doc_file: settings.layout.note_doc_file.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileReport {
    pub text: String,
    pub changed: bool,
    /// Ids referenced by the index that no longer exist.
    pub dropped: Vec<String>,
    /// Ids referenced more than once; later occurrences were removed.
    pub duplicates: Vec<String>,
    /// Ids that were missing from the index and appended under the catch-all.
    pub orphans: Vec<String>,
}

/// One heading of the reconciled index and the number of note references
/// directly under it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSection {
    pub level: u8,
    pub text: String,
    pub note_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: String,
    pub text: String,
    pub link: String,
    pub done: bool,
    pub deprecated: bool,
}

/// Flat view of the index that drives the outline document and the sidebar.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexOutline {
    /// References before the first heading.
    pub leading: usize,
    pub sections: Vec<IndexSection>,
    /// Every note reference in document order.
    pub entries: Vec<IndexEntry>,
}

/// Rewrites every note reference from the cache, drops stale or repeated ones
/// and appends notes the index does not mention yet.
///
/// The TOC region is left alone; regenerate it afterwards.
pub fn reconcile(text: &str, index: &NoteIndex, options: &ReconcileOptions) -> ReconcileReport {
    let doc = Document::parse(text);
    let kinds = classify_document(&doc, &options.markers);

    let mut seen = BTreeSet::new();
    let mut dropped = Vec::new();
    let mut duplicates = Vec::new();
    let mut lines = Vec::with_capacity(doc.lines().len());
    let mut out_kinds = Vec::with_capacity(doc.lines().len());

    for (line, kind) in doc.lines().iter().zip(&kinds) {
        let LineKind::NoteReference(reference) = kind else {
            lines.push(line.clone());
            out_kinds.push(LineClass::from(kind));
            continue;
        };
        let Some(record) = index.get_by_id(reference.id) else {
            tracing::warn!(id = reference.id, "dropping index reference to missing note");
            dropped.push(reference.id.to_string());
            continue;
        };
        if !seen.insert(record.id.clone()) {
            tracing::warn!(id = reference.id, "dropping repeated index reference");
            duplicates.push(reference.id.to_string());
            continue;
        }
        let rest = trailing_without_mark(reference.trailing, &options.deprecated_mark);
        lines.push(render_reference(reference.indent, record, &rest, options));
        out_kinds.push(LineClass::Reference);
    }

    let orphans = index
        .ids_sorted()
        .into_iter()
        .filter(|id| !seen.contains(id))
        .collect::<Vec<_>>();
    if !orphans.is_empty() {
        let orphan_lines = orphans
            .iter()
            .filter_map(|id| index.get_by_id(id))
            .map(|record| {
                tracing::warn!(
                    id = %record.id,
                    folder = %record.folder_name,
                    heading = %options.catch_all_heading,
                    "note missing from the master index, adding it under the catch-all heading"
                );
                render_reference("", record, "", options)
            })
            .collect::<Vec<_>>();
        insert_orphans(&mut lines, &out_kinds, orphan_lines, options);
    }

    let mut out = doc.clone();
    out.replace_lines(lines);
    let rendered = out.render();
    let rendered = if doc.lines().is_empty() {
        ensure_trailing_newline(rendered)
    } else {
        rendered
    };

    ReconcileReport {
        changed: rendered != text,
        text: rendered,
        dropped,
        duplicates,
        orphans,
    }
}

/// Reads headings and note references from a reconciled index. Lines inside
/// the TOC region are ignored.
pub fn index_outline(text: &str, markers: &TocMarkers, deprecated_mark: &str) -> IndexOutline {
    let doc = Document::parse(text);
    let kinds = classify_document(&doc, markers);
    let mut outline = IndexOutline::default();
    let mut in_region = false;

    for kind in &kinds {
        match kind {
            LineKind::TocMarker(marker) => in_region = *marker == TocMarker::Start,
            _ if in_region => {}
            LineKind::Heading { level, text } => outline.sections.push(IndexSection {
                level: *level,
                text: text.to_string(),
                note_count: 0,
            }),
            LineKind::NoteReference(reference) => {
                match outline.sections.last_mut() {
                    Some(section) => section.note_count += 1,
                    None => outline.leading += 1,
                }
                outline.entries.push(IndexEntry {
                    id: reference.id.to_string(),
                    text: unescape_label(reference.title),
                    link: reference.link.to_string(),
                    done: reference.checked,
                    deprecated: !deprecated_mark.is_empty()
                        && reference.trailing.contains(deprecated_mark),
                });
            }
            LineKind::Other => {}
        }
    }
    outline
}

/// Points references to `old_id` at `new_id` in place, so a renumbered note
/// keeps its position in the index. Title and link are fixed by [`reconcile`].
pub fn renumber_references(text: &str, markers: &TocMarkers, old_id: &str, new_id: &str) -> String {
    let mut doc = Document::parse(text);
    let kinds = classify_document(&doc, markers);
    let lines = doc
        .lines()
        .iter()
        .zip(&kinds)
        .map(|(line, kind)| match kind {
            LineKind::NoteReference(reference) if reference.id == old_id => format!(
                "{}- [{}] [{new_id}{}]({}){}",
                reference.indent,
                if reference.checked { 'x' } else { ' ' },
                &reference.title[reference.id.len()..],
                reference.link,
                reference.trailing
            ),
            _ => line.clone(),
        })
        .collect::<Vec<_>>();
    doc.replace_lines(lines);
    doc.render()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineClass {
    Heading(u8),
    Reference,
    Other,
}

impl From<&LineKind<'_>> for LineClass {
    fn from(kind: &LineKind<'_>) -> Self {
        match kind {
            LineKind::Heading { level, .. } => Self::Heading(*level),
            LineKind::NoteReference(_) => Self::Reference,
            _ => Self::Other,
        }
    }
}

fn trailing_without_mark(trailing: &str, mark: &str) -> String {
    if mark.is_empty() {
        return trailing.trim_end().to_string();
    }
    trailing.replace(mark, "").trim_end().to_string()
}

fn render_reference(indent: &str, record: &NoteRecord, rest: &str, options: &ReconcileOptions) -> String {
    let config = record.config.as_ref();
    let deprecated = config.is_some_and(|c| c.deprecated);
    let done = !deprecated && config.is_some_and(|c| c.done);
    let mark = if done { 'x' } else { ' ' };
    let link = note_link(&options.notes_dir, &record.folder_name, &options.doc_file);

    let label = escape_label(&record.folder_name);
    let mut line = format!("{indent}- [{mark}] [{label}]({link}){rest}");
    if deprecated && !options.deprecated_mark.is_empty() {
        line.push(' ');
        line.push_str(&options.deprecated_mark);
    }
    line
}

/// Puts orphan lines after the last entry of the catch-all section, creating
/// the section at the end of the document when it does not exist.
fn insert_orphans(
    lines: &mut Vec<String>,
    classes: &[LineClass],
    orphan_lines: Vec<String>,
    options: &ReconcileOptions,
) {
    let (catch_level, catch_text) = match classify_line(&options.catch_all_heading, &options.markers) {
        LineKind::Heading { level, text } => (level, strip_number(text).to_string()),
        _ => (2, options.catch_all_heading.trim().to_string()),
    };

    let existing = classes.iter().enumerate().find_map(|(ix, class)| match class {
        LineClass::Heading(level) if *level == catch_level => {
            let text = match classify_line(&lines[ix], &options.markers) {
                LineKind::Heading { text, .. } => strip_number(text).to_string(),
                _ => String::new(),
            };
            (text == catch_text).then_some(ix)
        }
        _ => None,
    });

    match existing {
        Some(heading_ix) => {
            let section_end = classes[heading_ix + 1..]
                .iter()
                .position(|class| matches!(class, LineClass::Heading(level) if *level <= catch_level))
                .map_or(lines.len(), |offset| heading_ix + 1 + offset);
            let last_content = (heading_ix + 1..section_end)
                .rev()
                .find(|ix| !lines[*ix].trim().is_empty());
            match last_content {
                Some(ix) => {
                    lines.splice(ix + 1..ix + 1, orphan_lines);
                }
                None => {
                    let mut block = vec![String::new()];
                    block.extend(orphan_lines);
                    lines.splice(heading_ix + 1..heading_ix + 1, block);
                }
            }
        }
        None => {
            while lines.last().is_some_and(|l| l.trim().is_empty()) {
                lines.pop();
            }
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(format!("{} {}", "#".repeat(catch_level as usize), catch_text));
            lines.push(String::new());
            lines.extend(orphan_lines);
        }
    }
}

fn ensure_trailing_newline(mut text: String) -> String {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note_config::NoteConfig;
    use std::path::PathBuf;

    fn record(folder: &str, done: bool, deprecated: bool) -> NoteRecord {
        let mut config = NoteConfig::new(format!("sid-{folder}"), 0);
        config.done = done;
        config.deprecated = deprecated;
        let dir = PathBuf::from("notes").join(folder);
        NoteRecord {
            id: folder[..4].to_string(),
            folder_name: folder.to_string(),
            doc_path: dir.join("README.md"),
            metadata_path: dir.join("note.json"),
            config: Some(config),
        }
    }

    fn index(records: Vec<NoteRecord>) -> NoteIndex {
        let mut index = NoteIndex::empty();
        index.initialize(records).expect("initialize");
        index
    }

    fn options() -> ReconcileOptions {
        ReconcileOptions::from_settings(&EngineSettings::default())
    }

    #[test]
    fn orphan_goes_under_new_catch_all_section() {
        let index = index(vec![record("0001. A", false, false), record("0002. B", false, false)]);
        let text = "# Index\n\n## Arrays\n\n- [ ] [0001. A](notes/0001.%20A/README.md)\n";

        let report = reconcile(text, &index, &options());
        assert_eq!(report.orphans, vec!["0002"]);
        assert_eq!(
            report.text,
            "# Index\n\n## Arrays\n\n- [ ] [0001. A](notes/0001.%20A/README.md)\n\n## Uncategorized\n\n- [ ] [0002. B](notes/0002.%20B/README.md)\n"
        );
        assert_eq!(report.text.matches("0002. B]").count(), 1);

        let again = reconcile(&report.text, &index, &options());
        assert!(!again.changed);
        assert!(again.orphans.is_empty());
    }

    #[test]
    fn orphan_reuses_existing_numbered_catch_all_section() {
        let index = index(vec![
            record("0001. A", false, false),
            record("0002. B", false, false),
            record("0003. C", false, false),
        ]);
        let text = "# Index\n\n## 2. Uncategorized\n\n- [ ] [0001. A](x)\n\n## 3. Later\n\n- [ ] [0002. B](y)\n";

        let report = reconcile(text, &index, &options());
        assert_eq!(
            report.text,
            "# Index\n\n## 2. Uncategorized\n\n- [ ] [0001. A](notes/0001.%20A/README.md)\n- [ ] [0003. C](notes/0003.%20C/README.md)\n\n## 3. Later\n\n- [ ] [0002. B](notes/0002.%20B/README.md)\n"
        );
    }

    #[test]
    fn done_flip_rewrites_marker_and_keeps_link() {
        let text = "- [ ] [0001. A](notes/0001.%20A/README.md)\n";
        let report = reconcile(text, &index(vec![record("0001. A", true, false)]), &options());
        assert_eq!(report.text, "- [x] [0001. A](notes/0001.%20A/README.md)\n");
        assert!(report.changed);
    }

    #[test]
    fn deprecated_wins_over_done_and_adds_suffix() {
        let text = "  * [x] [0001. Old name](notes/0001.%20Old%20name/README.md)\n";
        let report = reconcile(text, &index(vec![record("0001. New name", true, true)]), &options());
        assert_eq!(
            report.text,
            "  - [ ] [0001. New name](notes/0001.%20New%20name/README.md) (deprecated)\n"
        );
        let again = reconcile(&report.text, &index(vec![record("0001. New name", true, true)]), &options());
        assert!(!again.changed);

        let revived = reconcile(&report.text, &index(vec![record("0001. New name", false, false)]), &options());
        assert_eq!(
            revived.text,
            "  - [ ] [0001. New name](notes/0001.%20New%20name/README.md)\n"
        );
    }

    #[test]
    fn drops_missing_and_repeated_references() {
        let index = index(vec![record("0001. A", false, false)]);
        let text = "## S\n- [ ] [0001. A](a)\n- [ ] [0009. Gone](g)\n- [x] [0001. A](a)\n";
        let report = reconcile(text, &index, &options());
        assert_eq!(report.dropped, vec!["0009"]);
        assert_eq!(report.duplicates, vec!["0001"]);
        assert_eq!(report.text, "## S\n- [ ] [0001. A](notes/0001.%20A/README.md)\n");
    }

    #[test]
    fn every_id_appears_exactly_once() {
        let records = (1..=12)
            .map(|n| record(&format!("{n:04}. N{n}"), n % 3 == 0, n % 5 == 0))
            .collect::<Vec<_>>();
        let index = index(records);
        let text = "# I\n## X\n- [ ] [0003. N3](a)\n- [ ] [0003. N3](a)\n- [ ] [0042. Q](q)\n### Y\n- [x] [0007. N7](b)\n";

        let report = reconcile(text, &index, &options());
        let outline = index_outline(&report.text, &options().markers, "(deprecated)");
        let mut ids = outline.entries.iter().map(|e| e.id.clone()).collect::<Vec<_>>();
        ids.sort();
        assert_eq!(ids, index.ids_sorted());
    }

    #[test]
    fn bracketed_folder_name_is_listed_once_and_stable() {
        let index = index(vec![record("0001. Arrays [easy]", false, false)]);
        let text = "# Index\n";

        let first = reconcile(text, &index, &options());
        assert_eq!(first.orphans, vec!["0001"]);
        assert_eq!(
            first.text,
            "# Index\n\n## Uncategorized\n\n- [ ] [0001. Arrays \\[easy\\]](notes/0001.%20Arrays%20%5Beasy%5D/README.md)\n"
        );

        let second = reconcile(&first.text, &index, &options());
        assert!(!second.changed);
        assert!(second.orphans.is_empty());
        assert_eq!(second.text.matches("0001. Arrays").count(), 1);

        let outline = index_outline(&second.text, &options().markers, "(deprecated)");
        assert_eq!(outline.entries.len(), 1);
        assert_eq!(outline.entries[0].text, "0001. Arrays [easy]");
    }

    #[test]
    fn renumbered_reference_keeps_its_place() {
        let text = "## A\n- [x] [0002. Gamma](notes/0002.%20Gamma/README.md)\n- [ ] [0003. C](c)\n";
        let renumbered = renumber_references(text, &options().markers, "0002", "0007");
        assert_eq!(
            renumbered,
            "## A\n- [x] [0007. Gamma](notes/0002.%20Gamma/README.md)\n- [ ] [0003. C](c)\n"
        );

        let index = index(vec![record("0007. Gamma", true, false), record("0003. C", false, false)]);
        let report = reconcile(&renumbered, &index, &options());
        assert!(report.orphans.is_empty());
        assert!(report.text.starts_with("## A\n- [x] [0007. Gamma](notes/0007.%20Gamma/README.md)\n"));
    }

    #[test]
    fn outline_counts_references_per_heading_and_skips_toc_region() {
        let text = "# Index\n<!-- TOC:start -->\n- [2. A](#2-a)\n<!-- TOC:end -->\n- [ ] [0009. Top](t)\n## 2. A\n- [x] [0001. A](a)\n- [ ] [0002. B](b) (deprecated)\n### 2.1. Sub\n## 3. Empty\n";
        let outline = index_outline(text, &options().markers, "(deprecated)");

        assert_eq!(outline.leading, 0);
        let sections = outline
            .sections
            .iter()
            .map(|s| (s.level, s.text.as_str(), s.note_count))
            .collect::<Vec<_>>();
        assert_eq!(
            sections,
            vec![(1, "Index", 1), (2, "2. A", 2), (3, "2.1. Sub", 0), (2, "3. Empty", 0)]
        );
        assert_eq!(outline.entries.len(), 3);
        assert!(outline.entries[1].done);
        assert!(outline.entries[2].deprecated);
        assert!(!outline.entries[1].deprecated);
    }
}
