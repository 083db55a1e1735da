//! TOC region compiler: numbers headings, computes anchors and regenerates the
//! marked region of a document.

use crate::classify::{classify_document, LineKind, TocMarker, TocMarkers};
use crate::markdown::Document;
use crate::note_config::NoteConfig;
use crate::numbering::{NumberingSession, BASE_LEVEL};
use crate::settings::EngineSettings;
use crate::slug::Slugger;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TocOptions {
    pub markers: TocMarkers,
    pub first_section_number: u32,
    /// Deepest heading level that is numbered and listed in the outline.
    pub max_level: u8,
}

impl TocOptions {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            markers: settings.toc_markers(),
            first_section_number: settings.toc.first_section_number,
            max_level: settings.toc.max_level,
        }
    }
}

impl Default for TocOptions {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

/// Line indices of the start and end marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TocRegion {
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Heading {
    pub line: usize,
    pub level: u8,
    pub raw_text: String,
    pub numbered_text: String,
    pub anchor: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledDocument {
    pub text: String,
    pub headings: Vec<Heading>,
    pub region: Option<TocRegion>,
    pub changed: bool,
}

/// Exactly one start marker followed by exactly one end marker.
pub fn find_region(kinds: &[LineKind<'_>]) -> Option<TocRegion> {
    let mut starts = Vec::new();
    let mut ends = Vec::new();
    for (ix, kind) in kinds.iter().enumerate() {
        match kind {
            LineKind::TocMarker(TocMarker::Start) => starts.push(ix),
            LineKind::TocMarker(TocMarker::End) => ends.push(ix),
            _ => {}
        }
    }
    match (starts.as_slice(), ends.as_slice()) {
        ([start], [end]) if start < end => Some(TocRegion {
            start_line: *start,
            end_line: *end,
        }),
        _ => None,
    }
}

/// Numbers and anchors every heading outside `region`, in document order.
///
/// Level-1 headings keep their text but still take part in anchor
/// de-duplication, the way the renderer slugs them.
pub fn collect_headings(
    kinds: &[LineKind<'_>],
    region: Option<TocRegion>,
    options: &TocOptions,
) -> Vec<Heading> {
    let mut session = NumberingSession::new(options.first_section_number, options.max_level);
    let mut slugger = Slugger::new();
    let mut headings = Vec::new();

    for (ix, kind) in kinds.iter().enumerate() {
        if region.is_some_and(|r| ix > r.start_line && ix < r.end_line) {
            continue;
        }
        let LineKind::Heading { level, text } = kind else {
            continue;
        };
        let numbered_text = session.number(*level, text);
        let anchor = slugger.slug(&numbered_text);
        headings.push(Heading {
            line: ix,
            level: *level,
            raw_text: text.to_string(),
            numbered_text,
            anchor,
        });
    }
    headings
}

/// Rewrites headings with their numbers and regenerates the TOC region.
///
/// A document without a well-formed region is returned untouched.
pub fn compile(text: &str, config: Option<&NoteConfig>, options: &TocOptions) -> CompiledDocument {
    let doc = Document::parse(text);
    let kinds = classify_document(&doc, &options.markers);
    let Some(region) = find_region(&kinds) else {
        return CompiledDocument {
            text: text.to_string(),
            headings: Vec::new(),
            region: None,
            changed: false,
        };
    };

    let headings = collect_headings(&kinds, Some(region), options);
    let body = render_region_body(config, &headings, options.max_level);

    let source = doc.lines();
    let mut lines = Vec::with_capacity(source.len() + body.len());
    let mut next_heading = headings.iter().peekable();
    for (ix, line) in source.iter().enumerate() {
        if ix > region.start_line && ix < region.end_line {
            continue;
        }
        match next_heading.next_if(|h| h.line == ix) {
            Some(heading) if heading.level >= BASE_LEVEL => {
                lines.push(render_heading_line(heading));
            }
            _ => lines.push(line.clone()),
        }
        if ix == region.start_line {
            lines.extend(body.iter().cloned());
        }
    }

    let mut out_doc = doc.clone();
    out_doc.replace_lines(lines);
    let rendered = out_doc.render();
    let changed = rendered != text;

    let new_region = TocRegion {
        start_line: region.start_line,
        end_line: region.start_line + body.len() + 1,
    };
    let shift = new_region.end_line as isize - region.end_line as isize;
    let headings = headings
        .into_iter()
        .map(|mut h| {
            if h.line > region.end_line {
                h.line = (h.line as isize + shift) as usize;
            }
            h
        })
        .collect();

    CompiledDocument {
        text: rendered,
        headings,
        region: Some(new_region),
        changed,
    }
}

fn render_heading_line(heading: &Heading) -> String {
    format!(
        "{} {}",
        "#".repeat(heading.level as usize),
        heading.numbered_text
    )
}

/// Lines placed strictly between the markers: reference groups, then the
/// outline, separated and framed by blank lines.
fn render_region_body(config: Option<&NoteConfig>, headings: &[Heading], max_level: u8) -> Vec<String> {
    let mut blocks: Vec<Vec<String>> = Vec::new();

    if let Some(config) = config.filter(|c| c.has_references()) {
        let groups = [
            ("Videos", &config.video_refs),
            ("Related repositories", &config.cross_repo_refs),
            ("Articles", &config.article_refs),
        ];
        for (label, refs) in groups {
            if refs.is_empty() {
                continue;
            }
            let mut block = vec![format!("**{label}**"), String::new()];
            block.extend(refs.iter().map(|r| format!("- {}", render_reference(r))));
            blocks.push(block);
        }
    }

    let outline = headings
        .iter()
        .filter(|h| h.level >= BASE_LEVEL && h.level <= max_level)
        .map(|h| {
            format!(
                "{}- [{}](#{})",
                " ".repeat((h.level - BASE_LEVEL) as usize * 2),
                escape_link_text(&h.numbered_text),
                h.anchor
            )
        })
        .collect::<Vec<_>>();
    if !outline.is_empty() {
        blocks.push(outline);
    }

    if blocks.is_empty() {
        return Vec::new();
    }
    let mut body = vec![String::new()];
    for block in blocks {
        body.extend(block);
        body.push(String::new());
    }
    body
}

fn render_reference(reference: &str) -> String {
    let reference = reference.trim();
    let is_url = reference.starts_with("https://") || reference.starts_with("http://");
    if is_url && !reference.contains(char::is_whitespace) {
        format!("<{reference}>")
    } else {
        reference.to_string()
    }
}

fn escape_link_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '[' | ']') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "<!-- TOC:start -->";
    const END: &str = "<!-- TOC:end -->";

    fn note(body: &str) -> String {
        format!("# 0001. Two Sum\n\n{START}\n{END}\n\n{body}")
    }

    #[test]
    fn numbers_headings_and_renders_outline() {
        let compiled = compile(
            &note("## A\n\n### B\n\n### C\n\n## D\n"),
            None,
            &TocOptions::default(),
        );
        let expected = format!(
            "# 0001. Two Sum\n\n{START}\n\n- [2. A](#2-a)\n  - [2.1. B](#21-b)\n  - [2.2. C](#22-c)\n- [3. D](#3-d)\n\n{END}\n\n## 2. A\n\n### 2.1. B\n\n### 2.2. C\n\n## 3. D\n"
        );
        assert_eq!(compiled.text, expected);
        assert!(compiled.changed);

        let numbered = compiled
            .headings
            .iter()
            .map(|h| h.numbered_text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(numbered, vec!["0001. Two Sum", "2. A", "2.1. B", "2.2. C", "3. D"]);
    }

    #[test]
    fn compile_is_a_fixed_point() {
        let mut config = NoteConfig::new("s", 0);
        config.video_refs = vec!["https://example.com/v".to_string()];
        config.article_refs = vec!["[Guide](https://example.com/a)".to_string()];
        let source = note("## A\n#### Deep\n### B\n```\n## not a heading\n```\n## A\n");

        let first = compile(&source, Some(&config), &TocOptions::default());
        let second = compile(&first.text, Some(&config), &TocOptions::default());
        assert_eq!(first.text, second.text);
        assert!(!second.changed);
        assert!(first.text.contains("**Videos**\n\n- <https://example.com/v>\n"));
        assert!(first.text.contains("**Articles**\n\n- [Guide](https://example.com/a)\n"));
        assert!(!first.text.contains("Related repositories"));
        assert!(first.text.contains("#### Deep\n"));
        assert!(first.text.contains("## not a heading\n"));
        assert!(first.text.contains("- [2. A](#2-a)\n  - [2.1. B](#21-b)\n- [3. A](#3-a)\n"));
    }

    #[test]
    fn repeated_headings_get_distinct_anchors() {
        let compiled = compile(&note("## Notes\n### Notes\n### Notes\n"), None, &TocOptions::default());
        let anchors = compiled
            .headings
            .iter()
            .map(|h| h.anchor.as_str())
            .collect::<Vec<_>>();
        assert_eq!(anchors, vec!["0001-two-sum", "2-notes", "21-notes", "22-notes"]);

        let twice = compile(&note("## X\n## 2. X\n"), None, &TocOptions::default());
        assert!(twice.text.contains("- [2. X](#2-x)\n- [3. X](#3-x)"));
    }

    #[test]
    fn missing_or_duplicated_markers_leave_document_untouched() {
        for text in [
            "# T\n\n## A\n".to_string(),
            format!("# T\n{START}\n{START}\n{END}\n## A\n"),
            format!("# T\n{END}\n{START}\n## A\n"),
        ] {
            let compiled = compile(&text, None, &TocOptions::default());
            assert_eq!(compiled.text, text);
            assert!(!compiled.changed);
            assert!(compiled.region.is_none());
        }
    }

    #[test]
    fn generated_region_never_includes_markers_and_keeps_crlf() {
        let text = note("## A\n").replace('\n', "\r\n");
        let compiled = compile(&text, None, &TocOptions::default());
        let region = compiled.region.expect("region");

        let lines = compiled.text.split("\r\n").collect::<Vec<_>>();
        assert_eq!(lines[region.start_line], START);
        assert_eq!(lines[region.end_line], END);
        assert!(lines[region.start_line + 1..region.end_line]
            .iter()
            .all(|l| !l.contains("TOC:")));
        assert!(compiled.text.ends_with("## 2. A\r\n"));
        assert!(!compiled.text.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn empty_region_stays_empty_without_headings_or_references() {
        let text = format!("# Title\n{START}\n{END}\n");
        let compiled = compile(&text, Some(&NoteConfig::new("s", 0)), &TocOptions::default());
        assert_eq!(compiled.text, text);
        assert!(!compiled.changed);
    }

    #[test]
    fn numbering_does_not_leak_between_documents() {
        let a = compile(&note("## A\n## B\n"), None, &TocOptions::default());
        let b = compile(&note("## C\n"), None, &TocOptions::default());
        assert!(a.text.contains("## 3. B"));
        assert!(b.text.contains("## 2. C"));
    }
}
