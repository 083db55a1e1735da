//! Line classification shared by the TOC compiler and the master index
//! reconciler. All pattern matching on raw markdown lines lives here.

use crate::markdown::Document;
use once_cell::sync::Lazy;
use regex::Regex;

static HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ {0,3}(#{1,6})[ \t]+(.*?)(?:[ \t]+#+)?[ \t]*$").expect("heading regex")
});

static NOTE_REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)[-*+] \[([ xX])\] \[((\d{4})(?:\\.|[^\]\\])*)\]\(([^)]*)\)(.*)$")
        .expect("note reference regex")
});

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TocMarkers {
    pub start: String,
    pub end: String,
}

impl TocMarkers {
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.trim().to_string(),
            end: end.trim().to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TocMarker {
    Start,
    End,
}

/// `- [x] [0001. Title](notes/0001.%20Title/README.md) trailing`
///
/// `title` is the link text as written, still escaped; see [`unescape_label`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteReference<'a> {
    pub indent: &'a str,
    pub checked: bool,
    pub id: &'a str,
    pub title: &'a str,
    pub link: &'a str,
    pub trailing: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineKind<'a> {
    Heading { level: u8, text: &'a str },
    TocMarker(TocMarker),
    NoteReference(NoteReference<'a>),
    Other,
}

/// Escapes a plain-text folder name for use as markdown link text.
pub fn escape_label(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '[' | ']') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Inverse of [`escape_label`].
pub fn unescape_label(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            _ => out.push(ch),
        }
    }
    out
}

/// Classifies a single line without document context.
pub fn classify_line<'a>(line: &'a str, markers: &TocMarkers) -> LineKind<'a> {
    let trimmed = line.trim();
    if trimmed == markers.start {
        return LineKind::TocMarker(TocMarker::Start);
    }
    if trimmed == markers.end {
        return LineKind::TocMarker(TocMarker::End);
    }

    if let Some(caps) = HEADING_RE.captures(line) {
        let level = caps.get(1).map_or(0, |m| m.len()) as u8;
        let text = caps.get(2).map_or("", |m| m.as_str());
        if !text.is_empty() {
            return LineKind::Heading { level, text };
        }
        return LineKind::Other;
    }

    if let Some(caps) = NOTE_REFERENCE_RE.captures(line) {
        let group = |ix: usize| caps.get(ix).map_or("", |m| m.as_str());
        return LineKind::NoteReference(NoteReference {
            indent: group(1),
            checked: group(2).eq_ignore_ascii_case("x"),
            title: group(3),
            id: group(4),
            link: group(5),
            trailing: group(6),
        });
    }

    LineKind::Other
}

/// Classifies every line of `doc`. Lines inside fenced code or multi-line
/// comments, and heading-looking lines the markdown parser does not treat as
/// headings, come back as [`LineKind::Other`].
pub fn classify_document<'a>(doc: &'a Document, markers: &TocMarkers) -> Vec<LineKind<'a>> {
    let structure = doc.structure();
    doc.lines()
        .iter()
        .enumerate()
        .map(|(ix, line)| {
            if structure.is_opaque(ix) {
                return LineKind::Other;
            }
            match classify_line(line, markers) {
                LineKind::Heading { .. } if !structure.is_heading(ix) => LineKind::Other,
                kind => kind,
            }
        })
        .collect()
}
