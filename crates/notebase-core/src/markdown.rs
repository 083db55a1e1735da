use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag};
use std::collections::{BTreeMap, BTreeSet};

/// A markdown document held as lines, remembering how it was terminated so
/// rendering gives back the same bytes for untouched lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    lines: Vec<String>,
    newline: &'static str,
    trailing_newline: bool,
}

impl Document {
    pub fn parse(text: &str) -> Self {
        let newline = detect_line_ending(text);
        let trailing_newline = text.ends_with('\n');
        let body = text.strip_suffix('\n').unwrap_or(text);
        let lines = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n')
                .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
                .collect()
        };

        Self {
            lines,
            newline,
            trailing_newline,
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn replace_lines(&mut self, lines: Vec<String>) {
        self.lines = lines;
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join(self.newline);
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(self.newline);
        }
        out
    }

    /// Which lines are real ATX headings, and which lines are opaque (code or
    /// multi-line HTML/comment blocks) and must never be reinterpreted.
    pub fn structure(&self) -> DocumentStructure {
        scan_structure(&self.lines.join("\n"))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentStructure {
    pub heading_lines: BTreeMap<usize, u8>,
    pub opaque_lines: BTreeSet<usize>,
}

impl DocumentStructure {
    pub fn is_heading(&self, line_ix: usize) -> bool {
        self.heading_lines.contains_key(&line_ix)
    }

    pub fn is_opaque(&self, line_ix: usize) -> bool {
        self.opaque_lines.contains(&line_ix)
    }
}

/// Scans `\n`-separated text with pulldown-cmark and maps block ranges back to
/// line indices.
pub fn scan_structure(text: &str) -> DocumentStructure {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_FOOTNOTES);

    let line_starts = line_starts(text);
    let line_of = |offset: usize| match line_starts.binary_search(&offset) {
        Ok(ix) => ix,
        Err(ix) => ix.saturating_sub(1),
    };

    let mut out = DocumentStructure::default();
    for (event, range) in Parser::new_ext(text, options).into_offset_iter() {
        let Event::Start(tag) = event else {
            continue;
        };
        match tag {
            Tag::Heading { level, .. } => {
                let line_ix = line_of(range.start);
                let is_atx = text[line_starts[line_ix]..]
                    .trim_start_matches(' ')
                    .starts_with('#');
                if is_atx {
                    out.heading_lines.insert(line_ix, heading_level_to_u8(level));
                }
            }
            Tag::CodeBlock(_) => {
                let first = line_of(range.start);
                let last = line_of(range.end.saturating_sub(1).max(range.start));
                out.opaque_lines.extend(first..=last);
            }
            Tag::HtmlBlock => {
                let first = line_of(range.start);
                let last = line_of(range.end.saturating_sub(1).max(range.start));
                if last > first {
                    out.opaque_lines.extend(first..=last);
                }
            }
            _ => {}
        }
    }
    out
}

fn line_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(
        text.bytes()
            .enumerate()
            .filter(|(_, b)| *b == b'\n')
            .map(|(ix, _)| ix + 1),
    );
    starts
}

fn detect_line_ending(content: &str) -> &'static str {
    if content.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}
