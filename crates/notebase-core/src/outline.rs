use crate::classify::escape_label;
use crate::master_index::{IndexEntry, IndexOutline};

/// Renders the flattened outline document: every index heading at its own
/// level followed by a flat list of its notes. No per-note headings appear,
/// so edits inside a note never change this document.
pub fn render_outline(title: &str, outline: &IndexOutline, deprecated_mark: &str) -> String {
    let mut blocks: Vec<Vec<String>> = vec![vec![format!("# {title}")]];
    let mut entries = outline.entries.iter();

    let mut top = entries
        .by_ref()
        .take(outline.leading)
        .map(|e| entry_line(e, deprecated_mark))
        .collect::<Vec<_>>();
    let mut title_skipped = false;
    let mut sections = Vec::new();
    for section in &outline.sections {
        let lines = entries
            .by_ref()
            .take(section.note_count)
            .map(|e| entry_line(e, deprecated_mark))
            .collect::<Vec<_>>();
        if section.level == 1 && !title_skipped {
            title_skipped = true;
            top.extend(lines);
            continue;
        }
        sections.push((section, lines));
    }

    if !top.is_empty() {
        blocks.push(top);
    }
    for (section, lines) in sections {
        blocks.push(vec![format!("{} {}", "#".repeat(section.level as usize), section.text)]);
        if !lines.is_empty() {
            blocks.push(lines);
        }
    }

    let mut out = blocks
        .into_iter()
        .map(|block| block.join("\n"))
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}

fn entry_line(entry: &IndexEntry, deprecated_mark: &str) -> String {
    let mark = if entry.done { 'x' } else { ' ' };
    let mut line = format!("- [{mark}] [{}]({})", escape_label(&entry.text), entry.link);
    if entry.deprecated && !deprecated_mark.is_empty() {
        line.push(' ');
        line.push_str(deprecated_mark);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::TocMarkers;
    use crate::master_index::index_outline;

    #[test]
    fn flattens_index_into_headings_and_note_lists() {
        let index = "# Problems\n\n<!-- TOC:start -->\n\n- [2. Arrays](#2-arrays)\n\n<!-- TOC:end -->\n\n- [ ] [0009. Loose](l)\n\n## 2. Arrays\n\nSome prose.\n\n- [x] [0001. A](a)\n- [ ] [0002. B](b) (deprecated)\n\n### 2.1. Empty\n";
        let markers = TocMarkers::new("<!-- TOC:start -->", "<!-- TOC:end -->");
        let outline = index_outline(index, &markers, "(deprecated)");

        assert_eq!(
            render_outline("Outline", &outline, "(deprecated)"),
            "# Outline\n\n- [ ] [0009. Loose](l)\n\n## 2. Arrays\n\n- [x] [0001. A](a)\n- [ ] [0002. B](b) (deprecated)\n\n### 2.1. Empty\n"
        );
    }

    #[test]
    fn bracketed_entry_text_is_escaped_again() {
        let outline = IndexOutline {
            leading: 1,
            sections: Vec::new(),
            entries: vec![IndexEntry {
                id: "0001".to_string(),
                text: "0001. Arrays [easy]".to_string(),
                link: "a".to_string(),
                done: false,
                deprecated: false,
            }],
        };
        assert_eq!(
            render_outline("Outline", &outline, "(deprecated)"),
            "# Outline\n\n- [ ] [0001. Arrays \\[easy\\]](a)\n"
        );
    }

    #[test]
    fn empty_index_renders_title_only() {
        assert_eq!(
            render_outline("Outline", &IndexOutline::default(), "(deprecated)"),
            "# Outline\n"
        );
    }
}
