use crate::master_index::{IndexEntry, IndexOutline};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SidebarNode {
    pub text: String,
    pub collapsed: bool,
    pub items: Vec<SidebarItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SidebarLink {
    pub text: String,
    pub link: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SidebarItem {
    Group(SidebarNode),
    Link(SidebarLink),
}

impl SidebarItem {
    /// Number of links in this subtree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Group(node) => node.items.iter().map(Self::leaf_count).sum(),
            Self::Link(_) => 1,
        }
    }
}

/// Builds the navigation tree from the index headings.
///
/// Each heading becomes a node nested under the closest preceding heading of
/// a lower level and takes the `note_count` next links. The first level-1
/// heading is the document title: its links go to the top level instead.
/// Nodes at `collapse_depth` or deeper start collapsed.
pub fn build_tree(outline: &IndexOutline, collapse_depth: usize) -> Vec<SidebarItem> {
    let mut leaves = outline.entries.iter().map(link_item);
    let mut roots: Vec<SidebarItem> = leaves.by_ref().take(outline.leading).collect();
    let mut stack: Vec<(u8, SidebarNode)> = Vec::new();
    let mut title_skipped = false;

    for section in &outline.sections {
        if section.level == 1 && !title_skipped {
            title_skipped = true;
            close_until(&mut stack, &mut roots, 0);
            roots.extend(leaves.by_ref().take(section.note_count));
            continue;
        }

        close_until(&mut stack, &mut roots, section.level);
        let node = SidebarNode {
            text: section.text.clone(),
            collapsed: stack.len() >= collapse_depth,
            items: leaves.by_ref().take(section.note_count).collect(),
        };
        stack.push((section.level, node));
    }
    close_until(&mut stack, &mut roots, 0);

    // Counts always cover every entry; anything left means the outline was
    // assembled by hand.
    roots.extend(leaves);
    roots
}

pub fn render_sidebar_json(items: &[SidebarItem]) -> serde_json::Result<String> {
    let mut out = serde_json::to_string_pretty(items)?;
    out.push('\n');
    Ok(out)
}

/// Pops every open node whose level is at least `level`.
fn close_until(stack: &mut Vec<(u8, SidebarNode)>, roots: &mut Vec<SidebarItem>, level: u8) {
    while stack.last().is_some_and(|(open, _)| *open >= level) {
        let Some((_, node)) = stack.pop() else {
            break;
        };
        match stack.last_mut() {
            Some((_, parent)) => parent.items.push(SidebarItem::Group(node)),
            None => roots.push(SidebarItem::Group(node)),
        }
    }
}

fn link_item(entry: &IndexEntry) -> SidebarItem {
    SidebarItem::Link(SidebarLink {
        text: entry.text.clone(),
        link: entry.link.clone(),
    })
}
