use std::collections::HashMap;

/// GitHub-style heading slug: lowercase, keep letters, digits, `-` and `_`,
/// turn whitespace into `-`, drop everything else.
pub fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.trim().chars() {
        if ch.is_alphanumeric() || ch == '-' || ch == '_' {
            out.extend(ch.to_lowercase());
        } else if ch.is_whitespace() {
            out.push('-');
        }
    }
    out
}

/// Per-document slugger that disambiguates repeated headings with `-1`, `-2`, ...
#[derive(Clone, Debug, Default)]
pub struct Slugger {
    occurrences: HashMap<String, usize>,
}

impl Slugger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.occurrences.clear();
    }

    pub fn slug(&mut self, text: &str) -> String {
        let original = slug(text);
        let mut candidate = original.clone();
        while self.occurrences.contains_key(&candidate) {
            let count = self.occurrences.entry(original.clone()).or_insert(0);
            *count += 1;
            candidate = format!("{original}-{count}");
        }
        self.occurrences.insert(candidate.clone(), 0);
        candidate
    }
}
