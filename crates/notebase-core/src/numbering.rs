use once_cell::sync::Lazy;
use regex::Regex;

/// Headings above this level are the document title and are never numbered.
pub const BASE_LEVEL: u8 = 2;
const MAX_LEVEL: u8 = 6;

static LEADING_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)*\.\s+").expect("leading number regex"));

/// Removes a previously generated `2.1. ` prefix.
pub fn strip_number(text: &str) -> &str {
    match LEADING_NUMBER_RE.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

/// Hierarchical heading counters for one document. Create a fresh session for
/// every document (or every pass over the same document).
#[derive(Clone, Debug)]
pub struct NumberingSession {
    counters: [u32; MAX_LEVEL as usize + 1],
    max_level: u8,
}

impl NumberingSession {
    /// `first_section_number` is the number given to the first heading at
    /// [`BASE_LEVEL`]; `max_level` is the deepest level that gets a number.
    pub fn new(first_section_number: u32, max_level: u8) -> Self {
        let mut counters = [0; MAX_LEVEL as usize + 1];
        counters[BASE_LEVEL as usize] = first_section_number.saturating_sub(1);
        Self {
            counters,
            max_level: max_level.clamp(BASE_LEVEL, MAX_LEVEL),
        }
    }

    /// Returns the display text for a heading at `level`.
    ///
    /// Level 1 passes through untouched. Levels deeper than the session's
    /// maximum lose any stale number and leave the counters alone.
    pub fn number(&mut self, level: u8, text: &str) -> String {
        if level < BASE_LEVEL {
            return text.to_string();
        }
        let text = strip_number(text);
        if level > self.max_level {
            return text.to_string();
        }

        let level = level as usize;
        for counter in &mut self.counters[level + 1..] {
            *counter = 0;
        }
        self.counters[level] += 1;

        let number = self.counters[BASE_LEVEL as usize..=level]
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".");
        format!("{number}. {text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number_all(session: &mut NumberingSession, headings: &[(u8, &str)]) -> Vec<String> {
        headings
            .iter()
            .map(|(level, text)| session.number(*level, text))
            .collect()
    }

    #[test]
    fn numbers_nested_headings_from_first_section() {
        let mut session = NumberingSession::new(2, 3);
        let out = number_all(&mut session, &[(2, "A"), (3, "B"), (3, "C"), (2, "D")]);
        assert_eq!(out, vec!["2. A", "2.1. B", "2.2. C", "3. D"]);
    }

    #[test]
    fn deeper_counters_reset_when_parent_increments() {
        let mut session = NumberingSession::new(1, 4);
        let out = number_all(
            &mut session,
            &[(2, "A"), (3, "B"), (4, "C"), (2, "D"), (3, "E"), (4, "F")],
        );
        assert_eq!(out, vec!["1. A", "1.1. B", "1.1.1. C", "2. D", "2.1. E", "2.1.1. F"]);
    }

    #[test]
    fn title_and_deep_headings_are_not_numbered() {
        let mut session = NumberingSession::new(2, 3);
        assert_eq!(session.number(1, "1. Title"), "1. Title");
        assert_eq!(session.number(2, "A"), "2. A");
        assert_eq!(session.number(4, "2.1.1. Detail"), "Detail");
        assert_eq!(session.number(3, "B"), "2.1. B");
    }

    #[test]
    fn renumbering_numbered_text_is_a_fixed_point() {
        let headings = [(2, "A"), (3, "B"), (2, "C")];
        let first = number_all(&mut NumberingSession::new(2, 3), &headings);
        let renumbered_input = headings
            .iter()
            .zip(&first)
            .map(|((level, _), text)| (*level, text.as_str()))
            .collect::<Vec<_>>();
        let second = number_all(&mut NumberingSession::new(2, 3), &renumbered_input);
        assert_eq!(first, second);
    }

    #[test]
    fn sessions_do_not_share_state() {
        let headings = [(2, "A"), (3, "B"), (3, "C"), (2, "D")];
        let mut first = NumberingSession::new(2, 3);
        let mut noise = NumberingSession::new(2, 3);
        let a = number_all(&mut first, &headings);
        number_all(&mut noise, &[(2, "X"), (2, "Y"), (3, "Z")]);
        let b = number_all(&mut NumberingSession::new(2, 3), &headings);
        assert_eq!(a, b);
    }

    #[test]
    fn strip_number_only_touches_generated_prefixes() {
        assert_eq!(strip_number("2.1. Binary Search"), "Binary Search");
        assert_eq!(strip_number("3. D"), "D");
        assert_eq!(strip_number("3 Sum"), "3 Sum");
        assert_eq!(strip_number("2.5D graphics"), "2.5D graphics");
    }
}
