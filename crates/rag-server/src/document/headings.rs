use once_cell::sync::Lazy;
use regex::Regex;

use super::parser::Section;

static NUMBERED_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+[.)]|[A-Z]\.)\s+\S").unwrap());

const HEADING_KEYWORDS: &[&str] = &[
    "chapter",
    "section",
    "part",
    "introduction",
    "conclusion",
    "summary",
    "overview",
    "appendix",
];

/// Heading detection for unstructured text (txt, docx, rtf).
///
/// A line is a heading when it is all-caps of plausible length, looks like a
/// numbered heading, starts with a structural keyword, or is a short line
/// followed by a longer one.
pub fn is_heading(line: &str, next_non_empty: Option<&str>) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    let len = line.chars().count();

    // (a) all-caps with letters, length in (3, 100]
    let has_letters = line.chars().any(|c| c.is_alphabetic());
    if has_letters
        && len > 3
        && len <= 100
        && line.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_uppercase())
    {
        return true;
    }

    // (b) numbered heading: "1. Title", "2) Title", "A. Title"
    if NUMBERED_HEADING.is_match(line) {
        return true;
    }

    // (c) structural keywords
    let lower = line.to_lowercase();
    if HEADING_KEYWORDS.iter().any(|kw| lower.starts_with(kw)) {
        return true;
    }

    // (d) short line followed by a longer one
    if len < 30 {
        if let Some(next) = next_non_empty {
            if next.trim().chars().count() > len {
                return true;
            }
        }
    }

    false
}

/// Split plain text into sections at detected heading lines. Offsets are
/// char offsets into `content`. Returns an empty vec when no heading is
/// found.
pub fn detect_sections(content: &str) -> Vec<Section> {
    // Collect (char_offset, line) pairs
    let mut lines: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0usize;
    for line in content.split('\n') {
        lines.push((offset, line));
        offset += line.chars().count() + 1;
    }
    let total_chars = content.chars().count();

    let mut headings: Vec<(usize, String)> = Vec::new();
    for (i, (line_offset, line)) in lines.iter().enumerate() {
        let next_non_empty = lines[i + 1..]
            .iter()
            .map(|(_, l)| *l)
            .find(|l| !l.trim().is_empty());
        if is_heading(line, next_non_empty) {
            headings.push((*line_offset, line.trim().to_string()));
        }
    }

    if headings.is_empty() {
        return Vec::new();
    }

    let mut sections = Vec::new();

    // Preamble before the first heading
    if headings[0].0 > 0 {
        sections.push(Section {
            title: None,
            start_offset: 0,
            end_offset: headings[0].0,
            ..Section::default()
        });
    }

    for (i, (start, title)) in headings.iter().enumerate() {
        let end = headings
            .get(i + 1)
            .map(|(next_start, _)| *next_start)
            .unwrap_or(total_chars);
        sections.push(Section {
            title: Some(title.clone()),
            start_offset: *start,
            end_offset: end,
            ..Section::default()
        });
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_caps_heading() {
        assert!(is_heading("EXECUTIVE SUMMARY", None));
        assert!(!is_heading("OK", None)); // too short
        let long = "A".repeat(120);
        assert!(!is_heading(&long, None));
    }

    #[test]
    fn test_numbered_heading() {
        assert!(is_heading("1. Background", None));
        assert!(is_heading("2) Scope", None));
        assert!(is_heading("A. Terms", None));
        assert!(!is_heading("1.without space", None));
    }

    #[test]
    fn test_keyword_heading() {
        assert!(is_heading("Introduction", None));
        assert!(is_heading("chapter one", None));
        assert!(is_heading("Appendix B", None));
    }

    #[test]
    fn test_short_line_before_longer() {
        assert!(is_heading(
            "Results",
            Some("The experiment produced the following measurements over ten runs.")
        ));
        assert!(!is_heading("Results", Some("ok")));
    }

    #[test]
    fn test_detect_sections_offsets() {
        let text = "This opening paragraph is long enough not to be a heading at all.\nBACKGROUND DETAILS\nbody line one\n1. Scope\nmore body";
        let sections = detect_sections(text);

        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].title, None);
        assert_eq!(sections[1].title.as_deref(), Some("BACKGROUND DETAILS"));
        assert_eq!(sections[2].title.as_deref(), Some("1. Scope"));

        // Sections tile the document
        assert_eq!(sections[0].start_offset, 0);
        assert_eq!(sections[2].end_offset, text.chars().count());
        for pair in sections.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
    }

    #[test]
    fn test_no_headings_no_sections() {
        let text = "plain paragraph with nothing resembling any structure at all because every line here is quite long\nand another equally long line of ordinary prose text that follows the first one closely";
        assert!(detect_sections(text).is_empty());
    }
}
