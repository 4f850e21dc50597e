use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::parser::{DocMetadata, DocumentParser, ParsedDocument, Section};
use crate::utils::error::AppError;

/// Tags whose entire content is noise for retrieval.
static STRIP_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["script", "style", "noscript", "iframe", "svg"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>|<{tag}[^>]*/>")).unwrap()
        })
        .collect()
});

/// Main-content candidates, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role=main]",
    ".content",
    "#content",
    ".main",
    "#main",
    "body",
];

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];
const BLOCK_TAGS: &[&str] = &["p", "li", "td", "th", "blockquote", "pre", "code"];

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef) -> String {
    normalize_whitespace(&el.text().collect::<String>())
}

/// Skip a block that sits inside another collected block (a `p` inside an
/// `li` would otherwise be emitted twice).
fn is_nested_block(el: ElementRef) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| BLOCK_TAGS.contains(&ancestor.value().name()))
}

fn extract_metadata(doc: &Html) -> DocMetadata {
    let select_content = |selector: &str| -> Option<String> {
        let sel = Selector::parse(selector).ok()?;
        doc.select(&sel)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(normalize_whitespace)
            .filter(|s| !s.is_empty())
    };

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| doc.select(&sel).next().map(element_text))
        .filter(|s| !s.is_empty())
        .or_else(|| select_content(r#"meta[property="og:title"]"#));

    let description = select_content(r#"meta[name="description"]"#)
        .or_else(|| select_content(r#"meta[property="og:description"]"#));

    let author = select_content(r#"meta[name="author"]"#);

    let keywords = select_content(r#"meta[name="keywords"]"#).map(|k| {
        k.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    });

    DocMetadata {
        title,
        author,
        description,
        keywords,
        ..DocMetadata::default()
    }
}

/// Parse HTML into normalized text plus heading-delimited sections.
pub fn parse_html(data: &[u8]) -> Result<ParsedDocument, AppError> {
    let raw = DocumentParser::decode_text(data);
    if raw.trim().is_empty() {
        return Ok(ParsedDocument::default());
    }

    let mut stripped = raw;
    for pattern in STRIP_BLOCKS.iter() {
        stripped = pattern.replace_all(&stripped, " ").into_owned();
    }

    let doc = Html::parse_document(&stripped);
    let metadata = extract_metadata(&doc);

    let container = CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|sel| doc.select(&sel).next());

    let Some(container) = container else {
        return Ok(ParsedDocument {
            content: String::new(),
            metadata,
            sections: Vec::new(),
        });
    };

    // Walk headings and block elements in document order; headings open
    // sections, blocks fill them.
    let walk_selector = Selector::parse(
        "h1, h2, h3, h4, h5, h6, p, li, td, th, blockquote, pre, code",
    )
    .expect("static selector");

    let mut content = String::new();
    let mut char_offset = 0usize;
    let mut sections: Vec<Section> = Vec::new();
    let mut open_section: Option<Section> = None;
    let mut blocks_emitted = 0usize;

    let push_block = |content: &mut String, char_offset: &mut usize, text: &str| {
        if !content.is_empty() {
            content.push_str("\n\n");
            *char_offset += 2;
        }
        content.push_str(text);
        *char_offset += text.chars().count();
    };

    for el in container.select(&walk_selector) {
        let name = el.value().name();

        if HEADING_TAGS.contains(&name) {
            let text = element_text(el);
            if text.is_empty() {
                continue;
            }
            if let Some(mut section) = open_section.take() {
                section.end_offset = char_offset;
                sections.push(section);
            }
            let start = if content.is_empty() { 0 } else { char_offset + 2 };
            push_block(&mut content, &mut char_offset, &text);
            open_section = Some(Section {
                title: Some(text),
                start_offset: start,
                end_offset: start,
                ..Section::default()
            });
            blocks_emitted += 1;
        } else if BLOCK_TAGS.contains(&name) {
            if is_nested_block(el) {
                continue;
            }
            let text = element_text(el);
            if text.is_empty() {
                continue;
            }
            push_block(&mut content, &mut char_offset, &text);
            blocks_emitted += 1;
        }
    }

    if let Some(mut section) = open_section.take() {
        section.end_offset = char_offset;
        sections.push(section);
    }

    // Pages without block markup still carry text worth indexing
    if blocks_emitted == 0 {
        content = normalize_whitespace(&container.text().collect::<String>());
    }

    Ok(ParsedDocument {
        content,
        metadata,
        sections,
    })
}
