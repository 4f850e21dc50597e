use lopdf::Document as PdfDocument;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::io::{Cursor, Read};
use tracing::warn;

use super::headings::detect_sections;
use super::parser::{DocMetadata, DocumentParser, ParsedDocument, Section};
use crate::utils::error::AppError;

static SLIDE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").unwrap());

/// PDF: per-page text extraction; a page that fails to extract becomes a
/// warning, not a hard error.
pub fn parse_pdf(data: &[u8]) -> Result<ParsedDocument, AppError> {
    if data.is_empty() {
        return Ok(ParsedDocument::default());
    }

    let doc = PdfDocument::load_mem(data)
        .map_err(|e| AppError::Validation(format!("PDF parse error: {}", e)))?;
    let pages = doc.get_pages();
    let page_count = pages.len();

    let mut content = String::new();
    let mut sections = Vec::new();
    let mut warnings = Vec::new();
    let mut char_offset = 0usize;

    for (page_num, _) in pages.iter() {
        let start = char_offset;
        match doc.extract_text(&[*page_num]) {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                content.push_str(text);
                content.push('\n');
                char_offset += text.chars().count() + 1;
            }
            Err(e) => {
                warn!("Failed to extract text from page {}: {}", page_num, e);
                warnings.push(format!("page {}: {}", page_num, e));
                continue;
            }
        }
        sections.push(Section {
            title: None,
            start_offset: start,
            end_offset: char_offset,
            page_number: Some(*page_num),
            ..Section::default()
        });
    }

    Ok(ParsedDocument {
        content: content.trim_end().to_string(),
        metadata: DocMetadata {
            pages: Some(page_count),
            warnings,
            ..DocMetadata::default()
        },
        sections,
    })
}

/// DOCX: walk paragraph/run/text children; structure comes from the
/// heading-detection heuristic over the extracted lines.
pub fn parse_docx(data: &[u8]) -> Result<ParsedDocument, AppError> {
    use docx_rs::{DocumentChild, ParagraphChild, RunChild};

    if data.is_empty() {
        return Ok(ParsedDocument::default());
    }

    let docx = docx_rs::read_docx(data)
        .map_err(|e| AppError::Validation(format!("DOCX parse error: {}", e)))?;

    let mut content = String::new();
    for child in docx.document.children {
        if let DocumentChild::Paragraph(para) = child {
            for child in para.children {
                if let ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let RunChild::Text(text) = child {
                            content.push_str(&text.text);
                        }
                    }
                }
            }
            content.push('\n');
        }
    }

    let content = content.trim().to_string();
    let sections = detect_sections(&content);
    let title = sections.iter().find_map(|s| s.title.clone());

    Ok(ParsedDocument {
        content,
        metadata: DocMetadata {
            title,
            ..DocMetadata::default()
        },
        sections,
    })
}

/// PPTX: slides live in `ppt/slides/slideN.xml` inside the zip; text runs
/// are `<a:t>` elements.
pub fn parse_pptx(data: &[u8]) -> Result<ParsedDocument, AppError> {
    if data.is_empty() {
        return Ok(ParsedDocument::default());
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| AppError::Validation(format!("PPTX parse error: {}", e)))?;

    let mut slides: Vec<(u32, String)> = Vec::new();
    for name in archive.file_names().map(String::from).collect::<Vec<_>>() {
        if let Some(caps) = SLIDE_PATH.captures(&name) {
            let number: u32 = caps[1].parse().unwrap_or(0);
            slides.push((number, name));
        }
    }
    slides.sort_by_key(|(number, _)| *number);

    let mut content = String::new();
    let mut sections = Vec::new();
    let mut char_offset = 0usize;

    for (number, name) in slides {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(|e| AppError::Validation(format!("PPTX slide read error: {}", e)))?
            .read_to_string(&mut xml)
            .map_err(|e| AppError::Validation(format!("PPTX slide read error: {}", e)))?;

        let text = extract_drawing_text(&xml);
        if text.is_empty() {
            continue;
        }

        let start = if content.is_empty() {
            0
        } else {
            content.push_str("\n\n");
            char_offset += 2;
            char_offset
        };
        content.push_str(&text);
        char_offset += text.chars().count();

        sections.push(Section {
            title: None,
            start_offset: start,
            end_offset: char_offset,
            slide_number: Some(number),
            ..Section::default()
        });
    }

    Ok(ParsedDocument {
        content,
        metadata: DocMetadata::default(),
        sections,
    })
}

/// Pull the text runs (`a:t`) out of DrawingML, one line per run.
fn extract_drawing_text(xml: &str) -> String {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_text = false;
    let mut lines: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"a:t" => in_text = true,
            Ok(Event::End(e)) if e.name().as_ref() == b"a:t" => in_text = false,
            Ok(Event::Text(t)) if in_text => {
                if let Ok(text) = t.unescape() {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        lines.push(text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!("PPTX xml error, stopping slide extraction: {}", e);
                break;
            }
            _ => {}
        }
    }

    lines.join("\n")
}

/// XLSX/XLS: one section per sheet, rows rendered as ` | `-joined cells.
pub fn parse_xlsx(data: &[u8]) -> Result<ParsedDocument, AppError> {
    use calamine::{Reader as _, Xls, Xlsx};

    if data.is_empty() {
        return Ok(ParsedDocument::default());
    }

    // Sheet name -> rendered rows
    let sheets: Vec<(String, String)> = match Xlsx::new(Cursor::new(data)) {
        Ok(mut workbook) => {
            let names = workbook.sheet_names().to_vec();
            names
                .into_iter()
                .filter_map(|name| {
                    workbook
                        .worksheet_range(&name)
                        .ok()
                        .map(|range| (name, render_rows(&range)))
                })
                .collect()
        }
        Err(_) => {
            // Legacy binary workbook
            let mut workbook = Xls::new(Cursor::new(data))
                .map_err(|e| AppError::Validation(format!("Excel parse error: {}", e)))?;
            let names = workbook.sheet_names().to_vec();
            names
                .into_iter()
                .filter_map(|name| {
                    workbook
                        .worksheet_range(&name)
                        .ok()
                        .map(|range| (name, render_rows(&range)))
                })
                .collect()
        }
    };

    let mut content = String::new();
    let mut sections = Vec::new();
    let mut char_offset = 0usize;

    for (name, rendered) in sheets {
        if rendered.is_empty() {
            continue;
        }
        let start = if content.is_empty() {
            0
        } else {
            content.push_str("\n\n");
            char_offset += 2;
            char_offset
        };
        content.push_str(&rendered);
        char_offset += rendered.chars().count();

        sections.push(Section {
            title: None,
            start_offset: start,
            end_offset: char_offset,
            sheet_name: Some(name),
            ..Section::default()
        });
    }

    Ok(ParsedDocument {
        content,
        metadata: DocMetadata::default(),
        sections,
    })
}

fn render_rows(range: &calamine::Range<calamine::Data>) -> String {
    range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| cell.to_string())
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .filter(|line| !line.trim().trim_matches('|').trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// RTF: lex + parse to plain text, then heading-heuristic sections.
pub fn parse_rtf(data: &[u8]) -> Result<ParsedDocument, AppError> {
    if data.is_empty() {
        return Ok(ParsedDocument::default());
    }

    let raw = DocumentParser::decode_text(data);
    let tokens = rtf_parser::lexer::Lexer::scan(&raw)
        .map_err(|e| AppError::Validation(format!("RTF lex error: {:?}", e)))?;
    let document = rtf_parser::parser::Parser::new(tokens)
        .parse()
        .map_err(|e| AppError::Validation(format!("RTF parse error: {:?}", e)))?;

    let content = document.get_text().trim().to_string();
    let sections = detect_sections(&content);

    Ok(ParsedDocument {
        content,
        metadata: DocMetadata::default(),
        sections,
    })
}
