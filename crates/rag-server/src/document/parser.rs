use encoding_rs::UTF_8;
use pulldown_cmark::{Event, HeadingLevel, Options, Parser as MdParser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::headings::detect_sections;
use super::html::parse_html;
use super::loader::FileType;
use super::office::{parse_docx, parse_pdf, parse_pptx, parse_rtf, parse_xlsx};
use crate::utils::error::AppError;

/// A contiguous region of the normalized text, carrying whatever source
/// structure the format exposes (heading, page, slide, sheet). Offsets are
/// char offsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: Option<String>,
    pub start_offset: usize,
    pub end_offset: usize,
    pub page_number: Option<u32>,
    pub slide_number: Option<u32>,
    pub sheet_name: Option<String>,
}

/// Document-level metadata extracted while parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

/// Parser output consumed by the ingestion pipeline.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub content: String,
    pub metadata: DocMetadata,
    pub sections: Vec<Section>,
}

pub struct DocumentParser;

impl DocumentParser {
    /// Parse raw bytes according to the canonical file type.
    pub fn parse(data: &[u8], file_type: FileType) -> Result<ParsedDocument, AppError> {
        debug!("Parsing {} bytes as {}", data.len(), file_type);

        match file_type {
            FileType::Txt => Self::parse_text(data),
            FileType::Md => Self::parse_markdown(data),
            FileType::Html => parse_html(data),
            FileType::Csv => Self::parse_csv(data),
            FileType::Json => Self::parse_json(data),
            FileType::Pdf => parse_pdf(data),
            FileType::Docx => parse_docx(data),
            FileType::Pptx => parse_pptx(data),
            FileType::Xlsx => parse_xlsx(data),
            FileType::Rtf => parse_rtf(data),
        }
    }

    /// Decode bytes as UTF-8, falling back to lossy replacement.
    pub(crate) fn decode_text(bytes: &[u8]) -> String {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return text.to_string();
        }
        let (decoded, _, _) = UTF_8.decode(bytes);
        decoded.into_owned()
    }

    fn parse_text(data: &[u8]) -> Result<ParsedDocument, AppError> {
        let content = Self::decode_text(data).trim().to_string();
        let sections = detect_sections(&content);

        Ok(ParsedDocument {
            content,
            metadata: DocMetadata::default(),
            sections,
        })
    }

    /// Markdown keeps its raw text as content; the event stream supplies the
    /// title (first level-1 heading) and heading-delimited sections.
    fn parse_markdown(data: &[u8]) -> Result<ParsedDocument, AppError> {
        let content = Self::decode_text(data).trim().to_string();
        if content.is_empty() {
            return Ok(ParsedDocument::default());
        }

        // Byte offset -> char offset lookup for section boundaries
        let byte_to_char = |byte: usize| content[..byte].chars().count();
        let total_chars = content.chars().count();

        let mut title: Option<String> = None;
        let mut headings: Vec<(usize, String)> = Vec::new(); // (char offset, text)

        let parser = MdParser::new_ext(&content, Options::empty());
        let mut in_heading: Option<(usize, HeadingLevel)> = None;
        let mut heading_text = String::new();

        for (event, range) in parser.into_offset_iter() {
            match event {
                Event::Start(Tag::Heading { level, .. }) => {
                    in_heading = Some((range.start, level));
                    heading_text.clear();
                }
                Event::Text(text) | Event::Code(text) => {
                    if in_heading.is_some() {
                        heading_text.push_str(&text);
                    }
                }
                Event::End(TagEnd::Heading(_)) => {
                    if let Some((start, level)) = in_heading.take() {
                        let text = heading_text.trim().to_string();
                        if level == HeadingLevel::H1 && title.is_none() {
                            title = Some(text.clone());
                        }
                        headings.push((byte_to_char(start), text));
                    }
                }
                _ => {}
            }
        }

        let mut sections = Vec::new();
        if !headings.is_empty() {
            if headings[0].0 > 0 {
                sections.push(Section {
                    title: None,
                    start_offset: 0,
                    end_offset: headings[0].0,
                    ..Section::default()
                });
            }
            for (i, (start, text)) in headings.iter().enumerate() {
                let end = headings
                    .get(i + 1)
                    .map(|(next, _)| *next)
                    .unwrap_or(total_chars);
                sections.push(Section {
                    title: Some(text.clone()),
                    start_offset: *start,
                    end_offset: end,
                    ..Section::default()
                });
            }
        }

        Ok(ParsedDocument {
            content,
            metadata: DocMetadata {
                title,
                ..DocMetadata::default()
            },
            sections,
        })
    }

    /// RFC-4180-ish CSV: first row is the header; each row is rendered as
    /// `header: value` lines and becomes its own `Row N` section.
    fn parse_csv(data: &[u8]) -> Result<ParsedDocument, AppError> {
        let text = Self::decode_text(data);
        let records = Self::parse_csv_records(&text);

        if records.is_empty() {
            return Ok(ParsedDocument::default());
        }

        let header = &records[0];
        let mut content = String::new();
        let mut sections = Vec::new();
        let mut char_offset = 0usize;

        for (row_idx, record) in records.iter().skip(1).enumerate() {
            let mut block = String::new();
            for (col_idx, value) in record.iter().enumerate() {
                let name = header
                    .get(col_idx)
                    .map(String::as_str)
                    .unwrap_or("column");
                block.push_str(name);
                block.push_str(": ");
                block.push_str(value);
                block.push('\n');
            }

            let block_chars = block.chars().count();
            sections.push(Section {
                title: Some(format!("Row {}", row_idx + 1)),
                start_offset: char_offset,
                end_offset: char_offset + block_chars,
                ..Section::default()
            });

            content.push_str(&block);
            char_offset += block_chars;
            if row_idx + 2 <= records.len() {
                content.push('\n');
                char_offset += 1;
            }
        }

        Ok(ParsedDocument {
            content: content.trim_end().to_string(),
            metadata: DocMetadata {
                columns: Some(header.clone()),
                row_count: Some(records.len() - 1),
                ..DocMetadata::default()
            },
            sections,
        })
    }

    /// Minimal CSV state machine with `""` escaping inside quoted fields.
    fn parse_csv_records(text: &str) -> Vec<Vec<String>> {
        let mut records = Vec::new();
        let mut record = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;

        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if in_quotes {
                match c {
                    '"' => {
                        if chars.peek() == Some(&'"') {
                            chars.next();
                            field.push('"');
                        } else {
                            in_quotes = false;
                        }
                    }
                    _ => field.push(c),
                }
            } else {
                match c {
                    '"' => in_quotes = true,
                    ',' => {
                        record.push(std::mem::take(&mut field));
                    }
                    '\r' => {
                        if chars.peek() == Some(&'\n') {
                            chars.next();
                        }
                        record.push(std::mem::take(&mut field));
                        records.push(std::mem::take(&mut record));
                    }
                    '\n' => {
                        record.push(std::mem::take(&mut field));
                        records.push(std::mem::take(&mut record));
                    }
                    _ => field.push(c),
                }
            }
        }

        if !field.is_empty() || !record.is_empty() {
            record.push(field);
            records.push(record);
        }

        // Drop fully empty trailing records
        records.retain(|r| !(r.len() == 1 && r[0].is_empty()));
        records
    }

    /// JSON is flattened to `path: scalar` lines.
    fn parse_json(data: &[u8]) -> Result<ParsedDocument, AppError> {
        let text = Self::decode_text(data);
        if text.trim().is_empty() {
            return Ok(ParsedDocument::default());
        }

        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| AppError::Validation(format!("Invalid JSON document: {}", e)))?;

        let mut lines = Vec::new();
        Self::flatten_json(&value, "", &mut lines);
        let content = lines.join("\n");

        Ok(ParsedDocument {
            content,
            metadata: DocMetadata::default(),
            sections: Vec::new(),
        })
    }

    fn flatten_json(value: &serde_json::Value, path: &str, out: &mut Vec<String>) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, child) in map {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };
                    Self::flatten_json(child, &child_path, out);
                }
            }
            serde_json::Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    Self::flatten_json(child, &format!("{}[{}]", path, i), out);
                }
            }
            serde_json::Value::Null => {}
            scalar => {
                let rendered = match scalar {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if path.is_empty() {
                    out.push(rendered);
                } else {
                    out.push(format!("{}: {}", path, rendered));
                }
            }
        }
    }
}
