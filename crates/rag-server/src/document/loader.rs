use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::utils::error::AppError;

const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Canonical file types the ingestion pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Txt,
    Md,
    Docx,
    Pdf,
    Pptx,
    Xlsx,
    Csv,
    Html,
    Json,
    Rtf,
}

impl FileType {
    /// Map a file extension to its canonical type.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" => Some(FileType::Txt),
            "md" | "markdown" => Some(FileType::Md),
            "docx" => Some(FileType::Docx),
            "pdf" => Some(FileType::Pdf),
            "pptx" => Some(FileType::Pptx),
            "xlsx" | "xls" => Some(FileType::Xlsx),
            "csv" => Some(FileType::Csv),
            "html" | "htm" => Some(FileType::Html),
            "json" => Some(FileType::Json),
            "rtf" => Some(FileType::Rtf),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| AppError::Validation("No file extension found".to_string()))?;

        Self::from_extension(ext)
            .ok_or_else(|| AppError::Validation(format!("Unsupported file type: {}", ext)))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Txt => "txt",
            FileType::Md => "md",
            FileType::Docx => "docx",
            FileType::Pdf => "pdf",
            FileType::Pptx => "pptx",
            FileType::Xlsx => "xlsx",
            FileType::Csv => "csv",
            FileType::Html => "html",
            FileType::Json => "json",
            FileType::Rtf => "rtf",
        }
    }

    fn is_binary(&self) -> bool {
        matches!(
            self,
            FileType::Pdf | FileType::Docx | FileType::Pptx | FileType::Xlsx
        )
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Guess a mime type from the filename.
pub fn mime_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Validate uploaded bytes against the declared type before they reach the
/// parsers: size cap, magic-number match for binary formats, and an
/// executable blacklist.
pub fn validate_file_content(data: &[u8], declared: FileType) -> Result<(), AppError> {
    if data.len() > MAX_FILE_SIZE {
        return Err(AppError::Validation(format!(
            "File too large: {} bytes (max {} bytes)",
            data.len(),
            MAX_FILE_SIZE
        )));
    }

    let detected = infer::get(data);

    if let Some(kind) = &detected {
        let mime = kind.mime_type();
        if mime == "application/x-executable"
            || mime == "application/x-msdownload"
            || mime == "application/vnd.microsoft.portable-executable"
        {
            return Err(AppError::Validation(
                "Executable files are not accepted".to_string(),
            ));
        }
    }

    if declared.is_binary() {
        let kind = detected.ok_or_else(|| {
            AppError::Validation(
                "Could not determine file type from content (unknown magic numbers)".to_string(),
            )
        })?;
        let mime = kind.mime_type();

        let matches = match declared {
            FileType::Pdf => mime == "application/pdf",
            FileType::Docx => {
                mime == "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                    || mime == "application/zip"
            }
            FileType::Pptx => {
                mime == "application/vnd.openxmlformats-officedocument.presentationml.presentation"
                    || mime == "application/zip"
            }
            FileType::Xlsx => {
                mime == "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                    || mime == "application/zip"
                    || mime == "application/vnd.ms-excel"
            }
            _ => true,
        };

        if !matches {
            return Err(AppError::Validation(format!(
                "Declared type '{}' does not match detected content type '{}'",
                declared, mime
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_mapping() {
        assert_eq!(FileType::from_extension("md"), Some(FileType::Md));
        assert_eq!(FileType::from_extension("markdown"), Some(FileType::Md));
        assert_eq!(FileType::from_extension("XLS"), Some(FileType::Xlsx));
        assert_eq!(FileType::from_extension("htm"), Some(FileType::Html));
        assert_eq!(FileType::from_extension("exe"), None);
    }

    #[test]
    fn test_from_path_rejects_unknown() {
        let err = FileType::from_path(Path::new("/tmp/evil.exe"));
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_validate_size_cap() {
        let big = vec![0u8; MAX_FILE_SIZE + 1];
        let err = validate_file_content(&big, FileType::Txt);
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_validate_pdf_magic() {
        // %PDF-1.4 header
        let pdf = b"%PDF-1.4\n...".to_vec();
        assert!(validate_file_content(&pdf, FileType::Pdf).is_ok());

        let not_pdf = b"just text".to_vec();
        assert!(validate_file_content(&not_pdf, FileType::Pdf).is_err());
    }

    #[test]
    fn test_text_without_magic_accepted() {
        assert!(validate_file_content(b"hello world", FileType::Txt).is_ok());
    }
}
