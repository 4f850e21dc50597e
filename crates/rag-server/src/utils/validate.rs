use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

use crate::utils::error::AppError;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[1-5][0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$",
    )
    .unwrap()
});

/// Strict UUID v1-v5 check.
pub fn is_valid_uuid(value: &str) -> bool {
    UUID_RE.is_match(value)
}

pub fn validate_uuid(value: &str) -> Result<uuid::Uuid, AppError> {
    if !is_valid_uuid(value) {
        return Err(AppError::Validation(format!("Invalid UUID: {}", value)));
    }
    uuid::Uuid::parse_str(value).map_err(|e| AppError::Validation(format!("Invalid UUID: {}", e)))
}

/// Validate and canonicalize a document path.
///
/// Rejects null bytes and parent-directory traversal, resolves to an
/// absolute path, and optionally enforces an allow-list of base
/// directories.
pub fn validate_document_path(
    raw: &str,
    allowed_base_dirs: &[PathBuf],
) -> Result<PathBuf, AppError> {
    if raw.contains('\0') {
        return Err(AppError::Validation("Path contains null byte".to_string()));
    }

    let path = Path::new(raw);
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(AppError::Validation(format!(
            "Path traversal rejected: {}",
            raw
        )));
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| AppError::Internal(format!("cwd unavailable: {}", e)))?
            .join(path)
    };

    // Canonicalization resolves symlinks; any traversal surviving the
    // component check surfaces as a prefix mismatch below.
    let canonical = absolute
        .canonicalize()
        .map_err(|e| AppError::Validation(format!("Path not accessible: {}", e)))?;

    if !allowed_base_dirs.is_empty()
        && !allowed_base_dirs
            .iter()
            .any(|base| canonical.starts_with(base))
    {
        return Err(AppError::Validation(format!(
            "Path outside allowed directories: {}",
            canonical.display()
        )));
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_v4_accepted() {
        assert!(is_valid_uuid("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_valid_uuid(&uuid::Uuid::new_v4().to_string()));
    }

    #[test]
    fn test_uuid_rejects_malformed() {
        assert!(!is_valid_uuid("not-a-uuid"));
        assert!(!is_valid_uuid("550e8400e29b41d4a716446655440000"));
        // version nibble 0 is outside v1-v5
        assert!(!is_valid_uuid("550e8400-e29b-01d4-a716-446655440000"));
        // variant nibble must be 8, 9, a or b
        assert!(!is_valid_uuid("550e8400-e29b-41d4-c716-446655440000"));
    }

    #[test]
    fn test_path_rejects_null_byte() {
        let err = validate_document_path("/tmp/a\0b.txt", &[]);
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_path_rejects_traversal() {
        let err = validate_document_path("/tmp/../etc/passwd", &[]);
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_path_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.txt");
        std::fs::write(&file, "hello").unwrap();

        let base = dir.path().canonicalize().unwrap();
        let ok = validate_document_path(file.to_str().unwrap(), &[base]);
        assert!(ok.is_ok());

        let other = tempfile::tempdir().unwrap();
        let denied = validate_document_path(
            file.to_str().unwrap(),
            &[other.path().to_path_buf()],
        );
        assert!(matches!(denied, Err(AppError::Validation(_))));
    }
}
