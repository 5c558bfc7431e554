use crate::error::ClassSyncError;

const MAX_ID_LENGTH: usize = 128;

/// Generate a fresh opaque identifier
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Validate an id used as a document name or as a map key inside a document.
///
/// Ids end up inside dotted field paths (`connectedStudents.<id>`) and
/// slash-separated document paths, so neither separator is allowed.
pub fn validate_id(kind: &str, id: &str) -> Result<(), ClassSyncError> {
    if id.trim().is_empty() {
        return Err(ClassSyncError::invalid_id(kind, "cannot be empty"));
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(ClassSyncError::invalid_id(
            kind,
            format!("too long (max {})", MAX_ID_LENGTH),
        ));
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | ':'))
    {
        return Err(ClassSyncError::invalid_id(
            kind,
            "contains unsupported characters",
        ));
    }
    Ok(())
}
