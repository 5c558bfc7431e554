//! ClassSync Error Types
//!
//! This module defines a layered error hierarchy:
//! - `DomainError`: Protocol-level failures (transitions, ranges, retries, reaping, config)
//! - `InfraError`: Infrastructure errors (IO, serialization, queue database, document store)
//! - `ClassSyncError`: Top-level error that wraps both categories

use std::fmt;

/// Domain-level errors representing synchronization protocol failures
#[derive(Debug)]
pub enum DomainError {
    /// A session command that the transition table does not allow
    InvalidTransition { from: String, command: String },
    /// `advance` targeted an index outside `[0, last_slide]`
    SlideOutOfRange { index: u32, slide_count: u32 },
    /// A student tried to navigate to a slide it may not see
    SlideNotUnlocked { index: u32 },
    /// The session has ended; teacher-owned fields are frozen
    SessionEnded { session_id: String },
    /// An action exhausted its retry bound or was rejected by the store
    PermanentActionFailure {
        action_id: String,
        action_type: String,
        reason: String,
    },
    /// A reaper pass could not enumerate every record
    PartialEnumeration { collection: String, reason: String },
    /// A document or entity does not exist
    NotFound { what: String },
    /// An id cannot be used as a document name or map key
    InvalidId { kind: String, reason: String },
    /// Configuration file not found at the specified path
    ConfigNotFound { path: String },
    /// Configuration validation failed
    ConfigInvalid { field: String, reason: String },
    /// Configuration parsing failed
    ConfigParse { source: String },
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { from, command } => {
                write!(f, "Invalid transition: cannot {} while {}", command, from)
            }
            Self::SlideOutOfRange { index, slide_count } => write!(
                f,
                "Slide index {} out of range (lesson has {} slides)",
                index, slide_count
            ),
            Self::SlideNotUnlocked { index } => write!(f, "Slide {} is not unlocked", index),
            Self::SessionEnded { session_id } => write!(f, "Session {} has ended", session_id),
            Self::PermanentActionFailure {
                action_id,
                action_type,
                reason,
            } => write!(
                f,
                "Action {} ({}) failed permanently: {}",
                action_id, action_type, reason
            ),
            Self::PartialEnumeration { collection, reason } => {
                write!(f, "Could not enumerate '{}': {}", collection, reason)
            }
            Self::NotFound { what } => write!(f, "Not found: {}", what),
            Self::InvalidId { kind, reason } => write!(f, "Invalid {}: {}", kind, reason),
            Self::ConfigNotFound { path } => write!(f, "Config not found: {}", path),
            Self::ConfigInvalid { field, reason } => {
                write!(f, "Config invalid [{}]: {}", field, reason)
            }
            Self::ConfigParse { source } => write!(f, "Config parse error: {}", source),
        }
    }
}

impl std::error::Error for DomainError {}

/// Infrastructure-level errors representing external system failures
#[derive(Debug)]
pub enum InfraError {
    /// IO operation failed
    Io(std::io::Error),
    /// JSON serialization/deserialization failed
    Json(serde_json::Error),
    /// YAML serialization/deserialization failed
    Yaml(serde_yml::Error),
    /// Local queue database operation failed
    Database(rusqlite::Error),
    /// Remote document store call failed
    Store { transient: bool, reason: String },
}

impl fmt::Display for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Json(err) => write!(f, "JSON error: {}", err),
            Self::Yaml(err) => write!(f, "YAML error: {}", err),
            Self::Database(err) => write!(f, "Database error: {}", err),
            Self::Store { transient, reason } => {
                let kind = if *transient { "transient" } else { "rejected" };
                write!(f, "Store error ({}): {}", kind, reason)
            }
        }
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Yaml(e) => Some(e),
            Self::Database(e) => Some(e),
            Self::Store { .. } => None,
        }
    }
}

impl From<std::io::Error> for InfraError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<serde_yml::Error> for InfraError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Yaml(err)
    }
}

impl From<rusqlite::Error> for InfraError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

/// Top-level error type for ClassSync
///
/// Wraps both domain and infrastructure errors so callers can surface
/// invalid-transition and permanent failures to the user while transient
/// infrastructure failures are handled by the queue.
#[derive(Debug)]
pub enum ClassSyncError {
    /// Protocol error
    Domain(DomainError),
    /// Infrastructure/external system error
    Infra(InfraError),
    /// Generic error for edge cases
    Other(String),
}

impl ClassSyncError {
    pub fn invalid_transition(from: impl Into<String>, command: impl Into<String>) -> Self {
        Self::Domain(DomainError::InvalidTransition {
            from: from.into(),
            command: command.into(),
        })
    }

    pub fn session_ended(session_id: impl Into<String>) -> Self {
        Self::Domain(DomainError::SessionEnded {
            session_id: session_id.into(),
        })
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Domain(DomainError::NotFound { what: what.into() })
    }

    pub fn invalid_id(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::InvalidId {
            kind: kind.into(),
            reason: reason.into(),
        })
    }

    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigNotFound { path: path.into() })
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn config_parse_error(source: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigParse {
            source: source.into(),
        })
    }

    /// Errors a UI should show to the user rather than swallow
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::Domain(
                DomainError::InvalidTransition { .. }
                    | DomainError::SlideOutOfRange { .. }
                    | DomainError::SlideNotUnlocked { .. }
                    | DomainError::SessionEnded { .. }
                    | DomainError::InvalidId { .. }
                    | DomainError::PermanentActionFailure { .. }
            )
        )
    }
}

impl fmt::Display for ClassSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(e) => write!(f, "{}", e),
            Self::Infra(e) => write!(f, "{}", e),
            Self::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for ClassSyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Domain(e) => Some(e),
            Self::Infra(e) => Some(e),
            Self::Other(_) => None,
        }
    }
}

impl From<DomainError> for ClassSyncError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<InfraError> for ClassSyncError {
    fn from(err: InfraError) -> Self {
        Self::Infra(err)
    }
}

// Convenience conversions from infrastructure error sources
impl From<std::io::Error> for ClassSyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Infra(InfraError::Io(err))
    }
}

impl From<serde_json::Error> for ClassSyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Infra(InfraError::Json(err))
    }
}

impl From<serde_yml::Error> for ClassSyncError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Infra(InfraError::Yaml(err))
    }
}

impl From<rusqlite::Error> for ClassSyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Infra(InfraError::Database(err))
    }
}
