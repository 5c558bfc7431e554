//! Shared document shapes for live sessions and presence.
//!
//! Field names are camelCase on the wire so documents written by any client
//! share one layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// Collection holding session documents
pub const SESSIONS_COLLECTION: &str = "sessions";
/// Collection holding presence records
pub const PRESENCE_COLLECTION: &str = "presence";

// Teacher-owned field names
pub const FIELD_CURRENT_SLIDE: &str = "currentSlideIndex";
pub const FIELD_UNLOCKED_SLIDES: &str = "unlockedSlideIndices";
pub const FIELD_IS_LOCKED: &str = "isLocked";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_LAST_ACTIVITY: &str = "lastActivity";

// Student-owned maps, keyed by student id
pub const FIELD_CONNECTED_STUDENTS: &str = "connectedStudents";
pub const FIELD_STUDENT_PROGRESS: &str = "studentProgress";

// Presence record fields
pub const FIELD_LAST_SEEN: &str = "lastSeen";

pub fn session_path(session_id: &str) -> String {
    format!("{}/{}", SESSIONS_COLLECTION, session_id)
}

pub fn presence_path(user_id: &str) -> String {
    format!("{}/{}", PRESENCE_COLLECTION, user_id)
}

pub fn message_path(session_id: &str, message_id: &str) -> String {
    format!("{}/messages/{}", session_path(session_id), message_id)
}

/// Live session lifecycle as stored in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

/// Roster entry written by the owning student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedStudent {
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub current_slide_index: u32,
}

/// Per-student progress counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    #[serde(default)]
    pub completed_slides: BTreeSet<u32>,
    #[serde(default)]
    pub engaged_slides: BTreeSet<u32>,
    /// Accumulated seconds, always written as an absolute value
    #[serde(default)]
    pub total_time: u64,
}

/// One live teaching session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    pub session_id: String,
    pub teacher_id: String,
    pub lesson_id: String,
    pub class_id: String,
    pub status: SessionStatus,
    pub current_slide_index: u32,
    pub unlocked_slide_indices: BTreeSet<u32>,
    pub is_locked: bool,
    #[serde(default)]
    pub connected_students: BTreeMap<String, ConnectedStudent>,
    #[serde(default)]
    pub student_progress: BTreeMap<String, StudentProgress>,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionDocument {
    /// Fresh document for `start`: slide 0 current and unlocked, not locked
    pub fn new(
        session_id: String,
        teacher_id: String,
        lesson_id: String,
        class_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            teacher_id,
            lesson_id,
            class_id,
            status: SessionStatus::Active,
            current_slide_index: 0,
            unlocked_slide_indices: BTreeSet::from([0]),
            is_locked: false,
            connected_students: BTreeMap::new(),
            student_progress: BTreeMap::new(),
            start_time: now,
            last_activity: now,
        }
    }

    pub fn from_value(value: &JsonValue) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    pub fn is_unlocked(&self, index: u32) -> bool {
        self.unlocked_slide_indices.contains(&index)
    }

    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// One per user, independent of any session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_session_id: Option<String>,
}

impl PresenceRecord {
    pub fn from_value(value: &JsonValue) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    /// `lastSeen` strictly older than `now - window`
    pub fn is_stale(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.last_seen < now - window
    }
}

/// Slide metadata from the content store; rendering payload stays opaque
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideDescriptor {
    pub order: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: JsonValue,
}
