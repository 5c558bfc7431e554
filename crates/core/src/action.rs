//! Typed mutations against the shared documents.
//!
//! Each variant maps to a fixed set of field paths. Teacher variants only
//! touch navigation/lock/status fields; student variants only touch the
//! `connectedStudents` and `studentProgress` entries keyed by their own
//! `student_id`. There is no variant that writes an arbitrary path.
//!
//! Every variant re-specifies its target value or performs a set-union, so
//! replaying an action whose acknowledgment was lost leaves the document
//! unchanged.

use crate::document::{field_path, DocumentWrite, FieldWrite};
use crate::model::{
    message_path, presence_path, session_path, PresenceStatus, SessionDocument, SessionStatus,
    FIELD_CONNECTED_STUDENTS, FIELD_CURRENT_SLIDE, FIELD_IS_LOCKED, FIELD_LAST_ACTIVITY,
    FIELD_LAST_SEEN, FIELD_STATUS, FIELD_STUDENT_PROGRESS, FIELD_UNLOCKED_SLIDES,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Who is allowed to issue an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Writer {
    Teacher,
    Student(String),
    User(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Action {
    StartSession(SessionDocument),
    AdvanceSlide {
        session_id: String,
        index: u32,
        at: DateTime<Utc>,
    },
    SetLock {
        session_id: String,
        locked: bool,
        at: DateTime<Utc>,
    },
    EndSession {
        session_id: String,
        at: DateTime<Utc>,
    },
    JoinSession {
        session_id: String,
        student_id: String,
        slide_index: u32,
        at: DateTime<Utc>,
    },
    StudentHeartbeat {
        session_id: String,
        student_id: String,
        joined_at: DateTime<Utc>,
        slide_index: u32,
        at: DateTime<Utc>,
    },
    UpdateProgress {
        session_id: String,
        student_id: String,
        slide_index: u32,
        total_time_secs: u64,
    },
    MarkEngaged {
        session_id: String,
        student_id: String,
        slide_index: u32,
    },
    LeaveSession {
        session_id: String,
        student_id: String,
    },
    UpdatePresence {
        user_id: String,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
        session_id: Option<String>,
    },
    SendMessage {
        session_id: String,
        message_id: String,
        sender_id: String,
        text: String,
        sent_at: DateTime<Utc>,
    },
}

fn ts(at: &DateTime<Utc>) -> JsonValue {
    JsonValue::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn roster_entry(joined_at: &DateTime<Utc>, at: &DateTime<Utc>, slide_index: u32) -> JsonValue {
    json!({
        "joinedAt": ts(joined_at),
        "lastActivity": ts(at),
        "currentSlideIndex": slide_index,
    })
}

impl Action {
    /// Tag stored alongside the payload in the local queue
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartSession(_) => "start-session",
            Self::AdvanceSlide { .. } => "advance-slide",
            Self::SetLock { .. } => "set-lock",
            Self::EndSession { .. } => "end-session",
            Self::JoinSession { .. } => "join-session",
            Self::StudentHeartbeat { .. } => "student-heartbeat",
            Self::UpdateProgress { .. } => "update-progress",
            Self::MarkEngaged { .. } => "mark-engaged",
            Self::LeaveSession { .. } => "leave-session",
            Self::UpdatePresence { .. } => "update-presence",
            Self::SendMessage { .. } => "send-message",
        }
    }

    /// Session this action targets, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::StartSession(doc) => Some(&doc.session_id),
            Self::AdvanceSlide { session_id, .. }
            | Self::SetLock { session_id, .. }
            | Self::EndSession { session_id, .. }
            | Self::JoinSession { session_id, .. }
            | Self::StudentHeartbeat { session_id, .. }
            | Self::UpdateProgress { session_id, .. }
            | Self::MarkEngaged { session_id, .. }
            | Self::LeaveSession { session_id, .. }
            | Self::SendMessage { session_id, .. } => Some(session_id),
            Self::UpdatePresence { .. } => None,
        }
    }

    pub fn writer(&self) -> Writer {
        match self {
            Self::StartSession(_)
            | Self::AdvanceSlide { .. }
            | Self::SetLock { .. }
            | Self::EndSession { .. } => Writer::Teacher,
            Self::JoinSession { student_id, .. }
            | Self::StudentHeartbeat { student_id, .. }
            | Self::UpdateProgress { student_id, .. }
            | Self::MarkEngaged { student_id, .. }
            | Self::LeaveSession { student_id, .. } => Writer::Student(student_id.clone()),
            Self::UpdatePresence { user_id, .. } => Writer::User(user_id.clone()),
            Self::SendMessage { sender_id, .. } => Writer::User(sender_id.clone()),
        }
    }

    /// The field-level writes this action commits
    pub fn document_write(&self) -> DocumentWrite {
        match self {
            Self::StartSession(doc) => DocumentWrite {
                path: session_path(&doc.session_id),
                writes: vec![
                    FieldWrite::set("sessionId", doc.session_id.clone()),
                    FieldWrite::set("teacherId", doc.teacher_id.clone()),
                    FieldWrite::set("lessonId", doc.lesson_id.clone()),
                    FieldWrite::set("classId", doc.class_id.clone()),
                    FieldWrite::set(FIELD_STATUS, doc.status.as_str()),
                    FieldWrite::set(FIELD_CURRENT_SLIDE, doc.current_slide_index),
                    FieldWrite::union(
                        FIELD_UNLOCKED_SLIDES,
                        doc.unlocked_slide_indices.iter().map(|i| json!(i)).collect(),
                    ),
                    FieldWrite::set(FIELD_IS_LOCKED, doc.is_locked),
                    FieldWrite::set("startTime", ts(&doc.start_time)),
                    FieldWrite::set(FIELD_LAST_ACTIVITY, ts(&doc.last_activity)),
                ],
                create_if_missing: true,
            },
            Self::AdvanceSlide {
                session_id,
                index,
                at,
            } => DocumentWrite {
                path: session_path(session_id),
                writes: vec![
                    FieldWrite::set(FIELD_CURRENT_SLIDE, *index),
                    FieldWrite::union(FIELD_UNLOCKED_SLIDES, vec![json!(index)]),
                    FieldWrite::set(FIELD_LAST_ACTIVITY, ts(at)),
                ],
                create_if_missing: false,
            },
            Self::SetLock {
                session_id,
                locked,
                at,
            } => DocumentWrite {
                path: session_path(session_id),
                writes: vec![
                    FieldWrite::set(FIELD_IS_LOCKED, *locked),
                    FieldWrite::set(FIELD_LAST_ACTIVITY, ts(at)),
                ],
                create_if_missing: false,
            },
            Self::EndSession { session_id, at } => DocumentWrite {
                path: session_path(session_id),
                writes: vec![
                    FieldWrite::set(FIELD_STATUS, SessionStatus::Ended.as_str()),
                    FieldWrite::set(FIELD_LAST_ACTIVITY, ts(at)),
                ],
                create_if_missing: false,
            },
            Self::JoinSession {
                session_id,
                student_id,
                slide_index,
                at,
            } => DocumentWrite {
                path: session_path(session_id),
                writes: vec![FieldWrite::set(
                    field_path(&[FIELD_CONNECTED_STUDENTS, student_id]),
                    roster_entry(at, at, *slide_index),
                )],
                create_if_missing: false,
            },
            Self::StudentHeartbeat {
                session_id,
                student_id,
                joined_at,
                slide_index,
                at,
            } => DocumentWrite {
                path: session_path(session_id),
                writes: vec![FieldWrite::set(
                    field_path(&[FIELD_CONNECTED_STUDENTS, student_id]),
                    roster_entry(joined_at, at, *slide_index),
                )],
                create_if_missing: false,
            },
            Self::UpdateProgress {
                session_id,
                student_id,
                slide_index,
                total_time_secs,
            } => DocumentWrite {
                path: session_path(session_id),
                writes: vec![
                    FieldWrite::union(
                        field_path(&[FIELD_STUDENT_PROGRESS, student_id, "completedSlides"]),
                        vec![json!(slide_index)],
                    ),
                    FieldWrite::set(
                        field_path(&[FIELD_STUDENT_PROGRESS, student_id, "totalTime"]),
                        *total_time_secs,
                    ),
                ],
                create_if_missing: false,
            },
            Self::MarkEngaged {
                session_id,
                student_id,
                slide_index,
            } => DocumentWrite {
                path: session_path(session_id),
                writes: vec![FieldWrite::union(
                    field_path(&[FIELD_STUDENT_PROGRESS, student_id, "engagedSlides"]),
                    vec![json!(slide_index)],
                )],
                create_if_missing: false,
            },
            Self::LeaveSession {
                session_id,
                student_id,
            } => DocumentWrite {
                path: session_path(session_id),
                writes: vec![FieldWrite::delete(field_path(&[
                    FIELD_CONNECTED_STUDENTS,
                    student_id,
                ]))],
                create_if_missing: false,
            },
            Self::UpdatePresence {
                user_id,
                status,
                last_seen,
                session_id,
            } => {
                let session_write = match session_id {
                    Some(id) => FieldWrite::set("currentSessionId", id.clone()),
                    None => FieldWrite::delete("currentSessionId"),
                };
                DocumentWrite {
                    path: presence_path(user_id),
                    writes: vec![
                        FieldWrite::set("userId", user_id.clone()),
                        FieldWrite::set("status", status.as_str()),
                        FieldWrite::set(FIELD_LAST_SEEN, ts(last_seen)),
                        session_write,
                    ],
                    create_if_missing: true,
                }
            }
            Self::SendMessage {
                session_id,
                message_id,
                sender_id,
                text,
                sent_at,
            } => DocumentWrite {
                path: message_path(session_id, message_id),
                writes: vec![
                    FieldWrite::set("messageId", message_id.clone()),
                    FieldWrite::set("senderId", sender_id.clone()),
                    FieldWrite::set("text", text.clone()),
                    FieldWrite::set("sentAt", ts(sent_at)),
                ],
                create_if_missing: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::apply_writes;
    use crate::model::SessionDocument;

    const TEACHER_FIELDS: &[&str] = &[
        "sessionId",
        "teacherId",
        "lessonId",
        "classId",
        "startTime",
        FIELD_STATUS,
        FIELD_CURRENT_SLIDE,
        FIELD_UNLOCKED_SLIDES,
        FIELD_IS_LOCKED,
        FIELD_LAST_ACTIVITY,
    ];

    fn sample_actions() -> Vec<Action> {
        let at = Utc::now();
        vec![
            Action::StartSession(SessionDocument::new(
                "s1".to_string(),
                "t1".to_string(),
                "l1".to_string(),
                "c1".to_string(),
                at,
            )),
            Action::AdvanceSlide {
                session_id: "s1".to_string(),
                index: 3,
                at,
            },
            Action::SetLock {
                session_id: "s1".to_string(),
                locked: true,
                at,
            },
            Action::JoinSession {
                session_id: "s1".to_string(),
                student_id: "st1".to_string(),
                slide_index: 0,
                at,
            },
            Action::StudentHeartbeat {
                session_id: "s1".to_string(),
                student_id: "st1".to_string(),
                joined_at: at,
                slide_index: 3,
                at,
            },
            Action::UpdateProgress {
                session_id: "s1".to_string(),
                student_id: "st1".to_string(),
                slide_index: 2,
                total_time_secs: 90,
            },
            Action::MarkEngaged {
                session_id: "s1".to_string(),
                student_id: "st1".to_string(),
                slide_index: 2,
            },
            Action::LeaveSession {
                session_id: "s1".to_string(),
                student_id: "st1".to_string(),
            },
            Action::EndSession {
                session_id: "s1".to_string(),
                at,
            },
            Action::UpdatePresence {
                user_id: "st1".to_string(),
                status: PresenceStatus::Online,
                last_seen: at,
                session_id: Some("s1".to_string()),
            },
            Action::SendMessage {
                session_id: "s1".to_string(),
                message_id: "m1".to_string(),
                sender_id: "st1".to_string(),
                text: "done".to_string(),
                sent_at: at,
            },
        ]
    }

    #[test]
    fn test_replaying_any_action_is_idempotent() {
        for action in sample_actions() {
            let batch = action.document_write();
            let mut once = json!({});
            apply_writes(&mut once, &batch.writes).unwrap();
            let mut twice = once.clone();
            apply_writes(&mut twice, &batch.writes).unwrap();
            assert_eq!(once, twice, "replay changed state for {}", action.kind());
        }
    }

    #[test]
    fn test_writers_stay_in_their_fields() {
        for action in sample_actions() {
            let batch = action.document_write();
            match action.writer() {
                Writer::Teacher | Writer::Student(_) => {
                    assert_eq!(batch.path, session_path("s1"), "{}", action.kind())
                }
                Writer::User(id) => {
                    let own_message = batch.path == message_path("s1", "m1")
                        && batch.writes.contains(&FieldWrite::set("senderId", id.clone()));
                    assert!(
                        batch.path == presence_path(&id) || own_message,
                        "{} wrote {}",
                        action.kind(),
                        batch.path
                    );
                }
            }
            for write in &batch.writes {
                let root = write.path().split('.').next().unwrap();
                match action.writer() {
                    Writer::Teacher => assert!(
                        TEACHER_FIELDS.contains(&root),
                        "{} wrote {}",
                        action.kind(),
                        write.path()
                    ),
                    Writer::Student(id) => {
                        let roster = format!("{}.{}", FIELD_CONNECTED_STUDENTS, id);
                        let progress = format!("{}.{}", FIELD_STUDENT_PROGRESS, id);
                        assert!(
                            write.path().starts_with(&roster)
                                || write.path().starts_with(&progress),
                            "{} wrote {}",
                            action.kind(),
                            write.path()
                        );
                    }
                    Writer::User(_) => {}
                }
            }
        }
    }

    #[test]
    fn test_queue_wire_shape() {
        let action = Action::AdvanceSlide {
            session_id: "s1".to_string(),
            index: 5,
            at: Utc::now(),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], json!("advance-slide"));
        assert_eq!(value["payload"]["sessionId"], json!("s1"));
        assert_eq!(value["payload"]["index"], json!(5));
        assert_eq!(action.kind(), "advance-slide");
    }

    #[test]
    fn test_presence_clears_session_when_absent() {
        let action = Action::UpdatePresence {
            user_id: "u1".to_string(),
            status: PresenceStatus::Offline,
            last_seen: Utc::now(),
            session_id: None,
        };
        let batch = action.document_write();
        assert_eq!(batch.path, "presence/u1");
        assert!(batch.create_if_missing);
        assert!(batch
            .writes
            .contains(&FieldWrite::delete("currentSessionId")));
    }
}
