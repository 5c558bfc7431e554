// Session State Machine (teacher side)
//
// Holds the authoritative local model of one live session and turns every
// accepted command into an action on the sync engine. Commands not in the
// transition table are rejected here, before anything is enqueued.

use classsync_core::action::Action;
use classsync_core::error::{ClassSyncError, DomainError};
use classsync_core::ids::{new_id, validate_id};
use classsync_core::model::{
    session_path, ConnectedStudent, SessionDocument, SessionStatus, FIELD_STATUS,
};
use classsync_queue::SyncEngine;
use classsync_store::{ContentStore, DocumentStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Advance,
    Lock,
    Unlock,
    End,
    SendMessage,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    /// Transition table; `None` means the command is not allowed
    pub fn apply(self, command: SessionCommand) -> Option<SessionState> {
        use SessionCommand::*;
        match (self, command) {
            (Self::NotStarted, Start) => Some(Self::Active),
            (Self::Active, Advance | Lock | Unlock | SendMessage) => Some(Self::Active),
            (Self::Active, End) => Some(Self::Ended),
            _ => None,
        }
    }
}

impl SessionCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Advance => "advance",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::End => "end",
            Self::SendMessage => "send-message",
        }
    }
}

#[derive(Debug)]
struct LocalSession {
    state: SessionState,
    document: Option<SessionDocument>,
    slide_count: u32,
}

impl LocalSession {
    fn check(&self, command: SessionCommand) -> Result<SessionState, ClassSyncError> {
        match self.state.apply(command) {
            Some(next) => Ok(next),
            None => match (&self.state, &self.document) {
                (SessionState::Ended, Some(doc)) => {
                    Err(ClassSyncError::session_ended(doc.session_id.clone()))
                }
                _ => Err(ClassSyncError::invalid_transition(
                    self.state.as_str(),
                    command.as_str(),
                )),
            },
        }
    }

    fn document_mut(
        &mut self,
        command: SessionCommand,
    ) -> Result<&mut SessionDocument, ClassSyncError> {
        let state = self.state;
        self.document
            .as_mut()
            .ok_or_else(|| ClassSyncError::invalid_transition(state.as_str(), command.as_str()))
    }
}

/// Teacher-side mutator of one session
pub struct SessionController {
    teacher_id: String,
    engine: Arc<SyncEngine>,
    store: Arc<dyn DocumentStore>,
    local: RwLock<LocalSession>,
}

impl SessionController {
    pub fn new(
        teacher_id: impl Into<String>,
        engine: Arc<SyncEngine>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, ClassSyncError> {
        let teacher_id = teacher_id.into();
        validate_id("teacher", &teacher_id)?;
        Ok(Self {
            teacher_id,
            engine,
            store,
            local: RwLock::new(LocalSession {
                state: SessionState::NotStarted,
                document: None,
                slide_count: 0,
            }),
        })
    }

    pub async fn state(&self) -> SessionState {
        self.local.read().await.state
    }

    pub async fn session_id(&self) -> Option<String> {
        let local = self.local.read().await;
        local.document.as_ref().map(|doc| doc.session_id.clone())
    }

    /// Local view of the session, including uncommitted changes
    pub async fn snapshot(&self) -> Option<SessionDocument> {
        self.local.read().await.document.clone()
    }

    pub async fn slide_count(&self) -> u32 {
        self.local.read().await.slide_count
    }

    /// Create the session document on slide 0; returns the new session id
    pub async fn start(
        &self,
        content: &dyn ContentStore,
        lesson_id: &str,
        class_id: &str,
    ) -> Result<String, ClassSyncError> {
        let mut local = self.local.write().await;
        let next = local.check(SessionCommand::Start)?;
        validate_id("lesson", lesson_id)?;
        validate_id("class", class_id)?;

        let slide_count = content.slide_count(lesson_id).await?;
        if slide_count == 0 {
            return Err(ClassSyncError::Domain(DomainError::SlideOutOfRange {
                index: 0,
                slide_count,
            }));
        }

        let document = SessionDocument::new(
            new_id(),
            self.teacher_id.clone(),
            lesson_id.to_string(),
            class_id.to_string(),
            self.engine.clock().now(),
        );
        self.engine
            .submit(Action::StartSession(document.clone()))
            .await?;

        let session_id = document.session_id.clone();
        tracing::info!(
            "session {} started: lesson {} ({} slides), class {}",
            session_id,
            lesson_id,
            slide_count,
            class_id
        );
        local.state = next;
        local.slide_count = slide_count;
        local.document = Some(document);
        Ok(session_id)
    }

    /// Move everyone to `to_index`, unlocking it if needed
    pub async fn advance(&self, to_index: u32) -> Result<(), ClassSyncError> {
        let mut local = self.local.write().await;
        self.refresh_status(&mut local).await?;
        local.check(SessionCommand::Advance)?;
        let slide_count = local.slide_count;
        if to_index >= slide_count {
            return Err(ClassSyncError::Domain(DomainError::SlideOutOfRange {
                index: to_index,
                slide_count,
            }));
        }

        let document = local.document_mut(SessionCommand::Advance)?;
        let now = self.engine.clock().now();
        self.engine
            .submit(Action::AdvanceSlide {
                session_id: document.session_id.clone(),
                index: to_index,
                at: now,
            })
            .await?;

        document.current_slide_index = to_index;
        document.unlocked_slide_indices.insert(to_index);
        document.last_activity = now;
        tracing::debug!("session {}: advanced to {}", document.session_id, to_index);
        Ok(())
    }

    pub async fn lock(&self) -> Result<(), ClassSyncError> {
        self.set_lock(true, SessionCommand::Lock).await
    }

    pub async fn unlock(&self) -> Result<(), ClassSyncError> {
        self.set_lock(false, SessionCommand::Unlock).await
    }

    async fn set_lock(&self, locked: bool, command: SessionCommand) -> Result<(), ClassSyncError> {
        let mut local = self.local.write().await;
        self.refresh_status(&mut local).await?;
        local.check(command)?;
        let document = local.document_mut(command)?;
        let now = self.engine.clock().now();
        self.engine
            .submit(Action::SetLock {
                session_id: document.session_id.clone(),
                locked,
                at: now,
            })
            .await?;
        document.is_locked = locked;
        document.last_activity = now;
        tracing::debug!("session {}: {}", document.session_id, command.as_str());
        Ok(())
    }

    /// Terminal; every later command is rejected
    pub async fn end(&self) -> Result<(), ClassSyncError> {
        let mut local = self.local.write().await;
        self.refresh_status(&mut local).await?;
        let next = local.check(SessionCommand::End)?;
        let document = local.document_mut(SessionCommand::End)?;
        let now = self.engine.clock().now();
        self.engine
            .submit(Action::EndSession {
                session_id: document.session_id.clone(),
                at: now,
            })
            .await?;
        document.status = SessionStatus::Ended;
        document.last_activity = now;
        tracing::info!("session {} ended", document.session_id);
        local.state = next;
        Ok(())
    }

    /// Post a chat message to the session; returns the message id
    pub async fn send_message(&self, text: &str) -> Result<String, ClassSyncError> {
        let mut local = self.local.write().await;
        self.refresh_status(&mut local).await?;
        local.check(SessionCommand::SendMessage)?;
        let Some(document) = local.document.as_ref() else {
            return Err(ClassSyncError::invalid_transition(
                local.state.as_str(),
                SessionCommand::SendMessage.as_str(),
            ));
        };
        let message_id = new_id();
        self.engine
            .submit(Action::SendMessage {
                session_id: document.session_id.clone(),
                message_id: message_id.clone(),
                sender_id: self.teacher_id.clone(),
                text: text.to_string(),
                sent_at: self.engine.clock().now(),
            })
            .await?;
        Ok(message_id)
    }

    /// Latch `Ended` when the committed session was ended elsewhere, such as
    /// by the staleness reaper. Skipped while offline or unreachable.
    async fn refresh_status(&self, local: &mut LocalSession) -> Result<(), ClassSyncError> {
        if local.state != SessionState::Active || !self.engine.is_online() {
            return Ok(());
        }
        let Some(document) = local.document.as_mut() else {
            return Ok(());
        };
        let session_id = document.session_id.clone();
        let value = match self.store.get(&session_path(&session_id)).await {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::debug!("session {}: status check skipped: {}", session_id, e);
                return Ok(());
            }
        };
        if value.get(FIELD_STATUS).and_then(|s| s.as_str()) != Some(SessionStatus::Ended.as_str())
        {
            return Ok(());
        }

        tracing::info!("session {} was ended remotely", session_id);
        document.status = SessionStatus::Ended;
        local.state = SessionState::Ended;
        self.engine.discard_session(&session_id, "session ended")?;
        Ok(())
    }

    /// Students currently on the committed roster
    pub async fn roster(&self) -> Result<BTreeMap<String, ConnectedStudent>, ClassSyncError> {
        let Some(session_id) = self.session_id().await else {
            return Err(ClassSyncError::invalid_transition(
                SessionState::NotStarted.as_str(),
                "roster",
            ));
        };
        let path = session_path(&session_id);
        let value = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| ClassSyncError::not_found(path.clone()))?;
        Ok(SessionDocument::from_value(&value)?.connected_students)
    }
}
