// Student Synchronization Client
//
// Follows one session document through a store subscription and writes the
// student's own roster and progress entries through the sync engine. Once
// the session is seen as ended it stays ended locally, whatever later
// snapshots say.

use crate::navigator::{NavigationMode, Navigator, TeacherView};
use chrono::{DateTime, Utc};
use classsync_core::action::Action;
use classsync_core::error::{ClassSyncError, DomainError};
use classsync_core::ids::{new_id, validate_id};
use classsync_core::model::{session_path, SessionDocument};
use classsync_presence::PresenceTracker;
use classsync_queue::SyncEngine;
use classsync_store::{DocumentStore, Snapshot, Subscription};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on the final leave write
pub const LEAVE_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// What the UI needs after a remote change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUpdate {
    pub version: u64,
    pub current_slide_index: u32,
    pub unlocked_slide_indices: BTreeSet<u32>,
    pub is_locked: bool,
    pub ended: bool,
    pub position: u32,
    pub mode: NavigationMode,
    /// The local position changed with this update
    pub moved: bool,
}

pub struct StudentSyncClient {
    session_id: String,
    student_id: String,
    engine: Arc<SyncEngine>,
    subscription: Subscription,
    navigator: Navigator,
    presence: Option<Arc<PresenceTracker>>,
    joined_at: DateTime<Utc>,
    last_version: u64,
    ended: bool,
    total_time_secs: u64,
    timed_since: DateTime<Utc>,
}

impl StudentSyncClient {
    /// Subscribe to the session and put the student on the roster
    pub async fn join(
        store: &dyn DocumentStore,
        engine: Arc<SyncEngine>,
        session_id: &str,
        student_id: &str,
    ) -> Result<Self, ClassSyncError> {
        validate_id("session", session_id)?;
        validate_id("student", student_id)?;

        let path = session_path(session_id);
        let mut subscription = store.subscribe(&path).await?;
        let snapshot = subscription
            .next()
            .await
            .ok_or_else(|| ClassSyncError::not_found(path.clone()))?;
        let Some(data) = snapshot.data else {
            return Err(ClassSyncError::not_found(path));
        };
        let document = SessionDocument::from_value(&data)?;
        if document.is_ended() {
            return Err(ClassSyncError::session_ended(session_id));
        }

        let navigator = Navigator::new(TeacherView::from(&document));
        let now = engine.clock().now();
        engine
            .submit(Action::JoinSession {
                session_id: session_id.to_string(),
                student_id: student_id.to_string(),
                slide_index: navigator.position(),
                at: now,
            })
            .await?;
        tracing::info!(
            "student {} joined {} on slide {}",
            student_id,
            session_id,
            navigator.position()
        );

        Ok(Self {
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
            engine,
            subscription,
            navigator,
            presence: None,
            joined_at: now,
            last_version: snapshot.version,
            ended: false,
            total_time_secs: 0,
            timed_since: now,
        })
    }

    /// Publish this session on the student's presence record
    pub async fn attach_presence(
        &mut self,
        tracker: Arc<PresenceTracker>,
    ) -> Result<(), ClassSyncError> {
        tracker.set_session(Some(self.session_id.clone())).await?;
        self.presence = Some(tracker);
        Ok(())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn position(&self) -> u32 {
        self.navigator.position()
    }

    pub fn mode(&self) -> NavigationMode {
        self.navigator.mode()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn teacher_view(&self) -> &TeacherView {
        self.navigator.view()
    }

    /// Wait for the next remote change; `None` once the feed closes
    pub async fn next_update(&mut self) -> Result<Option<SessionUpdate>, ClassSyncError> {
        match self.subscription.next().await {
            Some(snapshot) => self.apply_snapshot(snapshot).await.map(Some),
            None => Ok(None),
        }
    }

    /// Apply every change that has already arrived
    pub async fn poll_updates(&mut self) -> Result<Vec<SessionUpdate>, ClassSyncError> {
        let mut updates = Vec::new();
        while let Some(snapshot) = self.subscription.try_next() {
            updates.push(self.apply_snapshot(snapshot).await?);
        }
        Ok(updates)
    }

    async fn apply_snapshot(
        &mut self,
        snapshot: Snapshot,
    ) -> Result<SessionUpdate, ClassSyncError> {
        self.last_version = snapshot.version;
        if self.ended {
            return Ok(self.update(false));
        }

        let document = match snapshot.data {
            Some(data) => Some(SessionDocument::from_value(&data)?),
            None => None,
        };
        match document {
            Some(document) if !document.is_ended() => {
                let moved = self.navigator.apply(TeacherView::from(&document)).is_some();
                if moved {
                    tracing::debug!(
                        "student {}: following to slide {}",
                        self.student_id,
                        self.navigator.position()
                    );
                }
                Ok(self.update(moved))
            }
            _ => {
                self.mark_ended().await?;
                Ok(self.update(false))
            }
        }
    }

    async fn mark_ended(&mut self) -> Result<(), ClassSyncError> {
        self.ended = true;
        let discarded = self
            .engine
            .discard_session(&self.session_id, "session ended")?;
        tracing::info!(
            "student {}: session {} ended, {} queued actions discarded",
            self.student_id,
            self.session_id,
            discarded
        );
        if let Some(presence) = &self.presence {
            presence.set_session(None).await?;
        }
        Ok(())
    }

    fn update(&self, moved: bool) -> SessionUpdate {
        let view = self.navigator.view();
        SessionUpdate {
            version: self.last_version,
            current_slide_index: view.current_slide_index,
            unlocked_slide_indices: view.unlocked_slide_indices.clone(),
            is_locked: view.is_locked,
            ended: self.ended,
            position: self.navigator.position(),
            mode: self.navigator.mode(),
            moved,
        }
    }

    fn ensure_active(&self) -> Result<(), ClassSyncError> {
        if self.ended {
            return Err(ClassSyncError::session_ended(self.session_id.clone()));
        }
        Ok(())
    }

    /// Manual navigation; may enter review mode
    pub fn navigate_to(&mut self, index: u32) -> Result<u32, ClassSyncError> {
        self.ensure_active()?;
        self.navigator.navigate_to(index)
    }

    /// Resume following the teacher
    pub fn follow(&mut self) -> Result<u32, ClassSyncError> {
        self.ensure_active()?;
        Ok(self.navigator.follow())
    }

    /// Refresh this student's roster entry
    pub async fn heartbeat(&self) -> Result<(), ClassSyncError> {
        self.ensure_active()?;
        self.engine
            .submit(Action::StudentHeartbeat {
                session_id: self.session_id.clone(),
                student_id: self.student_id.clone(),
                joined_at: self.joined_at,
                slide_index: self.navigator.position(),
                at: self.engine.clock().now(),
            })
            .await?;
        Ok(())
    }

    /// Record a completed slide along with the absolute time spent so far
    pub async fn complete_slide(&mut self, slide_index: u32) -> Result<u64, ClassSyncError> {
        self.ensure_active()?;
        self.require_unlocked(slide_index)?;

        let now = self.engine.clock().now();
        let elapsed = (now - self.timed_since).num_seconds().max(0) as u64;
        let total_time_secs = self.total_time_secs + elapsed;
        self.engine
            .submit(Action::UpdateProgress {
                session_id: self.session_id.clone(),
                student_id: self.student_id.clone(),
                slide_index,
                total_time_secs,
            })
            .await?;
        self.total_time_secs = total_time_secs;
        self.timed_since = now;
        Ok(total_time_secs)
    }

    /// Mark an interaction on a slide
    pub async fn engage(&self, slide_index: u32) -> Result<(), ClassSyncError> {
        self.ensure_active()?;
        self.require_unlocked(slide_index)?;
        self.engine
            .submit(Action::MarkEngaged {
                session_id: self.session_id.clone(),
                student_id: self.student_id.clone(),
                slide_index,
            })
            .await?;
        Ok(())
    }

    fn require_unlocked(&self, slide_index: u32) -> Result<(), ClassSyncError> {
        if self.navigator.is_unlocked(slide_index) {
            Ok(())
        } else {
            Err(ClassSyncError::Domain(DomainError::SlideNotUnlocked {
                index: slide_index,
            }))
        }
    }

    /// Post a chat message; returns the message id
    pub async fn send_message(&self, text: &str) -> Result<String, ClassSyncError> {
        self.ensure_active()?;
        let message_id = new_id();
        self.engine
            .submit(Action::SendMessage {
                session_id: self.session_id.clone(),
                message_id: message_id.clone(),
                sender_id: self.student_id.clone(),
                text: text.to_string(),
                sent_at: self.engine.clock().now(),
            })
            .await?;
        Ok(message_id)
    }

    /// Best-effort removal from the roster
    ///
    /// Returns whether the write was confirmed. If it was not, the reaper
    /// removes the entry once it goes stale.
    pub async fn leave(self) -> Result<bool, ClassSyncError> {
        if self.ended {
            return Ok(false);
        }
        let delivered = self
            .engine
            .submit_urgent(
                Action::LeaveSession {
                    session_id: self.session_id.clone(),
                    student_id: self.student_id.clone(),
                },
                LEAVE_WRITE_TIMEOUT,
            )
            .await?;
        if let Some(presence) = &self.presence {
            presence.set_session(None).await?;
        }
        tracing::info!(
            "student {} left {} (confirmed: {})",
            self.student_id,
            self.session_id,
            delivered
        );
        Ok(delivered)
    }
}
