// Offline Action Queue
//
// In-memory mirror of the durable storage. Storage is always written first,
// so a crash between the two never loses an action that was reported queued.

use crate::pending::PendingAction;
use crate::storage::{CorruptEntry, QueueStorage};
use crate::QueueError;
use chrono::{DateTime, Utc};
use classsync_core::action::Action;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

pub struct OfflineActionQueue {
    storage: Box<dyn QueueStorage>,
    pending: Mutex<VecDeque<PendingAction>>,
    /// Undecodable entries found on open, not yet reported
    corrupt: Mutex<Vec<CorruptEntry>>,
}

impl OfflineActionQueue {
    /// Open the queue, restoring anything left over from a previous run
    pub fn open(storage: Box<dyn QueueStorage>) -> Result<Self, QueueError> {
        let restored = storage.load()?;
        if !restored.actions.is_empty() {
            tracing::info!("queue: restored {} pending actions", restored.actions.len());
        }
        if !restored.corrupt.is_empty() {
            tracing::warn!(
                "queue: {} undecodable entries set aside",
                restored.corrupt.len()
            );
        }
        Ok(Self {
            storage,
            pending: Mutex::new(restored.actions.into()),
            corrupt: Mutex::new(restored.corrupt),
        })
    }

    /// Undecodable entries found on open; each is returned once
    pub fn take_corrupt(&self) -> Vec<CorruptEntry> {
        std::mem::take(&mut *self.corrupt.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<PendingAction>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an action at the tail (write-ahead).
    ///
    /// A presence update supersedes any older queued presence update for the
    /// same user, except the head, which a drain may already be committing.
    pub fn enqueue(&self, action: Action, now: DateTime<Utc>) -> Result<PendingAction, QueueError> {
        let pending_action = PendingAction::new(action, now);
        let mut pending = self.pending();
        self.storage.append(&pending_action)?;

        let superseded: Vec<String> = match presence_user(&pending_action.action) {
            Some(user_id) => pending
                .iter()
                .skip(1)
                .filter(|a| presence_user(&a.action) == Some(user_id))
                .map(|a| a.id.clone())
                .collect(),
            None => Vec::new(),
        };
        for id in &superseded {
            self.storage.remove(id)?;
            pending.retain(|a| &a.id != id);
        }

        pending.push_back(pending_action.clone());
        tracing::debug!(
            "queue: enqueued {} ({}), depth {}, superseded {}",
            pending_action.id,
            pending_action.kind(),
            pending.len(),
            superseded.len()
        );
        Ok(pending_action)
    }

    pub fn head(&self) -> Option<PendingAction> {
        self.pending().front().cloned()
    }

    /// Remove a committed or dropped action
    pub fn remove(&self, id: &str) -> Result<bool, QueueError> {
        let mut pending = self.pending();
        self.storage.remove(id)?;
        let before = pending.len();
        pending.retain(|a| a.id != id);
        Ok(pending.len() != before)
    }

    /// Count one failed attempt; returns the new retry count
    pub fn record_failure(&self, id: &str) -> Result<u32, QueueError> {
        let mut pending = self.pending();
        let Some(action) = pending.iter_mut().find(|a| a.id == id) else {
            return Ok(0);
        };
        let retry_count = action.retry_count.saturating_add(1);
        self.storage.set_retry_count(id, retry_count)?;
        action.retry_count = retry_count;
        Ok(retry_count)
    }

    /// Remove every queued action that targets `session_id`
    pub fn discard_session(&self, session_id: &str) -> Result<Vec<PendingAction>, QueueError> {
        let mut pending = self.pending();
        let (discarded, kept): (Vec<_>, Vec<_>) = pending
            .drain(..)
            .partition(|a| a.action.session_id() == Some(session_id));
        *pending = kept.into();
        for action in &discarded {
            self.storage.remove(&action.id)?;
        }
        Ok(discarded)
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Copy of the queue contents, oldest first
    pub fn snapshot(&self) -> Vec<PendingAction> {
        self.pending().iter().cloned().collect()
    }
}

fn presence_user(action: &Action) -> Option<&str> {
    match action {
        Action::UpdatePresence { user_id, .. } => Some(user_id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryQueueStorage, SqliteQueueStorage};
    use classsync_core::model::PresenceStatus;

    fn advance(session_id: &str, index: u32) -> Action {
        Action::AdvanceSlide {
            session_id: session_id.to_string(),
            index,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_enqueue_is_fifo() {
        let queue = OfflineActionQueue::open(Box::new(MemoryQueueStorage::new())).unwrap();
        let first = queue.enqueue(advance("s1", 1), Utc::now()).unwrap();
        queue.enqueue(advance("s1", 2), Utc::now()).unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.head().unwrap().id, first.id);
        queue.remove(&first.id).unwrap();
        assert_eq!(queue.head().unwrap().action, queue.snapshot()[0].action);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_reopen_restores_unflushed_actions() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("queue.db");
        {
            let queue =
                OfflineActionQueue::open(Box::new(SqliteQueueStorage::open(&path).unwrap()))
                    .unwrap();
            let head = queue.enqueue(advance("s1", 1), Utc::now()).unwrap();
            queue.enqueue(advance("s1", 2), Utc::now()).unwrap();
            queue.record_failure(&head.id).unwrap();
        }

        let queue =
            OfflineActionQueue::open(Box::new(SqliteQueueStorage::open(&path).unwrap())).unwrap();
        let restored = queue.snapshot();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].retry_count, 1);
        assert!(matches!(restored[1].action, Action::AdvanceSlide { index: 2, .. }));
    }

    fn presence(user_id: &str, status: PresenceStatus) -> Action {
        Action::UpdatePresence {
            user_id: user_id.to_string(),
            status,
            last_seen: Utc::now(),
            session_id: Some("s1".to_string()),
        }
    }

    #[test]
    fn test_presence_update_supersedes_queued_one() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("queue.db");
        let queue =
            OfflineActionQueue::open(Box::new(SqliteQueueStorage::open(&path).unwrap())).unwrap();

        let head = queue.enqueue(presence("st1", PresenceStatus::Online), Utc::now()).unwrap();
        queue.enqueue(presence("st1", PresenceStatus::Offline), Utc::now()).unwrap();
        let other = queue.enqueue(presence("st2", PresenceStatus::Online), Utc::now()).unwrap();
        let advance = queue.enqueue(advance("s1", 1), Utc::now()).unwrap();
        let latest = queue.enqueue(presence("st1", PresenceStatus::Online), Utc::now()).unwrap();

        // The head stays put; only the queued middle update for st1 goes.
        let ids: Vec<String> = queue.snapshot().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![head.id, other.id, advance.id, latest.id]);
        drop(queue);

        let reopened =
            OfflineActionQueue::open(Box::new(SqliteQueueStorage::open(&path).unwrap())).unwrap();
        assert_eq!(reopened.len(), 4);
    }

    #[test]
    fn test_corrupt_entry_does_not_block_open() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("queue.db");
        {
            let storage = SqliteQueueStorage::open(&path).unwrap();
            storage
                .append(&PendingAction::new(
                    Action::SetLock {
                        session_id: "s1".to_string(),
                        locked: true,
                        at: Utc::now(),
                    },
                    Utc::now(),
                ))
                .unwrap();
        }
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute(
                "INSERT INTO pending_actions (id, action_type, payload, created_at) VALUES ('bad', 'set-lock', '{', ?1)",
                rusqlite::params![Utc::now().to_rfc3339()],
            )
            .unwrap();

        let queue =
            OfflineActionQueue::open(Box::new(SqliteQueueStorage::open(&path).unwrap())).unwrap();
        assert_eq!(queue.len(), 1);
        assert!(matches!(queue.head().unwrap().action, Action::SetLock { .. }));
        let corrupt = queue.take_corrupt();
        assert_eq!(corrupt.len(), 1);
        assert_eq!(corrupt[0].id, "bad");
        assert!(queue.take_corrupt().is_empty());
    }

    #[test]
    fn test_discard_session_keeps_other_targets_in_order() {
        let queue = OfflineActionQueue::open(Box::new(MemoryQueueStorage::new())).unwrap();
        queue.enqueue(advance("s1", 1), Utc::now()).unwrap();
        let keep_a = queue.enqueue(advance("s2", 1), Utc::now()).unwrap();
        queue.enqueue(advance("s1", 2), Utc::now()).unwrap();
        let keep_b = queue.enqueue(advance("s2", 2), Utc::now()).unwrap();

        let discarded = queue.discard_session("s1").unwrap();
        assert_eq!(discarded.len(), 2);
        let ids: Vec<String> = queue.snapshot().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![keep_a.id, keep_b.id]);
    }
}
