// Local durable storage for pending actions
//
// Rows are ordered by an autoincrement sequence, which is the FIFO order.
// A row that no longer decodes is moved to `dead_actions` on load so the
// rest of the queue stays usable.

use crate::pending::PendingAction;
use crate::QueueError;
use chrono::{DateTime, Utc};
use classsync_core::action::Action;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// A stored action that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptEntry {
    pub id: String,
    pub action_type: String,
    pub reason: String,
}

/// Result of loading the queue
#[derive(Debug, Clone, Default)]
pub struct Restored {
    /// Decodable actions, oldest first
    pub actions: Vec<PendingAction>,
    /// Rows set aside during this load
    pub corrupt: Vec<CorruptEntry>,
}

pub trait QueueStorage: Send + Sync {
    /// All pending actions, oldest first, with undecodable rows set aside
    fn load(&self) -> Result<Restored, QueueError>;

    /// Append at the tail; a duplicate id is ignored
    fn append(&self, action: &PendingAction) -> Result<(), QueueError>;

    /// Returns whether a row was removed
    fn remove(&self, id: &str) -> Result<bool, QueueError>;

    fn set_retry_count(&self, id: &str, retry_count: u32) -> Result<(), QueueError>;

    /// Drop everything; returns how many actions were removed
    fn clear(&self) -> Result<usize, QueueError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pending_actions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    action_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS dead_actions (
    id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    reason TEXT NOT NULL,
    failed_at TEXT NOT NULL
);
";

/// SQLite-backed queue that survives process restarts
pub struct SqliteQueueStorage {
    conn: Mutex<Connection>,
}

impl SqliteQueueStorage {
    pub fn open(path: &Path) -> Result<Self, QueueError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("queue: opened {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Non-durable SQLite database, mostly for tests
    pub fn open_in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn retry_count(&self, id: &str) -> Result<Option<u32>, QueueError> {
        let conn = self.conn();
        let count: Option<i64> = conn
            .query_row(
                "SELECT retry_count FROM pending_actions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.map(|c| u32::try_from(c).unwrap_or(u32::MAX)))
    }

    /// Number of rows set aside as undecodable
    pub fn dead_count(&self) -> Result<usize, QueueError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dead_actions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

struct StoredRow {
    seq: i64,
    id: String,
    action_type: String,
    payload: String,
    created_at: String,
    retry_count: i64,
}

fn decode_row(
    id: String,
    payload: String,
    created_at: String,
    retry_count: i64,
) -> Result<PendingAction, QueueError> {
    let action: Action = serde_json::from_str(&payload).map_err(|e| QueueError::Corrupt {
        id: id.clone(),
        reason: format!("payload: {}", e),
    })?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| QueueError::Corrupt {
            id: id.clone(),
            reason: format!("created_at: {}", e),
        })?
        .with_timezone(&Utc);
    let retry_count = u32::try_from(retry_count).map_err(|_| QueueError::Corrupt {
        id: id.clone(),
        reason: format!("retry_count {}", retry_count),
    })?;
    Ok(PendingAction {
        id,
        action,
        created_at,
        retry_count,
    })
}

impl QueueStorage for SqliteQueueStorage {
    fn load(&self) -> Result<Restored, QueueError> {
        let mut conn = self.conn();
        let rows = {
            let mut stmt = conn.prepare(
                "SELECT seq, id, action_type, payload, created_at, retry_count
                 FROM pending_actions ORDER BY seq",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(StoredRow {
                    seq: row.get(0)?,
                    id: row.get(1)?,
                    action_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: row.get(4)?,
                    retry_count: row.get(5)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut restored = Restored::default();
        let mut dead = Vec::new();
        for row in rows {
            match decode_row(
                row.id.clone(),
                row.payload.clone(),
                row.created_at.clone(),
                row.retry_count,
            ) {
                Ok(action) => restored.actions.push(action),
                Err(e) => dead.push((row, e.to_string())),
            }
        }
        if dead.is_empty() {
            return Ok(restored);
        }

        let tx = conn.transaction()?;
        let failed_at = Utc::now().to_rfc3339();
        for (row, reason) in dead {
            tracing::warn!("queue: setting aside undecodable entry {}: {}", row.id, reason);
            tx.execute(
                "INSERT INTO dead_actions
                 (id, action_type, payload, created_at, retry_count, reason, failed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id,
                    row.action_type,
                    row.payload,
                    row.created_at,
                    row.retry_count,
                    reason,
                    failed_at
                ],
            )?;
            tx.execute("DELETE FROM pending_actions WHERE seq = ?1", params![row.seq])?;
            restored.corrupt.push(CorruptEntry {
                id: row.id,
                action_type: row.action_type,
                reason,
            });
        }
        tx.commit()?;
        Ok(restored)
    }

    fn append(&self, action: &PendingAction) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&action.action)?;
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO pending_actions (id, action_type, payload, created_at, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                action.id,
                action.kind(),
                payload,
                action.created_at.to_rfc3339(),
                i64::from(action.retry_count),
            ],
        )?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, QueueError> {
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM pending_actions WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn set_retry_count(&self, id: &str, retry_count: u32) -> Result<(), QueueError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE pending_actions SET retry_count = ?1 WHERE id = ?2",
            params![i64::from(retry_count), id],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<usize, QueueError> {
        let conn = self.conn();
        Ok(conn.execute("DELETE FROM pending_actions", [])?)
    }
}

/// Volatile storage; nothing survives the process
#[derive(Default)]
pub struct MemoryQueueStorage {
    actions: Mutex<Vec<PendingAction>>,
}

impl MemoryQueueStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn actions(&self) -> MutexGuard<'_, Vec<PendingAction>> {
        self.actions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl QueueStorage for MemoryQueueStorage {
    fn load(&self) -> Result<Restored, QueueError> {
        Ok(Restored {
            actions: self.actions().clone(),
            corrupt: Vec::new(),
        })
    }

    fn append(&self, action: &PendingAction) -> Result<(), QueueError> {
        let mut actions = self.actions();
        if !actions.iter().any(|a| a.id == action.id) {
            actions.push(action.clone());
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, QueueError> {
        let mut actions = self.actions();
        let before = actions.len();
        actions.retain(|a| a.id != id);
        Ok(actions.len() != before)
    }

    fn set_retry_count(&self, id: &str, retry_count: u32) -> Result<(), QueueError> {
        if let Some(action) = self.actions().iter_mut().find(|a| a.id == id) {
            action.retry_count = retry_count;
        }
        Ok(())
    }

    fn clear(&self) -> Result<usize, QueueError> {
        let mut actions = self.actions();
        let count = actions.len();
        actions.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_action(locked: bool) -> PendingAction {
        PendingAction::new(
            Action::SetLock {
                session_id: "s1".to_string(),
                locked,
                at: Utc::now(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_sqlite_keeps_fifo_order_and_dedups() {
        let storage = SqliteQueueStorage::open_in_memory().unwrap();
        let first = lock_action(true);
        let second = lock_action(false);
        storage.append(&first).unwrap();
        storage.append(&second).unwrap();
        storage.append(&first).unwrap();

        let loaded = storage.load().unwrap().actions;
        let ids: Vec<&str> = loaded.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
        assert_eq!(loaded[0].action, first.action);
    }

    #[test]
    fn test_sqlite_retry_count_and_remove() {
        let storage = SqliteQueueStorage::open_in_memory().unwrap();
        let action = lock_action(true);
        storage.append(&action).unwrap();

        storage.set_retry_count(&action.id, 2).unwrap();
        assert_eq!(storage.retry_count(&action.id).unwrap(), Some(2));

        assert!(storage.remove(&action.id).unwrap());
        assert!(!storage.remove(&action.id).unwrap());
        assert_eq!(storage.retry_count(&action.id).unwrap(), None);
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("queue.db");
        let action = lock_action(true);
        {
            let storage = SqliteQueueStorage::open(&path).unwrap();
            storage.append(&action).unwrap();
            storage.set_retry_count(&action.id, 1).unwrap();
        }

        let reopened = SqliteQueueStorage::open(&path).unwrap();
        let loaded = reopened.load().unwrap().actions;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, action.id);
        assert_eq!(loaded[0].retry_count, 1);
    }

    #[test]
    fn test_corrupt_row_is_set_aside() {
        let storage = SqliteQueueStorage::open_in_memory().unwrap();
        let before = lock_action(true);
        let after = lock_action(false);
        storage.append(&before).unwrap();
        storage
            .conn()
            .execute(
                "INSERT INTO pending_actions (id, action_type, payload, created_at) VALUES ('x', 'set-lock', '{', ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();
        storage.append(&after).unwrap();

        let restored = storage.load().unwrap();
        let ids: Vec<&str> = restored.actions.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![before.id.as_str(), after.id.as_str()]);
        assert_eq!(restored.corrupt.len(), 1);
        assert_eq!(restored.corrupt[0].id, "x");
        assert_eq!(restored.corrupt[0].action_type, "set-lock");
        assert_eq!(storage.dead_count().unwrap(), 1);

        // Set aside once; the next load is clean.
        let again = storage.load().unwrap();
        assert!(again.corrupt.is_empty());
        assert_eq!(again.actions.len(), 2);
    }

    #[test]
    fn test_memory_storage_matches_sqlite_semantics() {
        let storage = MemoryQueueStorage::new();
        let action = lock_action(false);
        storage.append(&action).unwrap();
        storage.append(&action).unwrap();
        assert_eq!(storage.load().unwrap().actions.len(), 1);
        storage.set_retry_count(&action.id, 3).unwrap();
        assert_eq!(storage.load().unwrap().actions[0].retry_count, 3);
        assert_eq!(storage.clear().unwrap(), 1);
    }
}
