//! classsync_queue
//! Durable, ordered, at-least-once delivery of mutations to the document store.
//!
//! Every mutation is written to local storage before any network attempt.
//! A single drain commits the queue head first and stops at the first
//! transient failure, so a client's actions always land in enqueue order.

pub mod committer;
pub mod engine;
pub mod pending;
pub mod queue;
pub mod storage;

use classsync_core::error::{ClassSyncError, InfraError};
use thiserror::Error;

pub use committer::{ActionCommitter, CommitError, StoreCommitter};
pub use engine::{DrainReport, DrainStop, SyncEngine, SyncEvent, SyncHandle, SyncTrigger};
pub use pending::PendingAction;
pub use queue::OfflineActionQueue;
pub use storage::{CorruptEntry, MemoryQueueStorage, QueueStorage, Restored, SqliteQueueStorage};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("queue encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt queue entry {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<QueueError> for ClassSyncError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Database(e) => Self::Infra(InfraError::Database(e)),
            QueueError::Json(e) => Self::Infra(InfraError::Json(e)),
            QueueError::Io(e) => Self::Infra(InfraError::Io(e)),
            other => Self::Other(other.to_string()),
        }
    }
}
