//! classsync_store
//! Interfaces to the remote document store and the lesson content store,
//! plus in-process implementations used by tests and the demo.

pub mod content;
pub mod link;
pub mod memory;

use async_trait::async_trait;
use classsync_core::document::{DocumentWrite, FieldCondition, FieldWrite};
use classsync_core::error::{ClassSyncError, DomainError, InfraError};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::mpsc;

pub use content::{ContentStore, InMemoryContentStore};
pub use link::FlakyLink;
pub use memory::MemoryDocumentStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("rejected write to {path}: {reason}")]
    Rejected { path: String, reason: String },
}

impl StoreError {
    /// Connectivity failures are worth retrying; everything else is a refusal
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<StoreError> for ClassSyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::Domain(DomainError::NotFound { what }),
            other => Self::Infra(InfraError::Store {
                transient: other.is_transient(),
                reason: other.to_string(),
            }),
        }
    }
}

/// Full document state pushed to subscribers after each committed change
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: String,
    /// Increases by one on every change to this document
    pub version: u64,
    /// `None` once the document is deleted or before it exists
    pub data: Option<JsonValue>,
}

/// Live feed of snapshots for one document
pub struct Subscription {
    path: String,
    rx: mpsc::UnboundedReceiver<Snapshot>,
}

impl Subscription {
    pub fn new(path: String, rx: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self { path, rx }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next snapshot; `None` once the store drops the feed
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    /// Take a snapshot that has already arrived, without waiting
    pub fn try_next(&mut self) -> Option<Snapshot> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// Resume after this document id
    pub after: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    /// `(document id, data)` in id order
    pub documents: Vec<(String, JsonValue)>,
    /// Cursor for the following page, `None` on the last page
    pub next: Option<String>,
}

/// Remote document store primitives
///
/// Writes are atomic per document only. There is no locking; concurrent
/// writers must touch disjoint field paths.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<JsonValue>, StoreError>;

    /// Replace the whole document
    async fn set(&self, path: &str, value: JsonValue) -> Result<(), StoreError>;

    /// Apply field writes to an existing document
    async fn update(&self, path: &str, writes: &[FieldWrite]) -> Result<(), StoreError>;

    /// Apply field writes only while every condition still holds, checked
    /// and written as one step. `Ok(false)` means nothing was written.
    async fn update_if(
        &self,
        path: &str,
        conditions: &[FieldCondition],
        writes: &[FieldWrite],
    ) -> Result<bool, StoreError>;

    /// Apply field writes, creating the document if it does not exist
    async fn merge(&self, path: &str, writes: &[FieldWrite]) -> Result<(), StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Feed of full snapshots, starting with the current state
    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError>;

    /// One page of the documents directly under `collection`
    async fn list(&self, collection: &str, page: PageRequest) -> Result<Page, StoreError>;

    /// Additive set-union into an array field
    async fn array_union(
        &self,
        path: &str,
        field: &str,
        values: Vec<JsonValue>,
    ) -> Result<(), StoreError> {
        self.update(path, &[FieldWrite::union(field, values)]).await
    }

    /// Commit an action's write batch
    async fn commit(&self, write: &DocumentWrite) -> Result<(), StoreError> {
        if write.create_if_missing {
            self.merge(&write.path, &write.writes).await
        } else {
            self.update(&write.path, &write.writes).await
        }
    }
}

pub(crate) fn validate_path(path: &str) -> Result<(), StoreError> {
    if path.is_empty() || path.split('/').any(|segment| segment.is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}
