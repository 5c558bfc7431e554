use async_trait::async_trait;
use classsync_core::action::Action;
use classsync_store::DocumentStore;
use std::fmt;
use std::sync::Arc;

/// Outcome of a failed commit attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// Connectivity problem; retry on the next trigger
    Transient(String),
    /// The store refused the write; retrying cannot help
    Rejected(String),
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(reason) => write!(f, "transient: {}", reason),
            Self::Rejected(reason) => write!(f, "rejected: {}", reason),
        }
    }
}

impl std::error::Error for CommitError {}

/// Applies one action to the remote store
#[async_trait]
pub trait ActionCommitter: Send + Sync {
    async fn commit(&self, action: &Action) -> Result<(), CommitError>;
}

/// Commits actions as their document write batches
#[derive(Clone)]
pub struct StoreCommitter {
    store: Arc<dyn DocumentStore>,
}

impl StoreCommitter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActionCommitter for StoreCommitter {
    async fn commit(&self, action: &Action) -> Result<(), CommitError> {
        let write = action.document_write();
        self.store.commit(&write).await.map_err(|e| {
            if e.is_transient() {
                CommitError::Transient(e.to_string())
            } else {
                CommitError::Rejected(e.to_string())
            }
        })
    }
}
