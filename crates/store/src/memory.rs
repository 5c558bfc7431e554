// In-process document store
//
// Stands in for the remote store: per-document atomic writes, change feeds
// that push full snapshots in commit order, and paginated listing.

use crate::{validate_path, DocumentStore, Page, PageRequest, Snapshot, StoreError, Subscription};
use async_trait::async_trait;
use classsync_core::document::{apply_writes, FieldCondition, FieldWrite};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone)]
struct Entry {
    data: JsonValue,
    version: u64,
}

#[derive(Default)]
struct Inner {
    documents: BTreeMap<String, Entry>,
    /// Last version per path, kept after deletion so versions never go back
    versions: HashMap<String, u64>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Snapshot>>>,
    writes_committed: u64,
}

impl Inner {
    /// Store `data` at `path` and notify subscribers if anything changed.
    fn put(&mut self, path: &str, data: Option<JsonValue>) {
        let current = self.documents.get(path).map(|e| &e.data);
        if current == data.as_ref() {
            return;
        }
        let version = self.versions.get(path).copied().unwrap_or(0) + 1;
        self.versions.insert(path.to_string(), version);
        match &data {
            Some(value) => {
                self.documents.insert(
                    path.to_string(),
                    Entry {
                        data: value.clone(),
                        version,
                    },
                );
            }
            None => {
                self.documents.remove(path);
            }
        }
        self.writes_committed += 1;
        self.notify(Snapshot {
            path: path.to_string(),
            version,
            data,
        });
    }

    fn notify(&mut self, snapshot: Snapshot) {
        if let Some(senders) = self.subscribers.get_mut(&snapshot.path) {
            senders.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }

    fn snapshot(&self, path: &str) -> Snapshot {
        match self.documents.get(path) {
            Some(entry) => Snapshot {
                path: path.to_string(),
                version: entry.version,
                data: Some(entry.data.clone()),
            },
            None => Snapshot {
                path: path.to_string(),
                version: self.versions.get(path).copied().unwrap_or(0),
                data: None,
            },
        }
    }
}

/// Shared in-memory document store
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that actually changed a document
    pub async fn writes_committed(&self) -> u64 {
        self.inner.lock().await.writes_committed
    }

    pub async fn document_count(&self) -> usize {
        self.inner.lock().await.documents.len()
    }

    async fn apply(
        &self,
        path: &str,
        conditions: &[FieldCondition],
        writes: &[FieldWrite],
        create_if_missing: bool,
    ) -> Result<bool, StoreError> {
        validate_path(path)?;
        let mut inner = self.inner.lock().await;
        let mut data = match inner.documents.get(path) {
            Some(entry) => entry.data.clone(),
            None if create_if_missing => JsonValue::Object(Default::default()),
            None => return Err(StoreError::NotFound(path.to_string())),
        };
        if let Some(failed) = conditions.iter().find(|c| !c.holds(&data)) {
            tracing::debug!("store: {} unchanged, '{}' moved on", path, failed.path);
            return Ok(false);
        }
        apply_writes(&mut data, writes).map_err(|e| StoreError::Rejected {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!("store: {} field writes applied to {}", writes.len(), path);
        inner.put(path, Some(data));
        Ok(true)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<JsonValue>, StoreError> {
        validate_path(path)?;
        let inner = self.inner.lock().await;
        Ok(inner.documents.get(path).map(|e| e.data.clone()))
    }

    async fn set(&self, path: &str, value: JsonValue) -> Result<(), StoreError> {
        validate_path(path)?;
        if !value.is_object() {
            return Err(StoreError::Rejected {
                path: path.to_string(),
                reason: "document must be a JSON object".to_string(),
            });
        }
        let mut inner = self.inner.lock().await;
        inner.put(path, Some(value));
        Ok(())
    }

    async fn update(&self, path: &str, writes: &[FieldWrite]) -> Result<(), StoreError> {
        self.apply(path, &[], writes, false).await.map(|_| ())
    }

    async fn update_if(
        &self,
        path: &str,
        conditions: &[FieldCondition],
        writes: &[FieldWrite],
    ) -> Result<bool, StoreError> {
        self.apply(path, conditions, writes, false).await
    }

    async fn merge(&self, path: &str, writes: &[FieldWrite]) -> Result<(), StoreError> {
        self.apply(path, &[], writes, true).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        validate_path(path)?;
        let mut inner = self.inner.lock().await;
        inner.put(path, None);
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        validate_path(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        // The receiver is alive, so this send cannot fail.
        let _ = tx.send(inner.snapshot(path));
        inner
            .subscribers
            .entry(path.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(path.to_string(), rx))
    }

    async fn list(&self, collection: &str, page: PageRequest) -> Result<Page, StoreError> {
        validate_path(collection)?;
        let prefix = format!("{}/", collection);
        let inner = self.inner.lock().await;

        let mut matching = inner
            .documents
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, entry)| {
                let id = &path[prefix.len()..];
                // Only direct children; sub-collections are separate.
                (!id.contains('/')).then(|| (id.to_string(), entry.data.clone()))
            })
            .filter(|(id, _)| page.after.as_ref().map_or(true, |after| id > after));

        let limit = page.limit.max(1);
        let documents: Vec<(String, JsonValue)> = matching.by_ref().take(limit).collect();
        let next = if matching.next().is_some() {
            documents.last().map(|(id, _)| id.clone())
        } else {
            None
        };
        Ok(Page { documents, next })
    }
}
