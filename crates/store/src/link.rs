// Per-client network link
//
// Wraps a shared store with one client's view of the network: it can go
// offline, drop writes before they reach the store, lose acknowledgments of
// writes that did commit, and fail a listing page part way through an
// enumeration. Change feeds already established keep flowing.

use crate::{DocumentStore, Page, PageRequest, StoreError, Subscription};
use async_trait::async_trait;
use classsync_core::document::{FieldCondition, FieldWrite};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct LinkState {
    online: bool,
    failing_writes: usize,
    lost_acks: usize,
    failing_list_call: Option<usize>,
    list_calls: usize,
}

#[derive(Clone)]
pub struct FlakyLink {
    store: Arc<dyn DocumentStore>,
    state: Arc<Mutex<LinkState>>,
}

enum WriteFault {
    None,
    Dropped,
    AckLost,
}

impl FlakyLink {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(LinkState {
                online: true,
                failing_writes: 0,
                lost_acks: 0,
                failing_list_call: None,
                list_calls: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_online(&self, online: bool) {
        let mut state = self.state();
        if state.online != online {
            tracing::debug!("link: {}", if online { "online" } else { "offline" });
        }
        state.online = online;
    }

    pub fn is_online(&self) -> bool {
        self.state().online
    }

    /// The next `n` writes fail without reaching the store
    pub fn fail_next_writes(&self, n: usize) {
        self.state().failing_writes = n;
    }

    /// The next `n` writes commit, but the caller sees a transient failure
    pub fn lose_next_acks(&self, n: usize) {
        self.state().lost_acks = n;
    }

    /// The `call`-th listing call from now (0-based) fails
    pub fn fail_list_call(&self, call: usize) {
        let mut state = self.state();
        state.list_calls = 0;
        state.failing_list_call = Some(call);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.state().online {
            Ok(())
        } else {
            Err(StoreError::Unavailable("client is offline".to_string()))
        }
    }

    fn take_write_fault(&self) -> Result<WriteFault, StoreError> {
        let mut state = self.state();
        if !state.online {
            return Err(StoreError::Unavailable("client is offline".to_string()));
        }
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Ok(WriteFault::Dropped);
        }
        if state.lost_acks > 0 {
            state.lost_acks -= 1;
            return Ok(WriteFault::AckLost);
        }
        Ok(WriteFault::None)
    }

    async fn write<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        match self.take_write_fault()? {
            WriteFault::Dropped => Err(StoreError::Unavailable("write dropped".to_string())),
            WriteFault::AckLost => {
                op.await?;
                Err(StoreError::Unavailable("acknowledgment lost".to_string()))
            }
            WriteFault::None => op.await,
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyLink {
    async fn get(&self, path: &str) -> Result<Option<JsonValue>, StoreError> {
        self.check_online()?;
        self.store.get(path).await
    }

    async fn set(&self, path: &str, value: JsonValue) -> Result<(), StoreError> {
        self.write(self.store.set(path, value)).await
    }

    async fn update(&self, path: &str, writes: &[FieldWrite]) -> Result<(), StoreError> {
        self.write(self.store.update(path, writes)).await
    }

    async fn update_if(
        &self,
        path: &str,
        conditions: &[FieldCondition],
        writes: &[FieldWrite],
    ) -> Result<bool, StoreError> {
        self.write(self.store.update_if(path, conditions, writes)).await
    }

    async fn merge(&self, path: &str, writes: &[FieldWrite]) -> Result<(), StoreError> {
        self.write(self.store.merge(path, writes)).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.write(self.store.delete(path)).await
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        self.check_online()?;
        self.store.subscribe(path).await
    }

    async fn list(&self, collection: &str, page: PageRequest) -> Result<Page, StoreError> {
        self.check_online()?;
        {
            let mut state = self.state();
            let call = state.list_calls;
            state.list_calls += 1;
            if state.failing_list_call == Some(call) {
                return Err(StoreError::Unavailable(format!(
                    "listing '{}' interrupted",
                    collection
                )));
            }
        }
        self.store.list(collection, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDocumentStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_offline_link_rejects_without_touching_store() {
        let store = Arc::new(MemoryDocumentStore::new());
        let link = FlakyLink::new(store.clone());
        link.set_online(false);

        let result = link.set("presence/u1", json!({"status": "online"})).await;
        assert!(matches!(result, Err(ref e) if e.is_transient()));
        assert_eq!(store.document_count().await, 0);
    }

    #[tokio::test]
    async fn test_lost_ack_still_commits() {
        let store = Arc::new(MemoryDocumentStore::new());
        let link = FlakyLink::new(store.clone());
        link.lose_next_acks(1);

        let result = link
            .merge("presence/u1", &[FieldWrite::set("status", "online")])
            .await;
        assert!(result.is_err());
        assert_eq!(
            store.get("presence/u1").await.unwrap(),
            Some(json!({"status": "online"}))
        );

        // Only the next write was affected.
        link.merge("presence/u1", &[FieldWrite::set("status", "offline")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_links_are_independent() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let teacher = FlakyLink::new(store.clone());
        let student = FlakyLink::new(store.clone());
        teacher.set_online(false);

        student.set("sessions/s1", json!({})).await.unwrap();
        assert!(teacher.get("sessions/s1").await.is_err());
        assert!(student.get("sessions/s1").await.unwrap().is_some());
    }
}
