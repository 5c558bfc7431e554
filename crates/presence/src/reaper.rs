// Staleness Reaper
//
// Reclaims presence and session state that the owning clients failed to
// release. A pass first enumerates every record; if any page cannot be read
// the pass is abandoned before a single write is issued. Each write carries
// the enumerated timestamp as a precondition, so an owner that refreshed in
// the meantime keeps its state.

use classsync_core::clock::Clock;
use classsync_core::config::ReaperConfig;
use classsync_core::document::{field_path, FieldCondition, FieldWrite};
use classsync_core::error::{ClassSyncError, DomainError};
use classsync_core::model::{
    presence_path, session_path, PresenceRecord, PresenceStatus, SessionDocument, SessionStatus,
    FIELD_CONNECTED_STUDENTS, FIELD_LAST_ACTIVITY, FIELD_LAST_SEEN, FIELD_STATUS,
    PRESENCE_COLLECTION, SESSIONS_COLLECTION,
};
use classsync_store::{DocumentStore, PageRequest};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::task::JoinHandle;

type Listing = Vec<(String, JsonValue)>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub presence_scanned: usize,
    pub sessions_scanned: usize,
    /// Users flipped from `online` to `offline`
    pub marked_offline: Vec<String>,
    pub ended_sessions: Vec<String>,
    /// `(session id, student id)` roster entries removed
    pub removed_students: Vec<(String, String)>,
    /// Records refreshed by their owner after enumeration; left alone
    pub refreshed: usize,
    /// Writes that failed after a complete enumeration; retried next pass
    pub failed_writes: usize,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.marked_offline.is_empty()
            && self.ended_sessions.is_empty()
            && self.removed_students.is_empty()
    }
}

pub struct StalenessReaper {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: ReaperConfig,
}

impl StalenessReaper {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: ReaperConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    async fn enumerate(&self, collection: &str) -> Result<Listing, ClassSyncError> {
        let mut documents = Vec::new();
        let mut after = None;
        loop {
            let request = PageRequest {
                after: after.take(),
                limit: self.config.page_size,
            };
            let page = self.store.list(collection, request).await.map_err(|e| {
                ClassSyncError::Domain(DomainError::PartialEnumeration {
                    collection: collection.to_string(),
                    reason: e.to_string(),
                })
            })?;
            documents.extend(page.documents);
            match page.next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }
        Ok(documents)
    }

    async fn enumerate_all(&self) -> Result<(Listing, Listing), ClassSyncError> {
        let presence = self.enumerate(PRESENCE_COLLECTION).await?;
        let sessions = self.enumerate(SESSIONS_COLLECTION).await?;
        Ok((presence, sessions))
    }

    /// Conditional write; `Ok(true)` when it landed
    async fn reclaim(
        &self,
        path: &str,
        conditions: &[FieldCondition],
        writes: &[FieldWrite],
        report: &mut ReapReport,
    ) -> bool {
        match self.store.update_if(path, conditions, writes).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!("reaper: {} was refreshed, skipped", path);
                report.refreshed += 1;
                false
            }
            Err(e) => {
                tracing::warn!("reaper: write to {} failed: {}", path, e);
                report.failed_writes += 1;
                false
            }
        }
    }

    /// One full maintenance pass
    pub async fn run_pass(&self) -> Result<ReapReport, ClassSyncError> {
        let (presence, sessions) = match self.enumerate_all().await {
            Ok(enumerated) => enumerated,
            Err(e) => {
                tracing::warn!("reaper: pass aborted, nothing changed: {}", e);
                return Err(e);
            }
        };

        let now = self.clock.now();
        let mut report = ReapReport {
            presence_scanned: presence.len(),
            sessions_scanned: sessions.len(),
            ..ReapReport::default()
        };

        let presence_window = self.config.presence_stale_after();
        for (user_id, value) in presence {
            let record = match PresenceRecord::from_value(&value) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("reaper: skipping unreadable presence/{}: {}", user_id, e);
                    continue;
                }
            };
            if record.status != PresenceStatus::Online || !record.is_stale(now, presence_window) {
                continue;
            }
            let conditions = [
                FieldCondition::equals(FIELD_STATUS, PresenceStatus::Online.as_str()),
                FieldCondition::unchanged(&value, FIELD_LAST_SEEN),
            ];
            let writes = [FieldWrite::set(FIELD_STATUS, PresenceStatus::Offline.as_str())];
            if self
                .reclaim(&presence_path(&user_id), &conditions, &writes, &mut report)
                .await
            {
                tracing::info!("reaper: {} offline (last seen {})", user_id, record.last_seen);
                report.marked_offline.push(user_id);
            }
        }

        let session_window = self.config.session_stale_after();
        for (session_id, value) in sessions {
            let session = match SessionDocument::from_value(&value) {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("reaper: skipping unreadable sessions/{}: {}", session_id, e);
                    continue;
                }
            };
            if session.status != SessionStatus::Active {
                continue;
            }
            let path = session_path(&session_id);

            if session.last_activity < now - session_window {
                let conditions = [
                    FieldCondition::equals(FIELD_STATUS, SessionStatus::Active.as_str()),
                    FieldCondition::unchanged(&value, FIELD_LAST_ACTIVITY),
                ];
                let writes = [FieldWrite::set(FIELD_STATUS, SessionStatus::Ended.as_str())];
                if self.reclaim(&path, &conditions, &writes, &mut report).await {
                    tracing::info!("reaper: ended idle session {}", session_id);
                    report.ended_sessions.push(session_id);
                }
                continue;
            }

            // One write per entry so a refreshed student does not hold back the rest.
            for (student_id, entry) in &session.connected_students {
                if entry.last_activity >= now - presence_window {
                    continue;
                }
                let entry_path = field_path(&[FIELD_CONNECTED_STUDENTS, student_id.as_str()]);
                let conditions = [FieldCondition::unchanged(
                    &value,
                    field_path(&[entry_path.as_str(), FIELD_LAST_ACTIVITY]),
                )];
                let writes = [FieldWrite::delete(entry_path)];
                if self.reclaim(&path, &conditions, &writes, &mut report).await {
                    tracing::info!("reaper: removed {} from {}", student_id, session_id);
                    report
                        .removed_students
                        .push((session_id.clone(), student_id.clone()));
                }
            }
        }

        tracing::debug!(
            "reaper: pass done, {} presence / {} sessions scanned",
            report.presence_scanned,
            report.sessions_scanned
        );
        Ok(report)
    }

    /// Run a pass now and then every `interval_secs`
    pub fn spawn_periodic(self: &Arc<Self>) -> JoinHandle<()> {
        let reaper = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(reaper.config.interval());
            loop {
                interval.tick().await;
                match reaper.run_pass().await {
                    Ok(report) if !report.is_empty() => tracing::info!(
                        "reaper: {} offline, {} sessions ended, {} roster entries removed",
                        report.marked_offline.len(),
                        report.ended_sessions.len(),
                        report.removed_students.len()
                    ),
                    // Failures are logged by the pass; the next tick retries.
                    _ => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use classsync_core::clock::ManualClock;
    use classsync_store::{FlakyLink, MemoryDocumentStore};
    use serde_json::json;

    fn reaper_over(store: Arc<dyn DocumentStore>, clock: &ManualClock) -> StalenessReaper {
        let config = ReaperConfig {
            page_size: 2,
            ..ReaperConfig::default()
        };
        StalenessReaper::new(store, Arc::new(clock.clone()), config)
    }

    async fn seed_presence(
        store: &MemoryDocumentStore,
        user: &str,
        last_seen: chrono::DateTime<Utc>,
    ) {
        store
            .set(
                &presence_path(user),
                json!({"userId": user, "status": "online", "lastSeen": last_seen}),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stale_boundary_is_strict() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let store = Arc::new(MemoryDocumentStore::new());
        seed_presence(&store, "edge", start).await;
        seed_presence(&store, "old", start - Duration::seconds(1)).await;

        clock.set(start + Duration::seconds(300));
        let report = reaper_over(store.clone(), &clock).run_pass().await.unwrap();
        assert_eq!(report.marked_offline, vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn test_partial_enumeration_changes_nothing() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start + Duration::hours(1));
        let store = Arc::new(MemoryDocumentStore::new());
        for user in ["a", "b", "c", "d", "e"] {
            seed_presence(&store, user, start).await;
        }
        let link = FlakyLink::new(store.clone());
        // Page size 2: pages 0 and 1 succeed, page 2 fails.
        link.fail_list_call(2);
        let before = store.writes_committed().await;

        let err = reaper_over(Arc::new(link), &clock).run_pass().await.unwrap_err();
        assert!(matches!(
            err,
            ClassSyncError::Domain(DomainError::PartialEnumeration { .. })
        ));
        assert_eq!(store.writes_committed().await, before);
    }
}
