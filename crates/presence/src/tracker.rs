// Presence Tracker
//
// Publishes one user's online/offline state. Heartbeats go through the sync
// engine, so they are durable and retried like any other write. Going
// offline is best-effort: if the write cannot land in time the reaper
// reclaims the record later.

use classsync_core::action::Action;
use classsync_core::config::PresenceConfig;
use classsync_core::ids::validate_id;
use classsync_core::model::{presence_path, PresenceRecord, PresenceStatus};
use classsync_core::ClassSyncError;
use classsync_queue::{PendingAction, SyncEngine, SyncTrigger};
use classsync_store::DocumentStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Upper bound on the final offline write when the page goes away
pub const OFFLINE_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct TrackerState {
    visible: bool,
    signed_out: bool,
    session_id: Option<String>,
}

pub struct PresenceTracker {
    user_id: String,
    engine: Arc<SyncEngine>,
    store: Arc<dyn DocumentStore>,
    config: PresenceConfig,
    state: RwLock<TrackerState>,
}

impl PresenceTracker {
    pub fn new(
        user_id: impl Into<String>,
        engine: Arc<SyncEngine>,
        store: Arc<dyn DocumentStore>,
        config: PresenceConfig,
    ) -> Result<Self, ClassSyncError> {
        let user_id = user_id.into();
        validate_id("user", &user_id)?;
        Ok(Self {
            user_id,
            engine,
            store,
            config,
            state: RwLock::new(TrackerState {
                visible: true,
                signed_out: false,
                session_id: None,
            }),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn is_visible(&self) -> bool {
        self.state.read().await.visible
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.read().await.session_id.clone()
    }

    fn presence_action(&self, status: PresenceStatus, session_id: Option<String>) -> Action {
        Action::UpdatePresence {
            user_id: self.user_id.clone(),
            status,
            last_seen: self.engine.clock().now(),
            session_id,
        }
    }

    /// Refresh `lastSeen` and assert `online`; skipped while hidden or signed out
    pub async fn heartbeat(&self) -> Result<Option<PendingAction>, ClassSyncError> {
        let session_id = {
            let state = self.state.read().await;
            if !state.visible || state.signed_out {
                return Ok(None);
            }
            state.session_id.clone()
        };
        let action = self.presence_action(PresenceStatus::Online, session_id);
        let pending = self.engine.submit(action).await?;
        tracing::debug!("presence: heartbeat for {}", self.user_id);
        Ok(Some(pending))
    }

    /// Record which session the user is in and publish it right away
    pub async fn set_session(&self, session_id: Option<String>) -> Result<(), ClassSyncError> {
        self.state.write().await.session_id = session_id;
        self.heartbeat().await?;
        Ok(())
    }

    /// Page visibility changed
    pub async fn set_visibility(&self, visible: bool) -> Result<(), ClassSyncError> {
        {
            let mut state = self.state.write().await;
            if state.visible == visible {
                return Ok(());
            }
            state.visible = visible;
        }

        if visible {
            self.engine.notify(SyncTrigger::VisibilityRestored).await?;
            self.heartbeat().await?;
        } else {
            self.engine.notify(SyncTrigger::VisibilityLost).await?;
            self.go_offline("page hidden").await?;
        }
        Ok(())
    }

    /// Best-effort immediate `offline` write; returns whether it was confirmed
    pub async fn go_offline(&self, reason: &str) -> Result<bool, ClassSyncError> {
        let session_id = self.state.read().await.session_id.clone();
        let action = self.presence_action(PresenceStatus::Offline, session_id);
        let delivered = self
            .engine
            .submit_urgent(action, OFFLINE_WRITE_TIMEOUT)
            .await?;
        if delivered {
            tracing::info!("presence: {} offline ({})", self.user_id, reason);
        } else {
            tracing::warn!(
                "presence: offline write for {} not confirmed ({}), left to the reaper",
                self.user_id,
                reason
            );
        }
        Ok(delivered)
    }

    /// Explicit logout: stop heartbeating and publish `offline`
    pub async fn sign_out(&self) -> Result<bool, ClassSyncError> {
        self.state.write().await.signed_out = true;
        self.go_offline("signed out").await
    }

    /// Compare against the server record and re-assert presence if it was reaped
    ///
    /// Returns whether a fresh heartbeat was issued.
    pub async fn reconcile(&self) -> Result<bool, ClassSyncError> {
        {
            let state = self.state.read().await;
            if !state.visible || state.signed_out {
                return Ok(false);
            }
        }

        let now = self.engine.clock().now();
        let needs_refresh = match self.store.get(&presence_path(&self.user_id)).await? {
            None => true,
            Some(value) => match PresenceRecord::from_value(&value) {
                Ok(record) => {
                    record.status == PresenceStatus::Offline
                        || record.is_stale(now, self.config.stale_after())
                }
                Err(e) => {
                    tracing::warn!("presence: unreadable record for {}: {}", self.user_id, e);
                    true
                }
            },
        };

        if needs_refresh {
            tracing::info!("presence: re-asserting online for {}", self.user_id);
            self.heartbeat().await?;
        }
        Ok(needs_refresh)
    }

    /// Heartbeat on a fixed interval until signed out
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tracker.config.heartbeat_interval());
            loop {
                interval.tick().await;
                if tracker.state.read().await.signed_out {
                    break;
                }
                if let Err(e) = tracker.heartbeat().await {
                    tracing::error!("presence: heartbeat for {} failed: {}", tracker.user_id, e);
                }
            }
            tracing::debug!("presence: heartbeat loop for {} stopped", tracker.user_id);
        })
    }
}
