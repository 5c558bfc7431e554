// Sync Engine
//
// Drains the offline queue in FIFO order whenever one of a small set of
// named triggers fires. A drain stops at the first transient failure so a
// later action can never commit ahead of an earlier one.

use crate::committer::{ActionCommitter, CommitError};
use crate::pending::PendingAction;
use crate::queue::OfflineActionQueue;
use crate::QueueError;
use classsync_core::action::Action;
use classsync_core::clock::Clock;
use classsync_core::config::QueueConfig;
use classsync_core::error::DomainError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Events that wake the sync loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    ConnectivityRestored,
    ConnectivityLost,
    VisibilityRestored,
    VisibilityLost,
    ActionEnqueued,
    RetryTimer,
    Shutdown,
}

/// Notifications for the user-facing layer
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Committed {
        action_id: String,
        action_type: &'static str,
    },
    RetryScheduled {
        action_id: String,
        action_type: &'static str,
        retry_count: u32,
        reason: String,
    },
    /// The action was dropped and will never be committed
    PermanentFailure { action: PendingAction, reason: String },
    /// The action was removed because its target no longer accepts writes
    Discarded { action: PendingAction, reason: String },
    /// A persisted entry could not be decoded and was set aside
    Unreadable {
        action_id: String,
        action_type: String,
        reason: String,
    },
}

impl SyncEvent {
    /// The user-facing error for an action that will never be committed
    pub fn failure(&self) -> Option<DomainError> {
        match self {
            Self::PermanentFailure { action, reason } => Some(DomainError::PermanentActionFailure {
                action_id: action.id.clone(),
                action_type: action.kind().to_string(),
                reason: reason.clone(),
            }),
            Self::Unreadable {
                action_id,
                action_type,
                reason,
            } => Some(DomainError::PermanentActionFailure {
                action_id: action_id.clone(),
                action_type: action_type.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStop {
    Offline,
    Transient { action_id: String, retry_count: u32 },
    RetriesExhausted { action_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub committed: usize,
    pub dropped: usize,
    /// Why the drain ended before the queue was empty
    pub stopped: Option<DrainStop>,
    pub remaining: usize,
}

const EVENT_CAPACITY: usize = 256;

pub struct SyncEngine {
    queue: OfflineActionQueue,
    committer: Arc<dyn ActionCommitter>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    online: AtomicBool,
    visible: AtomicBool,
    drain_lock: Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
    loop_tx: StdMutex<Option<mpsc::UnboundedSender<SyncTrigger>>>,
}

impl SyncEngine {
    pub fn new(
        queue: OfflineActionQueue,
        committer: Arc<dyn ActionCommitter>,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            queue,
            committer,
            config,
            clock,
            online: AtomicBool::new(true),
            visible: AtomicBool::new(true),
            drain_lock: Mutex::new(()),
            events,
            loop_tx: StdMutex::new(None),
        }
    }

    /// Start in the given connectivity state
    pub fn with_online(self, online: bool) -> Self {
        self.online.store(online, Ordering::SeqCst);
        self
    }

    pub fn queue(&self) -> &OfflineActionQueue {
        &self.queue
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.events.send(event);
    }

    fn loop_sender(&self) -> Option<mpsc::UnboundedSender<SyncTrigger>> {
        self.loop_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Queue an action and, if online, try to commit it.
    ///
    /// With a running sync loop the commit happens on the loop; otherwise
    /// the drain runs before this returns.
    pub async fn submit(&self, action: Action) -> Result<PendingAction, QueueError> {
        let pending = self.queue.enqueue(action, self.clock.now())?;
        self.notify(SyncTrigger::ActionEnqueued).await?;
        Ok(pending)
    }

    /// Queue an action and try to commit it within `timeout`, bypassing the loop.
    ///
    /// Returns whether the action left the queue. When it did not, it stays
    /// queued and is replayed by a later drain.
    pub async fn submit_urgent(
        &self,
        action: Action,
        timeout: Duration,
    ) -> Result<bool, QueueError> {
        let pending = self.queue.enqueue(action, self.clock.now())?;
        if !self.is_online() {
            return Ok(false);
        }
        match tokio::time::timeout(timeout, self.drain()).await {
            Ok(report) => {
                report?;
                Ok(!self.queue.snapshot().iter().any(|a| a.id == pending.id))
            }
            Err(_) => {
                tracing::warn!(
                    "sync: urgent {} ({}) not confirmed within {:?}",
                    pending.id,
                    pending.kind(),
                    timeout
                );
                Ok(false)
            }
        }
    }

    fn apply_flags(&self, trigger: SyncTrigger) {
        match trigger {
            SyncTrigger::ConnectivityRestored => self.online.store(true, Ordering::SeqCst),
            SyncTrigger::ConnectivityLost => self.online.store(false, Ordering::SeqCst),
            SyncTrigger::VisibilityRestored => self.visible.store(true, Ordering::SeqCst),
            SyncTrigger::VisibilityLost => self.visible.store(false, Ordering::SeqCst),
            _ => {}
        }
    }

    /// Deliver a trigger to the sync loop, or handle it inline when no loop runs
    pub async fn notify(&self, trigger: SyncTrigger) -> Result<Option<DrainReport>, QueueError> {
        self.apply_flags(trigger);
        if let Some(tx) = self.loop_sender() {
            if tx.send(trigger).is_ok() {
                return Ok(None);
            }
        }
        self.handle(trigger).await
    }

    /// Act on one trigger; returns a report when a drain ran
    pub async fn handle(&self, trigger: SyncTrigger) -> Result<Option<DrainReport>, QueueError> {
        self.apply_flags(trigger);
        match trigger {
            SyncTrigger::ConnectivityRestored
            | SyncTrigger::VisibilityRestored
            | SyncTrigger::ActionEnqueued
            | SyncTrigger::RetryTimer => {
                if self.is_online() {
                    self.drain().await.map(Some)
                } else {
                    Ok(None)
                }
            }
            SyncTrigger::ConnectivityLost
            | SyncTrigger::VisibilityLost
            | SyncTrigger::Shutdown => Ok(None),
        }
    }

    /// Commit queued actions head-first until empty, offline, or a transient failure
    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        let _guard = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        for entry in self.queue.take_corrupt() {
            report.dropped += 1;
            self.emit(SyncEvent::Unreadable {
                action_id: entry.id,
                action_type: entry.action_type,
                reason: entry.reason,
            });
        }

        loop {
            if !self.is_online() {
                if !self.queue.is_empty() {
                    report.stopped = Some(DrainStop::Offline);
                }
                break;
            }
            let Some(mut head) = self.queue.head() else {
                break;
            };

            match self.committer.commit(&head.action).await {
                Ok(()) => {
                    self.queue.remove(&head.id)?;
                    report.committed += 1;
                    tracing::debug!("sync: committed {} ({})", head.id, head.kind());
                    self.emit(SyncEvent::Committed {
                        action_id: head.id,
                        action_type: head.action.kind(),
                    });
                }
                Err(CommitError::Transient(reason)) => {
                    let retry_count = self.queue.record_failure(&head.id)?;
                    head.retry_count = retry_count;
                    if retry_count > self.config.max_retries {
                        let action_id = head.id.clone();
                        self.drop_action(head, reason)?;
                        report.dropped += 1;
                        report.stopped = Some(DrainStop::RetriesExhausted { action_id });
                    } else {
                        tracing::warn!(
                            "sync: {} ({}) failed, retry {}/{}: {}",
                            head.id,
                            head.kind(),
                            retry_count,
                            self.config.max_retries,
                            reason
                        );
                        report.stopped = Some(DrainStop::Transient {
                            action_id: head.id.clone(),
                            retry_count,
                        });
                        self.emit(SyncEvent::RetryScheduled {
                            action_id: head.id,
                            action_type: head.action.kind(),
                            retry_count,
                            reason,
                        });
                    }
                    break;
                }
                Err(CommitError::Rejected(reason)) => {
                    self.drop_action(head, reason)?;
                    report.dropped += 1;
                }
            }
        }

        report.remaining = self.queue.len();
        Ok(report)
    }

    fn drop_action(&self, action: PendingAction, reason: String) -> Result<(), QueueError> {
        self.queue.remove(&action.id)?;
        tracing::warn!(
            "sync: dropping {} ({}) after {} retries: {}",
            action.id,
            action.kind(),
            action.retry_count,
            reason
        );
        self.emit(SyncEvent::PermanentFailure { action, reason });
        Ok(())
    }

    /// Remove queued actions that target an ended session
    pub fn discard_session(&self, session_id: &str, reason: &str) -> Result<usize, QueueError> {
        let discarded = self.queue.discard_session(session_id)?;
        let count = discarded.len();
        for action in discarded {
            tracing::info!(
                "sync: discarded {} ({}): {}",
                action.id,
                action.kind(),
                reason
            );
            self.emit(SyncEvent::Discarded {
                action,
                reason: reason.to_string(),
            });
        }
        Ok(count)
    }

    fn retry_deadline(&self, report: &DrainReport) -> Option<Instant> {
        match &report.stopped {
            Some(DrainStop::Transient { retry_count, .. }) => {
                Some(Instant::now() + self.config.backoff(*retry_count))
            }
            Some(DrainStop::RetriesExhausted { .. }) if report.remaining > 0 => {
                Some(Instant::now() + self.config.backoff(1))
            }
            _ => None,
        }
    }

    /// Run the trigger loop on the tokio runtime
    pub fn spawn(self: &Arc<Self>) -> SyncHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.loop_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx.clone());
        let engine = Arc::clone(self);
        let task = tokio::spawn(run_loop(engine, rx));
        SyncHandle { tx, task }
    }

    fn detach_loop(&self) {
        *self.loop_tx.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

async fn run_loop(engine: Arc<SyncEngine>, mut rx: mpsc::UnboundedReceiver<SyncTrigger>) {
    tracing::info!("sync loop started ({} pending)", engine.queue.len());

    // Anything restored from a previous run is flushed right away.
    let mut retry_at = match engine.handle(SyncTrigger::ActionEnqueued).await {
        Ok(Some(report)) => engine.retry_deadline(&report),
        Ok(None) => None,
        Err(e) => {
            tracing::error!("sync: initial drain failed: {}", e);
            None
        }
    };

    loop {
        let trigger = match retry_at {
            Some(deadline) => tokio::select! {
                trigger = rx.recv() => trigger,
                _ = tokio::time::sleep_until(deadline) => Some(SyncTrigger::RetryTimer),
            },
            None => rx.recv().await,
        };
        let Some(trigger) = trigger else {
            break;
        };
        if trigger == SyncTrigger::Shutdown {
            break;
        }
        if trigger == SyncTrigger::ConnectivityLost {
            retry_at = None;
        }

        match engine.handle(trigger).await {
            Ok(Some(report)) => retry_at = engine.retry_deadline(&report),
            Ok(None) => {}
            Err(e) => tracing::error!("sync: drain after {:?} failed: {}", trigger, e),
        }
    }

    engine.detach_loop();
    tracing::info!("sync loop stopped");
}

/// Handle to a running sync loop
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncTrigger>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn notify(&self, trigger: SyncTrigger) {
        if self.tx.send(trigger).is_err() {
            tracing::debug!("sync loop already stopped, dropping {:?}", trigger);
        }
    }

    pub async fn shutdown(self) {
        self.notify(SyncTrigger::Shutdown);
        if let Err(e) = self.task.await {
            tracing::error!("sync loop task failed: {}", e);
        }
    }
}
