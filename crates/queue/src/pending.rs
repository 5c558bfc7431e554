use chrono::{DateTime, Utc};
use classsync_core::action::Action;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A mutation not yet confirmed committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    /// Locally unique; storage ignores a second append with the same id
    pub id: String,
    pub action: Action,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl PendingAction {
    pub fn new(action: Action, created_at: DateTime<Utc>) -> Self {
        Self {
            id: classsync_core::ids::new_id(),
            action,
            created_at,
            retry_count: 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.action.kind()
    }
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] retries={} (created: {})",
            self.id,
            self.kind(),
            self.retry_count,
            self.created_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
