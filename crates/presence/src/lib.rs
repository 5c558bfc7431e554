//! classsync_presence
//! Per-user online/offline state: the owning client refreshes it, an
//! independent reaper reclaims records the client failed to release.

pub mod reaper;
pub mod tracker;

pub use reaper::{ReapReport, StalenessReaper};
pub use tracker::PresenceTracker;
