pub mod action;
pub mod clock;
pub mod config;
pub mod document;
pub mod error;
pub mod ids;
pub mod model;

// Re-export commonly used types
pub use action::{Action, Writer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, PresenceConfig, QueueConfig, ReaperConfig};
pub use document::{DocumentWrite, FieldCondition, FieldWrite};
pub use error::{ClassSyncError, DomainError, InfraError};
pub use model::{
    ConnectedStudent, PresenceRecord, PresenceStatus, SessionDocument, SessionStatus,
    SlideDescriptor, StudentProgress,
};
