//! classsync_session
//! The two typed mutators of a live session document.
//!
//! [`SessionController`] is the teacher side: it alone writes navigation,
//! lock and status fields. [`StudentSyncClient`] follows the teacher's state
//! and writes only its own roster and progress entries.

pub mod navigator;
pub mod student;
pub mod teacher;

pub use navigator::{NavigationMode, Navigator, TeacherView};
pub use student::{SessionUpdate, StudentSyncClient};
pub use teacher::{SessionCommand, SessionController, SessionState};
