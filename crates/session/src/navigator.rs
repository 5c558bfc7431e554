// Student navigation
//
// Derives a student's local slide position from the teacher's broadcast
// state. The position always refers to an unlocked slide and never passes
// the teacher's slide while the session is locked.

use classsync_core::error::{ClassSyncError, DomainError};
use classsync_core::model::SessionDocument;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    /// Mirror the teacher's current slide
    Follow,
    /// The student navigated away; auto-advance is suppressed
    Review,
}

/// The teacher-owned fields a student navigates against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeacherView {
    pub current_slide_index: u32,
    pub unlocked_slide_indices: BTreeSet<u32>,
    pub is_locked: bool,
}

impl From<&SessionDocument> for TeacherView {
    fn from(doc: &SessionDocument) -> Self {
        Self {
            current_slide_index: doc.current_slide_index,
            unlocked_slide_indices: doc.unlocked_slide_indices.clone(),
            is_locked: doc.is_locked,
        }
    }
}

impl TeacherView {
    /// Nearest allowed position at or below `desired`
    fn clamp(&self, desired: u32) -> u32 {
        let target = if self.is_locked {
            desired.min(self.current_slide_index)
        } else {
            desired
        };
        self.unlocked_slide_indices
            .range(..=target)
            .next_back()
            .copied()
            .unwrap_or(self.current_slide_index)
    }
}

#[derive(Debug, Clone)]
pub struct Navigator {
    mode: NavigationMode,
    /// Where the student wants to be; the position is this, clamped
    desired: u32,
    position: u32,
    view: TeacherView,
}

impl Navigator {
    /// Start in follow mode on the teacher's current slide
    pub fn new(view: TeacherView) -> Self {
        let position = view.clamp(view.current_slide_index);
        Self {
            mode: NavigationMode::Follow,
            desired: view.current_slide_index,
            position,
            view,
        }
    }

    pub fn mode(&self) -> NavigationMode {
        self.mode
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn view(&self) -> &TeacherView {
        &self.view
    }

    pub fn is_unlocked(&self, index: u32) -> bool {
        self.view.unlocked_slide_indices.contains(&index)
    }

    /// Apply a new teacher state; returns the position if it moved
    ///
    /// A reviewing student whose position is the teacher's slide is back in
    /// follow mode, whether the teacher caught up or the student did.
    pub fn apply(&mut self, view: TeacherView) -> Option<u32> {
        if self.position == self.view.current_slide_index {
            self.mode = NavigationMode::Follow;
        }
        if self.mode == NavigationMode::Follow {
            self.desired = view.current_slide_index;
        }
        self.view = view;
        let moved = self.reposition();
        if self.position == self.view.current_slide_index {
            self.mode = NavigationMode::Follow;
        }
        moved
    }

    fn reposition(&mut self) -> Option<u32> {
        let position = self.view.clamp(self.desired);
        if position == self.position {
            return None;
        }
        self.position = position;
        Some(position)
    }

    /// Manual navigation; leaving the teacher's slide enters review mode
    pub fn navigate_to(&mut self, index: u32) -> Result<u32, ClassSyncError> {
        if !self.is_unlocked(index) {
            return Err(ClassSyncError::Domain(DomainError::SlideNotUnlocked {
                index,
            }));
        }
        self.desired = index;
        self.reposition();
        self.mode = if self.position == self.view.current_slide_index {
            NavigationMode::Follow
        } else {
            NavigationMode::Review
        };
        Ok(self.position)
    }

    /// Return to the teacher's slide and resume auto-advance
    pub fn follow(&mut self) -> u32 {
        self.mode = NavigationMode::Follow;
        self.desired = self.view.current_slide_index;
        self.reposition();
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(current: u32, unlocked: &[u32], locked: bool) -> TeacherView {
        TeacherView {
            current_slide_index: current,
            unlocked_slide_indices: unlocked.iter().copied().collect(),
            is_locked: locked,
        }
    }

    #[test]
    fn test_follow_mode_auto_advances() {
        let mut nav = Navigator::new(view(0, &[0], false));
        assert_eq!(nav.apply(view(1, &[0, 1], false)), Some(1));
        assert_eq!(nav.apply(view(1, &[0, 1], false)), None);
        assert_eq!(nav.mode(), NavigationMode::Follow);
    }

    #[test]
    fn test_review_mode_suppresses_auto_advance() {
        let mut nav = Navigator::new(view(2, &[0, 1, 2], false));
        assert_eq!(nav.navigate_to(0).unwrap(), 0);
        assert_eq!(nav.mode(), NavigationMode::Review);

        assert_eq!(nav.apply(view(3, &[0, 1, 2, 3], false)), None);
        assert_eq!(nav.position(), 0);

        assert_eq!(nav.follow(), 3);
        assert_eq!(nav.mode(), NavigationMode::Follow);
    }

    #[test]
    fn test_lock_clamps_ahead_position() {
        let mut nav = Navigator::new(view(1, &[0, 1, 2, 3], false));
        assert_eq!(nav.navigate_to(3).unwrap(), 3);

        // Locking pulls the student back to the teacher's slide.
        assert_eq!(nav.apply(view(1, &[0, 1, 2, 3], true)), Some(1));
        // Ahead navigation is clamped while locked.
        assert_eq!(nav.navigate_to(2).unwrap(), 1);
        assert_eq!(nav.mode(), NavigationMode::Follow);

        // Back in follow mode, unlocking keeps the student on the teacher's slide.
        assert_eq!(nav.apply(view(1, &[0, 1, 2, 3], false)), None);
        assert_eq!(nav.navigate_to(2).unwrap(), 2);
        assert_eq!(nav.mode(), NavigationMode::Review);
    }

    #[test]
    fn test_cannot_reach_locked_slide() {
        let mut nav = Navigator::new(view(1, &[0, 1], false));
        let err = nav.navigate_to(4).unwrap_err();
        assert!(matches!(
            err,
            ClassSyncError::Domain(DomainError::SlideNotUnlocked { index: 4 })
        ));
        assert_eq!(nav.position(), 1);
    }

    #[test]
    fn test_teacher_catching_up_resumes_follow() {
        let mut nav = Navigator::new(view(1, &[0, 1, 2, 3], false));
        assert_eq!(nav.navigate_to(3).unwrap(), 3);
        assert_eq!(nav.mode(), NavigationMode::Review);

        assert_eq!(nav.apply(view(3, &[0, 1, 2, 3], false)), None);
        assert_eq!(nav.mode(), NavigationMode::Follow);

        assert_eq!(nav.apply(view(4, &[0, 1, 2, 3, 4], false)), Some(4));
        assert_eq!(nav.position(), 4);
    }

    #[test]
    fn test_rewind_in_follow_mode() {
        let mut nav = Navigator::new(view(3, &[0, 1, 2, 3], false));
        assert_eq!(nav.apply(view(1, &[0, 1, 2, 3], false)), Some(1));
    }
}
