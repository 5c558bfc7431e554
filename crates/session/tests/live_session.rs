use chrono::{Duration, TimeZone, Utc};
use classsync_core::clock::{Clock, ManualClock};
use classsync_core::config::{QueueConfig, ReaperConfig};
use classsync_core::error::{ClassSyncError, DomainError};
use classsync_core::model::{SessionDocument, SlideDescriptor};
use classsync_queue::{
    MemoryQueueStorage, OfflineActionQueue, StoreCommitter, SyncEngine, SyncTrigger,
};
use classsync_presence::StalenessReaper;
use classsync_session::{NavigationMode, SessionController, SessionState, StudentSyncClient};
use classsync_store::{DocumentStore, FlakyLink, InMemoryContentStore, MemoryDocumentStore};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_test::assert_ok;

const LESSON: &str = "lesson-1";

/// One client process: its own network link and its own queue
struct Client {
    link: FlakyLink,
    engine: Arc<SyncEngine>,
}

impl Client {
    fn new(store: &Arc<MemoryDocumentStore>, clock: &ManualClock) -> Self {
        let link = FlakyLink::new(store.clone());
        let queue = OfflineActionQueue::open(Box::new(MemoryQueueStorage::new())).unwrap();
        let engine = Arc::new(SyncEngine::new(
            queue,
            Arc::new(StoreCommitter::new(Arc::new(link.clone()))),
            QueueConfig::default(),
            Arc::new(clock.clone()),
        ));
        Self { link, engine }
    }

    async fn go_offline(&self) {
        self.link.set_online(false);
        self.engine
            .notify(SyncTrigger::ConnectivityLost)
            .await
            .unwrap();
    }

    async fn go_online(&self) {
        self.link.set_online(true);
        self.engine
            .notify(SyncTrigger::ConnectivityRestored)
            .await
            .unwrap();
    }

    fn controller(&self, teacher_id: &str) -> SessionController {
        SessionController::new(teacher_id, self.engine.clone(), Arc::new(self.link.clone()))
            .unwrap()
    }

    async fn join(&self, session_id: &str, student_id: &str) -> StudentSyncClient {
        StudentSyncClient::join(&self.link, self.engine.clone(), session_id, student_id)
            .await
            .unwrap()
    }
}

struct Classroom {
    store: Arc<MemoryDocumentStore>,
    clock: ManualClock,
    content: InMemoryContentStore,
}

impl Classroom {
    async fn new(slides: u32) -> Self {
        let content = InMemoryContentStore::new();
        let lesson = (0..slides)
            .map(|order| SlideDescriptor {
                order,
                kind: "text".to_string(),
                content: json!({"title": format!("slide {}", order)}),
            })
            .collect();
        content.insert_lesson(LESSON, lesson).await;
        Self {
            store: Arc::new(MemoryDocumentStore::new()),
            clock: ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()),
            content,
        }
    }

    fn client(&self) -> Client {
        Client::new(&self.store, &self.clock)
    }

    async fn session(&self, session_id: &str) -> SessionDocument {
        let value = self
            .store
            .get(&format!("sessions/{}", session_id))
            .await
            .unwrap()
            .unwrap();
        SessionDocument::from_value(&value).unwrap()
    }
}

#[tokio::test]
async fn offline_advance_reaches_student_once_without_flicker() {
    let room = Classroom::new(5).await;
    let teacher = room.client();
    let controller = teacher.controller("teacher-1");
    let session_id = controller.start(&room.content, LESSON, "class-1").await.unwrap();

    let student = room.client();
    let mut follower = student.join(&session_id, "stu-1").await;
    assert_eq!(follower.position(), 0);
    follower.poll_updates().await.unwrap();

    teacher.go_offline().await;
    controller.advance(1).await.unwrap();
    assert_eq!(teacher.engine.queue().len(), 1);
    assert_eq!(room.session(&session_id).await.current_slide_index, 0);
    assert!(follower.poll_updates().await.unwrap().is_empty());

    teacher.go_online().await;
    assert!(teacher.engine.queue().is_empty());

    let updates = follower.poll_updates().await.unwrap();
    let moves: Vec<_> = updates.iter().filter(|u| u.moved).collect();
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].current_slide_index, 1);
    assert_eq!(
        moves[0].unlocked_slide_indices,
        BTreeSet::from([0, 1])
    );
    assert!(updates.iter().all(|u| u.current_slide_index == 1));
    assert_eq!(follower.position(), 1);
}

#[tokio::test]
async fn teacher_and_student_writes_never_clobber_each_other() {
    let room = Classroom::new(5).await;
    let teacher = room.client();
    let controller = teacher.controller("teacher-1");
    let session_id = controller.start(&room.content, LESSON, "class-1").await.unwrap();
    let student = room.client();
    let mut follower = student.join(&session_id, "stu-1").await;

    // Both sides work from stale state while the teacher is offline.
    teacher.go_offline().await;
    controller.advance(1).await.unwrap();
    controller.lock().await.unwrap();
    room.clock.advance(Duration::seconds(40));
    assert_eq!(follower.complete_slide(0).await.unwrap(), 40);
    follower.engage(0).await.unwrap();
    follower.heartbeat().await.unwrap();

    let ((), sent) = tokio::join!(teacher.go_online(), follower.send_message("done"));
    assert_ok!(sent);

    let doc = room.session(&session_id).await;
    assert_eq!(doc.current_slide_index, 1);
    assert!(doc.is_locked);
    let progress = &doc.student_progress["stu-1"];
    assert_eq!(progress.completed_slides, BTreeSet::from([0]));
    assert_eq!(progress.engaged_slides, BTreeSet::from([0]));
    assert_eq!(progress.total_time, 40);
    assert!(doc.connected_students.contains_key("stu-1"));
    assert_eq!(doc.teacher_id, "teacher-1");
}

#[tokio::test]
async fn unlocked_slides_only_grow() {
    let room = Classroom::new(6).await;
    let teacher = room.client();
    let controller = teacher.controller("teacher-1");
    let session_id = controller.start(&room.content, LESSON, "class-1").await.unwrap();

    let mut previous = room.session(&session_id).await.unlocked_slide_indices;
    assert_eq!(previous, BTreeSet::from([0]));
    for index in [3, 1, 5, 2, 0, 4] {
        controller.advance(index).await.unwrap();
        let unlocked = room.session(&session_id).await.unlocked_slide_indices;
        assert!(unlocked.is_superset(&previous));
        assert!(unlocked.contains(&index));
        previous = unlocked;
    }
    assert_eq!(room.session(&session_id).await.current_slide_index, 4);
}

#[tokio::test]
async fn invalid_commands_never_reach_the_queue() {
    let room = Classroom::new(3).await;
    let teacher = room.client();
    let controller = teacher.controller("teacher-1");

    let err = controller.advance(1).await.unwrap_err();
    assert!(matches!(
        err,
        ClassSyncError::Domain(DomainError::InvalidTransition { .. })
    ));

    controller.start(&room.content, LESSON, "class-1").await.unwrap();
    let before = room.store.writes_committed().await;
    let err = controller.advance(3).await.unwrap_err();
    assert!(matches!(
        err,
        ClassSyncError::Domain(DomainError::SlideOutOfRange {
            index: 3,
            slide_count: 3
        })
    ));
    assert!(err.is_user_visible());
    assert!(teacher.engine.queue().is_empty());
    assert_eq!(room.store.writes_committed().await, before);

    let err = controller
        .start(&room.content, LESSON, "class-1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClassSyncError::Domain(DomainError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn ended_session_is_terminal_on_both_sides() {
    let room = Classroom::new(4).await;
    let teacher = room.client();
    let controller = teacher.controller("teacher-1");
    let session_id = controller.start(&room.content, LESSON, "class-1").await.unwrap();
    let student = room.client();
    let mut follower = student.join(&session_id, "stu-1").await;
    follower.poll_updates().await.unwrap();

    student.go_offline().await;
    follower.engage(0).await.unwrap();
    assert_eq!(student.engine.queue().len(), 1);

    controller.end().await.unwrap();
    let updates = follower.poll_updates().await.unwrap();
    assert!(updates.last().unwrap().ended);
    assert!(follower.is_ended());
    assert!(student.engine.queue().is_empty());

    let err = follower.heartbeat().await.unwrap_err();
    assert!(matches!(
        err,
        ClassSyncError::Domain(DomainError::SessionEnded { .. })
    ));
    let err = controller.advance(1).await.unwrap_err();
    assert!(matches!(
        err,
        ClassSyncError::Domain(DomainError::SessionEnded { .. })
    ));

    // A stray write reviving the status cannot reopen the session locally.
    room.store
        .merge(
            &format!("sessions/{}", session_id),
            &[classsync_core::FieldWrite::set("status", "active")],
        )
        .await
        .unwrap();
    let updates = follower.poll_updates().await.unwrap();
    assert!(updates.iter().all(|u| u.ended));
}

#[tokio::test]
async fn reaped_session_rejects_later_teacher_commands() {
    let room = Classroom::new(4).await;
    let teacher = room.client();
    let controller = teacher.controller("teacher-1");
    let session_id = controller.start(&room.content, LESSON, "class-1").await.unwrap();

    let config = ReaperConfig::default();
    room.clock
        .advance(Duration::seconds(config.session_stale_after_secs as i64 + 1));
    let reaper = StalenessReaper::new(room.store.clone(), Arc::new(room.clock.clone()), config);
    let report = reaper.run_pass().await.unwrap();
    assert_eq!(report.ended_sessions, vec![session_id.clone()]);

    // Offline the remote end is invisible; the command is queued as usual.
    teacher.go_offline().await;
    assert_ok!(controller.lock().await);
    assert_eq!(controller.state().await, SessionState::Active);
    teacher.go_online().await;

    let err = controller.advance(1).await.unwrap_err();
    assert!(matches!(
        err,
        ClassSyncError::Domain(DomainError::SessionEnded { .. })
    ));
    assert_eq!(controller.state().await, SessionState::Ended);
    assert!(teacher.engine.queue().is_empty());
    assert!(controller.end().await.is_err());
    assert_eq!(room.session(&session_id).await.current_slide_index, 0);
}

#[tokio::test]
async fn review_mode_holds_until_follow() {
    let room = Classroom::new(5).await;
    let teacher = room.client();
    let controller = teacher.controller("teacher-1");
    let session_id = controller.start(&room.content, LESSON, "class-1").await.unwrap();
    controller.advance(1).await.unwrap();
    let student = room.client();
    let mut follower = student.join(&session_id, "stu-1").await;
    assert_eq!(follower.position(), 1);

    assert_eq!(follower.navigate_to(0).unwrap(), 0);
    assert_eq!(follower.mode(), NavigationMode::Review);
    controller.advance(2).await.unwrap();
    follower.poll_updates().await.unwrap();
    assert_eq!(follower.position(), 0);
    assert_eq!(follower.teacher_view().current_slide_index, 2);

    assert_eq!(follower.follow().unwrap(), 2);
    controller.advance(3).await.unwrap();
    follower.poll_updates().await.unwrap();
    assert_eq!(follower.position(), 3);
}

#[tokio::test]
async fn roster_tracks_join_and_leave() {
    let room = Classroom::new(2).await;
    let teacher = room.client();
    let controller = teacher.controller("teacher-1");
    let session_id = controller.start(&room.content, LESSON, "class-1").await.unwrap();

    let first = room.client();
    let second = room.client();
    let a = first.join(&session_id, "stu-a").await;
    let _b = second.join(&session_id, "stu-b").await;

    let roster = controller.roster().await.unwrap();
    assert_eq!(roster.keys().cloned().collect::<Vec<_>>(), vec!["stu-a", "stu-b"]);
    assert_eq!(roster["stu-a"].joined_at, room.clock.now());

    assert!(a.leave().await.unwrap());
    let roster = controller.roster().await.unwrap();
    assert_eq!(roster.keys().cloned().collect::<Vec<_>>(), vec!["stu-b"]);
}

#[tokio::test]
async fn joining_a_missing_session_fails() {
    let room = Classroom::new(2).await;
    let student = room.client();
    let result =
        StudentSyncClient::join(&student.link, student.engine.clone(), "nope", "stu-1").await;
    assert!(matches!(
        result,
        Err(ClassSyncError::Domain(DomainError::NotFound { .. }))
    ));
}
