// In-process classroom run
//
// One teacher and several students, each with its own network link and
// queue, sharing an in-memory document store. Time is driven by a manual
// clock so the staleness window can be crossed without waiting.

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use classsync_core::clock::{Clock, ManualClock};
use classsync_core::model::{SessionDocument, SlideDescriptor};
use classsync_core::Config;
use classsync_presence::{PresenceTracker, StalenessReaper};
use classsync_queue::{
    MemoryQueueStorage, OfflineActionQueue, StoreCommitter, SyncEngine, SyncEvent, SyncTrigger,
};
use classsync_session::{SessionController, StudentSyncClient};
use classsync_store::{DocumentStore, FlakyLink, InMemoryContentStore, MemoryDocumentStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

const LESSON_ID: &str = "demo-lesson";
const CLASS_ID: &str = "demo-class";
const COMMIT_TIMEOUT: Duration = Duration::from_secs(5);

struct Client {
    link: FlakyLink,
    engine: Arc<SyncEngine>,
}

impl Client {
    fn new(store: &Arc<MemoryDocumentStore>, clock: &ManualClock, config: &Config) -> Result<Self> {
        let link = FlakyLink::new(store.clone());
        let queue = OfflineActionQueue::open(Box::new(MemoryQueueStorage::new()))?;
        let engine = Arc::new(SyncEngine::new(
            queue,
            Arc::new(StoreCommitter::new(Arc::new(link.clone()))),
            config.queue.clone(),
            Arc::new(clock.clone()),
        ));
        Ok(Self { link, engine })
    }
}

struct Student {
    client: Client,
    presence: Arc<PresenceTracker>,
    sync: StudentSyncClient,
}

/// Wait until `count` actions have committed
async fn wait_committed(events: &mut broadcast::Receiver<SyncEvent>, count: usize) -> Result<()> {
    let mut seen = 0;
    while seen < count {
        match tokio::time::timeout(COMMIT_TIMEOUT, events.recv()).await {
            Ok(Ok(SyncEvent::Committed { .. })) => seen += 1,
            Ok(Ok(event)) => {
                if let Some(failure) = event.failure() {
                    return Err(failure.into());
                }
            }
            Ok(Err(e)) => bail!("sync event stream: {}", e),
            Err(_) => bail!("timed out waiting for {} commits", count - seen),
        }
    }
    Ok(())
}

async fn poll_students(students: &mut [Student]) -> Result<()> {
    for student in students.iter_mut() {
        for update in student.sync.poll_updates().await? {
            if update.moved || update.ended {
                info!(
                    "  {} on slide {} [{:?}] (teacher on {}, locked: {}, ended: {})",
                    student.sync.student_id(),
                    update.position,
                    update.mode,
                    update.current_slide_index,
                    update.is_locked,
                    update.ended
                );
            }
        }
    }
    Ok(())
}

pub async fn run(config: Config, student_count: usize, slides: u32) -> Result<()> {
    if student_count == 0 || slides < 4 {
        bail!("the demo needs at least one student and four slides");
    }

    let store = Arc::new(MemoryDocumentStore::new());
    let start = Utc
        .with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .context("start time")?;
    let clock = ManualClock::new(start);
    let content = InMemoryContentStore::new();
    content
        .insert_lesson(
            LESSON_ID,
            (0..slides)
                .map(|order| SlideDescriptor {
                    order,
                    kind: "text".to_string(),
                    content: json!({ "title": format!("Slide {}", order + 1) }),
                })
                .collect(),
        )
        .await;

    // Teacher runs a background sync loop; students drain inline.
    let teacher = Client::new(&store, &clock, &config)?;
    let mut teacher_events = teacher.engine.subscribe();
    let teacher_loop = teacher.engine.spawn();
    let controller = SessionController::new(
        "teacher-1",
        teacher.engine.clone(),
        Arc::new(teacher.link.clone()),
    )?;

    let session_id = controller.start(&content, LESSON_ID, CLASS_ID).await?;
    wait_committed(&mut teacher_events, 1).await?;
    info!("Session {} is live with {} slides", session_id, slides);

    let mut students = Vec::with_capacity(student_count);
    for n in 0..student_count {
        let student_id = format!("student-{}", n + 1);
        let client = Client::new(&store, &clock, &config)?;
        let presence = Arc::new(PresenceTracker::new(
            student_id.clone(),
            client.engine.clone(),
            Arc::new(client.link.clone()),
            config.presence.clone(),
        )?);
        let mut sync =
            StudentSyncClient::join(&client.link, client.engine.clone(), &session_id, &student_id)
                .await?;
        sync.attach_presence(presence.clone()).await?;
        students.push(Student {
            client,
            presence,
            sync,
        });
    }
    poll_students(&mut students).await?;
    info!("Roster: {:?}", controller.roster().await?.keys().collect::<Vec<_>>());

    info!("Teacher advances to slide 1");
    controller.advance(1).await?;
    wait_committed(&mut teacher_events, 1).await?;
    poll_students(&mut students).await?;

    info!("Teacher loses connectivity, advances to 2 and locks");
    teacher.link.set_online(false);
    teacher.engine.notify(SyncTrigger::ConnectivityLost).await?;
    controller.advance(2).await?;
    controller.lock().await?;
    info!("  teacher queue depth: {}", teacher.engine.queue().len());
    poll_students(&mut students).await?;

    info!("Teacher reconnects");
    teacher.link.set_online(true);
    teacher.engine.notify(SyncTrigger::ConnectivityRestored).await?;
    wait_committed(&mut teacher_events, 2).await?;
    poll_students(&mut students).await?;

    info!("{} reviews slide 0 while the teacher moves on", students[0].sync.student_id());
    controller.unlock().await?;
    wait_committed(&mut teacher_events, 1).await?;
    students[0].sync.navigate_to(0)?;
    controller.advance(3).await?;
    wait_committed(&mut teacher_events, 1).await?;
    poll_students(&mut students).await?;
    let back = students[0].sync.follow()?;
    info!("  {} follows again on slide {}", students[0].sync.student_id(), back);

    for step in 0..4 {
        clock.advance(chrono::Duration::seconds(30));
        for student in students.iter_mut() {
            student.sync.heartbeat().await?;
            student.presence.heartbeat().await?;
            student.sync.complete_slide(step.min(3)).await?;
        }
    }
    students[0].sync.engage(3).await?;
    students[0].sync.send_message("Finished the exercise").await?;

    // The last student's tab is killed: no leave, no offline write.
    let dropped = students.pop().context("no students")?;
    let dropped_id = dropped.sync.student_id().to_string();
    dropped.client.link.set_online(false);
    info!("{} disappears without a final write", dropped_id);

    let stale_after = config
        .presence
        .stale_after()
        .max(config.reaper.presence_stale_after());
    let mut elapsed = chrono::Duration::zero();
    while elapsed <= stale_after {
        let step = chrono::Duration::seconds(config.presence.heartbeat_interval_secs as i64);
        clock.advance(step);
        elapsed += step;
        for student in students.iter() {
            student.sync.heartbeat().await?;
            student.presence.heartbeat().await?;
        }
    }

    let reaper = StalenessReaper::new(
        store.clone(),
        Arc::new(clock.clone()),
        config.reaper.clone(),
    );
    let report = reaper.run_pass().await?;
    info!(
        "Reaper: offline {:?}, removed {:?}",
        report.marked_offline, report.removed_students
    );
    let again = reaper.run_pass().await?;
    info!("Second reaper pass changed {} records", again.marked_offline.len());

    for student in students.drain(..) {
        let id = student.sync.student_id().to_string();
        let confirmed = student.sync.leave().await?;
        student.presence.sign_out().await?;
        info!("{} left (confirmed: {})", id, confirmed);
    }

    controller.end().await?;
    wait_committed(&mut teacher_events, 1).await?;

    let value = store
        .get(&format!("sessions/{}", session_id))
        .await?
        .context("session document missing")?;
    let document = SessionDocument::from_value(&value)?;
    info!(
        "Final: status {:?}, slide {}, unlocked {:?}, progress for {} students, {} writes committed, now {}",
        document.status,
        document.current_slide_index,
        document.unlocked_slide_indices,
        document.student_progress.len(),
        store.writes_committed().await,
        clock.now()
    );

    teacher_loop.shutdown().await;
    Ok(())
}
