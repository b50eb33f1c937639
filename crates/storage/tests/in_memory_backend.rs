use std::sync::Arc;
use std::time::Duration;

use progress_core::model::{
    LessonId, LessonProgress, LessonProgressPayload, ModuleId, ProgressOverview, RawLessonProgress,
    ResumePoint, SnapshotSource,
};
use storage::{BackendError, InMemoryBackend, ProgressBackend};

fn lesson(id: &str) -> LessonId {
    LessonId::new(id).unwrap()
}

fn payload(id: &str, progress: f64, delta: u64) -> LessonProgressPayload {
    let record = LessonProgress::new(lesson(id), ModuleId::new("module-01"), progress, 0);
    LessonProgressPayload::from_record(&record, delta, false)
}

#[tokio::test]
async fn snapshot_reflects_seeded_lessons_and_overview() {
    let memory = InMemoryBackend::new();
    memory.seed_lesson(RawLessonProgress {
        lesson_id: Some("module-01-lesson-01".into()),
        progress: Some(1.0),
        ..RawLessonProgress::default()
    });
    memory.set_overview(ProgressOverview {
        xp_total: 120,
        streak_days: 3,
        ..ProgressOverview::default()
    });
    let backend: Arc<dyn ProgressBackend> = Arc::new(memory);

    let snapshot = backend.fetch_snapshot().await.unwrap().ingest();
    assert_eq!(snapshot.source, SnapshotSource::Server);
    assert_eq!(snapshot.overview.xp_total, 120);
    assert_eq!(snapshot.lessons.len(), 1);
    assert!(snapshot.lessons[0].is_completed());
}

#[tokio::test]
async fn missing_row_write_is_recorded_but_answers_not_found() {
    let backend = InMemoryBackend::new();
    backend.set_missing_on_write(true);

    let first = backend
        .put_lesson_progress(&lesson("l1"), &payload("l1", 0.4, 10))
        .await;
    assert_eq!(first, Err(BackendError::NotFound));
    assert_eq!(backend.stored(&lesson("l1")).unwrap().progress, Some(0.4));

    let second = backend
        .put_lesson_progress(&lesson("l1"), &payload("l1", 0.6, 10))
        .await
        .unwrap();
    assert_eq!(second.progress, Some(0.6));
    assert_eq!(second.time_spent, Some(20.0));
}

#[tokio::test]
async fn held_writes_complete_in_release_order() {
    let backend = InMemoryBackend::new();
    let gate = backend.hold_writes();

    let pending = tokio::spawn({
        let backend = backend.clone();
        async move {
            backend
                .put_lesson_progress(&lesson("l1"), &payload("l1", 0.5, 0))
                .await
        }
    });
    tokio::task::yield_now().await;
    assert!(backend.writes().is_empty());

    gate.release(1);
    pending.await.unwrap().unwrap();
    assert_eq!(backend.writes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn latency_delays_every_call() {
    let backend = InMemoryBackend::new();
    backend.set_latency(Duration::from_millis(250));
    let start = tokio::time::Instant::now();
    backend.fetch_snapshot().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(250));
}

#[tokio::test]
async fn resume_points_are_per_module() {
    let backend = InMemoryBackend::new();
    let module = ModuleId::new("module-02").unwrap();
    backend.set_resume_point(ResumePoint {
        module_id: module.clone(),
        lesson_id: lesson("module-02-lesson-01"),
        scroll_position: Some(0.4),
        last_viewed_section: None,
        progress: Some(0.3),
    });

    let point = backend.get_module_resume_point(&module).await.unwrap().unwrap();
    assert_eq!(point.lesson_id, lesson("module-02-lesson-01"));
    let other = ModuleId::new("module-03").unwrap();
    assert_eq!(backend.get_module_resume_point(&other).await.unwrap(), None);
}
