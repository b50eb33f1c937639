use async_trait::async_trait;
use progress_core::model::{
    LessonId, LessonProgressPayload, ModuleId, ProgressOverview, RawLessonProgress,
    RawProgressSnapshot, ResumePoint, SnapshotSource,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Errors surfaced by progress backends, classified by how callers recover.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendError {
    #[error("not found")]
    NotFound,

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("unauthorized")]
    Unauthorized,

    #[error("request rejected with status {status}")]
    Rejected { status: u16 },

    #[error("server error: status {status}")]
    Server { status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("decode error: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether the failure means the backend could not be reached at all.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

/// Contract for the remote progress API.
///
/// Implementations return transport shapes; normalization happens in
/// `progress_core::model::raw`.
#[async_trait]
pub trait ProgressBackend: Send + Sync {
    /// Read the authoritative aggregate for the current user.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the snapshot cannot be fetched.
    async fn fetch_snapshot(&self) -> Result<RawProgressSnapshot, BackendError>;

    /// Write one lesson's progress; returns the server-side record.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the server has no record to update,
    /// `BackendError::RateLimited` on 429, or other transport errors.
    async fn put_lesson_progress(
        &self,
        lesson_id: &LessonId,
        payload: &LessonProgressPayload,
    ) -> Result<RawLessonProgress, BackendError>;

    /// Read one lesson's progress.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if nothing was recorded yet.
    async fn fetch_lesson_progress(
        &self,
        lesson_id: &LessonId,
    ) -> Result<RawLessonProgress, BackendError>;

    /// Read the "continue where you left off" marker of a module.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport failures. A module without a
    /// marker is `Ok(None)`.
    async fn get_module_resume_point(
        &self,
        module_id: &ModuleId,
    ) -> Result<Option<ResumePoint>, BackendError>;
}

#[derive(Default)]
struct MemoryState {
    lessons: BTreeMap<LessonId, RawLessonProgress>,
    overview: ProgressOverview,
    resume_points: BTreeMap<ModuleId, ResumePoint>,
    failures: VecDeque<BackendError>,
    writes: Vec<LessonProgressPayload>,
    missing_on_write: bool,
}

/// In-memory backend for tests and offline prototyping.
///
/// Behaves like a well-mannered server: writes never lower stored progress
/// unless flagged as a reset, and time deltas accumulate. Failures can be
/// scripted with `fail_next`, and writes can be held back with `hold_writes`
/// to reorder responses.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    write_gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
    latency: Arc<Mutex<Option<Duration>>>,
}

/// Releases writes held by `InMemoryBackend::hold_writes`, one per permit.
#[derive(Clone)]
pub struct WriteGate {
    semaphore: Arc<Semaphore>,
}

impl WriteGate {
    pub fn release(&self, writes: usize) {
        self.semaphore.add_permits(writes);
    }
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> Option<R> {
        self.state.lock().ok().map(|mut guard| f(&mut guard))
    }

    /// Seed a stored lesson record. Entries without a lesson id are ignored.
    pub fn seed_lesson(&self, lesson: RawLessonProgress) {
        let Some(id) = lesson.lesson_id.clone().and_then(|id| LessonId::new(id).ok()) else {
            return;
        };
        self.with_state(|state| state.lessons.insert(id, lesson));
    }

    pub fn set_overview(&self, overview: ProgressOverview) {
        self.with_state(|state| state.overview = overview);
    }

    pub fn set_resume_point(&self, point: ResumePoint) {
        self.with_state(|state| state.resume_points.insert(point.module_id.clone(), point));
    }

    /// Make the next call (of any kind) fail with `error`. Queues in order.
    pub fn fail_next(&self, error: BackendError) {
        self.with_state(|state| state.failures.push_back(error));
    }

    /// Answer writes with 404 while still recording them, as a server without
    /// an existing progress row does.
    pub fn set_missing_on_write(&self, missing: bool) {
        self.with_state(|state| state.missing_on_write = missing);
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = Some(latency);
        }
    }

    /// Block writes until released through the returned gate.
    #[must_use]
    pub fn hold_writes(&self) -> WriteGate {
        let semaphore = Arc::new(Semaphore::new(0));
        if let Ok(mut guard) = self.write_gate.lock() {
            *guard = Some(Arc::clone(&semaphore));
        }
        WriteGate { semaphore }
    }

    /// Payloads received so far, in arrival order.
    #[must_use]
    pub fn writes(&self) -> Vec<LessonProgressPayload> {
        self.with_state(|state| state.writes.clone())
            .unwrap_or_default()
    }

    /// Stored server-side record for a lesson.
    #[must_use]
    pub fn stored(&self, lesson_id: &LessonId) -> Option<RawLessonProgress> {
        self.with_state(|state| state.lessons.get(lesson_id).cloned())
            .flatten()
    }

    async fn before_call(&self) -> Result<(), BackendError> {
        let latency = *self
            .latency
            .lock()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut guard = self
            .state
            .lock()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        match guard.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn wait_for_gate(&self) -> Result<(), BackendError> {
        let gate = self
            .write_gate
            .lock()
            .map_err(|e| BackendError::Network(e.to_string()))?
            .clone();
        if let Some(semaphore) = gate {
            let permit = semaphore
                .acquire()
                .await
                .map_err(|e| BackendError::Network(e.to_string()))?;
            permit.forget();
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressBackend for InMemoryBackend {
    async fn fetch_snapshot(&self) -> Result<RawProgressSnapshot, BackendError> {
        self.before_call().await?;
        let guard = self
            .state
            .lock()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(RawProgressSnapshot {
            overview: Some(guard.overview.clone()),
            lessons: guard.lessons.values().cloned().collect(),
            source: Some(SnapshotSource::Server),
        })
    }

    async fn put_lesson_progress(
        &self,
        lesson_id: &LessonId,
        payload: &LessonProgressPayload,
    ) -> Result<RawLessonProgress, BackendError> {
        self.wait_for_gate().await?;
        self.before_call().await?;
        let mut guard = self
            .state
            .lock()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        guard.writes.push(payload.clone());

        let missing = guard.missing_on_write && !guard.lessons.contains_key(lesson_id);
        let stored = guard
            .lessons
            .entry(lesson_id.clone())
            .or_insert_with(|| RawLessonProgress {
                lesson_id: Some(lesson_id.to_string()),
                ..RawLessonProgress::default()
            });

        let current = stored.progress.unwrap_or(0.0);
        let time = stored.time_spent.unwrap_or(0.0);
        #[allow(clippy::cast_precision_loss)]
        let delta = payload.time_spent_delta as f64;
        let (progress, time) = if payload.reset {
            (payload.progress, delta)
        } else {
            (current.max(payload.progress), time + delta)
        };
        stored.progress = Some(progress);
        stored.completion_percentage = Some(progress * 100.0);
        stored.time_spent = Some(time);
        stored.completed = Some(progress >= 1.0);
        if let Some(module_id) = &payload.module_id {
            stored.module_id = Some(module_id.to_string());
        }
        if payload.scroll_position.is_some() {
            stored.scroll_position = payload.scroll_position;
        }
        if payload.last_viewed_section.is_some() {
            stored.last_viewed_section.clone_from(&payload.last_viewed_section);
        }

        if missing {
            return Err(BackendError::NotFound);
        }
        Ok(stored.clone())
    }

    async fn fetch_lesson_progress(
        &self,
        lesson_id: &LessonId,
    ) -> Result<RawLessonProgress, BackendError> {
        self.before_call().await?;
        let guard = self
            .state
            .lock()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        guard
            .lessons
            .get(lesson_id)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn get_module_resume_point(
        &self,
        module_id: &ModuleId,
    ) -> Result<Option<ResumePoint>, BackendError> {
        self.before_call().await?;
        let guard = self
            .state
            .lock()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(guard.resume_points.get(module_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::model::LessonProgress;

    fn lesson(id: &str) -> LessonId {
        LessonId::new(id).unwrap()
    }

    fn payload(id: &str, progress: f64, delta: u64, reset: bool) -> LessonProgressPayload {
        let record = LessonProgress::new(lesson(id), None, progress, 0);
        LessonProgressPayload::from_record(&record, delta, reset)
    }

    #[tokio::test]
    async fn writes_accumulate_and_never_lower_progress() {
        let backend = InMemoryBackend::new();
        let id = lesson("l1");
        backend
            .put_lesson_progress(&id, &payload("l1", 0.8, 30, false))
            .await
            .unwrap();
        let stored = backend
            .put_lesson_progress(&id, &payload("l1", 0.5, 15, false))
            .await
            .unwrap();
        assert_eq!(stored.progress, Some(0.8));
        assert_eq!(stored.time_spent, Some(45.0));
        assert_eq!(backend.writes().len(), 2);
    }

    #[tokio::test]
    async fn reset_write_lowers_progress() {
        let backend = InMemoryBackend::new();
        let id = lesson("l1");
        backend
            .put_lesson_progress(&id, &payload("l1", 1.0, 30, false))
            .await
            .unwrap();
        let stored = backend
            .put_lesson_progress(&id, &payload("l1", 0.0, 0, true))
            .await
            .unwrap();
        assert_eq!(stored.progress, Some(0.0));
        assert_eq!(stored.time_spent, Some(0.0));
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let backend = InMemoryBackend::new();
        backend.fail_next(BackendError::Timeout);
        backend.fail_next(BackendError::Server { status: 503 });
        assert_eq!(backend.fetch_snapshot().await, Err(BackendError::Timeout));
        assert_eq!(
            backend.fetch_snapshot().await,
            Err(BackendError::Server { status: 503 })
        );
        assert!(backend.fetch_snapshot().await.is_ok());
    }

    #[tokio::test]
    async fn unknown_lesson_is_not_found() {
        let backend = InMemoryBackend::new();
        assert_eq!(
            backend.fetch_lesson_progress(&lesson("nope")).await,
            Err(BackendError::NotFound)
        );
        let module = ModuleId::new("module-01").unwrap();
        assert_eq!(backend.get_module_resume_point(&module).await, Ok(None));
    }

    #[test]
    fn offline_classification() {
        assert!(BackendError::Timeout.is_offline());
        assert!(BackendError::Network("refused".into()).is_offline());
        assert!(!BackendError::NotFound.is_offline());
        assert!(!BackendError::Server { status: 500 }.is_offline());
    }
}
