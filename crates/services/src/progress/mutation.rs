use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use progress_core::Clock;
use progress_core::MergeMode;
use progress_core::helpers::{merge_optimistic, resolve_module_id};
use progress_core::model::{
    LessonId, LessonProgress, LessonProgressPayload, ModuleId, ModuleProgress, ProgressUpdate,
    RawLessonProgress, ResumePoint, ValidatedUpdate,
};
use storage::{BackendError, ProgressBackend, ReactiveCache};

use crate::cache::CacheInvalidationCoordinator;
use crate::config::EngineConfig;
use crate::error::MutationError;
use crate::events::{ProgressChange, ProgressEvent, ProgressEventBus};
use crate::progress::store::{ProgressStore, module_progress_in};

/// Writes lesson progress and keeps everything derived from it consistent.
///
/// A write goes: optimistic merge into the store, backend call (bounded by
/// the request timeout, one retry on 429), merge of the server's answer,
/// cache invalidation, then events. Failures after the optimistic step leave
/// the local record in place.
#[derive(Clone)]
pub struct ProgressMutationService {
    pub(super) clock: Clock,
    pub(super) backend: Arc<dyn ProgressBackend>,
    pub(super) store: ProgressStore,
    pub(super) invalidation: CacheInvalidationCoordinator,
    pub(super) events: ProgressEventBus,
    pub(super) config: EngineConfig,
}

impl ProgressMutationService {
    #[must_use]
    pub fn new(
        clock: Clock,
        backend: Arc<dyn ProgressBackend>,
        cache: Arc<dyn ReactiveCache>,
        events: ProgressEventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            clock,
            backend,
            store: ProgressStore::new(),
            invalidation: CacheInvalidationCoordinator::new(cache),
            events,
            config,
        }
    }

    /// Read handle on the normalized state.
    #[must_use]
    pub fn store(&self) -> ProgressStore {
        self.store.clone()
    }

    #[must_use]
    pub fn events(&self) -> &ProgressEventBus {
        &self.events
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Record progress on a lesson.
    ///
    /// Progress never goes down through this call and time is added to the
    /// stored total. A 404 from the backend means the server has no row yet;
    /// the local record is returned as the result.
    ///
    /// # Errors
    ///
    /// Returns `MutationError::Validation` for an empty id or non-finite
    /// numbers (nothing is changed), or the backend error class once the
    /// optimistic record is already stored.
    pub async fn update_lesson_progress(
        &self,
        lesson_id: &str,
        update: ProgressUpdate,
    ) -> Result<LessonProgress, MutationError> {
        let lesson_id = LessonId::new(lesson_id)?;
        let update = update.validate()?;
        self.write(lesson_id, update, MergeMode::Advance).await
    }

    /// Set a lesson back to zero progress and zero time.
    ///
    /// # Errors
    ///
    /// Same as `update_lesson_progress`.
    pub async fn reset_lesson_progress(
        &self,
        lesson_id: &str,
        module_id: Option<ModuleId>,
    ) -> Result<LessonProgress, MutationError> {
        let lesson_id = LessonId::new(lesson_id)?;
        let mut update = ProgressUpdate::progress(0.0);
        update.module_id = module_id;
        let update = update.validate()?;
        self.write(lesson_id, update, MergeMode::Reset).await
    }

    /// Current record of a lesson: the local one if known, otherwise the
    /// backend's. A lesson the backend has never seen reads as zero.
    ///
    /// # Errors
    ///
    /// Returns `MutationError` for an empty id or a failed backend read.
    pub async fn lesson_progress(&self, lesson_id: &str) -> Result<LessonProgress, MutationError> {
        let lesson_id = LessonId::new(lesson_id)?;
        if let Some(local) = self.store.lesson(&lesson_id) {
            return Ok(local);
        }

        match self
            .with_recovery(|| self.backend.fetch_lesson_progress(&lesson_id))
            .await
        {
            Ok(raw) => {
                let record = self.normalize_response(raw, &lesson_id, None);
                self.store.reconcile(record)
            }
            Err(BackendError::NotFound) => {
                debug!(lesson_id = %lesson_id, "no progress recorded yet");
                let module_id = self.resolve_module(None, None, &lesson_id);
                let zero = self
                    .config
                    .recovery
                    .recover_not_found(lesson_id, module_id, self.clock.now());
                self.store.reconcile(zero)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Where to resume a module. Local resume state of the lesson wins over
    /// the server's copy.
    ///
    /// # Errors
    ///
    /// Returns `MutationError` for a failed backend read; a 404 is `Ok(None)`.
    pub async fn module_resume_point(
        &self,
        module_id: &ModuleId,
    ) -> Result<Option<ResumePoint>, MutationError> {
        let point = match self
            .with_recovery(|| self.backend.get_module_resume_point(module_id))
            .await
        {
            Ok(point) => point,
            Err(BackendError::NotFound) => None,
            Err(err) => return Err(err.into()),
        };

        Ok(point.map(|mut point| {
            if let Some(local) = self.store.lesson(&point.lesson_id) {
                if let Some(position) = local.scroll_position() {
                    point.scroll_position = Some(position);
                }
                if let Some(section) = local.last_viewed_section() {
                    point.last_viewed_section = Some(section.to_owned());
                }
                point.progress = Some(point.progress.unwrap_or(0.0).max(local.progress()));
            }
            point
        }))
    }

    /// Completion of a module from the normalized state, using the
    /// curriculum's lesson count when it has one.
    ///
    /// # Errors
    ///
    /// Returns `MutationError::State` if the store is unavailable.
    pub fn module_progress(&self, module_id: &ModuleId) -> Result<ModuleProgress, MutationError> {
        let total = self.config.curriculum.lesson_count(module_id);
        self.store
            .read(|state, _| module_progress_in(state, module_id, total))
    }

    async fn write(
        &self,
        lesson_id: LessonId,
        update: ValidatedUpdate,
        mode: MergeMode,
    ) -> Result<LessonProgress, MutationError> {
        let now = self.clock.now();
        let (previous, optimistic) = self.store.apply(&lesson_id, |current| {
            let module_id = self.resolve_module(
                update.module_id.as_ref(),
                current.and_then(LessonProgress::module_id),
                &lesson_id,
            );
            merge_optimistic(current, &lesson_id, module_id, &update, mode, now)
        })?;
        let was_completed = previous.as_ref().is_some_and(LessonProgress::is_completed);
        debug!(
            lesson_id = %lesson_id,
            progress = optimistic.progress(),
            reset = mode == MergeMode::Reset,
            "optimistic progress applied"
        );

        let payload = LessonProgressPayload::from_record(
            &optimistic,
            update.time_spent_delta,
            mode == MergeMode::Reset,
        );
        self.store.begin_write(&lesson_id)?;
        let outcome = self
            .with_recovery(|| self.backend.put_lesson_progress(&lesson_id, &payload))
            .await;
        self.store.finish_write(&lesson_id);

        let record = match outcome {
            Ok(raw) => {
                let server = self.normalize_response(raw, &lesson_id, optimistic.module_id());
                self.store.reconcile(server)?
            }
            Err(BackendError::NotFound) => {
                debug!(lesson_id = %lesson_id, "server has no progress row yet; keeping local record");
                self.store.lesson(&lesson_id).unwrap_or(optimistic)
            }
            Err(err) => {
                warn!(lesson_id = %lesson_id, error = %err, "progress write failed; local state kept");
                return Err(err.into());
            }
        };

        let report = self
            .invalidation
            .invalidate_progress_cache(record.module_id(), Some(&lesson_id))
            .await;
        if !report.is_clean() {
            warn!(failures = report.failures.len(), "progress cache partly invalidated");
        }
        self.publish(was_completed, &record);
        Ok(record)
    }

    fn publish(&self, was_completed: bool, record: &LessonProgress) {
        let change = ProgressChange::from_record(record);
        let newly_completed = change.completed && !was_completed;
        self.events.emit_lossy(ProgressEvent::Updated(change.clone()));
        if newly_completed {
            info!(lesson_id = %record.lesson_id(), "lesson completed");
            self.events.emit_lossy(ProgressEvent::LessonCompleted(change));
        }
    }

    fn resolve_module(
        &self,
        explicit: Option<&ModuleId>,
        existing: Option<&ModuleId>,
        lesson_id: &LessonId,
    ) -> Option<ModuleId> {
        resolve_module_id(
            explicit,
            existing,
            lesson_id,
            self.config.default_module_id.as_ref(),
        )
    }

    /// Normalize a server record, keyed to `lesson_id` when the server
    /// leaves the id out.
    fn normalize_response(
        &self,
        mut raw: RawLessonProgress,
        lesson_id: &LessonId,
        module_hint: Option<&ModuleId>,
    ) -> LessonProgress {
        if raw.lesson_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
            raw.lesson_id = Some(lesson_id.to_string());
        }
        if raw.module_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
            raw.module_id = self
                .resolve_module(module_hint, None, lesson_id)
                .map(|m| m.to_string());
        }
        match raw.normalize() {
            Ok(record) if record.lesson_id() == lesson_id => record,
            Ok(record) => {
                warn!(
                    expected = %lesson_id,
                    received = %record.lesson_id(),
                    "server answered for another lesson; ignoring its record"
                );
                LessonProgress::zero(lesson_id.clone(), module_hint.cloned())
            }
            Err(err) => {
                warn!(lesson_id = %lesson_id, error = %err, "unreadable server record");
                LessonProgress::zero(lesson_id.clone(), module_hint.cloned())
            }
        }
    }

    /// Run a backend call under the request timeout, retrying rate-limited
    /// calls as the recovery policy allows.
    pub(super) async fn with_recovery<T, F, Fut>(&self, mut call: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let policy = self.config.recovery;
        let mut retries = 0;
        loop {
            let outcome = tokio::time::timeout(self.config.request_timeout, call())
                .await
                .unwrap_or(Err(BackendError::Timeout));
            match outcome {
                Err(BackendError::RateLimited { retry_after })
                    if policy.should_retry_rate_limit(retries) =>
                {
                    let delay = policy.rate_limit_delay(retry_after);
                    info!(?delay, "rate limited; retrying once");
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                other => return other,
            }
        }
    }
}
