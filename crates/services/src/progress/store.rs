use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use progress_core::helpers::merge_server_record;
use progress_core::legacy::{self, LegacyLessonRecord};
use progress_core::model::{
    Curriculum, LessonId, LessonProgress, ModuleId, ModuleProgress, ProgressSnapshot,
};
use progress_core::{ModuleLessons, ProgressByModule};

use crate::error::MutationError;

#[derive(Debug, Default)]
struct StoreState {
    by_module: ProgressByModule,
    snapshot: Option<Arc<ProgressSnapshot>>,
    in_flight: BTreeMap<LessonId, usize>,
}

/// The single normalized progress state of the process.
///
/// Anyone can read; only the mutation service writes. Every write is one
/// lock scope and the lock is never held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct ProgressStore {
    state: Arc<Mutex<StoreState>>,
}

impl ProgressStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, MutationError> {
        self.state
            .lock()
            .map_err(|e| MutationError::State(e.to_string()))
    }

    /// Run `f` against the current state and snapshot.
    ///
    /// # Errors
    ///
    /// Returns `MutationError::State` if the store lock is poisoned.
    pub fn read<R>(
        &self,
        f: impl FnOnce(&ProgressByModule, Option<&ProgressSnapshot>) -> R,
    ) -> Result<R, MutationError> {
        let state = self.lock()?;
        Ok(f(&state.by_module, state.snapshot.as_deref()))
    }

    #[must_use]
    pub fn lesson(&self, lesson_id: &LessonId) -> Option<LessonProgress> {
        self.read(|state, _| state.lesson(lesson_id).cloned())
            .ok()
            .flatten()
    }

    /// The last snapshot; replaced wholesale on every refresh.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<ProgressSnapshot>> {
        self.lock().ok().and_then(|state| state.snapshot.clone())
    }

    #[must_use]
    pub fn by_module(&self) -> ProgressByModule {
        self.read(|state, _| state.clone()).unwrap_or_default()
    }

    /// Module completion from the normalized state.
    ///
    /// `total_lessons` is the authoritative count; without one the number of
    /// recorded lessons is used.
    #[must_use]
    pub fn module_progress(
        &self,
        module_id: &ModuleId,
        total_lessons: Option<u32>,
    ) -> ModuleProgress {
        self.read(|state, _| module_progress_in(state, module_id, total_lessons))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn completed_lessons(&self) -> BTreeSet<String> {
        self.read(legacy::get_completed_lessons).unwrap_or_default()
    }

    #[must_use]
    pub fn progress_map(&self) -> BTreeMap<String, LegacyLessonRecord> {
        self.read(|state, _| legacy::create_progress_map(state))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn module_percentages(&self, curriculum: &Curriculum) -> BTreeMap<String, u8> {
        self.read(|state, _| legacy::legacy_module_percentages(state, curriculum))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_write_in_flight(&self, lesson_id: &LessonId) -> bool {
        self.lock()
            .map(|state| state.in_flight.contains_key(lesson_id))
            .unwrap_or(false)
    }

    /// Replace one lesson with `f(current)`; returns `(previous, next)`.
    pub(crate) fn apply(
        &self,
        lesson_id: &LessonId,
        f: impl FnOnce(Option<&LessonProgress>) -> LessonProgress,
    ) -> Result<(Option<LessonProgress>, LessonProgress), MutationError> {
        let mut state = self.lock()?;
        let previous = state.by_module.lesson(lesson_id).cloned();
        let next = f(previous.as_ref());
        state.by_module.upsert(next.clone());
        Ok((previous, next))
    }

    /// Fold a server record in with the never-regress merge.
    pub(crate) fn reconcile(&self, server: LessonProgress) -> Result<LessonProgress, MutationError> {
        let mut state = self.lock()?;
        let merged = match state.by_module.lesson(server.lesson_id()) {
            Some(local) => merge_server_record(local, &server),
            None => server,
        };
        state.by_module.upsert(merged.clone());
        Ok(merged)
    }

    pub(crate) fn begin_write(&self, lesson_id: &LessonId) -> Result<(), MutationError> {
        let mut state = self.lock()?;
        *state.in_flight.entry(lesson_id.clone()).or_insert(0) += 1;
        Ok(())
    }

    pub(crate) fn finish_write(&self, lesson_id: &LessonId) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        if let Some(count) = state.in_flight.get_mut(lesson_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.in_flight.remove(lesson_id);
            }
        }
    }

    /// Swap in a new snapshot and rebuild the normalized state from it.
    ///
    /// Lessons with a write still in flight keep their local record,
    /// max-merged with the snapshot's, so an older snapshot cannot undo them.
    pub(crate) fn replace_snapshot(
        &self,
        snapshot: ProgressSnapshot,
    ) -> Result<Arc<ProgressSnapshot>, MutationError> {
        let mut state = self.lock()?;
        let mut rebuilt = ProgressByModule::from_snapshot(&snapshot);
        for lesson_id in state.in_flight.keys() {
            let Some(local) = state.by_module.lesson(lesson_id) else {
                continue;
            };
            let kept = match rebuilt.lesson(lesson_id) {
                Some(server) => merge_server_record(local, server),
                None => local.clone(),
            };
            rebuilt.upsert(kept);
        }
        let snapshot = Arc::new(snapshot);
        state.by_module = rebuilt;
        state.snapshot = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Replace the snapshot with one derived from local state.
    pub(crate) fn fall_back_to_local(
        &self,
        curriculum: &Curriculum,
    ) -> Result<Arc<ProgressSnapshot>, MutationError> {
        let mut state = self.lock()?;
        let local = Arc::new(
            state
                .by_module
                .local_snapshot(state.snapshot.as_deref(), curriculum),
        );
        state.snapshot = Some(Arc::clone(&local));
        Ok(local)
    }
}

pub(crate) fn module_progress_in(
    state: &ProgressByModule,
    module_id: &ModuleId,
    total_lessons: Option<u32>,
) -> ModuleProgress {
    let lessons = state.module(module_id);
    let completed = lessons.map_or(0, ModuleLessons::completed_count);
    let total = total_lessons
        .unwrap_or_else(|| lessons.map_or(0, |m| u32::try_from(m.len()).unwrap_or(u32::MAX)));
    ModuleProgress::from_counts(completed, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::model::{ProgressOverview, SnapshotSource};

    fn lesson(id: &str) -> LessonId {
        LessonId::new(id).unwrap()
    }

    fn record(id: &str, progress: f64) -> LessonProgress {
        LessonProgress::new(lesson(id), ModuleId::new("module-01"), progress, 0)
    }

    fn snapshot(records: Vec<LessonProgress>) -> ProgressSnapshot {
        ProgressSnapshot::new(ProgressOverview::default(), records, SnapshotSource::Server)
    }

    #[test]
    fn apply_returns_previous_and_next() {
        let store = ProgressStore::new();
        let (prev, next) = store
            .apply(&lesson("module-01-a"), |_| record("module-01-a", 0.3))
            .unwrap();
        assert!(prev.is_none());
        assert!((next.progress() - 0.3).abs() < f64::EPSILON);

        let (prev, _) = store
            .apply(&lesson("module-01-a"), |current| {
                let current = current.unwrap();
                record("module-01-a", current.progress() + 0.1)
            })
            .unwrap();
        assert!((prev.unwrap().progress() - 0.3).abs() < f64::EPSILON);
        assert!((store.lesson(&lesson("module-01-a")).unwrap().progress() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn reconcile_never_lowers_local_progress() {
        let store = ProgressStore::new();
        store.apply(&lesson("module-01-a"), |_| record("module-01-a", 0.9)).unwrap();
        let merged = store.reconcile(record("module-01-a", 0.4)).unwrap();
        assert!((merged.progress() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_replacement_keeps_in_flight_lessons() {
        let store = ProgressStore::new();
        let a = lesson("module-01-a");
        let b = lesson("module-01-b");
        store.apply(&a, |_| record("module-01-a", 0.8)).unwrap();
        store.apply(&b, |_| record("module-01-b", 0.8)).unwrap();
        store.begin_write(&a).unwrap();

        store
            .replace_snapshot(snapshot(vec![
                record("module-01-a", 0.2),
                record("module-01-b", 0.2),
            ]))
            .unwrap();

        assert!((store.lesson(&a).unwrap().progress() - 0.8).abs() < f64::EPSILON);
        assert!((store.lesson(&b).unwrap().progress() - 0.2).abs() < f64::EPSILON);
        assert!(store.has_write_in_flight(&a));

        store.finish_write(&a);
        assert!(!store.has_write_in_flight(&a));
    }

    #[test]
    fn snapshots_are_replaced_not_merged() {
        let store = ProgressStore::new();
        store
            .replace_snapshot(snapshot(vec![record("module-01-a", 1.0)]))
            .unwrap();
        store
            .replace_snapshot(snapshot(vec![record("module-01-b", 0.5)]))
            .unwrap();
        let current = store.snapshot().unwrap();
        assert_eq!(current.lessons.len(), 1);
        assert!(store.lesson(&lesson("module-01-a")).is_none());
    }

    #[test]
    fn module_progress_prefers_authoritative_total() {
        let store = ProgressStore::new();
        store.apply(&lesson("module-01-a"), |_| record("module-01-a", 1.0)).unwrap();
        store.apply(&lesson("module-01-b"), |_| record("module-01-b", 0.5)).unwrap();
        let module = ModuleId::new("module-01").unwrap();

        let recorded = store.module_progress(&module, None);
        assert_eq!((recorded.completed_lessons, recorded.total_lessons), (1, 2));

        let authoritative = store.module_progress(&module, Some(4));
        assert!((authoritative.percent - 0.25).abs() < f64::EPSILON);
        assert!(store.completed_lessons().contains("module-01-a"));
        assert_eq!(store.progress_map().len(), 2);
    }

    #[test]
    fn local_fallback_is_marked_local() {
        let store = ProgressStore::new();
        store.apply(&lesson("module-01-a"), |_| record("module-01-a", 1.0)).unwrap();
        let local = store.fall_back_to_local(&Curriculum::new()).unwrap();
        assert!(local.is_local());
        assert_eq!(local.overview.completed_lessons, 1);
        assert!(store.snapshot().unwrap().is_local());
    }
}
