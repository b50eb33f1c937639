//! Normalized per-module progress: moduleId → lessonId → record.

use std::collections::BTreeMap;

use crate::helpers::merge_server_record;
use crate::model::{
    Curriculum, LessonId, LessonProgress, ModuleId, ModuleProgress, ProgressOverview,
    ProgressSnapshot, SnapshotSource,
};

/// Lessons recorded for one module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleLessons {
    lessons_by_id: BTreeMap<LessonId, LessonProgress>,
}

impl ModuleLessons {
    #[must_use]
    pub fn lessons_by_id(&self) -> &BTreeMap<LessonId, LessonProgress> {
        &self.lessons_by_id
    }

    #[must_use]
    pub fn get(&self, lesson_id: &LessonId) -> Option<&LessonProgress> {
        self.lessons_by_id.get(lesson_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lessons_by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lessons_by_id.is_empty()
    }

    /// Number of lessons at exactly full progress.
    #[must_use]
    pub fn completed_count(&self) -> u32 {
        let n = self
            .lessons_by_id
            .values()
            .filter(|l| l.is_completed())
            .count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }
}

/// Working copy of a user's progress, keyed by module.
///
/// Lessons whose module could not be resolved live in a separate bucket and do
/// not count towards any module until a later write assigns them one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressByModule {
    modules: BTreeMap<ModuleId, ModuleLessons>,
    unassigned: BTreeMap<LessonId, LessonProgress>,
}

impl ProgressByModule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the normalized view of a freshly fetched snapshot.
    ///
    /// Duplicate lesson entries are folded with the never-regress merge.
    #[must_use]
    pub fn from_snapshot(snapshot: &ProgressSnapshot) -> Self {
        Self::from_records(snapshot.lessons.iter().cloned())
    }

    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = LessonProgress>) -> Self {
        let mut state = Self::new();
        for record in records {
            let folded = match state.lesson(record.lesson_id()) {
                Some(existing) => merge_server_record(existing, &record),
                None => record,
            };
            state.upsert(folded);
        }
        state
    }

    #[must_use]
    pub fn module(&self, module_id: &ModuleId) -> Option<&ModuleLessons> {
        self.modules.get(module_id)
    }

    pub fn modules(&self) -> impl Iterator<Item = (&ModuleId, &ModuleLessons)> {
        self.modules.iter()
    }

    /// Lessons excluded from module aggregation.
    pub fn unassigned(&self) -> impl Iterator<Item = &LessonProgress> {
        self.unassigned.values()
    }

    #[must_use]
    pub fn lesson(&self, lesson_id: &LessonId) -> Option<&LessonProgress> {
        self.unassigned.get(lesson_id).or_else(|| {
            self.modules
                .values()
                .find_map(|module| module.lessons_by_id.get(lesson_id))
        })
    }

    /// Every record, assigned ones first.
    pub fn lessons(&self) -> impl Iterator<Item = &LessonProgress> {
        self.modules
            .values()
            .flat_map(|m| m.lessons_by_id.values())
            .chain(self.unassigned.values())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.values().map(ModuleLessons::len).sum::<usize>() + self.unassigned.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace a record, moving it between buckets if its module
    /// changed.
    pub fn upsert(&mut self, record: LessonProgress) {
        let lesson_id = record.lesson_id().clone();
        self.remove(&lesson_id);
        match record.module_id().cloned() {
            Some(module_id) => {
                self.modules
                    .entry(module_id)
                    .or_default()
                    .lessons_by_id
                    .insert(lesson_id, record);
            }
            None => {
                self.unassigned.insert(lesson_id, record);
            }
        }
    }

    pub fn remove(&mut self, lesson_id: &LessonId) -> Option<LessonProgress> {
        if let Some(record) = self.unassigned.remove(lesson_id) {
            return Some(record);
        }
        let mut removed = None;
        self.modules.retain(|_, module| {
            if removed.is_none() {
                removed = module.lessons_by_id.remove(lesson_id);
            }
            !module.lessons_by_id.is_empty()
        });
        removed
    }

    /// Offline stand-in for a server snapshot.
    ///
    /// Counters the client cannot compute (XP, level, streak, calendar) are
    /// carried over from `previous` when there is one.
    #[must_use]
    pub fn local_snapshot(
        &self,
        previous: Option<&ProgressSnapshot>,
        curriculum: &Curriculum,
    ) -> ProgressSnapshot {
        let lessons: Vec<LessonProgress> = self.lessons().cloned().collect();
        let prev = previous.map(|s| &s.overview);

        let completed = count(lessons.iter().filter(|l| l.is_completed()).count());
        let total = if curriculum.is_empty() {
            prev.map_or(0, |o| o.total_lessons).max(count(lessons.len()))
        } else {
            curriculum.total_lessons()
        };
        let modules_completed = if curriculum.is_empty() {
            prev.map_or(0, |o| o.modules_completed)
        } else {
            count(
                curriculum
                    .modules()
                    .filter(|(id, lesson_count)| {
                        let done = self.module(id).map_or(0, ModuleLessons::completed_count);
                        ModuleProgress::from_counts(done, *lesson_count).is_completed
                    })
                    .count(),
            )
        };
        let global_percent = ModuleProgress::from_counts(completed, total).percent * 100.0;

        let overview = ProgressOverview {
            xp_total: prev.map_or(0, |o| o.xp_total),
            level: prev.map_or(0, |o| o.level),
            streak_days: prev.map_or(0, |o| o.streak_days),
            completed_lessons: completed,
            total_lessons: total,
            modules_completed,
            global_percent,
            calendar: prev.map(|o| o.calendar.clone()).unwrap_or_default(),
        };

        ProgressSnapshot::new(overview, lessons, SnapshotSource::Local)
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lesson: &str, module: Option<&str>, progress: f64) -> LessonProgress {
        LessonProgress::new(
            LessonId::new(lesson).unwrap(),
            module.and_then(ModuleId::new),
            progress,
            0,
        )
    }

    #[test]
    fn groups_by_module_and_keeps_unassigned_apart() {
        let state = ProgressByModule::from_records([
            record("a", Some("m1"), 1.0),
            record("b", Some("m1"), 0.2),
            record("c", None, 1.0),
        ]);
        let m1 = state.module(&ModuleId::new("m1").unwrap()).unwrap();
        assert_eq!(m1.len(), 2);
        assert_eq!(m1.completed_count(), 1);
        assert_eq!(state.unassigned().count(), 1);
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn upsert_moves_lesson_when_module_resolves() {
        let mut state = ProgressByModule::from_records([record("a", None, 0.5)]);
        state.upsert(record("a", Some("m2"), 0.5));
        assert_eq!(state.unassigned().count(), 0);
        assert!(state.module(&ModuleId::new("m2").unwrap()).is_some());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn duplicate_snapshot_entries_keep_highest_progress() {
        let state =
            ProgressByModule::from_records([record("a", Some("m"), 1.0), record("a", Some("m"), 0.3)]);
        assert!(state.lesson(&LessonId::new("a").unwrap()).unwrap().is_completed());
    }

    #[test]
    fn remove_drops_empty_modules() {
        let mut state = ProgressByModule::from_records([record("a", Some("m"), 0.1)]);
        assert!(state.remove(&LessonId::new("a").unwrap()).is_some());
        assert!(state.is_empty());
        assert_eq!(state.modules().count(), 0);
    }

    #[test]
    fn local_snapshot_uses_curriculum_totals() {
        let state = ProgressByModule::from_records([
            record("a", Some("m1"), 1.0),
            record("b", Some("m1"), 1.0),
            record("c", Some("m2"), 0.4),
        ]);
        let curriculum = Curriculum::new()
            .with_module(ModuleId::new("m1").unwrap(), 2)
            .with_module(ModuleId::new("m2").unwrap(), 2);
        let previous = ProgressSnapshot {
            overview: ProgressOverview {
                xp_total: 300,
                streak_days: 4,
                ..ProgressOverview::default()
            },
            ..ProgressSnapshot::default()
        };

        let local = state.local_snapshot(Some(&previous), &curriculum);
        assert_eq!(local.source, SnapshotSource::Local);
        assert_eq!(local.overview.completed_lessons, 2);
        assert_eq!(local.overview.total_lessons, 4);
        assert_eq!(local.overview.modules_completed, 1);
        assert!((local.overview.global_percent - 50.0).abs() < 1e-9);
        assert_eq!(local.overview.xp_total, 300);
        assert_eq!(local.overview.streak_days, 4);
    }
}
