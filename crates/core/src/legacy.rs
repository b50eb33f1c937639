//! Compatibility shapes for views that predate the normalized store.
//!
//! Older consumers read a flat `lessonId → record` map, a set of completed
//! keys, and whole-number module percentages. Every shape here is derived with
//! the same completion rule as the rest of the engine.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

pub use crate::completion::{is_completed, progress_value};
use crate::model::{Curriculum, LessonId, LessonProgress, ModuleId, ModuleProgress, ProgressSnapshot};
use crate::state::ProgressByModule;

/// Flat record in the shape older views expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyLessonRecord {
    pub lesson_id: String,
    pub module_id: Option<String>,
    pub progress: f64,
    pub completion_percentage: f64,
    pub completed: bool,
    pub time_spent: u64,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl LegacyLessonRecord {
    fn from_record(record: &LessonProgress) -> Self {
        let value = progress_value(Some(record.progress()), None);
        Self {
            lesson_id: record.lesson_id().to_string(),
            module_id: record.module_id().map(ToString::to_string),
            progress: value,
            completion_percentage: value * 100.0,
            completed: is_completed(Some(value), None),
            time_spent: record.time_spent(),
            last_accessed: record.last_accessed(),
        }
    }
}

/// Flatten the normalized state into `lessonId → record`.
///
/// Unassigned lessons are included; they only lack a module id.
#[must_use]
pub fn create_progress_map(progress: &ProgressByModule) -> BTreeMap<String, LegacyLessonRecord> {
    progress
        .lessons()
        .map(|record| {
            (
                record.lesson_id().to_string(),
                LegacyLessonRecord::from_record(record),
            )
        })
        .collect()
}

/// Keys of every completed lesson, from both the normalized state and the
/// snapshot.
///
/// The two sources are unioned: the snapshot can be fresher than the store
/// right after a cold load, and the store is fresher right after a write.
/// Each completed lesson contributes its bare id and a compound
/// `moduleId-lessonId` key.
#[must_use]
pub fn get_completed_lessons(
    progress: &ProgressByModule,
    snapshot: Option<&ProgressSnapshot>,
) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();

    for (module_id, lessons) in progress.modules() {
        for record in lessons.lessons_by_id().values() {
            if is_completed(Some(record.progress()), None) {
                keys.insert(record.lesson_id().to_string());
                keys.insert(compound_key(module_id, record.lesson_id()));
            }
        }
    }
    for record in progress.unassigned() {
        if is_completed(Some(record.progress()), None) {
            keys.insert(record.lesson_id().to_string());
        }
    }

    if let Some(snapshot) = snapshot {
        for record in &snapshot.lessons {
            if !is_completed(Some(record.progress()), None) {
                continue;
            }
            let id = record.lesson_id().as_str();
            keys.insert(id.to_owned());
            if let Some((head, tail)) = split_compound_id(id) {
                keys.insert(format!("{head}-{tail}"));
            }
            if let Some(module_id) = record.module_id() {
                keys.insert(compound_key(module_id, record.lesson_id()));
            }
        }
    }

    keys
}

/// Split an id carrying an embedded module segment.
///
/// Splits on the last `/` when there is one, otherwise on the last `-`.
/// This is a heuristic: `module-01-fundamentals-lesson-02` splits into
/// `module-01-fundamentals-lesson` and `02`, which is not a real module id.
#[must_use]
pub fn split_compound_id(id: &str) -> Option<(&str, &str)> {
    let at = id.rfind('/').or_else(|| id.rfind('-'))?;
    let (head, tail) = (&id[..at], &id[at + 1..]);
    if head.is_empty() || tail.is_empty() {
        None
    } else {
        Some((head, tail))
    }
}

/// `moduleId-lessonId`, unless the lesson id already starts with its module.
fn compound_key(module_id: &ModuleId, lesson_id: &LessonId) -> String {
    let module = module_id.as_str();
    let lesson = lesson_id.as_str();
    let prefixed = lesson
        .strip_prefix(module)
        .is_some_and(|rest| rest.starts_with('-') || rest.starts_with('/'));
    if prefixed {
        match split_compound_id(lesson) {
            Some((head, tail)) if lesson.contains('/') => format!("{head}-{tail}"),
            _ => lesson.to_owned(),
        }
    } else {
        format!("{module}-{lesson}")
    }
}

/// Module aggregate from the normalized state against an authoritative count.
#[must_use]
pub fn get_module_progress_legacy(
    progress: &ProgressByModule,
    module_id: &ModuleId,
    total_lessons: u32,
) -> ModuleProgress {
    let completed = progress
        .module(module_id)
        .map_or(0, crate::state::ModuleLessons::completed_count);
    ModuleProgress::from_counts(completed, total_lessons)
}

/// `moduleId → whole-number percent` for every module in the curriculum.
#[must_use]
pub fn legacy_module_percentages(
    progress: &ProgressByModule,
    curriculum: &Curriculum,
) -> BTreeMap<String, u8> {
    curriculum
        .modules()
        .map(|(module_id, total)| {
            let module = get_module_progress_legacy(progress, module_id, total);
            (module_id.to_string(), module.rounded_percentage())
        })
        .collect()
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

    fn module(id: &str) -> ModuleId {
        ModuleId::new(id).unwrap()
    }

    #[test]
    fn progress_map_rederives_completion() {
        let state = ProgressByModule::from_records([
            record("a", Some("m1"), 1.0),
            record("b", Some("m1"), 0.99),
        ]);
        let map = create_progress_map(&state);
        assert!(map["a"].completed);
        assert!(!map["b"].completed);
        assert!((map["b"].completion_percentage - 99.0).abs() < 1e-9);
        assert_eq!(map["a"].module_id.as_deref(), Some("m1"));
    }

    #[test]
    fn completed_keys_include_bare_and_compound() {
        let state = ProgressByModule::from_records([
            record("intro", Some("m1"), 1.0),
            record("other", Some("m1"), 0.5),
        ]);
        let keys = get_completed_lessons(&state, None);
        assert!(keys.contains("intro"));
        assert!(keys.contains("m1-intro"));
        assert!(!keys.contains("other"));
        assert!(!keys.contains("m1-other"));
    }

    #[test]
    fn snapshot_and_store_are_unioned() {
        let state = ProgressByModule::from_records([record("module-01-lesson-01", None, 1.0)]);
        let snapshot = ProgressSnapshot {
            lessons: vec![record("module-01-lesson-02", None, 1.0)],
            ..ProgressSnapshot::default()
        };
        let keys = get_completed_lessons(&state, Some(&snapshot));
        assert!(keys.contains("module-01-lesson-01"));
        assert!(keys.contains("module-01-lesson-02"));
    }

    #[test]
    fn snapshot_dash_id_compound_matches_bare_id() {
        let snapshot = ProgressSnapshot {
            lessons: vec![record("module-02-lesson-03", None, 1.0)],
            ..ProgressSnapshot::default()
        };
        let keys = get_completed_lessons(&ProgressByModule::new(), Some(&snapshot));
        assert!(keys.contains("module-02-lesson-03"));
        assert_eq!(
            split_compound_id("module-02-lesson-03"),
            Some(("module-02-lesson", "03"))
        );
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn slash_ids_split_on_the_slash() {
        assert_eq!(
            split_compound_id("module-02/lesson-03"),
            Some(("module-02", "lesson-03"))
        );
        let snapshot = ProgressSnapshot {
            lessons: vec![record("module-02/lesson-03", None, 1.0)],
            ..ProgressSnapshot::default()
        };
        let keys = get_completed_lessons(&ProgressByModule::new(), Some(&snapshot));
        assert!(keys.contains("module-02/lesson-03"));
        assert!(keys.contains("module-02-lesson-03"));
    }

    #[test]
    fn multi_dash_ids_split_ambiguously() {
        assert_eq!(
            split_compound_id("module-01-fundamentals-lesson-02"),
            Some(("module-01-fundamentals-lesson", "02"))
        );
        assert_eq!(split_compound_id("intro"), None);
        assert_eq!(split_compound_id("trailing-"), None);
    }

    #[test]
    fn completed_flag_alone_never_completes() {
        let snapshot = ProgressSnapshot {
            lessons: vec![record("x", None, 0.5)],
            ..ProgressSnapshot::default()
        };
        assert!(get_completed_lessons(&ProgressByModule::new(), Some(&snapshot)).is_empty());
    }

    #[test]
    fn module_progress_counts_only_full_lessons() {
        let state = ProgressByModule::from_records([
            record("a", Some("m1"), 1.0),
            record("b", Some("m1"), 0.99),
            record("c", Some("m1"), 0.99),
        ]);
        let progress = get_module_progress_legacy(&state, &module("m1"), 3);
        assert_eq!(progress.completed_lessons, 1);
        assert!((progress.percent - 1.0 / 3.0).abs() < 1e-12);
        assert!(!progress.is_completed);

        let missing = get_module_progress_legacy(&state, &module("m9"), 4);
        assert!(missing.percent.abs() < f64::EPSILON);
    }

    #[test]
    fn module_percentages_use_curriculum_totals() {
        let state = ProgressByModule::from_records([
            record("a", Some("m1"), 1.0),
            record("b", Some("m2"), 1.0),
            record("c", Some("m2"), 1.0),
        ]);
        let curriculum = Curriculum::new()
            .with_module(module("m1"), 4)
            .with_module(module("m2"), 2)
            .with_module(module("m3"), 5);
        let percentages = legacy_module_percentages(&state, &curriculum);
        assert_eq!(percentages["m1"], 25);
        assert_eq!(percentages["m2"], 100);
        assert_eq!(percentages["m3"], 0);
    }
}
