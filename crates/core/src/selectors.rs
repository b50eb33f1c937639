//! Read-side projections over an optional snapshot.
//!
//! None of these panic, and all of them return zero when there is no snapshot
//! yet, so views can call them before the first fetch resolves.

use crate::model::{CalendarDay, LessonId, ModuleId, ModuleProgress, ProgressSnapshot};

/// Completion of one module as seen by the snapshot.
///
/// A lesson belongs to the module when its id contains the module id or its
/// recorded module matches. The total is the number of such lessons in the
/// snapshot.
#[must_use]
pub fn select_module_progress(
    module_id: &ModuleId,
    snapshot: Option<&ProgressSnapshot>,
) -> ModuleProgress {
    let Some(snapshot) = snapshot else {
        return ModuleProgress::default();
    };

    let (completed, total) = snapshot
        .lessons
        .iter()
        .filter(|lesson| {
            lesson.lesson_id().as_str().contains(module_id.as_str())
                || lesson.module_id() == Some(module_id)
        })
        .fold((0_u32, 0_u32), |(done, total), lesson| {
            (
                done.saturating_add(u32::from(lesson.is_completed())),
                total.saturating_add(1),
            )
        });

    ModuleProgress::from_counts(completed, total)
}

/// Progress of a single lesson in `[0, 100]`.
#[must_use]
pub fn select_lesson_percent(lesson_id: &LessonId, snapshot: Option<&ProgressSnapshot>) -> f64 {
    snapshot
        .and_then(|s| s.lesson(lesson_id))
        .map_or(0.0, |l| l.completion_percentage())
}

#[must_use]
pub fn select_global_percent(snapshot: Option<&ProgressSnapshot>) -> f64 {
    snapshot.map_or(0.0, |s| s.overview.global_percent)
}

#[must_use]
pub fn select_completed_lessons_count(snapshot: Option<&ProgressSnapshot>) -> u32 {
    snapshot.map_or(0, |s| s.overview.completed_lessons)
}

#[must_use]
pub fn select_total_lessons_count(snapshot: Option<&ProgressSnapshot>) -> u32 {
    snapshot.map_or(0, |s| s.overview.total_lessons)
}

#[must_use]
pub fn select_modules_completed_count(snapshot: Option<&ProgressSnapshot>) -> u32 {
    snapshot.map_or(0, |s| s.overview.modules_completed)
}

#[must_use]
pub fn select_xp_total(snapshot: Option<&ProgressSnapshot>) -> u64 {
    snapshot.map_or(0, |s| s.overview.xp_total)
}

#[must_use]
pub fn select_level(snapshot: Option<&ProgressSnapshot>) -> u32 {
    snapshot.map_or(0, |s| s.overview.level)
}

#[must_use]
pub fn select_streak_days(snapshot: Option<&ProgressSnapshot>) -> u32 {
    snapshot.map_or(0, |s| s.overview.streak_days)
}

#[must_use]
pub fn select_calendar(snapshot: Option<&ProgressSnapshot>) -> &[CalendarDay] {
    match snapshot {
        Some(s) => &s.overview.calendar,
        None => &[],
    }
}
