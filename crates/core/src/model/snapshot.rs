use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{LessonId, LessonProgress};

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    #[default]
    Server,
    /// Offline or unauthenticated fallback built from local state.
    Local,
}

/// One day of the activity calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    #[serde(default)]
    pub xp: u64,
    #[serde(default, alias = "lessons_completed")]
    pub lessons_completed: u32,
}

/// Aggregate counters reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressOverview {
    #[serde(alias = "xp_total", alias = "xp")]
    pub xp_total: u64,
    pub level: u32,
    #[serde(alias = "streak_days", alias = "streak")]
    pub streak_days: u32,
    #[serde(alias = "completed_lessons")]
    pub completed_lessons: u32,
    #[serde(alias = "total_lessons")]
    pub total_lessons: u32,
    #[serde(alias = "modules_completed")]
    pub modules_completed: u32,
    /// Overall completion in `[0, 100]`.
    #[serde(alias = "global_percent", alias = "percent")]
    pub global_percent: f64,
    pub calendar: Vec<CalendarDay>,
}

/// Point-in-time view of a user's progress.
///
/// Snapshots are replaced wholesale on every refetch; nothing merges two
/// snapshots field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub overview: ProgressOverview,
    pub lessons: Vec<LessonProgress>,
    pub source: SnapshotSource,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn new(
        overview: ProgressOverview,
        lessons: Vec<LessonProgress>,
        source: SnapshotSource,
    ) -> Self {
        Self {
            overview,
            lessons,
            source,
        }
    }

    #[must_use]
    pub fn lesson(&self, lesson_id: &LessonId) -> Option<&LessonProgress> {
        self.lessons.iter().find(|l| l.lesson_id() == lesson_id)
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.source == SnapshotSource::Local
    }
}
