use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::completion::{clamp_unit, is_complete_value};
use crate::model::{LessonId, ModuleId};

/// Normalized progress for one (user, lesson) pair.
///
/// `progress` is always within `[0, 1]` and is the only input to completion.
/// The legacy percentage is derived from it rather than stored next to it, so
/// the two can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    lesson_id: LessonId,
    module_id: Option<ModuleId>,
    progress: f64,
    time_spent: u64,
    scroll_position: Option<f64>,
    last_viewed_section: Option<String>,
    last_accessed: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl LessonProgress {
    /// Build a record, clamping `progress` into `[0, 1]`.
    #[must_use]
    pub fn new(
        lesson_id: LessonId,
        module_id: Option<ModuleId>,
        progress: f64,
        time_spent: u64,
    ) -> Self {
        Self {
            lesson_id,
            module_id,
            progress: clamp_unit(progress),
            time_spent,
            scroll_position: None,
            last_viewed_section: None,
            last_accessed: None,
            updated_at: None,
        }
    }

    /// Zero-progress record used when nothing is known yet.
    #[must_use]
    pub fn zero(lesson_id: LessonId, module_id: Option<ModuleId>) -> Self {
        Self::new(lesson_id, module_id, 0.0, 0)
    }

    #[must_use]
    pub fn with_resume_state(
        mut self,
        scroll_position: Option<f64>,
        last_viewed_section: Option<String>,
    ) -> Self {
        self.scroll_position = scroll_position.filter(|v| v.is_finite());
        self.last_viewed_section = last_viewed_section;
        self
    }

    #[must_use]
    pub fn with_timestamps(
        mut self,
        last_accessed: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.last_accessed = last_accessed;
        self.updated_at = updated_at;
        self
    }

    #[must_use]
    pub fn lesson_id(&self) -> &LessonId {
        &self.lesson_id
    }

    #[must_use]
    pub fn module_id(&self) -> Option<&ModuleId> {
        self.module_id.as_ref()
    }

    #[must_use]
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Legacy mirror of `progress` in `[0, 100]`.
    #[must_use]
    pub fn completion_percentage(&self) -> f64 {
        self.progress * 100.0
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        is_complete_value(self.progress)
    }

    #[must_use]
    pub fn time_spent(&self) -> u64 {
        self.time_spent
    }

    #[must_use]
    pub fn scroll_position(&self) -> Option<f64> {
        self.scroll_position
    }

    #[must_use]
    pub fn last_viewed_section(&self) -> Option<&str> {
        self.last_viewed_section.as_deref()
    }

    #[must_use]
    pub fn last_accessed(&self) -> Option<DateTime<Utc>> {
        self.last_accessed
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub(crate) fn set_progress(&mut self, progress: f64) {
        self.progress = clamp_unit(progress);
    }

    pub(crate) fn set_time_spent(&mut self, seconds: u64) {
        self.time_spent = seconds;
    }

    pub(crate) fn set_scroll_position(&mut self, position: f64) {
        if position.is_finite() {
            self.scroll_position = Some(position);
        }
    }

    pub(crate) fn set_last_viewed_section(&mut self, section: String) {
        self.last_viewed_section = Some(section);
    }

    pub(crate) fn set_module_id(&mut self, module_id: Option<ModuleId>) {
        self.module_id = module_id;
    }

    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        self.last_accessed = Some(at);
        self.updated_at = Some(at);
    }

    pub(crate) fn set_updated_at(&mut self, at: Option<DateTime<Utc>>) {
        self.updated_at = at;
    }

    pub(crate) fn set_last_accessed(&mut self, at: Option<DateTime<Utc>>) {
        self.last_accessed = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(id: &str) -> LessonId {
        LessonId::new(id).unwrap()
    }

    #[test]
    fn progress_is_clamped_on_construction() {
        let high = LessonProgress::new(lesson("a"), None, 4.2, 0);
        assert!(high.is_completed());
        let low = LessonProgress::new(lesson("b"), None, -1.0, 0);
        assert!(low.progress().abs() < f64::EPSILON);
        let nan = LessonProgress::new(lesson("c"), None, f64::NAN, 0);
        assert!(nan.progress().abs() < f64::EPSILON);
    }

    #[test]
    fn percentage_mirrors_progress() {
        let record = LessonProgress::new(lesson("a"), None, 0.42, 10);
        assert!((record.completion_percentage() - 42.0).abs() < 1e-9);
        assert!(!record.is_completed());
    }

    #[test]
    fn non_finite_scroll_is_dropped() {
        let record =
            LessonProgress::zero(lesson("a"), None).with_resume_state(Some(f64::INFINITY), None);
        assert_eq!(record.scroll_position(), None);
    }
}
