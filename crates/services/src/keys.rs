//! Cache keys of the progress queries.

use progress_core::model::{LessonId, ModuleId};
use storage::{CacheKey, KeyMatcher};

pub const PROGRESS_PREFIX: &str = "/api/progress";

#[must_use]
pub fn overview() -> CacheKey {
    CacheKey::new(format!("{PROGRESS_PREFIX}/overview"))
}

#[must_use]
pub fn module_progress(module_id: &ModuleId) -> CacheKey {
    CacheKey::new(format!("{PROGRESS_PREFIX}/modules/{module_id}"))
}

#[must_use]
pub fn module_resume(module_id: &ModuleId) -> CacheKey {
    CacheKey::new(format!("{PROGRESS_PREFIX}/modules/{module_id}/resume"))
}

#[must_use]
pub fn module_lessons(module_id: &ModuleId) -> CacheKey {
    CacheKey::new(format!("{PROGRESS_PREFIX}/modules/{module_id}/lessons"))
}

#[must_use]
pub fn lesson_progress(lesson_id: &LessonId) -> CacheKey {
    CacheKey::new(format!("{PROGRESS_PREFIX}/lessons/{lesson_id}"))
}

/// Every progress query, including ones this crate does not name.
#[must_use]
pub fn all_progress() -> KeyMatcher {
    KeyMatcher::Prefix(PROGRESS_PREFIX.to_owned())
}
