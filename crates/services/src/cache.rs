use std::sync::Arc;

use tracing::{debug, warn};

use progress_core::model::{LessonId, ModuleId};
use storage::{CacheError, CacheKey, ReactiveCache};

use crate::keys;

/// Outcome of one invalidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub invalidated: Vec<CacheKey>,
    /// Keys beyond the named ones that the broad matcher marked stale.
    pub matched_by_prefix: usize,
    pub failures: Vec<(String, CacheError)>,
}

impl InvalidationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Marks progress queries stale after a write.
///
/// Invalidation errs on the side of too much: the overview and the broad
/// progress prefix are always hit. Failures are logged and collected; they
/// never abort the remaining keys.
#[derive(Clone)]
pub struct CacheInvalidationCoordinator {
    cache: Arc<dyn ReactiveCache>,
}

impl CacheInvalidationCoordinator {
    #[must_use]
    pub fn new(cache: Arc<dyn ReactiveCache>) -> Self {
        Self { cache }
    }

    /// Keys that a write to `module_id` / `lesson_id` makes stale.
    #[must_use]
    pub fn keys_for(module_id: Option<&ModuleId>, lesson_id: Option<&LessonId>) -> Vec<CacheKey> {
        let mut keys = vec![keys::overview()];
        if let Some(module_id) = module_id {
            keys.push(keys::module_progress(module_id));
            keys.push(keys::module_resume(module_id));
            keys.push(keys::module_lessons(module_id));
        }
        if let Some(lesson_id) = lesson_id {
            keys.push(keys::lesson_progress(lesson_id));
        }
        keys
    }

    pub async fn invalidate_progress_cache(
        &self,
        module_id: Option<&ModuleId>,
        lesson_id: Option<&LessonId>,
    ) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        for key in Self::keys_for(module_id, lesson_id) {
            match self.cache.invalidate(&key).await {
                Ok(()) => report.invalidated.push(key),
                Err(err) => {
                    warn!(key = %key, error = %err, "cache invalidation failed");
                    report.failures.push((key.to_string(), err));
                }
            }
        }

        let matcher = keys::all_progress();
        match self.cache.invalidate_matching(&matcher).await {
            Ok(hit) => {
                report.matched_by_prefix = hit.saturating_sub(report.invalidated.len());
            }
            Err(err) => {
                warn!(matcher = %matcher, error = %err, "cache invalidation failed");
                report.failures.push((matcher.to_string(), err));
            }
        }

        debug!(
            invalidated = report.invalidated.len(),
            failures = report.failures.len(),
            "progress cache invalidated"
        );
        report
    }
}
