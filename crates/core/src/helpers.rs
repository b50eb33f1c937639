//! Pure helpers behind optimistic writes: clamping, module inference, merges
//! and the recovery policy for rate-limited or missing records.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::completion::clamp_unit;
use crate::model::{LessonId, LessonProgress, ModuleId, ValidatedUpdate};

/// Server-provided delay is replaced by this when absent.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Fixed timeout for each backend call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

const MODULE_PREFIX: &str = "module-";

//
// ─── CLAMPING ──────────────────────────────────────────────────────────────────
//

/// Clamp a progress fraction into `[0, 1]`; NaN becomes `0`.
#[must_use]
pub fn clamp_progress(value: f64) -> f64 {
    clamp_unit(value)
}

/// Clamp a legacy percentage into `[0, 100]`; NaN becomes `0`.
#[must_use]
pub fn clamp_percentage(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

//
// ─── MODULE IDS ────────────────────────────────────────────────────────────────
//

/// Infer a module from a lesson id of the form `module-NN-...`.
///
/// `module-02-lesson-03` yields `module-02`. The digits must be followed by
/// `-`, `/` or the end of the id; anything else yields `None`.
#[must_use]
pub fn infer_module_id(lesson_id: &LessonId) -> Option<ModuleId> {
    let rest = lesson_id.as_str().strip_prefix(MODULE_PREFIX)?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    match rest.as_bytes().get(digits).copied() {
        None | Some(b'-' | b'/') => {
            ModuleId::new(format!("{MODULE_PREFIX}{}", &rest[..digits]))
        }
        Some(_) => None,
    }
}

/// Pick the module a write belongs to.
///
/// Order: the caller's explicit id, the module already on record, inference
/// from the lesson id, then the configured fallback.
#[must_use]
pub fn resolve_module_id(
    explicit: Option<&ModuleId>,
    existing: Option<&ModuleId>,
    lesson_id: &LessonId,
    fallback: Option<&ModuleId>,
) -> Option<ModuleId> {
    explicit
        .or(existing)
        .cloned()
        .or_else(|| infer_module_id(lesson_id))
        .or_else(|| fallback.cloned())
}

//
// ─── RECORDS & MERGES ──────────────────────────────────────────────────────────
//

/// The "no progress yet" record.
#[must_use]
pub fn default_lesson_progress(
    lesson_id: LessonId,
    module_id: Option<ModuleId>,
    now: DateTime<Utc>,
) -> LessonProgress {
    LessonProgress::zero(lesson_id, module_id).with_timestamps(None, Some(now))
}

/// How an update combines with the stored record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeMode {
    /// Progress only moves up; time accumulates.
    #[default]
    Advance,
    /// Explicit reset: progress and time are replaced.
    Reset,
}

/// Apply an optimistic update on top of the current record.
///
/// Returns a fresh record; `current` is never modified, so a caller either
/// stores the whole result or nothing.
#[must_use]
pub fn merge_optimistic(
    current: Option<&LessonProgress>,
    lesson_id: &LessonId,
    module_id: Option<ModuleId>,
    update: &ValidatedUpdate,
    mode: MergeMode,
    now: DateTime<Utc>,
) -> LessonProgress {
    let mut next = current
        .cloned()
        .unwrap_or_else(|| LessonProgress::zero(lesson_id.clone(), None));

    match mode {
        MergeMode::Advance => {
            if let Some(incoming) = update.progress {
                next.set_progress(next.progress().max(incoming));
            }
            next.set_time_spent(next.time_spent().saturating_add(update.time_spent_delta));
        }
        MergeMode::Reset => {
            next.set_progress(update.progress.unwrap_or(0.0));
            next.set_time_spent(update.time_spent_delta);
        }
    }

    if let Some(position) = update.scroll_position {
        next.set_scroll_position(position);
    }
    if let Some(section) = &update.last_viewed_section {
        next.set_last_viewed_section(section.clone());
    }
    if module_id.is_some() {
        next.set_module_id(module_id);
    }
    next.touch(now);
    next
}

/// Fold a server response into the local record.
///
/// Uses the same never-regress rule as optimistic writes, so a late response
/// cannot undo a newer local value. Local resume state wins because it is the
/// most recent thing the reader did.
#[must_use]
pub fn merge_server_record(local: &LessonProgress, server: &LessonProgress) -> LessonProgress {
    let mut merged = local.clone();
    merged.set_progress(local.progress().max(server.progress()));
    merged.set_time_spent(local.time_spent().max(server.time_spent()));

    if local.module_id().is_none() {
        merged.set_module_id(server.module_id().cloned());
    }
    if local.scroll_position().is_none() {
        if let Some(position) = server.scroll_position() {
            merged.set_scroll_position(position);
        }
    }
    if local.last_viewed_section().is_none() {
        if let Some(section) = server.last_viewed_section() {
            merged.set_last_viewed_section(section.to_owned());
        }
    }
    merged.set_updated_at(later(local.updated_at(), server.updated_at()));
    merged.set_last_accessed(later(local.last_accessed(), server.last_accessed()));
    merged
}

fn later(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

//
// ─── RECOVERY POLICY ───────────────────────────────────────────────────────────
//

/// How the mutation path recovers from 429 and 404 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Delay used when the server sends no `retryAfter`.
    pub default_retry_after: Duration,
    /// Upper bound on any server-provided delay.
    pub max_retry_after: Duration,
    /// Automatic retries after a rate-limit response.
    pub rate_limit_retries: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            default_retry_after: DEFAULT_RETRY_AFTER,
            max_retry_after: Duration::from_secs(60),
            rate_limit_retries: 1,
        }
    }
}

impl RecoveryPolicy {
    /// Delay before retrying a rate-limited call.
    #[must_use]
    pub fn rate_limit_delay(&self, retry_after: Option<Duration>) -> Duration {
        retry_after
            .unwrap_or(self.default_retry_after)
            .min(self.max_retry_after)
    }

    /// Whether another attempt is allowed after `retries_so_far` retries.
    #[must_use]
    pub fn should_retry_rate_limit(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.rate_limit_retries
    }

    /// A missing record means "nothing recorded yet": start from zero.
    #[must_use]
    pub fn recover_not_found(
        &self,
        lesson_id: LessonId,
        module_id: Option<ModuleId>,
        now: DateTime<Utc>,
    ) -> LessonProgress {
        default_lesson_progress(lesson_id, module_id, now)
    }
}
