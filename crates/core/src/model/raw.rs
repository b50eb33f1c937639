//! Transport shapes and the ingestion boundary.
//!
//! Backends have sent lesson progress under several names over time. Every
//! spelling is accepted here and collapsed into `LessonProgress` exactly once;
//! nothing past this module looks at raw field names again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::completion::progress_value;
use crate::error::ValidationError;
use crate::helpers::infer_module_id;
use crate::model::{
    LessonId, LessonProgress, ModuleId, ProgressOverview, ProgressSnapshot, SnapshotSource,
};

/// Lesson progress as it arrives over the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawLessonProgress {
    #[serde(alias = "lesson_id", alias = "leccionId")]
    pub lesson_id: Option<String>,
    /// Row id. Only keys the record when no lesson id field is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "module_id", alias = "moduloId")]
    pub module_id: Option<String>,
    #[serde(alias = "progreso")]
    pub progress: Option<f64>,
    #[serde(
        alias = "completion_percentage",
        alias = "percentage",
        alias = "porcentajeCompletado"
    )]
    pub completion_percentage: Option<f64>,
    #[serde(alias = "time_spent", alias = "tiempoDedicado")]
    pub time_spent: Option<f64>,
    #[serde(alias = "scroll_position")]
    pub scroll_position: Option<f64>,
    #[serde(alias = "last_viewed_section", alias = "ultimaSeccion")]
    pub last_viewed_section: Option<String>,
    #[serde(alias = "last_accessed")]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(alias = "updated_at")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Informational only; completion is always re-derived from progress.
    #[serde(alias = "completado")]
    pub completed: Option<bool>,
}

impl RawLessonProgress {
    /// Collapse the transport shape into a normalized record.
    ///
    /// A missing module id is inferred from the lesson id when it follows the
    /// `module-NN-...` convention. Negative or non-finite time is read as zero.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyLessonId` when neither a lesson id nor
    /// a row id is present.
    pub fn normalize(&self) -> Result<LessonProgress, ValidationError> {
        let key = self
            .lesson_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .or(self.id.as_deref())
            .unwrap_or_default();
        let lesson_id = LessonId::new(key)?;
        let module_id = self
            .module_id
            .clone()
            .and_then(ModuleId::new)
            .or_else(|| infer_module_id(&lesson_id));

        let progress = progress_value(self.progress, self.completion_percentage);
        let record = LessonProgress::new(lesson_id, module_id, progress, seconds(self.time_spent))
            .with_resume_state(self.scroll_position, self.last_viewed_section.clone())
            .with_timestamps(self.last_accessed, self.updated_at);

        if let Some(flag) = self.completed {
            if flag != record.is_completed() {
                debug!(
                    lesson_id = %record.lesson_id(),
                    reported = flag,
                    derived = record.is_completed(),
                    "ignoring transport completed flag"
                );
            }
        }

        Ok(record)
    }
}

/// Snapshot payload before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawProgressSnapshot {
    pub overview: Option<ProgressOverview>,
    #[serde(
        alias = "lessonProgress",
        alias = "lesson_progress",
        deserialize_with = "readable_entries"
    )]
    pub lessons: Vec<RawLessonProgress>,
    pub source: Option<SnapshotSource>,
}

impl RawProgressSnapshot {
    /// Normalize every lesson entry, dropping the ones that cannot be keyed.
    #[must_use]
    pub fn ingest(self) -> ProgressSnapshot {
        let mut lessons = Vec::with_capacity(self.lessons.len());
        for (index, raw) in self.lessons.iter().enumerate() {
            match raw.normalize() {
                Ok(record) => lessons.push(record),
                Err(err) => warn!(index, error = %err, "skipping snapshot lesson entry"),
            }
        }

        ProgressSnapshot::new(
            self.overview.unwrap_or_default(),
            lessons,
            self.source.unwrap_or_default(),
        )
    }
}

/// Lesson entries one by one, so an unreadable entry is dropped instead of
/// failing the whole snapshot.
fn readable_entries<'de, D>(deserializer: D) -> Result<Vec<RawLessonProgress>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!(index, error = %err, "skipping unreadable snapshot lesson entry");
                None
            }
        })
        .collect())
}

/// Body of a lesson progress write.
///
/// Both `progress` and `completionPercentage` are sent so older endpoints
/// that only read the percentage keep working.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgressPayload {
    pub lesson_id: LessonId,
    pub module_id: Option<ModuleId>,
    pub progress: f64,
    pub completion_percentage: f64,
    pub time_spent_delta: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_position: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_viewed_section: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reset: bool,
}

impl LessonProgressPayload {
    /// Payload for the merged local record plus the delta that produced it.
    #[must_use]
    pub fn from_record(record: &LessonProgress, time_spent_delta: u64, reset: bool) -> Self {
        Self {
            lesson_id: record.lesson_id().clone(),
            module_id: record.module_id().cloned(),
            progress: record.progress(),
            completion_percentage: record.completion_percentage(),
            time_spent_delta,
            scroll_position: record.scroll_position(),
            last_viewed_section: record.last_viewed_section().map(str::to_owned),
            reset,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn seconds(raw: Option<f64>) -> u64 {
    match raw {
        Some(v) if v.is_finite() && v > 0.0 => v.floor() as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legacy_spanish_fields() {
        let raw: RawLessonProgress = serde_json::from_str(
            r#"{"leccionId":"module-01-lesson-02","porcentajeCompletado":50,"tiempoDedicado":90}"#,
        )
        .unwrap();
        let record = raw.normalize().unwrap();
        assert_eq!(record.lesson_id().as_str(), "module-01-lesson-02");
        assert!((record.progress() - 0.5).abs() < 1e-12);
        assert_eq!(record.time_spent(), 90);
        assert_eq!(record.module_id().map(ModuleId::as_str), Some("module-01"));
    }

    #[test]
    fn completed_flag_is_not_trusted() {
        let raw: RawLessonProgress = serde_json::from_str(
            r#"{"lessonId":"intro","progress":0.8,"completed":true}"#,
        )
        .unwrap();
        assert!(!raw.normalize().unwrap().is_completed());

        let raw: RawLessonProgress = serde_json::from_str(
            r#"{"lessonId":"intro","progress":1,"completed":false}"#,
        )
        .unwrap();
        assert!(raw.normalize().unwrap().is_completed());
    }

    #[test]
    fn explicit_module_beats_inference() {
        let raw = RawLessonProgress {
            lesson_id: Some("module-01-lesson-01".into()),
            module_id: Some("algebra".into()),
            ..RawLessonProgress::default()
        };
        let record = raw.normalize().unwrap();
        assert_eq!(record.module_id().map(ModuleId::as_str), Some("algebra"));
    }

    #[test]
    fn negative_time_reads_as_zero() {
        let raw = RawLessonProgress {
            lesson_id: Some("l".into()),
            time_spent: Some(-12.0),
            ..RawLessonProgress::default()
        };
        assert_eq!(raw.normalize().unwrap().time_spent(), 0);
    }

    #[test]
    fn missing_lesson_id_is_rejected() {
        let raw = RawLessonProgress::default();
        assert_eq!(raw.normalize(), Err(ValidationError::EmptyLessonId));
    }

    #[test]
    fn snapshot_ingest_skips_unkeyed_entries() {
        let raw: RawProgressSnapshot = serde_json::from_str(
            r#"{
                "overview": {"xpTotal": 120, "streakDays": 3, "totalLessons": 4},
                "lessons": [
                    {"lessonId": "module-01-lesson-01", "progress": 1},
                    {"progress": 1},
                    {"lesson_id": "module-01-lesson-02", "completion_percentage": 30}
                ]
            }"#,
        )
        .unwrap();
        let snapshot = raw.ingest();
        assert_eq!(snapshot.lessons.len(), 2);
        assert_eq!(snapshot.overview.xp_total, 120);
        assert_eq!(snapshot.overview.streak_days, 3);
        assert_eq!(snapshot.source, SnapshotSource::Server);
    }

    #[test]
    fn row_id_next_to_lesson_id_does_not_key_the_record() {
        let raw: RawLessonProgress = serde_json::from_str(
            r#"{"id":"cuid-1","lessonId":"module-01-lesson-01","progress":1}"#,
        )
        .unwrap();
        let record = raw.normalize().unwrap();
        assert_eq!(record.lesson_id().as_str(), "module-01-lesson-01");
        assert!(record.is_completed());
    }

    #[test]
    fn row_id_keys_the_record_when_nothing_else_does() {
        let raw: RawLessonProgress =
            serde_json::from_str(r#"{"id":"module-03-lesson-02","progress":0.25}"#).unwrap();
        let record = raw.normalize().unwrap();
        assert_eq!(record.lesson_id().as_str(), "module-03-lesson-02");
        assert_eq!(record.module_id().map(ModuleId::as_str), Some("module-03"));
    }

    #[test]
    fn snapshot_survives_mixed_entries() {
        let raw: RawProgressSnapshot = serde_json::from_str(
            r#"{
                "overview": {"xpTotal": 40},
                "lessons": [
                    {"id": "cuid-1", "lessonId": "module-01-lesson-01", "progress": 1},
                    {"lessonId": "module-01-lesson-02", "progress": "0.5"},
                    {"id": "module-01-lesson-03", "completionPercentage": 20},
                    "not an entry",
                    {"lessonId": "module-01-lesson-04", "progress": 0.5}
                ]
            }"#,
        )
        .unwrap();
        let snapshot = raw.ingest();
        let ids: Vec<&str> = snapshot
            .lessons
            .iter()
            .map(|lesson| lesson.lesson_id().as_str())
            .collect();
        assert_eq!(
            ids,
            ["module-01-lesson-01", "module-01-lesson-03", "module-01-lesson-04"]
        );
        assert!(snapshot.lessons[0].is_completed());
        assert_eq!(snapshot.overview.xp_total, 40);
    }

    #[test]
    fn snapshot_with_null_or_missing_lessons_is_empty() {
        let raw: RawProgressSnapshot = serde_json::from_str(r#"{"lessons": null}"#).unwrap();
        assert!(raw.ingest().lessons.is_empty());
        let raw: RawProgressSnapshot = serde_json::from_str("{}").unwrap();
        assert!(raw.ingest().lessons.is_empty());
    }
}
