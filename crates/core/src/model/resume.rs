use serde::{Deserialize, Serialize};

use crate::model::{LessonId, ModuleId};

/// "Continue where you left off" marker for a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePoint {
    #[serde(alias = "module_id")]
    pub module_id: ModuleId,
    #[serde(alias = "lesson_id")]
    pub lesson_id: LessonId,
    #[serde(default, alias = "scroll_position")]
    pub scroll_position: Option<f64>,
    #[serde(default, alias = "last_viewed_section")]
    pub last_viewed_section: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}
