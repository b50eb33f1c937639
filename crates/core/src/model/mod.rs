mod curriculum;
mod ids;
mod lesson;
mod module;
pub mod raw;
mod resume;
mod snapshot;
mod update;

pub use curriculum::Curriculum;
pub use ids::{LessonId, ModuleId};
pub use lesson::LessonProgress;
pub use module::ModuleProgress;
pub use raw::{LessonProgressPayload, RawLessonProgress, RawProgressSnapshot};
pub use resume::ResumePoint;
pub use snapshot::{CalendarDay, ProgressOverview, ProgressSnapshot, SnapshotSource};
pub use update::{ProgressUpdate, ValidatedUpdate};
