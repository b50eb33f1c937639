use thiserror::Error;

/// Rejected input shapes, raised before any state is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("lesson id must not be empty")]
    EmptyLessonId,

    #[error("module id must not be empty")]
    EmptyModuleId,

    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },
}
