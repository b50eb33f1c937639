//! Shared error types for the services crate.

use std::time::Duration;

use thiserror::Error;

use progress_core::ValidationError;
use storage::{BackendError, HttpConfigError};

use crate::config::ConfigError;

/// Errors emitted by `ProgressMutationService`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("progress backend unreachable: {0}")]
    Offline(String),
    #[error("progress backend is rate limiting; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("progress backend failed with status {status}")]
    Server { status: u16 },
    #[error("not authorized to access progress")]
    Unauthorized,
    #[error("progress state unavailable: {0}")]
    State(String),
    #[error(transparent)]
    Backend(BackendError),
}

impl MutationError {
    /// Whether the local optimistic state is still valid and will be
    /// reconciled by a later write or refetch.
    #[must_use]
    pub fn keeps_local_state(&self) -> bool {
        matches!(self, Self::Offline(_) | Self::RateLimited { .. } | Self::Server { .. })
    }
}

impl From<BackendError> for MutationError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Network(reason) => Self::Offline(reason),
            BackendError::Timeout => Self::Offline("request timed out".into()),
            BackendError::RateLimited { retry_after } => Self::RateLimited {
                retry_after: retry_after.unwrap_or(progress_core::helpers::DEFAULT_RETRY_AFTER),
            },
            BackendError::Server { status } => Self::Server { status },
            BackendError::Unauthorized => Self::Unauthorized,
            other => Self::Backend(other),
        }
    }
}

/// Errors emitted while assembling the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Http(#[from] HttpConfigError),
    #[error("LEARN_PROGRESS_API_URL is not set")]
    MissingApiUrl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_to_recovery_classes() {
        assert_eq!(
            MutationError::from(BackendError::Timeout),
            MutationError::Offline("request timed out".into())
        );
        assert_eq!(
            MutationError::from(BackendError::RateLimited { retry_after: None }),
            MutationError::RateLimited {
                retry_after: Duration::from_secs(5)
            }
        );
        assert_eq!(
            MutationError::from(BackendError::Server { status: 503 }),
            MutationError::Server { status: 503 }
        );
        assert_eq!(
            MutationError::from(BackendError::Rejected { status: 422 }),
            MutationError::Backend(BackendError::Rejected { status: 422 })
        );
        assert!(MutationError::Offline("x".into()).keeps_local_state());
        assert!(!MutationError::Unauthorized.keeps_local_state());
    }
}
